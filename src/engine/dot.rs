//! Graphviz rendering of the engine topology.
//!
//! Bins become nested `subgraph cluster` blocks, elements become nodes
//! labelled with their name and kind, and pad links become edges
//! labelled with the pad names on each side.

use std::collections::HashSet;

use super::{BinHandle, ElementHandle, PadDirection, Topology};

pub(crate) fn render(topo: &Topology, root: BinHandle) -> String {
    let root_name = topo
        .bins
        .get(&root)
        .map(|b| b.name.as_str())
        .unwrap_or("bin");

    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", root_name));
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, style=rounded];\n");

    let mut cluster = 0usize;
    render_bin(topo, root, &mut out, &mut cluster, 1);

    let members = subtree_elements(topo, root);
    for element in &members {
        let Some(raw) = topo.elements.get(element) else {
            continue;
        };
        let mut outputs: Vec<_> = raw.output.into_iter().collect();
        outputs.extend(
            raw.request_pads
                .iter()
                .copied()
                .filter(|p| pad_direction(topo, *p) == Some(PadDirection::Output)),
        );
        for pad in outputs {
            let Some(raw_pad) = topo.pads.get(&pad) else {
                continue;
            };
            let Some(peer) = raw_pad.peer else {
                continue;
            };
            let Some(peer_pad) = topo.pads.get(&peer) else {
                continue;
            };
            if !members.contains(&peer_pad.element) {
                continue;
            }
            let Some(peer_elem) = topo.elements.get(&peer_pad.element) else {
                continue;
            };
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{} -> {}\"];\n",
                raw.name, peer_elem.name, raw_pad.name, peer_pad.name
            ));
        }
    }

    out.push_str("}\n");
    out
}

fn render_bin(
    topo: &Topology,
    bin: BinHandle,
    out: &mut String,
    cluster: &mut usize,
    depth: usize,
) {
    let Some(raw) = topo.bins.get(&bin) else {
        return;
    };
    let pad = "  ".repeat(depth);
    out.push_str(&format!("{}subgraph cluster_{} {{\n", pad, cluster));
    *cluster += 1;
    out.push_str(&format!("{}  label=\"{}\";\n", pad, raw.name));
    for element in &raw.elements {
        if let Some(e) = topo.elements.get(element) {
            out.push_str(&format!(
                "{}  \"{}\" [label=\"{}\\n({})\"];\n",
                pad, e.name, e.name, e.kind.name
            ));
        }
    }
    for child in &raw.bins {
        render_bin(topo, *child, out, cluster, depth + 1);
    }
    out.push_str(&format!("{}}}\n", pad));
}

fn subtree_elements(topo: &Topology, root: BinHandle) -> HashSet<ElementHandle> {
    let mut members = HashSet::new();
    let mut pending = vec![root];
    while let Some(bin) = pending.pop() {
        if let Some(raw) = topo.bins.get(&bin) {
            members.extend(raw.elements.iter().copied());
            pending.extend(raw.bins.iter().copied());
        }
    }
    members
}

fn pad_direction(topo: &Topology, pad: super::PadHandle) -> Option<PadDirection> {
    topo.pads.get(&pad).map(|p| p.direction)
}
