//! Fan-out nodes: tee, splitter and stream demultiplexer.
//!
//! All three share one shape: an input queue feeding a fan element whose
//! output pads are handed to named branches. Branches are parallel, so
//! unlike chain children they can be added and removed while the node is
//! linked and running; each branch gets a stream id from a
//! lowest-free-first slot pool.
//!
//! The demultiplexer variant exists because its fan element cannot
//! allocate output pads once the graph is running. It therefore requests
//! its entire pad set at construction time, bounded by `max_branches`,
//! and never gives a pad back to the engine; released slots simply make
//! their pad available to the next branch.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::engine::{BinHandle, ElementHandle, Engine, GraphState, PadDirection, PadHandle};
use crate::error::{Error, Result};
use crate::slots::SlotPool;

use super::{Bintr, Component, Elementr, Linkable, ParentKind, Rejected};

/// Behavioral variant of a fan-out node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeeKind {
    /// Duplicate the full stream to every branch.
    MultiSink,
    /// Duplicate the full stream into parallel processing paths.
    Splitter,
    /// Route each input stream to the branch with the matching id.
    Demuxer,
}

impl TeeKind {
    /// Short label for diagnostics and element naming.
    pub fn label(self) -> &'static str {
        match self {
            TeeKind::MultiSink => "tee",
            TeeKind::Splitter => "splitter",
            TeeKind::Demuxer => "demuxer",
        }
    }
}

/// How the fan element's output pads are obtained.
#[derive(Debug)]
enum PadAllocation {
    /// Request a pad from the engine per branch, release it on removal.
    OnDemand,
    /// Fixed pad set requested up front; slot id indexes into it.
    Preallocated(SmallVec<[PadHandle; 8]>),
}

#[derive(Debug)]
struct TeeBranch {
    slot: usize,
    bound: Option<PadHandle>,
    component: Component,
}

/// Fan-out node with named branches.
#[derive(Debug)]
pub struct TeeBintr {
    core: Bintr,
    kind: TeeKind,
    fan: ElementHandle,
    branches: BTreeMap<String, TeeBranch>,
    slots: SlotPool,
    pads: PadAllocation,
}

impl TeeBintr {
    /// Create a tee that duplicates its input to any number of branches.
    pub fn multi_sink(engine: &Engine, name: &str) -> Result<Self> {
        Self::build(engine, name, TeeKind::MultiSink, None)
    }

    /// Create a splitter; same fan behavior, named for parallel paths.
    pub fn splitter(engine: &Engine, name: &str) -> Result<Self> {
        Self::build(engine, name, TeeKind::Splitter, None)
    }

    /// Create a stream demultiplexer with a fixed branch capacity.
    ///
    /// All `max_branches` fan pads are allocated here, while allocation
    /// is still permitted; see the module docs.
    pub fn demuxer(engine: &Engine, name: &str, max_branches: usize) -> Result<Self> {
        if max_branches == 0 {
            return Err(Error::Creation {
                name: name.to_string(),
                reason: "a demuxer needs at least one branch slot".to_string(),
            });
        }
        Self::build(engine, name, TeeKind::Demuxer, Some(max_branches))
    }

    fn build(
        engine: &Engine,
        name: &str,
        kind: TeeKind,
        max_branches: Option<usize>,
    ) -> Result<Self> {
        let mut core = Bintr::new(engine, name)?;
        let queue = Elementr::new(engine, "queue", &format!("{}-queue", name))?;
        let fan_kind = match kind {
            TeeKind::Demuxer => "demux",
            _ => "tee",
        };
        let fan_elem = Elementr::new(engine, fan_kind, &format!("{}-{}", name, kind.label()))?;
        let fan = fan_elem.handle();
        core.add_element(queue).map_err(Error::from)?;
        core.add_element(fan_elem).map_err(Error::from)?;

        let (slots, pads) = match max_branches {
            Some(max) => {
                let mut set = SmallVec::new();
                for _ in 0..max {
                    set.push(engine.request_pad(fan, PadDirection::Output)?);
                }
                (SlotPool::bounded(max), PadAllocation::Preallocated(set))
            }
            None => (SlotPool::unbounded(), PadAllocation::OnDemand),
        };

        Ok(Self {
            core,
            kind,
            fan,
            branches: BTreeMap::new(),
            slots,
            pads,
        })
    }

    /// Name of the fan-out node.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Which fan-out variant this is.
    pub fn kind(&self) -> TeeKind {
        self.kind
    }

    /// Branch capacity, if bounded.
    pub fn max_branches(&self) -> Option<usize> {
        self.slots.capacity()
    }

    /// Number of attached branches. Internal plumbing does not count.
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// Borrow a branch component by name.
    pub fn branch(&self, name: &str) -> Option<&Component> {
        self.branches.get(name).map(|b| &b.component)
    }

    /// Stream id assigned to a branch.
    pub fn stream_id(&self, name: &str) -> Option<usize> {
        self.branches.get(name).map(|b| b.slot)
    }

    /// Branches in name order.
    pub fn branches(&self) -> impl Iterator<Item = (&str, &Component)> {
        self.branches
            .iter()
            .map(|(name, b)| (name.as_str(), &b.component))
    }

    /// Engine handle of the internal fan element, for diagnostics.
    pub fn fan_element(&self) -> ElementHandle {
        self.fan
    }

    /// Whether the node's internals are wired.
    pub fn is_linked(&self) -> bool {
        self.core.is_linked()
    }

    /// Current state of the fan-out bin.
    pub fn state(&self) -> Result<GraphState> {
        self.core.state()
    }

    pub(crate) fn bin(&self) -> BinHandle {
        self.core.bin()
    }

    /// Attach a branch under a fresh stream id.
    ///
    /// If the node is already linked the branch is wired immediately and
    /// brought to the node's state, so branches can join a playing
    /// graph. On any failure the attach is fully undone and the
    /// component travels back in the error.
    pub fn add_branch(&mut self, component: Component) -> std::result::Result<(), Rejected<Component>> {
        if let Err(error) = component.accepts_parent(ParentKind::Tee, self.core.name()) {
            return Err(Rejected::new(component, error));
        }
        if self.branches.contains_key(component.name()) {
            let error = Error::DuplicateName {
                container: self.core.name().to_string(),
                name: component.name().to_string(),
            };
            return Err(Rejected::new(component, error));
        }
        let Some(slot) = self.slots.acquire() else {
            let error = Error::Capacity {
                name: self.core.name().to_string(),
                capacity: self.slots.capacity().unwrap_or_default(),
            };
            return Err(Rejected::new(component, error));
        };
        let child_bin = component.bin();
        let engine = self.core.engine().clone();
        if let Err(error) = engine.add_bin_to_bin(self.core.bin(), child_bin) {
            self.slots.release(slot);
            return Err(Rejected::new(component, error));
        }

        let mut branch = TeeBranch {
            slot,
            bound: None,
            component,
        };
        if self.is_linked() {
            let name = self.core.name().to_string();
            if let Err(error) =
                Self::bind_branch(&engine, self.fan, &self.pads, &name, &mut branch)
            {
                let _ = engine.remove_bin_from_bin(self.core.bin(), child_bin);
                self.slots.release(slot);
                return Err(Rejected::new(branch.component, error));
            }
            if let Err(e) = engine.sync_bin_with_parent(child_bin) {
                tracing::warn!(
                    "failed to sync late branch '{}' of '{}': {}",
                    branch.component.name(),
                    name,
                    e
                );
            }
        }

        let key = branch.component.name().to_string();
        tracing::debug!(
            "added branch '{}' to '{}' (stream {})",
            key,
            self.core.name(),
            slot
        );
        self.branches.insert(key, branch);
        Ok(())
    }

    /// Detach a branch and hand it back.
    ///
    /// A wired branch is unbound first and its subtree dropped to
    /// `Null`, so removal works on a playing graph too. The stream id
    /// returns to the pool.
    pub fn remove_branch(&mut self, name: &str) -> Result<Component> {
        let mut branch = self.branches.remove(name).ok_or_else(|| Error::NotFound {
            container: self.core.name().to_string(),
            name: name.to_string(),
        })?;
        let engine = self.core.engine().clone();
        if let Some(pad) = branch.bound.take() {
            engine.unbind(pad);
            Self::give_back_pad(&engine, &self.pads, pad);
            branch.component.unlink_internal();
        }
        if let Err(e) = engine.remove_bin_from_bin(self.core.bin(), branch.component.bin()) {
            tracing::warn!("branch '{}' was not nested in '{}': {}", name, self.core.name(), e);
        }
        if let Err(e) = engine.set_state(branch.component.bin(), GraphState::Null) {
            tracing::warn!("failed to quiesce removed branch '{}': {}", name, e);
        }
        self.slots.release(branch.slot);
        Ok(branch.component)
    }

    /// Wire the internal queue and fan, then every unwired branch.
    ///
    /// Best effort in the same sense as chain linking: branches wired
    /// before a failure stay wired.
    pub fn link_all(&mut self) -> Result<()> {
        self.core.link_all()?;
        let engine = self.core.engine().clone();
        let tee_name = self.core.name().to_string();
        for (name, branch) in self.branches.iter_mut() {
            if branch.bound.is_some() {
                continue;
            }
            if let Err(e) = Self::bind_branch(&engine, self.fan, &self.pads, &tee_name, branch) {
                tracing::error!("linking branch '{}' of '{}' failed: {}", name, tee_name, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unwire every branch and the internal queue and fan.
    pub fn unlink_all(&mut self) {
        let engine = self.core.engine().clone();
        for (_, branch) in self.branches.iter_mut() {
            if let Some(pad) = branch.bound.take() {
                engine.unbind(pad);
                Self::give_back_pad(&engine, &self.pads, pad);
                branch.component.unlink_internal();
            }
        }
        self.core.unlink_all();
    }

    /// Input side of the node: the internal queue's input pad.
    pub fn upstream_pad(&self) -> Option<PadHandle> {
        self.core.upstream_pad()
    }

    /// Fan-out nodes expose no single output.
    pub fn downstream_pad(&self) -> Option<PadHandle> {
        self.core.downstream_pad()
    }

    fn bind_branch(
        engine: &Engine,
        fan: ElementHandle,
        pads: &PadAllocation,
        tee_name: &str,
        branch: &mut TeeBranch,
    ) -> Result<()> {
        branch.component.link_internal()?;
        let pad = match Self::take_pad(engine, fan, pads, tee_name, branch.slot) {
            Ok(pad) => pad,
            Err(e) => {
                branch.component.unlink_internal();
                return Err(e);
            }
        };
        let Some(sink) = branch.component.upstream_pad() else {
            Self::give_back_pad(engine, pads, pad);
            branch.component.unlink_internal();
            return Err(Error::Link {
                src: tee_name.to_string(),
                sink: branch.component.name().to_string(),
                reason: format!("branch '{}' accepts no input", branch.component.name()),
            });
        };
        if let Err(e) = engine.bind(pad, sink) {
            Self::give_back_pad(engine, pads, pad);
            branch.component.unlink_internal();
            return Err(e);
        }
        branch.bound = Some(pad);
        Ok(())
    }

    fn take_pad(
        engine: &Engine,
        fan: ElementHandle,
        pads: &PadAllocation,
        tee_name: &str,
        slot: usize,
    ) -> Result<PadHandle> {
        match pads {
            PadAllocation::OnDemand => engine.request_pad(fan, PadDirection::Output),
            PadAllocation::Preallocated(set) => {
                set.get(slot).copied().ok_or_else(|| Error::Capacity {
                    name: tee_name.to_string(),
                    capacity: set.len(),
                })
            }
        }
    }

    fn give_back_pad(engine: &Engine, pads: &PadAllocation, pad: PadHandle) {
        if matches!(pads, PadAllocation::OnDemand) {
            if let Err(e) = engine.release_pad(pad) {
                tracing::warn!("failed to release fan-out pad: {}", e);
            }
        }
    }
}

impl Linkable for TeeBintr {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        TeeBintr::upstream_pad(self)
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        TeeBintr::downstream_pad(self)
    }

    fn link_internal(&mut self) -> Result<()> {
        self.link_all()
    }

    fn unlink_internal(&mut self) {
        self.unlink_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Bintr;

    fn sink_branch(engine: &Engine, name: &str) -> Component {
        let mut bin = Bintr::new(engine, name).unwrap();
        bin.add_element(
            Elementr::new(engine, "queue", &format!("{}-q", name)).unwrap(),
        )
        .unwrap();
        bin.add_element(
            Elementr::new(engine, "fakesink", &format!("{}-sink", name)).unwrap(),
        )
        .unwrap();
        Component::Chain(bin)
    }

    #[test]
    fn test_multi_sink_fans_out_to_all_branches() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.add_branch(sink_branch(&engine, "b1")).unwrap();

        tee.link_all().unwrap();
        assert!(tee.is_linked());
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 2);
        for name in ["b0", "b1"] {
            let sink = tee.branch(name).unwrap().upstream_pad().unwrap();
            assert!(engine.pad_peer(sink).is_some());
        }
    }

    #[test]
    fn test_stream_ids_reuse_lowest_free() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.add_branch(sink_branch(&engine, "b1")).unwrap();
        tee.add_branch(sink_branch(&engine, "b2")).unwrap();
        assert_eq!(tee.stream_id("b1"), Some(1));

        tee.remove_branch("b1").unwrap();
        tee.add_branch(sink_branch(&engine, "b3")).unwrap();
        assert_eq!(tee.stream_id("b3"), Some(1));
        assert_eq!(tee.stream_id("b2"), Some(2));
        assert_eq!(tee.num_branches(), 3);
    }

    #[test]
    fn test_demuxer_preallocates_full_pad_set() {
        let engine = Engine::new();
        let tee = TeeBintr::demuxer(&engine, "dmx", 4).unwrap();
        assert_eq!(tee.max_branches(), Some(4));
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 4);
        assert_eq!(engine.request_pad_count(tee.fan_element()).unwrap(), 4);
    }

    #[test]
    fn test_demuxer_never_requests_past_construction() {
        let engine = Engine::new();
        let mut tee = TeeBintr::demuxer(&engine, "dmx", 2).unwrap();

        for round in 0..3 {
            let name = format!("b{}", round);
            tee.add_branch(sink_branch(&engine, &name)).unwrap();
            tee.link_all().unwrap();
            tee.remove_branch(&name).unwrap();
            tee.unlink_all();
        }
        // The lifetime request count never moves past the construction
        // allocation, and no pad was handed back.
        assert_eq!(engine.request_pad_count(tee.fan_element()).unwrap(), 2);
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 2);
    }

    #[test]
    fn test_demuxer_capacity_enforced() {
        let engine = Engine::new();
        let mut tee = TeeBintr::demuxer(&engine, "dmx", 2).unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.add_branch(sink_branch(&engine, "b1")).unwrap();

        let rejected = tee
            .add_branch(sink_branch(&engine, "b2"))
            .expect_err("third branch must not fit");
        assert!(matches!(rejected.error, Error::Capacity { capacity: 2, .. }));
        assert_eq!(rejected.child.name(), "b2");
        assert_eq!(tee.num_branches(), 2);
    }

    #[test]
    fn test_zero_capacity_demuxer_refused() {
        let engine = Engine::new();
        assert!(matches!(
            TeeBintr::demuxer(&engine, "dmx", 0).unwrap_err(),
            Error::Creation { .. }
        ));
    }

    #[test]
    fn test_branch_joins_playing_graph() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.link_all().unwrap();
        engine.set_state(tee.bin(), GraphState::Playing).unwrap();

        tee.add_branch(sink_branch(&engine, "late")).unwrap();
        let late = tee.branch("late").unwrap();
        assert!(engine.pad_peer(late.upstream_pad().unwrap()).is_some());
        assert_eq!(engine.state_of(late.bin()).unwrap(), GraphState::Playing);
    }

    #[test]
    fn test_demuxer_branch_joins_playing_graph_from_preallocated_pads() {
        let engine = Engine::new();
        let mut tee = TeeBintr::demuxer(&engine, "dmx", 2).unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.link_all().unwrap();
        engine.set_state(tee.bin(), GraphState::Playing).unwrap();

        // The demux kind refuses pad allocation while running; the
        // preallocated set makes the late add work regardless.
        tee.add_branch(sink_branch(&engine, "late")).unwrap();
        let late = tee.branch("late").unwrap();
        assert!(engine.pad_peer(late.upstream_pad().unwrap()).is_some());
        assert_eq!(engine.request_pad_count(tee.fan_element()).unwrap(), 2);
    }

    #[test]
    fn test_remove_wired_branch_releases_on_demand_pad() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        tee.add_branch(sink_branch(&engine, "b0")).unwrap();
        tee.add_branch(sink_branch(&engine, "b1")).unwrap();
        tee.link_all().unwrap();
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 2);

        let removed = tee.remove_branch("b0").unwrap();
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 1);
        assert_eq!(engine.state_of(removed.bin()).unwrap(), GraphState::Null);
        assert_eq!(tee.num_branches(), 1);
    }

    #[test]
    fn test_failed_branch_bind_unwinds_internals() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        // A branch that links internally but accepts no input.
        let mut rogue = Bintr::new(&engine, "rogue").unwrap();
        rogue
            .add_element(Elementr::new(&engine, "fakesrc", "rogue-src").unwrap())
            .unwrap();
        rogue
            .add_element(Elementr::new(&engine, "fakesink", "rogue-sink").unwrap())
            .unwrap();
        tee.add_branch(Component::Chain(rogue)).unwrap();

        assert!(matches!(tee.link_all().unwrap_err(), Error::Link { .. }));
        // The fan pad taken for the failed bind went back to the engine,
        // and the branch comes back with its internals unwound.
        assert_eq!(engine.live_request_pads(tee.fan_element()).unwrap(), 0);
        let removed = tee.remove_branch("rogue").unwrap();
        assert!(!removed.is_linked());
    }

    #[test]
    fn test_fan_out_under_fan_out_refused() {
        let engine = Engine::new();
        let mut tee = TeeBintr::multi_sink(&engine, "outer").unwrap();
        let inner = TeeBintr::multi_sink(&engine, "inner").unwrap();

        let rejected = tee
            .add_branch(Component::Tee(inner))
            .expect_err("nested fan-out must be refused");
        assert!(matches!(rejected.error, Error::InvalidParent { .. }));
    }

    #[test]
    fn test_tee_has_no_downstream_side() {
        let engine = Engine::new();
        let tee = TeeBintr::multi_sink(&engine, "fan").unwrap();
        assert!(tee.upstream_pad().is_some());
        assert!(tee.downstream_pad().is_none());
    }
}
