//! Reference graph engine.
//!
//! The engine owns every element, bin and pad in the process and hands
//! out copyable handles to them. All topology lives behind one mutex, so
//! handles can be used from any thread; the composition layer in
//! [`crate::node`] and [`crate::pipeline`] builds its ownership tree on
//! top of these handles.
//!
//! The engine is deliberately structural: it tracks what exists, what is
//! linked to what and which state each bin is in. It does not move data.

pub mod dot;
pub mod element;
pub mod pad;

pub use element::{
    KindSpec, PropertyDefault, PropertySpec, PropertyValue, RequestPadSpec,
};
pub use pad::{PadDirection, PadHandle, PadInfo, PadPresence};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;

use crate::error::{Error, Result};

// ============================================================================
// States and handles
// ============================================================================

/// Lifecycle state of a bin and the elements inside it.
///
/// States are ordered: `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphState {
    /// Nothing allocated; the initial and final state.
    Null,
    /// Resources allocated but no data flowing.
    Ready,
    /// Data flow prepared but held.
    Paused,
    /// Data flowing.
    Playing,
}

impl GraphState {
    /// Whether this state counts as running for pad-allocation rules.
    pub fn is_running(self) -> bool {
        matches!(self, GraphState::Paused | GraphState::Playing)
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphState::Null => write!(f, "NULL"),
            GraphState::Ready => write!(f, "READY"),
            GraphState::Paused => write!(f, "PAUSED"),
            GraphState::Playing => write!(f, "PLAYING"),
        }
    }
}

/// Outcome of a completed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// State before the change.
    pub from: GraphState,
    /// State after the change.
    pub to: GraphState,
}

/// Opaque handle to an element owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Opaque handle to a bin owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinHandle(u64);

impl fmt::Display for BinHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bin#{}", self.0)
    }
}

// ============================================================================
// Topology storage
// ============================================================================

pub(crate) struct RawPad {
    pub(crate) name: String,
    pub(crate) element: ElementHandle,
    pub(crate) direction: PadDirection,
    pub(crate) presence: PadPresence,
    pub(crate) peer: Option<PadHandle>,
}

pub(crate) struct RawElement {
    pub(crate) name: String,
    pub(crate) kind: &'static KindSpec,
    pub(crate) props: HashMap<String, PropertyValue>,
    pub(crate) input: Option<PadHandle>,
    pub(crate) output: Option<PadHandle>,
    pub(crate) request_pads: SmallVec<[PadHandle; 4]>,
    pub(crate) requested_total: u64,
    pub(crate) parent: Option<BinHandle>,
}

pub(crate) struct RawBin {
    pub(crate) name: String,
    pub(crate) elements: Vec<ElementHandle>,
    pub(crate) bins: Vec<BinHandle>,
    pub(crate) parent: Option<BinHandle>,
    pub(crate) state: GraphState,
}

#[derive(Default)]
pub(crate) struct Topology {
    next_id: u64,
    pub(crate) elements: HashMap<ElementHandle, RawElement>,
    pub(crate) element_names: HashMap<String, ElementHandle>,
    pub(crate) bins: HashMap<BinHandle, RawBin>,
    pub(crate) bin_names: HashMap<String, BinHandle>,
    pub(crate) pads: HashMap<PadHandle, RawPad>,
}

impl Topology {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// "element.pad" description for link diagnostics.
    fn pad_desc(&self, pad: PadHandle) -> String {
        match self.pads.get(&pad) {
            Some(p) => match self.elements.get(&p.element) {
                Some(e) => format!("{}.{}", e.name, p.name),
                None => p.name.clone(),
            },
            None => pad.to_string(),
        }
    }

    fn effective_state(&self, element: ElementHandle) -> GraphState {
        self.elements
            .get(&element)
            .and_then(|e| e.parent)
            .and_then(|b| self.bins.get(&b))
            .map_or(GraphState::Null, |b| b.state)
    }

    fn is_ancestor(&self, ancestor: BinHandle, of: BinHandle) -> bool {
        let mut cursor = self.bins.get(&of).and_then(|b| b.parent);
        while let Some(bin) = cursor {
            if bin == ancestor {
                return true;
            }
            cursor = self.bins.get(&bin).and_then(|b| b.parent);
        }
        false
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Shared handle to the process-wide graph engine.
///
/// Cloning an `Engine` is cheap and yields a handle to the same
/// topology. Every constructor in the composition layer takes one.
#[derive(Clone, Default)]
pub struct Engine {
    topo: Arc<Mutex<Topology>>,
}

impl Engine {
    /// Create a fresh engine with an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    /// Instantiate an element of a registered kind.
    ///
    /// `props` are applied on top of the kind's defaults. Names are
    /// unique across the engine; creating two elements with the same
    /// name fails.
    pub fn create_element(
        &self,
        kind: &str,
        name: &str,
        props: &[(&str, PropertyValue)],
    ) -> Result<ElementHandle> {
        let spec = element::kind_spec(kind).ok_or_else(|| Error::Creation {
            name: name.to_string(),
            reason: format!("unknown kind '{}'", kind),
        })?;

        let mut topo = self.topo.lock().unwrap();
        if topo.element_names.contains_key(name) {
            return Err(Error::Creation {
                name: name.to_string(),
                reason: "an element with this name already exists".to_string(),
            });
        }

        let mut resolved: HashMap<String, PropertyValue> = spec
            .properties
            .iter()
            .map(|p| (p.name.to_string(), p.default.to_value()))
            .collect();
        for (prop_name, value) in props {
            let declared = spec.property(prop_name).ok_or_else(|| Error::Property {
                element: name.to_string(),
                property: prop_name.to_string(),
                reason: "no such property".to_string(),
            })?;
            let default = declared.default.to_value();
            if !default.same_type(value) {
                return Err(Error::Property {
                    element: name.to_string(),
                    property: prop_name.to_string(),
                    reason: format!(
                        "expected {}, got {}",
                        default.type_name(),
                        value.type_name()
                    ),
                });
            }
            resolved.insert(prop_name.to_string(), value.clone());
        }

        let handle = ElementHandle(topo.next_id());
        let input = spec.static_input.then(|| {
            let pad = PadHandle(topo.next_id());
            topo.pads.insert(
                pad,
                RawPad {
                    name: "sink".to_string(),
                    element: handle,
                    direction: PadDirection::Input,
                    presence: PadPresence::Always,
                    peer: None,
                },
            );
            pad
        });
        let output = spec.static_output.then(|| {
            let pad = PadHandle(topo.next_id());
            topo.pads.insert(
                pad,
                RawPad {
                    name: "src".to_string(),
                    element: handle,
                    direction: PadDirection::Output,
                    presence: PadPresence::Always,
                    peer: None,
                },
            );
            pad
        });

        topo.elements.insert(
            handle,
            RawElement {
                name: name.to_string(),
                kind: spec,
                props: resolved,
                input,
                output,
                request_pads: SmallVec::new(),
                requested_total: 0,
                parent: None,
            },
        );
        topo.element_names.insert(name.to_string(), handle);
        tracing::debug!("created element '{}' of kind '{}'", name, kind);
        Ok(handle)
    }

    /// Remove an element and its pads from the topology.
    ///
    /// Bound pads are unbound first and the element is detached from its
    /// bin. Returns `false` if the handle was already gone.
    pub fn destroy_element(&self, element: ElementHandle) -> bool {
        let mut topo = self.topo.lock().unwrap();
        let Some(raw) = topo.elements.remove(&element) else {
            return false;
        };
        topo.element_names.remove(&raw.name);
        if let Some(parent) = raw.parent {
            if let Some(bin) = topo.bins.get_mut(&parent) {
                bin.elements.retain(|e| *e != element);
            }
        }
        let mut pads: SmallVec<[PadHandle; 8]> = SmallVec::new();
        pads.extend(raw.input);
        pads.extend(raw.output);
        pads.extend(raw.request_pads.iter().copied());
        for pad in pads {
            unbind_locked(&mut topo, pad);
            topo.pads.remove(&pad);
        }
        tracing::debug!("destroyed element '{}'", raw.name);
        true
    }

    /// Static pads of an element as `(input, output)`.
    pub fn static_pads(
        &self,
        element: ElementHandle,
    ) -> Result<(Option<PadHandle>, Option<PadHandle>)> {
        let topo = self.topo.lock().unwrap();
        let raw = element_ref(&topo, element)?;
        Ok((raw.input, raw.output))
    }

    /// Current effective state of an element.
    ///
    /// Elements take the state of the bin they sit in; a detached
    /// element reports `Null`.
    pub fn element_state(&self, element: ElementHandle) -> Result<GraphState> {
        let topo = self.topo.lock().unwrap();
        element_ref(&topo, element)?;
        Ok(topo.effective_state(element))
    }

    /// Read a property value.
    pub fn get_property(&self, element: ElementHandle, name: &str) -> Result<PropertyValue> {
        let topo = self.topo.lock().unwrap();
        let raw = element_ref(&topo, element)?;
        raw.props.get(name).cloned().ok_or_else(|| Error::Property {
            element: raw.name.clone(),
            property: name.to_string(),
            reason: "no such property".to_string(),
        })
    }

    /// Write a property value.
    ///
    /// The write is rejected if the property does not exist, the value
    /// type does not match, or the element's state is past the
    /// property's write window.
    pub fn set_property(
        &self,
        element: ElementHandle,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let state = topo.effective_state(element);
        let raw = element_ref(&topo, element)?;
        let declared = raw.kind.property(name).ok_or_else(|| Error::Property {
            element: raw.name.clone(),
            property: name.to_string(),
            reason: "no such property".to_string(),
        })?;
        let default = declared.default.to_value();
        if !default.same_type(&value) {
            return Err(Error::Property {
                element: raw.name.clone(),
                property: name.to_string(),
                reason: format!("expected {}, got {}", default.type_name(), value.type_name()),
            });
        }
        if state > declared.writable_in {
            return Err(Error::Property {
                element: raw.name.clone(),
                property: name.to_string(),
                reason: format!("not writable in state {}", state),
            });
        }
        let element_name = raw.name.clone();
        // Re-borrow mutably now that validation passed.
        if let Some(raw) = topo.elements.get_mut(&element) {
            raw.props.insert(name.to_string(), value);
        }
        tracing::trace!("set property '{}' on '{}'", name, element_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Request pads
    // ------------------------------------------------------------------

    /// Allocate a pad from an element's request-pad family.
    ///
    /// Fails if the kind has no requestable pads in `direction`, if its
    /// capacity is exhausted, or if the element is running and the kind
    /// does not allow runtime allocation.
    pub fn request_pad(
        &self,
        element: ElementHandle,
        direction: PadDirection,
    ) -> Result<PadHandle> {
        let mut topo = self.topo.lock().unwrap();
        let state = topo.effective_state(element);
        let raw = element_ref(&topo, element)?;
        let name = raw.name.clone();
        let req = match raw.kind.request {
            Some(req) if req.direction == direction => req,
            _ => {
                return Err(Error::Creation {
                    name,
                    reason: format!(
                        "kind '{}' has no requestable {} pads",
                        raw.kind.name, direction
                    ),
                })
            }
        };
        if let Some(capacity) = req.capacity {
            if raw.request_pads.len() >= capacity {
                return Err(Error::Capacity { name, capacity });
            }
        }
        if state.is_running() && !req.while_running {
            return Err(Error::Creation {
                name,
                reason: format!(
                    "kind '{}' cannot allocate pads in state {}",
                    raw.kind.name, state
                ),
            });
        }

        let pad = PadHandle(topo.next_id());
        let raw = topo
            .elements
            .get_mut(&element)
            .ok_or_else(|| engine_not_found(element.to_string()))?;
        let pad_name = match direction {
            PadDirection::Output => format!("src_{}", raw.requested_total),
            PadDirection::Input => format!("sink_{}", raw.requested_total),
        };
        raw.requested_total += 1;
        raw.request_pads.push(pad);
        let owner_name = raw.name.clone();
        topo.pads.insert(
            pad,
            RawPad {
                name: pad_name.clone(),
                element,
                direction,
                presence: PadPresence::Request,
                peer: None,
            },
        );
        tracing::debug!("allocated request pad '{}' on '{}'", pad_name, owner_name);
        Ok(pad)
    }

    /// Return a request pad to its element.
    ///
    /// The pad is unbound first if needed. Releasing a static pad is a
    /// no-op apart from a warning, mirroring how real media frameworks
    /// treat it.
    pub fn release_pad(&self, pad: PadHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let raw = topo
            .pads
            .get(&pad)
            .ok_or_else(|| engine_not_found(pad.to_string()))?;
        if raw.presence != PadPresence::Request {
            tracing::warn!("ignoring release of static pad {}", topo.pad_desc(pad));
            return Ok(());
        }
        let element = raw.element;
        unbind_locked(&mut topo, pad);
        if let Some(owner) = topo.elements.get_mut(&element) {
            owner.request_pads.retain(|p| *p != pad);
        }
        topo.pads.remove(&pad);
        Ok(())
    }

    /// Lifetime count of pads ever requested from an element.
    pub fn request_pad_count(&self, element: ElementHandle) -> Result<u64> {
        let topo = self.topo.lock().unwrap();
        Ok(element_ref(&topo, element)?.requested_total)
    }

    /// Number of request pads currently allocated on an element.
    pub fn live_request_pads(&self, element: ElementHandle) -> Result<usize> {
        let topo = self.topo.lock().unwrap();
        Ok(element_ref(&topo, element)?.request_pads.len())
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Link an output pad to an input pad.
    pub fn bind(&self, src: PadHandle, sink: PadHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let src_desc = topo.pad_desc(src);
        let sink_desc = topo.pad_desc(sink);
        let link_err = |reason: String| Error::Link {
            src: src_desc.clone(),
            sink: sink_desc.clone(),
            reason,
        };

        let src_raw = topo
            .pads
            .get(&src)
            .ok_or_else(|| link_err("unknown source pad".to_string()))?;
        let sink_raw = topo
            .pads
            .get(&sink)
            .ok_or_else(|| link_err("unknown sink pad".to_string()))?;
        if src_raw.direction != PadDirection::Output {
            return Err(link_err(format!("'{}' is not an output pad", src_desc)));
        }
        if sink_raw.direction != PadDirection::Input {
            return Err(link_err(format!("'{}' is not an input pad", sink_desc)));
        }
        if src_raw.element == sink_raw.element {
            return Err(link_err("cannot link an element to itself".to_string()));
        }
        if src_raw.peer.is_some() {
            return Err(link_err(format!("'{}' is already linked", src_desc)));
        }
        if sink_raw.peer.is_some() {
            return Err(link_err(format!("'{}' is already linked", sink_desc)));
        }

        if let Some(p) = topo.pads.get_mut(&src) {
            p.peer = Some(sink);
        }
        if let Some(p) = topo.pads.get_mut(&sink) {
            p.peer = Some(src);
        }
        tracing::debug!("linked {} -> {}", src_desc, sink_desc);
        Ok(())
    }

    /// Break the link on a pad, if any. Returns whether a link existed.
    pub fn unbind(&self, pad: PadHandle) -> bool {
        let mut topo = self.topo.lock().unwrap();
        unbind_locked(&mut topo, pad)
    }

    /// The pad linked to `pad`, if any.
    pub fn pad_peer(&self, pad: PadHandle) -> Option<PadHandle> {
        let topo = self.topo.lock().unwrap();
        topo.pads.get(&pad).and_then(|p| p.peer)
    }

    /// Identity and link status of a pad.
    pub fn pad_info(&self, pad: PadHandle) -> Result<PadInfo> {
        let topo = self.topo.lock().unwrap();
        let raw = topo
            .pads
            .get(&pad)
            .ok_or_else(|| engine_not_found(pad.to_string()))?;
        Ok(PadInfo {
            name: raw.name.clone(),
            direction: raw.direction,
            presence: raw.presence,
            bound: raw.peer.is_some(),
        })
    }

    // ------------------------------------------------------------------
    // Bins
    // ------------------------------------------------------------------

    /// Create an empty bin. Bin names are unique across the engine.
    pub fn create_bin(&self, name: &str) -> Result<BinHandle> {
        let mut topo = self.topo.lock().unwrap();
        if topo.bin_names.contains_key(name) {
            return Err(Error::Creation {
                name: name.to_string(),
                reason: "a bin with this name already exists".to_string(),
            });
        }
        let handle = BinHandle(topo.next_id());
        topo.bins.insert(
            handle,
            RawBin {
                name: name.to_string(),
                elements: Vec::new(),
                bins: Vec::new(),
                parent: None,
                state: GraphState::Null,
            },
        );
        topo.bin_names.insert(name.to_string(), handle);
        tracing::debug!("created bin '{}'", name);
        Ok(handle)
    }

    /// Remove a bin from the topology.
    ///
    /// Members are detached, not destroyed; their owners remain
    /// responsible for them. Returns `false` if the handle was already
    /// gone.
    pub fn destroy_bin(&self, bin: BinHandle) -> bool {
        let mut topo = self.topo.lock().unwrap();
        let Some(raw) = topo.bins.remove(&bin) else {
            return false;
        };
        topo.bin_names.remove(&raw.name);
        for element in &raw.elements {
            if let Some(e) = topo.elements.get_mut(element) {
                e.parent = None;
            }
        }
        for child in &raw.bins {
            if let Some(b) = topo.bins.get_mut(child) {
                b.parent = None;
            }
        }
        if let Some(parent) = raw.parent {
            if let Some(p) = topo.bins.get_mut(&parent) {
                p.bins.retain(|b| *b != bin);
            }
        }
        tracing::debug!("destroyed bin '{}'", raw.name);
        true
    }

    /// Put an element into a bin.
    pub fn add_element_to_bin(&self, bin: BinHandle, element: ElementHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        bin_ref(&topo, bin)?;
        let raw = element_ref(&topo, element)?;
        if raw.parent.is_some() {
            return Err(Error::AlreadyAttached {
                name: raw.name.clone(),
            });
        }
        if let Some(e) = topo.elements.get_mut(&element) {
            e.parent = Some(bin);
        }
        if let Some(b) = topo.bins.get_mut(&bin) {
            b.elements.push(element);
        }
        Ok(())
    }

    /// Take an element out of its bin.
    pub fn remove_element_from_bin(&self, bin: BinHandle, element: ElementHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let bin_name = bin_ref(&topo, bin)?.name.clone();
        let raw = element_ref(&topo, element)?;
        if raw.parent != Some(bin) {
            return Err(Error::NotFound {
                container: bin_name,
                name: raw.name.clone(),
            });
        }
        if let Some(e) = topo.elements.get_mut(&element) {
            e.parent = None;
        }
        if let Some(b) = topo.bins.get_mut(&bin) {
            b.elements.retain(|e| *e != element);
        }
        Ok(())
    }

    /// Nest a bin inside another bin.
    pub fn add_bin_to_bin(&self, parent: BinHandle, child: BinHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let parent_name = bin_ref(&topo, parent)?.name.clone();
        let child_raw = bin_ref(&topo, child)?;
        let child_name = child_raw.name.clone();
        if child_raw.parent.is_some() {
            return Err(Error::AlreadyAttached { name: child_name });
        }
        if parent == child || topo.is_ancestor(child, parent) {
            return Err(Error::InvalidParent {
                child: child_name,
                parent: parent_name,
                reason: "would create a cycle".to_string(),
            });
        }
        if let Some(b) = topo.bins.get_mut(&child) {
            b.parent = Some(parent);
        }
        if let Some(b) = topo.bins.get_mut(&parent) {
            b.bins.push(child);
        }
        Ok(())
    }

    /// Take a nested bin out of its parent.
    pub fn remove_bin_from_bin(&self, parent: BinHandle, child: BinHandle) -> Result<()> {
        let mut topo = self.topo.lock().unwrap();
        let parent_name = bin_ref(&topo, parent)?.name.clone();
        let child_raw = bin_ref(&topo, child)?;
        if child_raw.parent != Some(parent) {
            return Err(Error::NotFound {
                container: parent_name,
                name: child_raw.name.clone(),
            });
        }
        if let Some(b) = topo.bins.get_mut(&child) {
            b.parent = None;
        }
        if let Some(b) = topo.bins.get_mut(&parent) {
            b.bins.retain(|c| *c != child);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Set the state of a bin and every bin nested inside it.
    pub fn set_state(&self, bin: BinHandle, state: GraphState) -> Result<StateTransition> {
        let mut topo = self.topo.lock().unwrap();
        let raw = topo.bins.get(&bin).ok_or_else(|| Error::StateChange {
            name: bin.to_string(),
            reason: "unknown bin".to_string(),
        })?;
        let from = raw.state;
        let name = raw.name.clone();

        let mut pending = vec![bin];
        let mut index = 0;
        while index < pending.len() {
            let current = pending[index];
            index += 1;
            if let Some(b) = topo.bins.get(&current) {
                pending.extend(b.bins.iter().copied());
            }
        }
        for handle in pending {
            if let Some(b) = topo.bins.get_mut(&handle) {
                b.state = state;
            }
        }
        tracing::info!("bin '{}' moved from {} to {}", name, from, state);
        Ok(StateTransition { from, to: state })
    }

    /// Current state of a bin.
    pub fn state_of(&self, bin: BinHandle) -> Result<GraphState> {
        let topo = self.topo.lock().unwrap();
        Ok(bin_ref(&topo, bin)?.state)
    }

    /// Bring a nested bin to its parent's current state.
    ///
    /// Used when attaching a freshly built subtree to a bin that is
    /// already up.
    pub fn sync_bin_with_parent(&self, child: BinHandle) -> Result<StateTransition> {
        let parent_state = {
            let topo = self.topo.lock().unwrap();
            let raw = bin_ref(&topo, child)?;
            let parent = raw.parent.ok_or_else(|| Error::StateChange {
                name: raw.name.clone(),
                reason: "bin has no parent to sync with".to_string(),
            })?;
            bin_ref(&topo, parent)?.state
        };
        self.set_state(child, parent_state)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Render a bin and everything inside it to Graphviz dot syntax.
    pub fn render_dot(&self, bin: BinHandle) -> Result<String> {
        let topo = self.topo.lock().unwrap();
        bin_ref(&topo, bin)?;
        Ok(dot::render(&topo, bin))
    }

    /// Write a dot rendering of `bin` to the directory named by the
    /// `MANIFOLD_DOT_DIR` environment variable.
    ///
    /// Returns the written path, or `Ok(None)` when the variable is not
    /// set. With `timestamped`, the file name gets a seconds-since-epoch
    /// prefix so successive dumps do not overwrite each other.
    pub fn dump_dot(
        &self,
        bin: BinHandle,
        filename: &str,
        timestamped: bool,
    ) -> Result<Option<PathBuf>> {
        let Ok(dir) = std::env::var("MANIFOLD_DOT_DIR") else {
            tracing::debug!("MANIFOLD_DOT_DIR not set, skipping dot dump '{}'", filename);
            return Ok(None);
        };
        let rendered = self.render_dot(bin)?;
        let file = if timestamped {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("{:010}-{}.dot", secs, filename)
        } else {
            format!("{}.dot", filename)
        };
        let path = PathBuf::from(dir).join(file);
        std::fs::write(&path, rendered)?;
        tracing::info!("wrote dot dump to {}", path.display());
        Ok(Some(path))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topo = self.topo.lock().unwrap();
        f.debug_struct("Engine")
            .field("elements", &topo.elements.len())
            .field("bins", &topo.bins.len())
            .field("pads", &topo.pads.len())
            .finish()
    }
}

fn engine_not_found(name: String) -> Error {
    Error::NotFound {
        container: "engine".to_string(),
        name,
    }
}

fn element_ref(topo: &Topology, element: ElementHandle) -> Result<&RawElement> {
    topo.elements
        .get(&element)
        .ok_or_else(|| engine_not_found(element.to_string()))
}

fn bin_ref(topo: &Topology, bin: BinHandle) -> Result<&RawBin> {
    topo.bins
        .get(&bin)
        .ok_or_else(|| engine_not_found(bin.to_string()))
}

fn unbind_locked(topo: &mut Topology, pad: PadHandle) -> bool {
    let Some(peer) = topo.pads.get(&pad).and_then(|p| p.peer) else {
        return false;
    };
    if let Some(p) = topo.pads.get_mut(&pad) {
        p.peer = None;
    }
    if let Some(p) = topo.pads.get_mut(&peer) {
        p.peer = None;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new()
    }

    #[test]
    fn test_create_element_with_static_pads() {
        let e = engine();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        let (input, output) = e.static_pads(q).unwrap();
        assert!(input.is_some());
        assert!(output.is_some());

        let info = e.pad_info(input.unwrap()).unwrap();
        assert_eq!(info.name, "sink");
        assert_eq!(info.direction, PadDirection::Input);
        assert_eq!(info.presence, PadPresence::Always);
        assert!(!info.bound);
    }

    #[test]
    fn test_create_element_unknown_kind() {
        let e = engine();
        let err = e.create_element("warp-drive", "w0", &[]).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));
    }

    #[test]
    fn test_create_element_duplicate_name() {
        let e = engine();
        e.create_element("queue", "q0", &[]).unwrap();
        let err = e.create_element("queue", "q0", &[]).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));
    }

    #[test]
    fn test_property_defaults_and_overrides() {
        let e = engine();
        let q = e
            .create_element("queue", "q0", &[("max-size-buffers", PropertyValue::Integer(16))])
            .unwrap();
        assert_eq!(
            e.get_property(q, "max-size-buffers").unwrap(),
            PropertyValue::Integer(16)
        );

        let s = e.create_element("fakesrc", "s0", &[]).unwrap();
        assert_eq!(
            e.get_property(s, "is-live").unwrap(),
            PropertyValue::Bool(false)
        );
    }

    #[test]
    fn test_property_type_mismatch() {
        let e = engine();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        let err = e
            .set_property(q, "max-size-buffers", PropertyValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, Error::Property { .. }));
    }

    #[test]
    fn test_property_unknown_name() {
        let e = engine();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        assert!(matches!(
            e.get_property(q, "nope").unwrap_err(),
            Error::Property { .. }
        ));
        assert!(matches!(
            e.set_property(q, "nope", PropertyValue::Integer(1)).unwrap_err(),
            Error::Property { .. }
        ));
    }

    #[test]
    fn test_property_write_window_enforced() {
        let e = engine();
        let bin = e.create_bin("b0").unwrap();
        let mux = e.create_element("streammux", "m0", &[]).unwrap();
        e.add_element_to_bin(bin, mux).unwrap();

        e.set_property(mux, "batch-size", PropertyValue::Integer(4)).unwrap();
        e.set_state(bin, GraphState::Playing).unwrap();

        let err = e
            .set_property(mux, "batch-size", PropertyValue::Integer(8))
            .unwrap_err();
        assert!(matches!(err, Error::Property { .. }));
        // max-latency stays writable while playing.
        e.set_property(mux, "max-latency", PropertyValue::Integer(40)).unwrap();
    }

    #[test]
    fn test_bind_and_unbind() {
        let e = engine();
        let a = e.create_element("fakesrc", "a", &[]).unwrap();
        let b = e.create_element("fakesink", "b", &[]).unwrap();
        let (_, out) = e.static_pads(a).unwrap();
        let (inp, _) = e.static_pads(b).unwrap();

        e.bind(out.unwrap(), inp.unwrap()).unwrap();
        assert_eq!(e.pad_peer(out.unwrap()), Some(inp.unwrap()));
        assert!(e.unbind(out.unwrap()));
        assert_eq!(e.pad_peer(inp.unwrap()), None);
        assert!(!e.unbind(out.unwrap()));
    }

    #[test]
    fn test_bind_rejects_wrong_direction() {
        let e = engine();
        let a = e.create_element("fakesrc", "a", &[]).unwrap();
        let b = e.create_element("fakesink", "b", &[]).unwrap();
        let (_, out) = e.static_pads(a).unwrap();
        let (inp, _) = e.static_pads(b).unwrap();

        let err = e.bind(inp.unwrap(), out.unwrap()).unwrap_err();
        assert!(matches!(err, Error::Link { .. }));
    }

    #[test]
    fn test_bind_rejects_double_link() {
        let e = engine();
        let a = e.create_element("fakesrc", "a", &[]).unwrap();
        let b = e.create_element("fakesink", "b", &[]).unwrap();
        let c = e.create_element("fakesink", "c", &[]).unwrap();
        let (_, out) = e.static_pads(a).unwrap();
        let (b_in, _) = e.static_pads(b).unwrap();
        let (c_in, _) = e.static_pads(c).unwrap();

        e.bind(out.unwrap(), b_in.unwrap()).unwrap();
        let err = e.bind(out.unwrap(), c_in.unwrap()).unwrap_err();
        assert!(matches!(err, Error::Link { .. }));
    }

    #[test]
    fn test_request_pads_counted_and_capped() {
        let e = engine();
        let t = e.create_element("tee", "t0", &[]).unwrap();
        let p0 = e.request_pad(t, PadDirection::Output).unwrap();
        let _p1 = e.request_pad(t, PadDirection::Output).unwrap();
        assert_eq!(e.live_request_pads(t).unwrap(), 2);
        assert_eq!(e.request_pad_count(t).unwrap(), 2);

        e.release_pad(p0).unwrap();
        assert_eq!(e.live_request_pads(t).unwrap(), 1);
        // Lifetime counter never decreases.
        assert_eq!(e.request_pad_count(t).unwrap(), 2);

        let err = e.request_pad(t, PadDirection::Input).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));
    }

    #[test]
    fn test_request_pad_refused_while_running() {
        let e = engine();
        let bin = e.create_bin("b0").unwrap();
        let d = e.create_element("demux", "d0", &[]).unwrap();
        e.add_element_to_bin(bin, d).unwrap();
        e.request_pad(d, PadDirection::Output).unwrap();

        e.set_state(bin, GraphState::Playing).unwrap();
        let err = e.request_pad(d, PadDirection::Output).unwrap_err();
        assert!(matches!(err, Error::Creation { .. }));

        // The tee kind allows runtime allocation.
        let t = e.create_element("tee", "t0", &[]).unwrap();
        e.add_element_to_bin(bin, t).unwrap();
        e.set_state(bin, GraphState::Playing).unwrap();
        e.request_pad(t, PadDirection::Output).unwrap();
    }

    #[test]
    fn test_bin_membership() {
        let e = engine();
        let bin = e.create_bin("b0").unwrap();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        e.add_element_to_bin(bin, q).unwrap();

        let other = e.create_bin("b1").unwrap();
        let err = e.add_element_to_bin(other, q).unwrap_err();
        assert!(matches!(err, Error::AlreadyAttached { .. }));

        e.remove_element_from_bin(bin, q).unwrap();
        e.add_element_to_bin(other, q).unwrap();

        let err = e.remove_element_from_bin(bin, q).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_nested_bins_reject_cycles() {
        let e = engine();
        let outer = e.create_bin("outer").unwrap();
        let inner = e.create_bin("inner").unwrap();
        e.add_bin_to_bin(outer, inner).unwrap();

        let err = e.add_bin_to_bin(inner, outer).unwrap_err();
        assert!(matches!(err, Error::InvalidParent { .. }));
        let err = e.add_bin_to_bin(outer, outer).unwrap_err();
        assert!(matches!(err, Error::InvalidParent { .. }));
    }

    #[test]
    fn test_state_cascades_to_nested_bins() {
        let e = engine();
        let outer = e.create_bin("outer").unwrap();
        let inner = e.create_bin("inner").unwrap();
        e.add_bin_to_bin(outer, inner).unwrap();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        e.add_element_to_bin(inner, q).unwrap();

        let t = e.set_state(outer, GraphState::Playing).unwrap();
        assert_eq!(t.from, GraphState::Null);
        assert_eq!(t.to, GraphState::Playing);
        assert_eq!(e.state_of(inner).unwrap(), GraphState::Playing);
        assert_eq!(e.element_state(q).unwrap(), GraphState::Playing);
    }

    #[test]
    fn test_sync_bin_with_parent() {
        let e = engine();
        let outer = e.create_bin("outer").unwrap();
        e.set_state(outer, GraphState::Playing).unwrap();

        let late = e.create_bin("late").unwrap();
        e.add_bin_to_bin(outer, late).unwrap();
        assert_eq!(e.state_of(late).unwrap(), GraphState::Null);

        let t = e.sync_bin_with_parent(late).unwrap();
        assert_eq!(t.to, GraphState::Playing);
        assert_eq!(e.state_of(late).unwrap(), GraphState::Playing);

        let orphan = e.create_bin("orphan").unwrap();
        assert!(matches!(
            e.sync_bin_with_parent(orphan).unwrap_err(),
            Error::StateChange { .. }
        ));
    }

    #[test]
    fn test_destroy_element_cleans_up() {
        let e = engine();
        let bin = e.create_bin("b0").unwrap();
        let a = e.create_element("fakesrc", "a", &[]).unwrap();
        let b = e.create_element("fakesink", "b", &[]).unwrap();
        e.add_element_to_bin(bin, a).unwrap();
        let (_, out) = e.static_pads(a).unwrap();
        let (inp, _) = e.static_pads(b).unwrap();
        e.bind(out.unwrap(), inp.unwrap()).unwrap();

        assert!(e.destroy_element(a));
        assert!(!e.destroy_element(a));
        // Peer side is unbound, and the name is free again.
        assert_eq!(e.pad_peer(inp.unwrap()), None);
        e.create_element("fakesrc", "a", &[]).unwrap();
    }

    #[test]
    fn test_destroy_bin_detaches_members() {
        let e = engine();
        let bin = e.create_bin("b0").unwrap();
        let q = e.create_element("queue", "q0", &[]).unwrap();
        e.add_element_to_bin(bin, q).unwrap();

        assert!(e.destroy_bin(bin));
        assert!(!e.destroy_bin(bin));
        // Element survives and can join another bin.
        let other = e.create_bin("b1").unwrap();
        e.add_element_to_bin(other, q).unwrap();
    }
}
