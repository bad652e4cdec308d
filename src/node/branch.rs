//! Nested multi-component container.
//!
//! A branch is a chain whose children are whole components rather than
//! single elements, so arbitrary sub-assemblies (chains, fan-outs,
//! further branches) compose into one linear unit. Pipelines use the
//! same machinery for their top-level component list.

use crate::engine::{BinHandle, Engine, GraphState, PadHandle};
use crate::error::{Error, Result};

use super::{Component, LinkChain, Linkable, ParentKind, Rejected};

/// Ordered container of components inside one engine bin.
#[derive(Debug)]
pub struct BranchBintr {
    name: String,
    engine: Engine,
    bin: BinHandle,
    chain: LinkChain<Component>,
}

impl BranchBintr {
    /// Create an empty branch.
    pub fn new(engine: &Engine, name: &str) -> Result<Self> {
        let bin = engine.create_bin(name)?;
        Ok(Self {
            name: name.to_string(),
            engine: engine.clone(),
            bin,
            chain: LinkChain::new(name),
        })
    }

    /// Name of the branch.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bin(&self) -> BinHandle {
        self.bin
    }

    /// Append a component to the branch.
    pub fn add_component(&mut self, component: Component) -> std::result::Result<(), Rejected<Component>> {
        self.adopt(component, ParentKind::Branch)
    }

    /// Append a component, validating against the given parent kind.
    ///
    /// Pipelines funnel their top-level adds through here with
    /// [`ParentKind::Pipeline`] so splitter/demuxer placement rules see
    /// the real parent.
    pub(crate) fn adopt(
        &mut self,
        component: Component,
        parent_kind: ParentKind,
    ) -> std::result::Result<(), Rejected<Component>> {
        if let Err(error) = component.accepts_parent(parent_kind, &self.name) {
            return Err(Rejected::new(component, error));
        }
        if self.chain.contains(component.name()) {
            let error = Error::DuplicateName {
                container: self.name.clone(),
                name: component.name().to_string(),
            };
            return Err(Rejected::new(component, error));
        }
        let child_bin = component.bin();
        if let Err(error) = self.engine.add_bin_to_bin(self.bin, child_bin) {
            return Err(Rejected::new(component, error));
        }
        match self.chain.add(component) {
            Ok(_) => Ok(()),
            Err(rejected) => {
                let _ = self.engine.remove_bin_from_bin(self.bin, child_bin);
                Err(rejected)
            }
        }
    }

    /// Remove a component by name and hand it back.
    ///
    /// The removed subtree is detached from the branch bin and dropped
    /// to `Null` state. Refused while the component is linked into the
    /// chain.
    pub fn remove_component(&mut self, name: &str) -> Result<Component> {
        let component = self.chain.remove(name)?;
        if let Err(e) = self.engine.remove_bin_from_bin(self.bin, component.bin()) {
            tracing::warn!("'{}' was not nested in '{}': {}", name, self.name, e);
        }
        if let Err(e) = self.engine.set_state(component.bin(), GraphState::Null) {
            tracing::warn!("failed to quiesce removed component '{}': {}", name, e);
        }
        Ok(component)
    }

    /// Borrow a component by name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.chain.get(name)
    }

    /// Mutably borrow a component by name.
    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.chain.get_mut(name)
    }

    /// Number of components in the branch.
    pub fn num_components(&self) -> usize {
        self.chain.len()
    }

    /// Whether any component is linked into the chain.
    pub fn is_linked(&self) -> bool {
        self.chain.is_linked()
    }

    /// Whether the whole chain is linked.
    pub fn is_fully_linked(&self) -> bool {
        self.chain.is_fully_linked()
    }

    /// Link the components head to tail in add order.
    pub fn link_all(&mut self) -> Result<()> {
        let engine = self.engine.clone();
        self.chain.link_all(&engine)
    }

    /// Unlink all components.
    pub fn unlink_all(&mut self) {
        let engine = self.engine.clone();
        self.chain.unlink_all(&engine);
    }

    /// Input side: the first component's upstream pad.
    pub fn upstream_pad(&self) -> Option<PadHandle> {
        self.chain.first().and_then(|c| c.upstream_pad())
    }

    /// Output side: the last component's downstream pad.
    pub fn downstream_pad(&self) -> Option<PadHandle> {
        self.chain.last().and_then(|c| c.downstream_pad())
    }

    /// Current state of the branch bin.
    pub fn state(&self) -> Result<GraphState> {
        self.engine.state_of(self.bin)
    }
}

impl Linkable for BranchBintr {
    fn name(&self) -> &str {
        &self.name
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        BranchBintr::upstream_pad(self)
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        BranchBintr::downstream_pad(self)
    }

    fn link_internal(&mut self) -> Result<()> {
        self.link_all()
    }

    fn unlink_internal(&mut self) {
        self.unlink_all();
    }
}

impl Drop for BranchBintr {
    fn drop(&mut self) {
        self.engine.destroy_bin(self.bin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Bintr, Elementr};

    fn chain_of(engine: &Engine, name: &str, kinds: &[(&str, &str)]) -> Component {
        let mut bin = Bintr::new(engine, name).unwrap();
        for (kind, elem_name) in kinds {
            bin.add_element(Elementr::new(engine, kind, elem_name).unwrap())
                .unwrap();
        }
        Component::Chain(bin)
    }

    #[test]
    fn test_components_link_as_one_unit() {
        let engine = Engine::new();
        let mut branch = BranchBintr::new(&engine, "branch0").unwrap();
        branch
            .add_component(chain_of(&engine, "head", &[("fakesrc", "src"), ("queue", "q0")]))
            .unwrap();
        branch
            .add_component(chain_of(&engine, "tail", &[("convert", "cv"), ("fakesink", "out")]))
            .unwrap();

        branch.link_all().unwrap();
        assert!(branch.is_fully_linked());

        // The cross-component link joins q0 -> cv.
        let q_out = match branch.component("head").unwrap() {
            Component::Chain(b) => b.element("q0").unwrap().output_pad().unwrap(),
            _ => unreachable!(),
        };
        let cv_in = match branch.component("tail").unwrap() {
            Component::Chain(b) => b.element("cv").unwrap().input_pad().unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(engine.pad_peer(q_out), Some(cv_in));

        branch.unlink_all();
        assert_eq!(engine.pad_peer(q_out), None);
    }

    #[test]
    fn test_remove_component_quiesces_subtree() {
        let engine = Engine::new();
        let mut branch = BranchBintr::new(&engine, "branch0").unwrap();
        branch
            .add_component(chain_of(&engine, "only", &[("queue", "q")]))
            .unwrap();
        engine.set_state(branch.bin(), GraphState::Playing).unwrap();

        let removed = branch.remove_component("only").unwrap();
        assert_eq!(
            engine.state_of(removed.bin()).unwrap(),
            GraphState::Null
        );
        assert_eq!(branch.num_components(), 0);
    }

    #[test]
    fn test_component_cannot_join_two_parents() {
        let engine = Engine::new();
        let mut a = BranchBintr::new(&engine, "a").unwrap();
        let mut b = BranchBintr::new(&engine, "b").unwrap();

        a.add_component(chain_of(&engine, "c", &[("queue", "q")]))
            .unwrap();
        let c = a.remove_component("c").unwrap();
        // After removal the component can join another parent.
        b.add_component(c).unwrap();
        assert_eq!(b.num_components(), 1);
    }

    #[test]
    fn test_nested_branches() {
        let engine = Engine::new();
        let mut outer = BranchBintr::new(&engine, "outer").unwrap();
        let mut inner = BranchBintr::new(&engine, "inner").unwrap();
        inner
            .add_component(chain_of(&engine, "leaf", &[("fakesrc", "src")]))
            .unwrap();
        outer.add_component(Component::Branch(inner)).unwrap();
        outer
            .add_component(chain_of(&engine, "sink", &[("fakesink", "out")]))
            .unwrap();

        outer.link_all().unwrap();
        assert!(outer.is_fully_linked());
    }
}
