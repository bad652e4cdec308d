//! Element-chain container node.
//!
//! A `Bintr` owns an engine bin plus an ordered chain of elements, and
//! links them head to tail in add order. To the outside it behaves like
//! one unit: its upstream side is the first element's input, its
//! downstream side is the last element's output. It is both a component
//! in its own right and the building block the fan-out and fan-in nodes
//! assemble their internals from.

use crate::engine::{BinHandle, Engine, GraphState, PadHandle};
use crate::error::{Error, Result};

use super::{Elementr, LinkChain, Linkable, Rejected};

/// Ordered chain of elements inside one engine bin.
#[derive(Debug)]
pub struct Bintr {
    name: String,
    engine: Engine,
    bin: BinHandle,
    chain: LinkChain<Elementr>,
}

impl Bintr {
    /// Create an empty container bin.
    pub fn new(engine: &Engine, name: &str) -> Result<Self> {
        let bin = engine.create_bin(name)?;
        Ok(Self {
            name: name.to_string(),
            engine: engine.clone(),
            bin,
            chain: LinkChain::new(name),
        })
    }

    /// Name of the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bin(&self) -> BinHandle {
        self.bin
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Append an element to the chain.
    ///
    /// The element joins the engine bin and takes the next insertion
    /// index. Fails without destroying the element if the name is
    /// already taken or the element is owned elsewhere.
    pub fn add_element(&mut self, element: Elementr) -> std::result::Result<(), Rejected<Elementr>> {
        if self.chain.contains(element.name()) {
            let error = Error::DuplicateName {
                container: self.name.clone(),
                name: element.name().to_string(),
            };
            return Err(Rejected::new(element, error));
        }
        let handle = element.handle();
        if let Err(error) = self.engine.add_element_to_bin(self.bin, handle) {
            return Err(Rejected::new(element, error));
        }
        match self.chain.add(element) {
            Ok(_) => Ok(()),
            Err(rejected) => {
                let _ = self.engine.remove_element_from_bin(self.bin, handle);
                Err(rejected)
            }
        }
    }

    /// Remove an element by name and hand it back.
    ///
    /// Refused while the element is part of the linked chain.
    pub fn remove_element(&mut self, name: &str) -> Result<Elementr> {
        let element = self.chain.remove(name)?;
        if let Err(e) = self
            .engine
            .remove_element_from_bin(self.bin, element.handle())
        {
            tracing::warn!("'{}' was not a member of bin '{}': {}", name, self.name, e);
        }
        Ok(element)
    }

    /// Borrow an element by name.
    pub fn element(&self, name: &str) -> Option<&Elementr> {
        self.chain.get(name)
    }

    /// Mutably borrow an element by name.
    pub fn element_mut(&mut self, name: &str) -> Option<&mut Elementr> {
        self.chain.get_mut(name)
    }

    /// Number of elements in the chain.
    pub fn num_elements(&self) -> usize {
        self.chain.len()
    }

    /// Elements in add order with their insertion indices.
    pub fn elements(&self) -> impl Iterator<Item = (u32, &Elementr)> {
        self.chain.iter()
    }

    /// Insertion index of the element with the given name.
    pub fn element_index(&self, name: &str) -> Option<u32> {
        self.chain.index_of(name)
    }

    /// Whether the chain is currently linked.
    pub fn is_linked(&self) -> bool {
        self.chain.is_linked()
    }

    /// Whether every element is currently linked.
    pub fn is_fully_linked(&self) -> bool {
        self.chain.is_fully_linked()
    }

    /// Number of elements currently linked.
    pub fn linked_count(&self) -> usize {
        self.chain.linked_count()
    }

    /// Link the chain head to tail in add order.
    pub fn link_all(&mut self) -> Result<()> {
        let engine = self.engine.clone();
        self.chain.link_all(&engine)
    }

    /// Unlink the whole chain.
    pub fn unlink_all(&mut self) {
        let engine = self.engine.clone();
        self.chain.unlink_all(&engine);
    }

    /// Input side of the chain: the first element's input pad.
    pub fn upstream_pad(&self) -> Option<PadHandle> {
        self.chain.first().and_then(|e| e.input_pad())
    }

    /// Output side of the chain: the last element's output pad.
    pub fn downstream_pad(&self) -> Option<PadHandle> {
        self.chain.last().and_then(|e| e.output_pad())
    }

    /// Current state of the container bin.
    pub fn state(&self) -> Result<GraphState> {
        self.engine.state_of(self.bin)
    }
}

impl Linkable for Bintr {
    fn name(&self) -> &str {
        &self.name
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        Bintr::upstream_pad(self)
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        Bintr::downstream_pad(self)
    }

    fn link_internal(&mut self) -> Result<()> {
        self.link_all()
    }

    fn unlink_internal(&mut self) {
        self.unlink_all();
    }
}

impl Drop for Bintr {
    fn drop(&mut self) {
        self.engine.destroy_bin(self.bin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_pads_follow_chain_ends() {
        let engine = Engine::new();
        let mut bin = Bintr::new(&engine, "b0").unwrap();
        assert!(bin.upstream_pad().is_none());
        assert!(bin.downstream_pad().is_none());

        let q = Elementr::new(&engine, "queue", "q").unwrap();
        let c = Elementr::new(&engine, "convert", "c").unwrap();
        let q_in = q.input_pad();
        let c_out = c.output_pad();
        bin.add_element(q).unwrap();
        bin.add_element(c).unwrap();

        assert_eq!(bin.upstream_pad(), q_in);
        assert_eq!(bin.downstream_pad(), c_out);
        assert_eq!(bin.num_elements(), 2);
    }

    #[test]
    fn test_add_duplicate_returns_element() {
        let engine = Engine::new();
        let mut bin = Bintr::new(&engine, "b0").unwrap();
        bin.add_element(Elementr::new(&engine, "queue", "q").unwrap())
            .unwrap();

        let engine2 = Engine::new();
        let rejected = bin
            .add_element(Elementr::new(&engine2, "queue", "q").unwrap())
            .expect_err("duplicate must be rejected");
        assert!(matches!(rejected.error, Error::DuplicateName { .. }));
        assert_eq!(rejected.child.name(), "q");
    }

    #[test]
    fn test_element_moves_between_bins() {
        let engine = Engine::new();
        let mut a = Bintr::new(&engine, "a").unwrap();
        let mut b = Bintr::new(&engine, "b").unwrap();

        a.add_element(Elementr::new(&engine, "queue", "q").unwrap())
            .unwrap();
        let q = a.remove_element("q").unwrap();
        assert_eq!(a.num_elements(), 0);

        b.add_element(q).unwrap();
        assert_eq!(b.num_elements(), 1);
        assert!(b.element("q").is_some());
    }

    #[test]
    fn test_link_and_unlink_round_trip() {
        let engine = Engine::new();
        let mut bin = Bintr::new(&engine, "b0").unwrap();
        bin.add_element(Elementr::new(&engine, "fakesrc", "src").unwrap())
            .unwrap();
        bin.add_element(Elementr::new(&engine, "fakesink", "sink").unwrap())
            .unwrap();

        bin.link_all().unwrap();
        assert!(bin.is_linked());
        assert!(matches!(
            bin.remove_element("src").unwrap_err(),
            Error::LinkedState { .. }
        ));

        bin.unlink_all();
        assert!(!bin.is_linked());
        bin.remove_element("src").unwrap();
    }

    #[test]
    fn test_drop_destroys_subtree() {
        let engine = Engine::new();
        {
            let mut bin = Bintr::new(&engine, "b0").unwrap();
            bin.add_element(Elementr::new(&engine, "queue", "q").unwrap())
                .unwrap();
        }
        // Bin and element names are both free again.
        let mut bin = Bintr::new(&engine, "b0").unwrap();
        bin.add_element(Elementr::new(&engine, "queue", "q").unwrap())
            .unwrap();
    }
}
