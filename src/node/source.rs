//! Source nodes feeding the pipeline's stream-multiplexer.
//!
//! A source is an element chain that starts at a producing element and
//! exposes only a downstream side. It carries two things a plain chain
//! does not: a liveness flag, captured at construction from the
//! producing element, and the stream id its aggregator assigned it.

use crate::engine::{BinHandle, Engine, GraphState, PadHandle, PropertyValue};
use crate::error::{Error, Result};

use super::{Bintr, Elementr, Linkable, Rejected};

/// Element chain rooted at a producing element.
#[derive(Debug)]
pub struct SourceBintr {
    core: Bintr,
    live: bool,
    stream_id: Option<usize>,
}

impl SourceBintr {
    /// Create a test source backed by a `fakesrc` element.
    pub fn test(engine: &Engine, name: &str, live: bool) -> Result<Self> {
        let head = Elementr::with_properties(
            engine,
            "fakesrc",
            &format!("{}-src", name),
            &[("is-live", PropertyValue::Bool(live))],
        )?;
        Self::from_head(engine, name, head, live)
    }

    /// Create a URI source backed by a `urisrc` element.
    pub fn uri(engine: &Engine, name: &str, uri: &str, live: bool) -> Result<Self> {
        let head = Elementr::with_properties(
            engine,
            "urisrc",
            &format!("{}-src", name),
            &[
                ("uri", PropertyValue::from(uri)),
                ("is-live", PropertyValue::Bool(live)),
            ],
        )?;
        Self::from_head(engine, name, head, live)
    }

    fn from_head(engine: &Engine, name: &str, head: Elementr, live: bool) -> Result<Self> {
        let mut core = Bintr::new(engine, name)?;
        core.add_element(head).map_err(Error::from)?;
        Ok(Self {
            core,
            live,
            stream_id: None,
        })
    }

    /// Name of the source.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Whether the source produces in real time.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Stream id assigned by the owning aggregator, if attached.
    pub fn stream_id(&self) -> Option<usize> {
        self.stream_id
    }

    pub(crate) fn assign_stream_id(&mut self, id: usize) {
        self.stream_id = Some(id);
    }

    pub(crate) fn clear_stream_id(&mut self) {
        self.stream_id = None;
    }

    /// Append a processing element to the source's chain.
    pub fn add_element(&mut self, element: Elementr) -> std::result::Result<(), Rejected<Elementr>> {
        self.core.add_element(element)
    }

    /// Remove an element by name and hand it back.
    pub fn remove_element(&mut self, name: &str) -> Result<Elementr> {
        self.core.remove_element(name)
    }

    /// Borrow an element of the chain by name.
    pub fn element(&self, name: &str) -> Option<&Elementr> {
        self.core.element(name)
    }

    /// Number of elements in the chain.
    pub fn num_elements(&self) -> usize {
        self.core.num_elements()
    }

    /// Whether the chain is currently linked.
    pub fn is_linked(&self) -> bool {
        self.core.is_linked()
    }

    /// Link the chain head to tail.
    pub fn link_all(&mut self) -> Result<()> {
        self.core.link_all()
    }

    /// Unlink the whole chain.
    pub fn unlink_all(&mut self) {
        self.core.unlink_all();
    }

    /// Output side of the source: the last element's output pad.
    pub fn downstream_pad(&self) -> Option<PadHandle> {
        self.core.downstream_pad()
    }

    /// Current state of the source bin.
    pub fn state(&self) -> Result<GraphState> {
        self.core.state()
    }

    pub(crate) fn bin(&self) -> BinHandle {
        self.core.bin()
    }
}

impl Linkable for SourceBintr {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        // The producing head element has no input side.
        None
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        SourceBintr::downstream_pad(self)
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

    #[test]
    fn test_test_source_captures_liveness() {
        let engine = Engine::new();
        let live = SourceBintr::test(&engine, "cam0", true).unwrap();
        let file = SourceBintr::test(&engine, "file0", false).unwrap();
        assert!(live.is_live());
        assert!(!file.is_live());
        assert_eq!(live.name(), "cam0");
        assert!(live.stream_id().is_none());
    }

    #[test]
    fn test_uri_source_sets_properties() {
        let engine = Engine::new();
        let src = SourceBintr::uri(&engine, "rtsp0", "rtsp://host/stream", true).unwrap();
        let head = src.element("rtsp0-src").unwrap();
        assert_eq!(
            head.get_property("uri").unwrap(),
            PropertyValue::String("rtsp://host/stream".to_string())
        );
        assert!(head.property_bool("is-live").unwrap());
    }

    #[test]
    fn test_source_has_only_a_downstream_side() {
        let engine = Engine::new();
        let src = SourceBintr::test(&engine, "cam0", true).unwrap();
        assert!(Linkable::upstream_pad(&src).is_none());
        assert!(src.downstream_pad().is_some());
    }

    #[test]
    fn test_decode_chain_links_behind_head() {
        let engine = Engine::new();
        let mut src = SourceBintr::test(&engine, "cam0", true).unwrap();
        src.add_element(Elementr::new(&engine, "queue", "cam0-q").unwrap())
            .unwrap();
        src.add_element(Elementr::new(&engine, "convert", "cam0-cv").unwrap())
            .unwrap();
        assert_eq!(src.num_elements(), 3);

        src.link_all().unwrap();
        assert!(src.is_linked());
        // The unit's output follows the tail of the chain.
        let tail_out = src.element("cam0-cv").unwrap().output_pad().unwrap();
        assert_eq!(src.downstream_pad(), Some(tail_out));

        src.unlink_all();
        assert!(!src.is_linked());
    }
}
