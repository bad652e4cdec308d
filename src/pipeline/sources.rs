//! Fan-in aggregator over the stream-multiplexer.
//!
//! The dual of the fan-out tee: N sources feed one stream-multiplexer
//! element, each on a multiplexer input pad and under a stream id from
//! a lowest-free slot pool. Sources can join and leave while the graph
//! is running; the multiplexer kind allows input-pad requests at any
//! time, so no pre-allocation is needed on this side.

use std::collections::BTreeMap;

use crate::engine::{
    BinHandle, ElementHandle, Engine, GraphState, PadDirection, PadHandle, PropertyValue,
};
use crate::error::{Error, Result};
use crate::node::{Elementr, Rejected, SourceBintr};
use crate::slots::SlotPool;

/// Stream-multiplexer configuration.
///
/// Held by the pipeline so settings apply even when the aggregator is
/// created lazily on the first source add.
#[derive(Debug, Clone)]
pub struct StreammuxSettings {
    /// Frames batched per multiplexer output buffer.
    ///
    /// `None` means no explicit choice; the pipeline sizes the batch to
    /// the source count when playback starts.
    pub batch_size: Option<u64>,
    /// Surfaces carried per frame.
    pub num_surfaces_per_frame: u64,
    /// Whether inputs are synchronized on timestamps before batching.
    pub sync_inputs: bool,
    /// Upper bound on multiplexer-added latency, in milliseconds.
    pub max_latency: u64,
}

impl Default for StreammuxSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            num_surfaces_per_frame: 1,
            sync_inputs: false,
            max_latency: 0,
        }
    }
}

struct SourceSlot {
    slot: usize,
    bound: Option<PadHandle>,
    source: SourceBintr,
}

/// Fan-in node owning the stream-multiplexer element.
pub struct SourcesBintr {
    name: String,
    engine: Engine,
    bin: BinHandle,
    mux: Elementr,
    sources: BTreeMap<String, SourceSlot>,
    slots: SlotPool,
    linked: bool,
}

impl SourcesBintr {
    /// Create an empty aggregator with the given multiplexer settings.
    pub fn new(engine: &Engine, name: &str, settings: &StreammuxSettings) -> Result<Self> {
        let bin = engine.create_bin(name)?;
        let mut props: Vec<(&str, PropertyValue)> = vec![
            (
                "num-surfaces-per-frame",
                PropertyValue::Integer(settings.num_surfaces_per_frame as i64),
            ),
            ("sync-inputs", PropertyValue::Bool(settings.sync_inputs)),
            (
                "max-latency",
                PropertyValue::Integer(settings.max_latency as i64),
            ),
        ];
        if let Some(batch) = settings.batch_size {
            props.push(("batch-size", PropertyValue::Integer(batch as i64)));
        }
        let mux = Elementr::with_properties(engine, "streammux", &format!("{}-mux", name), &props)?;
        engine.add_element_to_bin(bin, mux.handle())?;
        Ok(Self {
            name: name.to_string(),
            engine: engine.clone(),
            bin,
            mux,
            sources: BTreeMap::new(),
            slots: SlotPool::unbounded(),
            linked: false,
        })
    }

    /// Name of the aggregator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of attached sources.
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Whether a source of the given name is attached.
    pub fn is_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Borrow a source by name.
    pub fn source(&self, name: &str) -> Option<&SourceBintr> {
        self.sources.get(name).map(|s| &s.source)
    }

    /// Stream id assigned to a source.
    pub fn stream_id(&self, name: &str) -> Option<usize> {
        self.sources.get(name).map(|s| s.slot)
    }

    /// Sources in name order.
    pub fn sources(&self) -> impl Iterator<Item = &SourceBintr> {
        self.sources.values().map(|s| &s.source)
    }

    /// Engine handle of the stream-multiplexer, for diagnostics.
    pub fn mux_element(&self) -> ElementHandle {
        self.mux.handle()
    }

    /// Whether the aggregator's sources are wired to the multiplexer.
    pub fn is_linked(&self) -> bool {
        self.linked || self.sources.values().any(|s| s.bound.is_some())
    }

    /// True only if there is at least one source and every source is
    /// live. No sources means not live, not an error.
    pub fn is_live(&self) -> bool {
        !self.sources.is_empty() && self.sources.values().all(|s| s.source.is_live())
    }

    /// Current state of the aggregator bin.
    pub fn state(&self) -> Result<GraphState> {
        self.engine.state_of(self.bin)
    }

    pub(crate) fn bin(&self) -> BinHandle {
        self.bin
    }

    /// Output side: the multiplexer's batched output pad.
    pub fn downstream_pad(&self) -> Option<PadHandle> {
        self.mux.output_pad()
    }

    /// Attach a source under a fresh stream id.
    ///
    /// If the aggregator is already linked the source is wired to the
    /// multiplexer immediately and brought to the bin's state, so
    /// sources can join a playing graph. On failure the attach is fully
    /// undone and the source travels back in the error.
    pub fn add_source(
        &mut self,
        source: SourceBintr,
    ) -> std::result::Result<(), Rejected<SourceBintr>> {
        if self.sources.contains_key(source.name()) {
            let error = Error::DuplicateName {
                container: self.name.clone(),
                name: source.name().to_string(),
            };
            return Err(Rejected::new(source, error));
        }
        let Some(slot) = self.slots.acquire() else {
            let error = Error::Capacity {
                name: self.name.clone(),
                capacity: self.slots.capacity().unwrap_or_default(),
            };
            return Err(Rejected::new(source, error));
        };
        let child_bin = source.bin();
        if let Err(error) = self.engine.add_bin_to_bin(self.bin, child_bin) {
            self.slots.release(slot);
            return Err(Rejected::new(source, error));
        }

        let mut entry = SourceSlot {
            slot,
            bound: None,
            source,
        };
        entry.source.assign_stream_id(slot);
        if self.linked {
            if let Err(error) = Self::bind_source(&self.engine, &self.mux, &mut entry) {
                let _ = self.engine.remove_bin_from_bin(self.bin, child_bin);
                self.slots.release(slot);
                entry.source.clear_stream_id();
                return Err(Rejected::new(entry.source, error));
            }
            if let Err(e) = self.engine.sync_bin_with_parent(child_bin) {
                tracing::warn!(
                    "failed to sync late source '{}' of '{}': {}",
                    entry.source.name(),
                    self.name,
                    e
                );
            }
        }

        let key = entry.source.name().to_string();
        tracing::debug!(
            "added source '{}' to '{}' (stream {})",
            key,
            self.name,
            slot
        );
        self.sources.insert(key, entry);
        Ok(())
    }

    /// Detach a source and hand it back.
    ///
    /// A wired source is unbound first, its multiplexer pad released and
    /// its subtree dropped to `Null`. The stream id returns to the pool.
    pub fn remove_source(&mut self, name: &str) -> Result<SourceBintr> {
        let mut entry = self.sources.remove(name).ok_or_else(|| Error::NotFound {
            container: self.name.clone(),
            name: name.to_string(),
        })?;
        if let Some(pad) = entry.bound.take() {
            self.engine.unbind(pad);
            if let Err(e) = self.engine.release_pad(pad) {
                tracing::warn!("failed to release multiplexer pad: {}", e);
            }
            entry.source.unlink_all();
        }
        if let Err(e) = self.engine.remove_bin_from_bin(self.bin, entry.source.bin()) {
            tracing::warn!("source '{}' was not nested in '{}': {}", name, self.name, e);
        }
        if let Err(e) = self.engine.set_state(entry.source.bin(), GraphState::Null) {
            tracing::warn!("failed to quiesce removed source '{}': {}", name, e);
        }
        self.slots.release(entry.slot);
        entry.source.clear_stream_id();
        Ok(entry.source)
    }

    /// Wire every unwired source to the multiplexer.
    ///
    /// Best effort: sources wired before a failure stay wired, and a
    /// retry resumes with the first unwired source.
    pub fn link_all(&mut self) -> Result<()> {
        for (name, entry) in self.sources.iter_mut() {
            if entry.bound.is_some() {
                continue;
            }
            if let Err(e) = Self::bind_source(&self.engine, &self.mux, entry) {
                tracing::error!("linking source '{}' of '{}' failed: {}", name, self.name, e);
                return Err(e);
            }
        }
        self.linked = true;
        Ok(())
    }

    /// Unwire every source and release its multiplexer pad.
    pub fn unlink_all(&mut self) {
        for (_, entry) in self.sources.iter_mut() {
            if let Some(pad) = entry.bound.take() {
                self.engine.unbind(pad);
                if let Err(e) = self.engine.release_pad(pad) {
                    tracing::warn!("failed to release multiplexer pad: {}", e);
                }
                entry.source.unlink_all();
            }
        }
        self.linked = false;
    }

    fn bind_source(engine: &Engine, mux: &Elementr, entry: &mut SourceSlot) -> Result<()> {
        entry.source.link_all()?;
        let src = entry.source.downstream_pad().ok_or_else(|| Error::Link {
            src: entry.source.name().to_string(),
            sink: mux.name().to_string(),
            reason: format!("source '{}' exposes no output", entry.source.name()),
        })?;
        let sink = engine.request_pad(mux.handle(), PadDirection::Input)?;
        if let Err(e) = engine.bind(src, sink) {
            if let Err(release) = engine.release_pad(sink) {
                tracing::warn!("failed to release multiplexer pad: {}", release);
            }
            return Err(e);
        }
        entry.bound = Some(sink);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stream-multiplexer property accessors
    // ------------------------------------------------------------------

    /// Frames batched per output buffer.
    pub fn batch_size(&self) -> Result<u64> {
        self.mux.property_u64("batch-size")
    }

    /// Set the batch size; refused once the multiplexer is running.
    pub fn set_batch_size(&mut self, batch_size: u64) -> Result<()> {
        self.mux
            .set_property("batch-size", PropertyValue::Integer(batch_size as i64))
    }

    /// Surfaces carried per frame.
    pub fn num_surfaces_per_frame(&self) -> Result<u64> {
        self.mux.property_u64("num-surfaces-per-frame")
    }

    /// Set surfaces per frame; refused once the multiplexer is running.
    pub fn set_num_surfaces_per_frame(&mut self, num: u64) -> Result<()> {
        self.mux
            .set_property("num-surfaces-per-frame", PropertyValue::Integer(num as i64))
    }

    /// Whether inputs are synchronized before batching.
    pub fn sync_inputs_enabled(&self) -> Result<bool> {
        self.mux.property_bool("sync-inputs")
    }

    /// Enable or disable input synchronization.
    pub fn set_sync_inputs_enabled(&mut self, enabled: bool) -> Result<()> {
        self.mux.set_property("sync-inputs", PropertyValue::Bool(enabled))
    }

    /// Upper bound on multiplexer-added latency, in milliseconds.
    pub fn max_latency(&self) -> Result<u64> {
        self.mux.property_u64("max-latency")
    }

    /// Set the latency bound. Writable in any state.
    pub fn set_max_latency(&mut self, millis: u64) -> Result<()> {
        self.mux
            .set_property("max-latency", PropertyValue::Integer(millis as i64))
    }
}

impl std::fmt::Debug for SourcesBintr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcesBintr")
            .field("name", &self.name)
            .field("sources", &self.sources.len())
            .field("linked", &self.linked)
            .finish()
    }
}

impl Drop for SourcesBintr {
    fn drop(&mut self) {
        self.engine.destroy_bin(self.bin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(engine: &Engine) -> SourcesBintr {
        SourcesBintr::new(engine, "sources", &StreammuxSettings::default()).unwrap()
    }

    #[test]
    fn test_stream_ids_assigned_lowest_free() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.add_source(SourceBintr::test(&engine, "s0", true).unwrap())
            .unwrap();
        agg.add_source(SourceBintr::test(&engine, "s1", true).unwrap())
            .unwrap();
        agg.add_source(SourceBintr::test(&engine, "s2", true).unwrap())
            .unwrap();
        assert_eq!(agg.stream_id("s1"), Some(1));
        assert_eq!(agg.source("s1").unwrap().stream_id(), Some(1));

        let removed = agg.remove_source("s1").unwrap();
        assert_eq!(removed.stream_id(), None);
        agg.add_source(SourceBintr::test(&engine, "s3", true).unwrap())
            .unwrap();
        assert_eq!(agg.stream_id("s3"), Some(1));
        assert_eq!(agg.num_sources(), 3);
        assert!(agg.is_source("s3"));
        assert!(!agg.is_source("s1"));
    }

    #[test]
    fn test_duplicate_source_hands_it_back() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.add_source(SourceBintr::test(&engine, "s0", true).unwrap())
            .unwrap();

        let engine2 = Engine::new();
        let rejected = agg
            .add_source(SourceBintr::test(&engine2, "s0", true).unwrap())
            .expect_err("duplicate must be rejected");
        assert!(matches!(rejected.error, Error::DuplicateName { .. }));
        assert_eq!(rejected.child.name(), "s0");
    }

    #[test]
    fn test_link_all_binds_each_source_to_a_mux_pad() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.add_source(SourceBintr::test(&engine, "s0", true).unwrap())
            .unwrap();
        agg.add_source(SourceBintr::test(&engine, "s1", true).unwrap())
            .unwrap();

        agg.link_all().unwrap();
        assert!(agg.is_linked());
        assert_eq!(engine.live_request_pads(agg.mux_element()).unwrap(), 2);
        for name in ["s0", "s1"] {
            let out = agg.source(name).unwrap().downstream_pad().unwrap();
            assert!(engine.pad_peer(out).is_some());
        }

        agg.unlink_all();
        assert!(!agg.is_linked());
        assert_eq!(engine.live_request_pads(agg.mux_element()).unwrap(), 0);
    }

    #[test]
    fn test_source_joins_linked_aggregator_immediately() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.add_source(SourceBintr::test(&engine, "s0", true).unwrap())
            .unwrap();
        agg.link_all().unwrap();
        engine.set_state(agg.bin(), GraphState::Playing).unwrap();

        agg.add_source(SourceBintr::test(&engine, "late", true).unwrap())
            .unwrap();
        let late = agg.source("late").unwrap();
        assert!(engine.pad_peer(late.downstream_pad().unwrap()).is_some());
        assert_eq!(engine.state_of(late.bin()).unwrap(), GraphState::Playing);
    }

    #[test]
    fn test_remove_wired_source_releases_pad() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.add_source(SourceBintr::test(&engine, "s0", true).unwrap())
            .unwrap();
        agg.add_source(SourceBintr::test(&engine, "s1", true).unwrap())
            .unwrap();
        agg.link_all().unwrap();

        let removed = agg.remove_source("s0").unwrap();
        assert_eq!(engine.live_request_pads(agg.mux_element()).unwrap(), 1);
        assert_eq!(engine.state_of(removed.bin()).unwrap(), GraphState::Null);
        assert!(matches!(
            agg.remove_source("s0").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_liveness_aggregation() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        assert!(!agg.is_live());

        agg.add_source(SourceBintr::test(&engine, "live0", true).unwrap())
            .unwrap();
        assert!(agg.is_live());

        agg.add_source(SourceBintr::test(&engine, "file0", false).unwrap())
            .unwrap();
        assert!(!agg.is_live());

        agg.remove_source("file0").unwrap();
        assert!(agg.is_live());
    }

    #[test]
    fn test_settings_applied_at_construction() {
        let engine = Engine::new();
        let settings = StreammuxSettings {
            batch_size: Some(8),
            num_surfaces_per_frame: 2,
            sync_inputs: true,
            max_latency: 40,
        };
        let agg = SourcesBintr::new(&engine, "sources", &settings).unwrap();
        assert_eq!(agg.batch_size().unwrap(), 8);
        assert_eq!(agg.num_surfaces_per_frame().unwrap(), 2);
        assert!(agg.sync_inputs_enabled().unwrap());
        assert_eq!(agg.max_latency().unwrap(), 40);
    }

    #[test]
    fn test_batch_size_frozen_once_running() {
        let engine = Engine::new();
        let mut agg = aggregator(&engine);
        agg.set_batch_size(4).unwrap();
        engine.set_state(agg.bin(), GraphState::Playing).unwrap();

        assert!(matches!(
            agg.set_batch_size(8).unwrap_err(),
            Error::Property { .. }
        ));
        // Latency stays adjustable while playing.
        agg.set_max_latency(25).unwrap();
        assert_eq!(agg.batch_size().unwrap(), 4);
    }
}
