//! The top-level pipeline node.
//!
//! A `PipelineBintr` is the root of an ownership tree: a lazily created
//! sources aggregator, an optional post-multiplexer tiler, and a branch
//! of processing components, all inside one engine bin. `play` wires
//! the seams and transitions synchronously; `pause` and `stop` are
//! deferred onto the main loop and report through the event channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{BinHandle, Engine, GraphState, PadHandle};
use crate::error::{Error, Result};
use crate::node::{BranchBintr, Component, Elementr, ParentKind, Rejected, SourceBintr};

use super::events::{EventReceiver, EventSender, EventStream};
use super::ids::PipelineId;
use super::main_loop::{MainLoop, MainLoopHandle, TimerId};
use super::sources::{SourcesBintr, StreammuxSettings};

/// Root node owning a full processing graph.
pub struct PipelineBintr {
    name: String,
    engine: Engine,
    id: PipelineId,
    bin: BinHandle,
    sources: Option<SourcesBintr>,
    tiler: Option<Elementr>,
    components: BranchBintr,
    settings: StreammuxSettings,
    scheduler: MainLoopHandle,
    events: EventSender,
    pending: Arc<Mutex<Option<GraphState>>>,
}

impl PipelineBintr {
    /// Create an empty pipeline scheduling onto `main_loop`.
    pub fn new(engine: &Engine, main_loop: &MainLoop, name: &str) -> Result<Self> {
        let id = PipelineId::acquire();
        let bin = engine.create_bin(name)?;
        let components = match BranchBintr::new(engine, &format!("{}-components", name)) {
            Ok(components) => components,
            Err(e) => {
                engine.destroy_bin(bin);
                return Err(e);
            }
        };
        if let Err(e) = engine.add_bin_to_bin(bin, components.bin()) {
            engine.destroy_bin(bin);
            return Err(e);
        }
        tracing::info!("created {} '{}'", id, name);
        Ok(Self {
            name: name.to_string(),
            engine: engine.clone(),
            id,
            bin,
            sources: None,
            tiler: None,
            components,
            settings: StreammuxSettings::default(),
            scheduler: main_loop.handle(),
            events: EventSender::default(),
            pending: Arc::new(Mutex::new(None)),
        })
    }

    /// Name of the pipeline.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-wide id of the pipeline.
    pub fn id(&self) -> &PipelineId {
        &self.id
    }

    /// Current state of the pipeline bin.
    pub fn state(&self) -> Result<GraphState> {
        self.engine.state_of(self.bin)
    }

    /// Target of a deferred transition that has not completed yet.
    pub fn pending_state(&self) -> Option<GraphState> {
        *self.pending.lock().unwrap()
    }

    /// True only if the pipeline has sources and every source is live.
    pub fn is_live(&self) -> bool {
        self.sources.as_ref().map(|s| s.is_live()).unwrap_or(false)
    }

    /// Subscribe to state-transition events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Stream of state-transition events.
    pub fn events(&self) -> EventStream {
        self.events.stream()
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// The sources aggregator, created on first use.
    fn sources_mut(&mut self) -> Result<&mut SourcesBintr> {
        if self.sources.is_none() {
            let sources = SourcesBintr::new(
                &self.engine,
                &format!("{}-sources", self.name),
                &self.settings,
            )?;
            self.engine.add_bin_to_bin(self.bin, sources.bin())?;
            self.sources = Some(sources);
        }
        match self.sources.as_mut() {
            Some(sources) => Ok(sources),
            None => unreachable!("sources aggregator was just created"),
        }
    }

    /// Attach a source; the aggregator is created on the first add.
    pub fn add_source(
        &mut self,
        source: SourceBintr,
    ) -> std::result::Result<(), Rejected<SourceBintr>> {
        let sources = match self.sources_mut() {
            Ok(sources) => sources,
            Err(error) => return Err(Rejected::new(source, error)),
        };
        sources.add_source(source)
    }

    /// Detach a source and hand it back.
    pub fn remove_source(&mut self, name: &str) -> Result<SourceBintr> {
        match self.sources.as_mut() {
            Some(sources) => sources.remove_source(name),
            None => Err(Error::NotFound {
                container: self.name.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// Number of attached sources.
    pub fn num_sources(&self) -> usize {
        self.sources.as_ref().map(|s| s.num_sources()).unwrap_or(0)
    }

    /// Whether a source of the given name is attached.
    pub fn is_source(&self, name: &str) -> bool {
        self.sources
            .as_ref()
            .map(|s| s.is_source(name))
            .unwrap_or(false)
    }

    /// Borrow a source by name.
    pub fn source(&self, name: &str) -> Option<&SourceBintr> {
        self.sources.as_ref().and_then(|s| s.source(name))
    }

    /// Stream id assigned to a source.
    pub fn stream_id(&self, name: &str) -> Option<usize> {
        self.sources.as_ref().and_then(|s| s.stream_id(name))
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Append a processing component to the pipeline's chain.
    pub fn add_component(
        &mut self,
        component: impl Into<Component>,
    ) -> std::result::Result<(), Rejected<Component>> {
        self.components.adopt(component.into(), ParentKind::Pipeline)
    }

    /// Remove a component by name and hand it back.
    pub fn remove_component(&mut self, name: &str) -> Result<Component> {
        self.components.remove_component(name)
    }

    /// Borrow a component by name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.component(name)
    }

    /// Mutably borrow a component by name.
    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.component_mut(name)
    }

    /// Number of components in the chain.
    pub fn num_components(&self) -> usize {
        self.components.num_components()
    }

    // ------------------------------------------------------------------
    // Tiler
    // ------------------------------------------------------------------

    /// Attach a tiler between the stream-multiplexer and the components.
    ///
    /// At most one tiler can be attached; it must have both an input and
    /// an output pad.
    pub fn add_streammux_tiler(
        &mut self,
        tiler: Elementr,
    ) -> std::result::Result<(), Rejected<Elementr>> {
        if self.tiler.is_some() {
            let error = Error::AlreadyAttached {
                name: tiler.name().to_string(),
            };
            return Err(Rejected::new(tiler, error));
        }
        if tiler.input_pad().is_none() || tiler.output_pad().is_none() {
            let error = Error::InvalidParent {
                child: tiler.name().to_string(),
                parent: self.name.clone(),
                reason: "a tiler needs both an input and an output pad".to_string(),
            };
            return Err(Rejected::new(tiler, error));
        }
        if let Err(error) = self.engine.add_element_to_bin(self.bin, tiler.handle()) {
            return Err(Rejected::new(tiler, error));
        }
        tracing::debug!("attached tiler '{}' to '{}'", tiler.name(), self.name);
        self.tiler = Some(tiler);
        Ok(())
    }

    /// Detach the tiler and hand it back. Refused while it is wired in.
    pub fn remove_streammux_tiler(&mut self) -> Result<Elementr> {
        let tiler = self.tiler.take().ok_or_else(|| Error::NotFound {
            container: self.name.clone(),
            name: "tiler".to_string(),
        })?;
        let wired = [tiler.input_pad(), tiler.output_pad()]
            .into_iter()
            .flatten()
            .any(|pad| self.engine.pad_peer(pad).is_some());
        if wired {
            let error = Error::LinkedState {
                container: self.name.clone(),
                name: tiler.name().to_string(),
            };
            self.tiler = Some(tiler);
            return Err(error);
        }
        if let Err(e) = self.engine.remove_element_from_bin(self.bin, tiler.handle()) {
            tracing::warn!("tiler '{}' was not in '{}': {}", tiler.name(), self.name, e);
        }
        Ok(tiler)
    }

    /// Whether a tiler is attached.
    pub fn has_streammux_tiler(&self) -> bool {
        self.tiler.is_some()
    }

    // ------------------------------------------------------------------
    // Stream-multiplexer settings
    // ------------------------------------------------------------------

    /// Frames batched per multiplexer output buffer.
    ///
    /// Falls back to the stored setting (or 1) before the aggregator
    /// exists.
    pub fn streammux_batch_size(&self) -> Result<u64> {
        match &self.sources {
            Some(sources) => sources.batch_size(),
            None => Ok(self.settings.batch_size.unwrap_or(1)),
        }
    }

    /// Set the batch size explicitly, disabling the play-time default.
    pub fn set_streammux_batch_size(&mut self, batch_size: u64) -> Result<()> {
        self.settings.batch_size = Some(batch_size);
        if let Some(sources) = self.sources.as_mut() {
            sources.set_batch_size(batch_size)?;
        }
        Ok(())
    }

    /// Surfaces carried per frame.
    pub fn streammux_num_surfaces_per_frame(&self) -> Result<u64> {
        match &self.sources {
            Some(sources) => sources.num_surfaces_per_frame(),
            None => Ok(self.settings.num_surfaces_per_frame),
        }
    }

    /// Set surfaces per frame.
    pub fn set_streammux_num_surfaces_per_frame(&mut self, num: u64) -> Result<()> {
        self.settings.num_surfaces_per_frame = num;
        if let Some(sources) = self.sources.as_mut() {
            sources.set_num_surfaces_per_frame(num)?;
        }
        Ok(())
    }

    /// Whether multiplexer inputs are synchronized before batching.
    pub fn streammux_sync_inputs_enabled(&self) -> Result<bool> {
        match &self.sources {
            Some(sources) => sources.sync_inputs_enabled(),
            None => Ok(self.settings.sync_inputs),
        }
    }

    /// Enable or disable input synchronization.
    pub fn set_streammux_sync_inputs_enabled(&mut self, enabled: bool) -> Result<()> {
        self.settings.sync_inputs = enabled;
        if let Some(sources) = self.sources.as_mut() {
            sources.set_sync_inputs_enabled(enabled)?;
        }
        Ok(())
    }

    /// Upper bound on multiplexer-added latency, in milliseconds.
    pub fn streammux_max_latency(&self) -> Result<u64> {
        match &self.sources {
            Some(sources) => sources.max_latency(),
            None => Ok(self.settings.max_latency),
        }
    }

    /// Set the latency bound.
    pub fn set_streammux_max_latency(&mut self, millis: u64) -> Result<()> {
        self.settings.max_latency = millis;
        if let Some(sources) = self.sources.as_mut() {
            sources.set_max_latency(millis)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Whether the multiplexer-to-components seam is wired.
    pub fn is_linked(&self) -> bool {
        self.components
            .upstream_pad()
            .and_then(|pad| self.engine.pad_peer(pad))
            .is_some()
    }

    /// Wire the whole graph: sources into the multiplexer, the
    /// multiplexer (through the tiler, when attached) into the head
    /// component, and each component to the next.
    ///
    /// Idempotent on already-wired seams, so a retry after a partial
    /// failure resumes where it stopped.
    pub fn link_all(&mut self) -> Result<()> {
        if let Some(sources) = self.sources.as_mut() {
            sources.link_all()?;
        }
        self.components.link_all()?;

        let mux_out = self.sources.as_ref().and_then(|s| s.downstream_pad());
        let mut head = mux_out;
        if let (Some(tiler), Some(out)) = (&self.tiler, mux_out) {
            self.bind_if_unwired(out, tiler.input_pad(), tiler.name())?;
            head = tiler.output_pad();
        }
        if self.components.num_components() > 0 {
            if let Some(out) = head {
                let sink = self.components.upstream_pad().ok_or_else(|| Error::Link {
                    src: self.name.clone(),
                    sink: self.components.name().to_string(),
                    reason: "the head component accepts no input".to_string(),
                })?;
                self.bind_if_unwired(out, Some(sink), self.components.name())?;
            }
        }
        Ok(())
    }

    fn bind_if_unwired(
        &self,
        src: PadHandle,
        sink: Option<PadHandle>,
        sink_name: &str,
    ) -> Result<()> {
        let sink = sink.ok_or_else(|| Error::Link {
            src: self.name.clone(),
            sink: sink_name.to_string(),
            reason: format!("'{}' accepts no input", sink_name),
        })?;
        if self.engine.pad_peer(src).is_some() {
            return Ok(());
        }
        self.engine.bind(src, sink)
    }

    /// Unwire every seam and every child.
    pub fn unlink_all(&mut self) {
        if let Some(tiler) = &self.tiler {
            for pad in [tiler.input_pad(), tiler.output_pad()].into_iter().flatten() {
                self.engine.unbind(pad);
            }
        }
        if let Some(sources) = self.sources.as_mut() {
            if let Some(out) = sources.downstream_pad() {
                self.engine.unbind(out);
            }
            sources.unlink_all();
        }
        self.components.unlink_all();
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Link the graph and transition to `Playing`, synchronously.
    ///
    /// When no batch size was set explicitly, the multiplexer batch is
    /// sized to the source count before starting.
    pub fn play(&mut self) -> Result<()> {
        let from = self.state()?;
        if self.settings.batch_size.is_none() && !from.is_running() {
            if let Some(sources) = self.sources.as_mut() {
                let batch = sources.num_sources().max(1) as u64;
                tracing::debug!("defaulting '{}' batch size to {}", self.name, batch);
                sources.set_batch_size(batch)?;
            }
        }
        self.link_all()?;
        let transition = self.engine.set_state(self.bin, GraphState::Playing)?;
        tracing::info!("{} '{}' is playing", self.id, self.name);
        self.events
            .send_state_changed(transition.from, transition.to);
        Ok(())
    }

    /// Request a transition to `Paused` on the main loop.
    ///
    /// Returns as soon as the request is queued; the outcome arrives as
    /// a [`super::StateEvent`]. Pausing a pipeline that is still in
    /// `Null` fails, reported through the event channel.
    pub fn pause(&mut self) -> TimerId {
        self.schedule_transition(GraphState::Paused)
    }

    /// Request a transition to `Null` on the main loop.
    ///
    /// Returns as soon as the request is queued; the outcome arrives as
    /// a [`super::StateEvent`].
    pub fn stop(&mut self) -> TimerId {
        self.schedule_transition(GraphState::Null)
    }

    fn schedule_transition(&mut self, target: GraphState) -> TimerId {
        *self.pending.lock().unwrap() = Some(target);
        let engine = self.engine.clone();
        let bin = self.bin;
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);
        let name = self.name.clone();
        self.scheduler.schedule_once(Duration::ZERO, move || {
            let result = match engine.state_of(bin) {
                Ok(GraphState::Null) if target == GraphState::Paused => {
                    Err(Error::StateChange {
                        name: name.clone(),
                        reason: "cannot pause a pipeline that was never started".to_string(),
                    })
                }
                Ok(_) => engine.set_state(bin, target),
                Err(e) => Err(e),
            };
            match result {
                Ok(transition) => {
                    tracing::info!("'{}' reached {}", name, transition.to);
                    events.send_state_changed(transition.from, transition.to);
                }
                Err(e) => {
                    tracing::error!("'{}' failed to reach {}: {}", name, target, e);
                    events.send_state_change_failed(target, e.to_string());
                }
            }
            *pending.lock().unwrap() = None;
        })
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Graphviz rendering of the pipeline's topology.
    pub fn render_dot(&self) -> Result<String> {
        self.engine.render_dot(self.bin)
    }

    /// Write a dot dump to the `MANIFOLD_DOT_DIR` directory.
    pub fn dump_dot(&self, filename: &str) -> Result<Option<std::path::PathBuf>> {
        self.engine.dump_dot(self.bin, filename, false)
    }

    /// Write a timestamped dot dump to the `MANIFOLD_DOT_DIR` directory.
    pub fn dump_dot_with_ts(&self, filename: &str) -> Result<Option<std::path::PathBuf>> {
        self.engine.dump_dot(self.bin, filename, true)
    }
}

impl std::fmt::Debug for PipelineBintr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBintr")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("sources", &self.num_sources())
            .field("components", &self.num_components())
            .field("tiler", &self.tiler.is_some())
            .finish()
    }
}

impl Drop for PipelineBintr {
    fn drop(&mut self) {
        tracing::info!("destroying {} '{}'", self.id, self.name);
        self.engine.destroy_bin(self.bin);
    }
}
