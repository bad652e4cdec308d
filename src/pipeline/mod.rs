//! Top-level pipeline assembly.
//!
//! A [`PipelineBintr`] composes a sources aggregator, an optional tiler
//! and a chain of processing components, and drives their lifecycle.
//! `play` runs synchronously on the caller's thread; `pause` and `stop`
//! are deferred onto the [`MainLoop`] so state mutation happens on the
//! thread that owns it, with completion reported through [`StateEvent`]s.

pub mod events;
pub mod ids;
pub mod main_loop;
pub mod pipeline;
pub mod sources;

pub use events::{EventReceiver, EventSender, EventStream, StateEvent};
pub use ids::PipelineId;
pub use main_loop::{MainLoop, MainLoopHandle, TimerId};
pub use pipeline::PipelineBintr;
pub use sources::{SourcesBintr, StreammuxSettings};
