//! # Manifold
//!
//! A dynamic composition and linking engine for element graphs.
//!
//! Manifold builds processing graphs out of engine-owned elements and
//! bins, wrapped in owner nodes that form a strict tree: chains of
//! elements, nestable branches, fan-out tees and demultiplexers, and a
//! top-level pipeline that aggregates sources through a
//! stream-multiplexer and drives the whole graph's lifecycle.
//!
//! ## Quick Start
//!
//! ```rust
//! use manifold::prelude::*;
//!
//! # fn main() -> manifold::Result<()> {
//! let engine = Engine::new();
//! let main_loop = MainLoop::new();
//!
//! let mut pipeline = PipelineBintr::new(&engine, &main_loop, "demo")?;
//! pipeline.add_source(SourceBintr::test(&engine, "cam0", true)?)?;
//!
//! let mut sink = Bintr::new(&engine, "display")?;
//! sink.add_element(Elementr::new(&engine, "queue", "display-q")?)?;
//! sink.add_element(Elementr::new(&engine, "fakesink", "display-sink")?)?;
//! pipeline.add_component(sink)?;
//!
//! pipeline.play()?;
//! pipeline.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod slots;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{Engine, GraphState, PropertyValue};
    pub use crate::error::{Error, Result};
    pub use crate::node::{
        Bintr, BranchBintr, Component, Elementr, SourceBintr, TeeBintr, TeeKind,
    };
    pub use crate::pipeline::{MainLoop, PipelineBintr, StateEvent};
}

pub use error::{Error, Result};
