//! Composition nodes built on top of the engine.
//!
//! A node owns a set of engine objects (a bin plus elements, possibly
//! nested child nodes) and knows how to wire them. Ownership is a strict
//! tree: adding a node to a parent moves it, removing hands it back.
//! The [`Linkable`] trait is the contract a container uses to chain its
//! children without caring what they are; [`Component`] is the closed
//! set of node shapes a pipeline or branch can hold.

pub mod bintr;
pub mod branch;
pub mod chain;
pub mod elementr;
pub mod source;
pub mod tee;

pub use bintr::Bintr;
pub use branch::BranchBintr;
pub use chain::LinkChain;
pub use elementr::Elementr;
pub use source::SourceBintr;
pub use tee::{TeeBintr, TeeKind};

use std::fmt;

use crate::engine::{BinHandle, PadHandle};
use crate::error::{Error, Result};

/// Contract for nodes that can sit in an ordered chain.
///
/// A container links child `n` to child `n+1` by binding the first
/// child's downstream pad to the second child's upstream pad, after
/// giving each child the chance to wire its own internals.
pub trait Linkable {
    /// Name of the node, unique within its container.
    fn name(&self) -> &str;

    /// Pad an upstream peer binds into, if the node accepts input.
    fn upstream_pad(&self) -> Option<PadHandle>;

    /// Pad that feeds a downstream peer, if the node produces output.
    ///
    /// Fan-out nodes return `None` here, which pins them to the tail of
    /// any chain they sit in.
    fn downstream_pad(&self) -> Option<PadHandle>;

    /// Wire the node's internal topology.
    fn link_internal(&mut self) -> Result<()>;

    /// Undo [`Linkable::link_internal`].
    fn unlink_internal(&mut self);
}

/// The kind of container a component is being added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    /// A top-level pipeline.
    Pipeline,
    /// A nested branch.
    Branch,
    /// A fan-out node's branch slot.
    Tee,
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentKind::Pipeline => write!(f, "pipeline"),
            ParentKind::Branch => write!(f, "branch"),
            ParentKind::Tee => write!(f, "tee"),
        }
    }
}

/// A child that could not be adopted, handed back with the reason.
///
/// Adding a node to a container transfers ownership; when the add is
/// refused the child must not be silently destroyed, so it travels back
/// inside the error. Callers that do not care can convert into a plain
/// [`Error`] with `?`.
#[derive(Debug)]
pub struct Rejected<T> {
    /// The child, returned to the caller.
    pub child: T,
    /// Why adoption failed.
    pub error: Error,
}

impl<T> Rejected<T> {
    pub(crate) fn new(child: T, error: Error) -> Self {
        Self { child, error }
    }

    /// Discard the child and keep the error.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl<T> From<Rejected<T>> for Error {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

/// The node shapes a pipeline or branch can hold.
#[derive(Debug)]
pub enum Component {
    /// A linear chain of elements.
    Chain(Bintr),
    /// A nested container of further components.
    Branch(BranchBintr),
    /// A fan-out node with named branches.
    Tee(TeeBintr),
}

impl Component {
    /// Name of the wrapped node.
    pub fn name(&self) -> &str {
        match self {
            Component::Chain(c) => c.name(),
            Component::Branch(b) => b.name(),
            Component::Tee(t) => t.name(),
        }
    }

    /// Short label for the node shape, for diagnostics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Component::Chain(_) => "chain",
            Component::Branch(_) => "branch",
            Component::Tee(t) => t.kind().label(),
        }
    }

    /// Whether the node's internals are currently wired.
    pub fn is_linked(&self) -> bool {
        match self {
            Component::Chain(c) => c.is_linked(),
            Component::Branch(b) => b.is_linked(),
            Component::Tee(t) => t.is_linked(),
        }
    }

    pub(crate) fn bin(&self) -> BinHandle {
        match self {
            Component::Chain(c) => c.bin(),
            Component::Branch(b) => b.bin(),
            Component::Tee(t) => t.bin(),
        }
    }

    /// Check whether this component may live under the given parent.
    ///
    /// Fan-out nodes (tees, splitters, demultiplexers) can sit under a
    /// pipeline or a branch, but never directly under another fan-out.
    pub(crate) fn accepts_parent(&self, kind: ParentKind, parent_name: &str) -> Result<()> {
        match self {
            Component::Chain(_) | Component::Branch(_) => Ok(()),
            Component::Tee(_) => match kind {
                ParentKind::Pipeline | ParentKind::Branch => Ok(()),
                ParentKind::Tee => Err(Error::InvalidParent {
                    child: self.name().to_string(),
                    parent: parent_name.to_string(),
                    reason: "a fan-out node cannot be a direct branch of another fan-out"
                        .to_string(),
                }),
            },
        }
    }
}

impl Linkable for Component {
    fn name(&self) -> &str {
        Component::name(self)
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        match self {
            Component::Chain(c) => c.upstream_pad(),
            Component::Branch(b) => b.upstream_pad(),
            Component::Tee(t) => t.upstream_pad(),
        }
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        match self {
            Component::Chain(c) => c.downstream_pad(),
            Component::Branch(b) => b.downstream_pad(),
            Component::Tee(t) => t.downstream_pad(),
        }
    }

    fn link_internal(&mut self) -> Result<()> {
        match self {
            Component::Chain(c) => c.link_all(),
            Component::Branch(b) => b.link_all(),
            Component::Tee(t) => t.link_all(),
        }
    }

    fn unlink_internal(&mut self) {
        match self {
            Component::Chain(c) => c.unlink_all(),
            Component::Branch(b) => b.unlink_all(),
            Component::Tee(t) => t.unlink_all(),
        }
    }
}

impl From<Bintr> for Component {
    fn from(bintr: Bintr) -> Self {
        Component::Chain(bintr)
    }
}

impl From<BranchBintr> for Component {
    fn from(branch: BranchBintr) -> Self {
        Component::Branch(branch)
    }
}

impl From<TeeBintr> for Component {
    fn from(tee: TeeBintr) -> Self {
        Component::Tee(tee)
    }
}
