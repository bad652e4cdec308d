//! Connection points for engine elements.
//!
//! Pads are the attachment points through which elements are wired
//! together. Every pad lives in the engine's topology table and is
//! referred to by handle; the structs here describe direction, presence
//! and identity.

use std::fmt;

/// Direction of a pad (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// An input pad (receives data from upstream).
    Input,
    /// An output pad (feeds data downstream).
    Output,
}

impl PadDirection {
    /// The direction a peer pad must have to be linkable.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Input => PadDirection::Output,
            PadDirection::Output => PadDirection::Input,
        }
    }
}

impl fmt::Display for PadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadDirection::Input => write!(f, "input"),
            PadDirection::Output => write!(f, "output"),
        }
    }
}

/// Whether a pad is always present or allocated on request.
///
/// There is deliberately no "sometimes" presence: elements whose pads
/// appear at data-flow time cannot be wired ahead of time, so kinds that
/// would need them (stream demultiplexers) allocate their full pad set
/// up front instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad exists from element creation onward.
    Always,
    /// Pad is allocated explicitly via [`Engine::request_pad`].
    ///
    /// [`Engine::request_pad`]: crate::engine::Engine::request_pad
    Request,
}

/// Opaque handle to a pad owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadHandle(pub(crate) u64);

impl fmt::Display for PadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

/// Snapshot of a pad's identity and link status.
#[derive(Debug, Clone)]
pub struct PadInfo {
    /// Name of the pad within its element ("sink", "src", "src_0", ...).
    pub name: String,
    /// Direction of the pad.
    pub direction: PadDirection,
    /// How the pad came to exist.
    pub presence: PadPresence,
    /// Whether the pad is currently linked to a peer.
    pub bound: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_opposite() {
        assert_eq!(PadDirection::Input.opposite(), PadDirection::Output);
        assert_eq!(PadDirection::Output.opposite(), PadDirection::Input);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(PadDirection::Input.to_string(), "input");
        assert_eq!(PadDirection::Output.to_string(), "output");
    }

    #[test]
    fn test_pad_handle_display() {
        assert_eq!(PadHandle(7).to_string(), "pad#7");
    }
}
