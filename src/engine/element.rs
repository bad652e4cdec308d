//! Element kinds and property values.
//!
//! The engine instantiates elements from a fixed registry of kinds. A
//! [`KindSpec`] declares an element kind's pad layout (static pads plus an
//! optional request-pad family) and its property table with defaults and
//! write restrictions. Wrapper types in [`crate::node`] build on these
//! kinds; they never bypass the registry.

use std::fmt;
use std::mem;

use super::pad::PadDirection;
use super::GraphState;

// ============================================================================
// Property values
// ============================================================================

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as string, if this is a string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as u64, if this is a non-negative integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::Integer(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    /// Get as f64, if this is a float or integer value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as bool, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::Bool(_) => "bool",
        }
    }

    /// Whether `other` holds the same value type.
    pub fn same_type(&self, other: &PropertyValue) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{}", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<u32> for PropertyValue {
    fn from(i: u32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// Const-constructible default for a property.
#[derive(Debug, Clone, Copy)]
pub enum PropertyDefault {
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// Boolean default.
    Bool(bool),
    /// String default.
    Str(&'static str),
}

impl PropertyDefault {
    /// Materialize the default as a [`PropertyValue`].
    pub fn to_value(self) -> PropertyValue {
        match self {
            PropertyDefault::Integer(i) => PropertyValue::Integer(i),
            PropertyDefault::Float(f) => PropertyValue::Float(f),
            PropertyDefault::Bool(b) => PropertyValue::Bool(b),
            PropertyDefault::Str(s) => PropertyValue::String(s.to_string()),
        }
    }
}

// ============================================================================
// Kind registry
// ============================================================================

/// Declaration of a single property on a kind.
#[derive(Debug, Clone, Copy)]
pub struct PropertySpec {
    /// Property name ("batch-size", "is-live", ...).
    pub name: &'static str,
    /// Value the property holds until written.
    pub default: PropertyDefault,
    /// Latest state in which a write is still accepted.
    ///
    /// A write is rejected once the element's effective state is past
    /// this. `GraphState::Playing` means writable at any time,
    /// `GraphState::Null` means writable only before the element has been
    /// brought up.
    pub writable_in: GraphState,
}

/// Declaration of a kind's request-pad family.
#[derive(Debug, Clone, Copy)]
pub struct RequestPadSpec {
    /// Direction of pads in this family.
    pub direction: PadDirection,
    /// Maximum number of live request pads, if bounded.
    pub capacity: Option<usize>,
    /// Whether pads may be requested while the element is paused or
    /// playing. Kinds that cannot re-negotiate at runtime set this to
    /// `false` and rely on callers allocating their pads up front.
    pub while_running: bool,
}

/// Static description of an element kind.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    /// Registry name of the kind.
    pub name: &'static str,
    /// Whether the kind has an always-present "sink" input pad.
    pub static_input: bool,
    /// Whether the kind has an always-present "src" output pad.
    pub static_output: bool,
    /// Request-pad family, if the kind has one.
    pub request: Option<RequestPadSpec>,
    /// Properties the kind exposes.
    pub properties: &'static [PropertySpec],
}

impl KindSpec {
    /// Look up a property declaration by name.
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }
}

const fn prop(name: &'static str, default: PropertyDefault, writable_in: GraphState) -> PropertySpec {
    PropertySpec {
        name,
        default,
        writable_in,
    }
}

/// Built-in element kinds.
///
/// The set mirrors what the composition layer needs: flow plumbing
/// (queue, convert), fan-out (tee, demux), fan-in (streammux), sources,
/// sinks and the tiled compositor.
static KINDS: &[KindSpec] = &[
    KindSpec {
        name: "queue",
        static_input: true,
        static_output: true,
        request: None,
        properties: &[prop(
            "max-size-buffers",
            PropertyDefault::Integer(200),
            GraphState::Playing,
        )],
    },
    KindSpec {
        name: "convert",
        static_input: true,
        static_output: true,
        request: None,
        properties: &[],
    },
    KindSpec {
        name: "tee",
        static_input: true,
        static_output: false,
        request: Some(RequestPadSpec {
            direction: PadDirection::Output,
            capacity: None,
            while_running: true,
        }),
        properties: &[prop(
            "allow-not-linked",
            PropertyDefault::Bool(true),
            GraphState::Playing,
        )],
    },
    // Stream demultiplexer: output pads cannot be added once running, so
    // owners request their full set at construction time.
    KindSpec {
        name: "demux",
        static_input: true,
        static_output: false,
        request: Some(RequestPadSpec {
            direction: PadDirection::Output,
            capacity: Some(64),
            while_running: false,
        }),
        properties: &[],
    },
    KindSpec {
        name: "streammux",
        static_input: false,
        static_output: true,
        request: Some(RequestPadSpec {
            direction: PadDirection::Input,
            capacity: None,
            while_running: true,
        }),
        properties: &[
            prop("batch-size", PropertyDefault::Integer(1), GraphState::Ready),
            prop(
                "num-surfaces-per-frame",
                PropertyDefault::Integer(1),
                GraphState::Ready,
            ),
            prop("sync-inputs", PropertyDefault::Bool(false), GraphState::Ready),
            prop("max-latency", PropertyDefault::Integer(0), GraphState::Playing),
            prop("width", PropertyDefault::Integer(1920), GraphState::Ready),
            prop("height", PropertyDefault::Integer(1080), GraphState::Ready),
        ],
    },
    KindSpec {
        name: "tiler",
        static_input: true,
        static_output: true,
        request: None,
        properties: &[
            prop("rows", PropertyDefault::Integer(1), GraphState::Playing),
            prop("columns", PropertyDefault::Integer(1), GraphState::Playing),
            prop("width", PropertyDefault::Integer(1280), GraphState::Ready),
            prop("height", PropertyDefault::Integer(720), GraphState::Ready),
        ],
    },
    KindSpec {
        name: "fakesrc",
        static_input: false,
        static_output: true,
        request: None,
        properties: &[
            prop("is-live", PropertyDefault::Bool(false), GraphState::Null),
            prop("num-buffers", PropertyDefault::Integer(-1), GraphState::Ready),
        ],
    },
    KindSpec {
        name: "urisrc",
        static_input: false,
        static_output: true,
        request: None,
        properties: &[
            prop("uri", PropertyDefault::Str(""), GraphState::Null),
            prop("is-live", PropertyDefault::Bool(false), GraphState::Null),
        ],
    },
    KindSpec {
        name: "fakesink",
        static_input: true,
        static_output: false,
        request: None,
        properties: &[prop("sync", PropertyDefault::Bool(false), GraphState::Playing)],
    },
    KindSpec {
        name: "windowsink",
        static_input: true,
        static_output: false,
        request: None,
        properties: &[
            prop("offset-x", PropertyDefault::Integer(0), GraphState::Playing),
            prop("offset-y", PropertyDefault::Integer(0), GraphState::Playing),
            prop("width", PropertyDefault::Integer(1280), GraphState::Playing),
            prop("height", PropertyDefault::Integer(720), GraphState::Playing),
            prop("sync", PropertyDefault::Bool(false), GraphState::Playing),
        ],
    },
];

/// Look up a kind by registry name.
pub fn kind_spec(kind: &str) -> Option<&'static KindSpec> {
    KINDS.iter().find(|k| k.name == kind)
}

/// Names of all registered kinds.
pub fn kind_names() -> impl Iterator<Item = &'static str> {
    KINDS.iter().map(|k| k.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_accessors() {
        assert_eq!(PropertyValue::Integer(42).as_i64(), Some(42));
        assert_eq!(PropertyValue::Integer(42).as_u64(), Some(42));
        assert_eq!(PropertyValue::Integer(-1).as_u64(), None);
        assert_eq!(PropertyValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(PropertyValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(
            PropertyValue::String("x".into()).as_string(),
            Some("x")
        );
        assert_eq!(PropertyValue::Bool(true).as_i64(), None);
    }

    #[test]
    fn test_property_value_type_check() {
        let a = PropertyValue::Integer(1);
        let b = PropertyValue::Integer(9);
        let c = PropertyValue::Bool(false);
        assert!(a.same_type(&b));
        assert!(!a.same_type(&c));
        assert_eq!(c.type_name(), "bool");
    }

    #[test]
    fn test_property_value_from() {
        assert_eq!(PropertyValue::from(4i64), PropertyValue::Integer(4));
        assert_eq!(PropertyValue::from(4u32), PropertyValue::Integer(4));
        assert_eq!(PropertyValue::from(true), PropertyValue::Bool(true));
        assert_eq!(
            PropertyValue::from("hi"),
            PropertyValue::String("hi".to_string())
        );
    }

    #[test]
    fn test_kind_lookup() {
        let queue = kind_spec("queue").unwrap();
        assert!(queue.static_input);
        assert!(queue.static_output);
        assert!(queue.request.is_none());

        assert!(kind_spec("no-such-kind").is_none());
        assert!(kind_names().any(|n| n == "streammux"));
    }

    #[test]
    fn test_demux_kind_pads_are_restricted() {
        let demux = kind_spec("demux").unwrap();
        let req = demux.request.unwrap();
        assert_eq!(req.direction, PadDirection::Output);
        assert!(!req.while_running);
        assert_eq!(req.capacity, Some(64));
    }

    #[test]
    fn test_streammux_defaults() {
        let mux = kind_spec("streammux").unwrap();
        let batch = mux.property("batch-size").unwrap();
        assert_eq!(batch.default.to_value(), PropertyValue::Integer(1));
        assert_eq!(batch.writable_in, GraphState::Ready);
        assert!(mux.property("no-such-prop").is_none());
    }
}
