//! Owner wrapper around a single engine element.
//!
//! An `Elementr` owns exactly one engine element: dropping the wrapper
//! destroys the element, its pads and any links on them. Containers hold
//! their elements through this type, so subtree teardown falls out of
//! ordinary drop order.

use crate::engine::{element, Engine, ElementHandle, GraphState, PadHandle, PropertyValue};
use crate::error::{Error, Result};

use super::Linkable;

/// Exclusive owner of one engine element.
#[derive(Debug)]
pub struct Elementr {
    name: String,
    kind: &'static str,
    engine: Engine,
    handle: ElementHandle,
    input: Option<PadHandle>,
    output: Option<PadHandle>,
}

impl Elementr {
    /// Create an element of `kind` with default properties.
    pub fn new(engine: &Engine, kind: &str, name: &str) -> Result<Self> {
        Self::with_properties(engine, kind, name, &[])
    }

    /// Create an element of `kind`, applying `props` over the defaults.
    pub fn with_properties(
        engine: &Engine,
        kind: &str,
        name: &str,
        props: &[(&str, PropertyValue)],
    ) -> Result<Self> {
        let spec = element::kind_spec(kind).ok_or_else(|| Error::Creation {
            name: name.to_string(),
            reason: format!("unknown kind '{}'", kind),
        })?;
        let handle = engine.create_element(spec.name, name, props)?;
        let (input, output) = engine.static_pads(handle)?;
        Ok(Self {
            name: name.to_string(),
            kind: spec.name,
            engine: engine.clone(),
            handle,
            input,
            output,
        })
    }

    /// Name of the element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry kind the element was created from.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Engine handle of the element.
    pub fn handle(&self) -> ElementHandle {
        self.handle
    }

    /// The element's static input pad, if its kind has one.
    pub fn input_pad(&self) -> Option<PadHandle> {
        self.input
    }

    /// The element's static output pad, if its kind has one.
    pub fn output_pad(&self) -> Option<PadHandle> {
        self.output
    }

    /// Current effective state of the element.
    pub fn state(&self) -> Result<GraphState> {
        self.engine.element_state(self.handle)
    }

    /// Read a property.
    pub fn get_property(&self, name: &str) -> Result<PropertyValue> {
        self.engine.get_property(self.handle, name)
    }

    /// Write a property.
    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        self.engine.set_property(self.handle, name, value.into())
    }

    /// Read a property, expecting an unsigned integer.
    pub fn property_u64(&self, name: &str) -> Result<u64> {
        let value = self.get_property(name)?;
        value.as_u64().ok_or_else(|| Error::Property {
            element: self.name.clone(),
            property: name.to_string(),
            reason: format!("value '{}' is not an unsigned integer", value),
        })
    }

    /// Read a property, expecting a boolean.
    pub fn property_bool(&self, name: &str) -> Result<bool> {
        let value = self.get_property(name)?;
        value.as_bool().ok_or_else(|| Error::Property {
            element: self.name.clone(),
            property: name.to_string(),
            reason: format!("value '{}' is not a boolean", value),
        })
    }

    /// Link this element's output to another element's input.
    pub fn link_to(&mut self, peer: &Elementr) -> Result<()> {
        let src = self.output.ok_or_else(|| Error::Link {
            src: self.name.clone(),
            sink: peer.name.clone(),
            reason: format!("'{}' has no output pad", self.name),
        })?;
        let sink = peer.input.ok_or_else(|| Error::Link {
            src: self.name.clone(),
            sink: peer.name.clone(),
            reason: format!("'{}' has no input pad", peer.name),
        })?;
        self.engine.bind(src, sink)
    }

    /// Break the link on this element's output, if any.
    pub fn unlink_downstream(&mut self) -> bool {
        self.output.map(|pad| self.engine.unbind(pad)).unwrap_or(false)
    }
}

impl Linkable for Elementr {
    fn name(&self) -> &str {
        &self.name
    }

    fn upstream_pad(&self) -> Option<PadHandle> {
        self.input
    }

    fn downstream_pad(&self) -> Option<PadHandle> {
        self.output
    }

    fn link_internal(&mut self) -> Result<()> {
        // A single element has no internal wiring.
        Ok(())
    }

    fn unlink_internal(&mut self) {}
}

impl Drop for Elementr {
    fn drop(&mut self) {
        if self.engine.destroy_element(self.handle) {
            tracing::trace!("dropped element '{}'", self.name);
        }
    }
}
