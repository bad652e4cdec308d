//! Error types for Manifold.

use thiserror::Error;

/// Result type alias using Manifold's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Manifold operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A child with the same name already exists in the container.
    #[error("'{container}' already contains a child named '{name}'")]
    DuplicateName {
        /// Name of the container that rejected the child.
        container: String,
        /// Name of the offending child.
        name: String,
    },

    /// No child with the given name exists in the container.
    #[error("'{container}' has no child named '{name}'")]
    NotFound {
        /// Name of the container that was searched.
        container: String,
        /// Name that was looked up.
        name: String,
    },

    /// The operation requires the target to be unlinked first.
    #[error("'{name}' in '{container}' is currently linked")]
    LinkedState {
        /// Name of the container holding the linked child.
        container: String,
        /// Name of the linked child.
        name: String,
    },

    /// The child is already owned by another parent.
    #[error("'{name}' is already attached to a parent")]
    AlreadyAttached {
        /// Name of the child that already has a parent.
        name: String,
    },

    /// A fixed-capacity container is full.
    #[error("'{name}' is at capacity ({capacity})")]
    Capacity {
        /// Name of the full container.
        name: String,
        /// The container's fixed capacity.
        capacity: usize,
    },

    /// The child cannot be adopted by this kind of parent.
    #[error("'{child}' cannot be added to '{parent}': {reason}")]
    InvalidParent {
        /// Name of the rejected child.
        child: String,
        /// Name of the would-be parent.
        parent: String,
        /// Why the parent refused.
        reason: String,
    },

    /// Element or resource construction failed.
    #[error("failed to create '{name}': {reason}")]
    Creation {
        /// Name of the object that could not be created.
        name: String,
        /// Why creation failed.
        reason: String,
    },

    /// Property read or write was rejected.
    #[error("property '{property}' on '{element}': {reason}")]
    Property {
        /// Name of the element that owns the property.
        element: String,
        /// Name of the property.
        property: String,
        /// Why the access was rejected.
        reason: String,
    },

    /// A state transition was refused or failed.
    #[error("state change on '{name}' failed: {reason}")]
    StateChange {
        /// Name of the object whose state change failed.
        name: String,
        /// Why the transition failed.
        reason: String,
    },

    /// Linking two connection points failed.
    #[error("cannot link '{src}' to '{sink}': {reason}")]
    Link {
        /// Description of the upstream side.
        src: String,
        /// Description of the downstream side.
        sink: String,
        /// Why the link failed.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
