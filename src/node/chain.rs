//! Ordered child container with deterministic add-order linking.
//!
//! `LinkChain` is the bookkeeping every container shares: children keyed
//! by a monotonically increasing insertion index, plus the subset of
//! indices whose links are currently in place. Linking walks children in
//! index order and binds each one to its predecessor; a failure stops
//! the walk but keeps everything already linked, so a later call resumes
//! where the last one gave up.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::Engine;
use crate::error::{Error, Result};

use super::{Linkable, Rejected};

/// Ordered collection of linkable children.
#[derive(Debug)]
pub struct LinkChain<T> {
    owner: String,
    next_index: u32,
    indexed: BTreeMap<u32, T>,
    linked: BTreeSet<u32>,
}

impl<T: Linkable> LinkChain<T> {
    /// Create an empty chain owned by `owner` (used in diagnostics).
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            next_index: 0,
            indexed: BTreeMap::new(),
            linked: BTreeSet::new(),
        }
    }

    /// Name of the owning container.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Append a child, assigning it the next insertion index.
    ///
    /// Indices are never reused, so removal followed by re-insertion
    /// puts the child at the end of the chain.
    pub fn add(&mut self, child: T) -> std::result::Result<u32, Rejected<T>> {
        if self.contains(child.name()) {
            let error = Error::DuplicateName {
                container: self.owner.clone(),
                name: child.name().to_string(),
            };
            return Err(Rejected::new(child, error));
        }
        let index = self.next_index;
        self.next_index += 1;
        tracing::debug!(
            "added '{}' to '{}' at index {}",
            child.name(),
            self.owner,
            index
        );
        self.indexed.insert(index, child);
        Ok(index)
    }

    /// Remove a child by name and hand it back.
    ///
    /// Refused while the child is part of the linked chain.
    pub fn remove(&mut self, name: &str) -> Result<T> {
        let index = self.index_of(name).ok_or_else(|| Error::NotFound {
            container: self.owner.clone(),
            name: name.to_string(),
        })?;
        if self.linked.contains(&index) {
            return Err(Error::LinkedState {
                container: self.owner.clone(),
                name: name.to_string(),
            });
        }
        self.indexed.remove(&index).ok_or_else(|| Error::NotFound {
            container: self.owner.clone(),
            name: name.to_string(),
        })
    }

    /// Insertion index of the child with the given name.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.indexed
            .iter()
            .find(|(_, child)| child.name() == name)
            .map(|(index, _)| *index)
    }

    /// Whether a child with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Borrow a child by name.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.indexed.values().find(|child| child.name() == name)
    }

    /// Mutably borrow a child by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.indexed.values_mut().find(|child| child.name() == name)
    }

    /// The child with the lowest insertion index.
    pub fn first(&self) -> Option<&T> {
        self.indexed.values().next()
    }

    /// The child with the highest insertion index.
    pub fn last(&self) -> Option<&T> {
        self.indexed.values().next_back()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.indexed.len()
    }

    /// Whether the chain has no children.
    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty()
    }

    /// Children in insertion order with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.indexed.iter().map(|(index, child)| (*index, child))
    }

    /// Mutable iteration in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.indexed.iter_mut().map(|(index, child)| (*index, child))
    }

    /// Whether any child is currently linked.
    pub fn is_linked(&self) -> bool {
        !self.linked.is_empty()
    }

    /// Whether every child is currently linked.
    pub fn is_fully_linked(&self) -> bool {
        self.linked.len() == self.indexed.len()
    }

    /// Number of children currently linked.
    pub fn linked_count(&self) -> usize {
        self.linked.len()
    }

    /// Link all children in insertion order.
    ///
    /// Each not-yet-linked child first wires its internals, then is
    /// bound to its predecessor. On failure the walk stops and the error
    /// is returned; children linked so far stay linked, and a later call
    /// picks up with the first unlinked child. Calling this on a fully
    /// linked chain is a no-op.
    pub fn link_all(&mut self, engine: &Engine) -> Result<()> {
        let indices: Vec<u32> = self.indexed.keys().copied().collect();
        let mut prev: Option<u32> = None;
        for index in indices {
            if self.linked.contains(&index) {
                prev = Some(index);
                continue;
            }
            if let Some(child) = self.indexed.get_mut(&index) {
                if let Err(e) = child.link_internal() {
                    tracing::error!(
                        "linking internals of '{}' in '{}' failed: {}",
                        child.name(),
                        self.owner,
                        e
                    );
                    return Err(e);
                }
            }
            if let Some(prev_index) = prev {
                if let Err(e) = self.bind_pair(engine, prev_index, index) {
                    // The child never joins the linked set, so its
                    // internals must not stay wired either.
                    if let Some(child) = self.indexed.get_mut(&index) {
                        child.unlink_internal();
                    }
                    return Err(e);
                }
            }
            self.linked.insert(index);
            prev = Some(index);
        }
        Ok(())
    }

    /// Unlink all children, lowest index first.
    ///
    /// Breaks the pairwise links between children and unwinds each
    /// child's internals. The first child's upstream side is left alone;
    /// whoever bound into the chain owns that link.
    pub fn unlink_all(&mut self, engine: &Engine) {
        let linked: Vec<u32> = self.linked.iter().copied().collect();
        let mut first = true;
        for index in linked {
            if !first {
                if let Some(pad) = self.indexed.get(&index).and_then(|c| c.upstream_pad()) {
                    engine.unbind(pad);
                }
            }
            first = false;
            if let Some(child) = self.indexed.get_mut(&index) {
                child.unlink_internal();
            }
        }
        self.linked.clear();
    }

    fn bind_pair(&self, engine: &Engine, a: u32, b: u32) -> Result<()> {
        let a_name = self
            .indexed
            .get(&a)
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        let b_name = self
            .indexed
            .get(&b)
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        let src = self.indexed.get(&a).and_then(|c| c.downstream_pad());
        let sink = self.indexed.get(&b).and_then(|c| c.upstream_pad());
        let result = match (src, sink) {
            (Some(src), Some(sink)) => engine.bind(src, sink),
            (None, _) => Err(Error::Link {
                src: a_name.clone(),
                sink: b_name.clone(),
                reason: format!("'{}' exposes no output", a_name),
            }),
            (_, None) => Err(Error::Link {
                src: a_name.clone(),
                sink: b_name.clone(),
                reason: format!("'{}' accepts no input", b_name),
            }),
        };
        if let Err(e) = &result {
            tracing::error!(
                "linking '{}' -> '{}' in '{}' failed: {}",
                a_name,
                b_name,
                self.owner,
                e
            );
        }
        result
    }
}
