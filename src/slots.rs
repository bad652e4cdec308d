//! Lowest-free-first slot allocation.
//!
//! A [`SlotPool`] hands out small integer ids, always choosing the lowest
//! id not currently in use. Released ids become eligible again immediately,
//! so id assignment is deterministic regardless of acquire/release history.
//! Used for pipeline ids and for per-branch stream ids inside fan-out and
//! fan-in nodes.

const WORD_BITS: usize = 64;

/// Bit-vector backed pool of small integer ids.
#[derive(Debug, Clone)]
pub struct SlotPool {
    words: Vec<u64>,
    capacity: Option<usize>,
}

impl SlotPool {
    /// Create a pool with no upper bound on ids.
    pub const fn unbounded() -> Self {
        Self {
            words: Vec::new(),
            capacity: None,
        }
    }

    /// Create a pool that will never hand out an id >= `capacity`.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            words: Vec::new(),
            capacity: Some(capacity),
        }
    }

    /// Acquire the lowest free id, or `None` if the pool is at capacity.
    pub fn acquire(&mut self) -> Option<usize> {
        for (index, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = index * WORD_BITS + bit;
                if let Some(cap) = self.capacity {
                    if slot >= cap {
                        return None;
                    }
                }
                *word |= 1 << bit;
                return Some(slot);
            }
        }
        let slot = self.words.len() * WORD_BITS;
        if let Some(cap) = self.capacity {
            if slot >= cap {
                return None;
            }
        }
        self.words.push(1);
        Some(slot)
    }

    /// Return an id to the pool. Returns `false` if it was not in use.
    pub fn release(&mut self, slot: usize) -> bool {
        let index = slot / WORD_BITS;
        let mask = 1u64 << (slot % WORD_BITS);
        match self.words.get_mut(index) {
            Some(word) if *word & mask != 0 => {
                *word &= !mask;
                true
            }
            _ => false,
        }
    }

    /// Whether the given id is currently in use.
    pub fn is_used(&self, slot: usize) -> bool {
        let index = slot / WORD_BITS;
        let mask = 1u64 << (slot % WORD_BITS);
        self.words.get(index).is_some_and(|word| word & mask != 0)
    }

    /// Number of ids currently in use.
    pub fn used(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The pool's fixed capacity, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::unbounded()
    }
}
