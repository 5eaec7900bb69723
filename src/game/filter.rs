//! Pairwise collision suppression table
//!
//! Each suppression is reference counted: when two agents both suppress each
//! other, the pair only collides again after both have restored it.

use rustc_hash::FxHashMap;

use crate::game::state::AgentId;

#[derive(Debug, Default, Clone)]
pub struct CollisionFilter {
    pairs: FxHashMap<(AgentId, AgentId), u32>,
}

#[inline]
fn key(a: AgentId, b: AgentId) -> (AgentId, AgentId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl CollisionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress(&mut self, a: AgentId, b: AgentId) {
        if a == b {
            return;
        }
        *self.pairs.entry(key(a, b)).or_insert(0) += 1;
    }

    /// Drop one reference; returns true when the pair collides again
    pub fn restore(&mut self, a: AgentId, b: AgentId) -> bool {
        let k = key(a, b);
        match self.pairs.get_mut(&k) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.pairs.remove(&k);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_ignored(&self, a: AgentId, b: AgentId) -> bool {
        self.pairs.contains_key(&key(a, b))
    }

    /// Remove every pair involving `id`, whoever suppressed it
    pub fn purge(&mut self, id: AgentId) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|&(a, b), _| a != id && b != id);
        before - self.pairs.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
