//! Free/used resource pools
//!
//! Outputs, software DDCs and FFT channels are handed out from pools. An
//! entry is either free or used, never both, and never lost: every entry
//! taken with [`ResourcePool::get`] or [`ResourcePool::take`] comes back with
//! [`ResourcePool::put`].

use std::sync::Arc;

use rxctl_protocol::ModuleId;
use tracing::trace;

use crate::error::{ControlError, Result};
use crate::module::{Ddc, Fft, Output};

/// Something with a module identity, so pools can find it again
pub trait Identified {
    fn module_id(&self) -> &ModuleId;
}

impl Identified for Arc<Output> {
    fn module_id(&self) -> &ModuleId {
        self.base().id()
    }
}

impl Identified for Arc<Ddc> {
    fn module_id(&self) -> &ModuleId {
        self.base().id()
    }
}

impl Identified for Arc<Fft> {
    fn module_id(&self) -> &ModuleId {
        self.base().id()
    }
}

/// A pool of interchangeable resources
#[derive(Debug, Clone)]
pub struct ResourcePool<T> {
    name: &'static str,
    free: Vec<T>,
    used: Vec<T>,
}

impl<T: Identified + Clone> ResourcePool<T> {
    /// Empty pool; `name` appears in `PoolExhausted` errors
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            free: Vec::new(),
            used: Vec::new(),
        }
    }

    /// Pool with every entry free
    pub fn from_free(name: &'static str, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            name,
            free: items.into_iter().collect(),
            used: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the first free entry
    pub fn get(&mut self) -> Result<T> {
        if self.free.is_empty() {
            return Err(ControlError::PoolExhausted(self.name));
        }
        let item = self.free.remove(0);
        trace!("{} pool: {} taken", self.name, item.module_id());
        self.used.push(item.clone());
        Ok(item)
    }

    /// Take a specific free entry
    pub fn take(&mut self, id: &ModuleId) -> Option<T> {
        let pos = self.free.iter().position(|i| i.module_id() == id)?;
        let item = self.free.remove(pos);
        self.used.push(item.clone());
        Some(item)
    }

    /// Return an entry to the free list
    ///
    /// Entries the pool has never seen are adopted as free.
    pub fn put(&mut self, item: T) {
        let id = item.module_id().clone();
        self.used.retain(|i| i.module_id() != &id);
        if !self.free.iter().any(|i| i.module_id() == &id) {
            trace!("{} pool: {} returned", self.name, id);
            self.free.push(item);
        }
    }

    /// Move an entry to the used list; already-used entries stay put
    ///
    /// Returns whether the pool knows the entry.
    pub fn mark_used(&mut self, id: &ModuleId) -> bool {
        self.is_used(id) || self.take(id).is_some()
    }

    /// Replace a used entry with an updated copy
    pub fn update_used(&mut self, item: T) -> bool {
        match self.used.iter_mut().find(|i| i.module_id() == item.module_id()) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    pub fn is_used(&self, id: &ModuleId) -> bool {
        self.used.iter().any(|i| i.module_id() == id)
    }

    pub fn is_free(&self, id: &ModuleId) -> bool {
        self.free.iter().any(|i| i.module_id() == id)
    }

    pub fn free(&self) -> &[T] {
        &self.free
    }

    pub fn used(&self) -> &[T] {
        &self.used
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Total entries, free and used
    pub fn len(&self) -> usize {
        self.free.len() + self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Slot(ModuleId);

    impl Identified for Slot {
        fn module_id(&self) -> &ModuleId {
            &self.0
        }
    }

    fn pool(n: u32) -> ResourcePool<Slot> {
        ResourcePool::from_free("output", (1..=n).map(|ch| Slot(ModuleId::new("OUT", ch))))
    }

    #[test]
    fn test_get_and_put() {
        let mut p = pool(2);
        let a = p.get().unwrap();
        assert_eq!(a.0.to_string(), "OUT:1");
        let b = p.get().unwrap();
        assert!(matches!(p.get(), Err(ControlError::PoolExhausted("output"))));
        p.put(a.clone());
        p.put(a);
        assert_eq!((p.free_count(), p.used_count()), (1, 1));
        p.put(b);
        assert_eq!((p.free_count(), p.used_count()), (2, 0));
    }

    #[test]
    fn test_mark_used_is_idempotent() {
        let mut p = pool(3);
        let id = ModuleId::new("OUT", 2);
        assert!(p.mark_used(&id));
        assert!(p.mark_used(&id));
        assert_eq!((p.free_count(), p.used_count()), (2, 1));
        assert!(!p.mark_used(&ModuleId::new("OUT", 9)));
        assert_eq!(p.get().unwrap().0, ModuleId::new("OUT", 1));
    }

    proptest! {
        #[test]
        fn test_entries_are_conserved(ops in prop::collection::vec((0u8..3, 1u32..6), 0..40)) {
            let mut p = pool(5);
            let mut held: Vec<Slot> = Vec::new();
            for (op, ch) in ops {
                match op {
                    0 => {
                        if let Ok(s) = p.get() {
                            held.push(s);
                        }
                    }
                    1 => {
                        if !held.is_empty() {
                            let s = held.remove((ch as usize) % held.len());
                            p.put(s);
                        }
                    }
                    _ => {
                        let id = ModuleId::new("OUT", ch);
                        if p.is_free(&id) {
                            p.mark_used(&id);
                            held.push(Slot(id));
                        }
                    }
                }
                prop_assert_eq!(p.len(), 5);
                prop_assert!(p.free().iter().all(|s| !p.is_used(&s.0)));
            }
        }
    }
}
