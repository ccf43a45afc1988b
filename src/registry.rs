//! Generation-checked handle table.
//!
//! Foreign callers only ever see an opaque [`Handle`]. The low 32 bits index a
//! slot, the high 32 bits carry the slot's generation at the time the handle
//! was issued. Reusing a slot bumps its generation, so a stale handle fails to
//! resolve instead of aliasing whatever object took its place.

use std::num::NonZeroU64;

use parking_lot::RwLock;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    fn new(index: u32, generation: u32) -> Self {
        let raw = (u64::from(generation) << 32) | u64::from(index);
        // generation is never zero, so neither is raw
        Handle(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Reads a handle off the wire. `0` is the "no handle" sentinel.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    pub fn into_raw(self) -> u64 {
        self.0.get()
    }

    fn index(self) -> usize {
        (self.0.get() & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

/// Wire encoding of an optional handle.
pub fn raw_handle(handle: Option<Handle>) -> u64 {
    handle.map(Handle::into_raw).unwrap_or(0)
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
}

pub struct HandleRegistry<T> {
    slots: RwLock<Slots<T>>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Stores `value` and returns a fresh handle for it.
    pub fn register(&self, value: T) -> Handle {
        let mut slots = self.slots.write();
        if let Some(index) = slots.free.pop() {
            let slot = &mut slots.entries[index as usize];
            slot.generation = next_generation(slot.generation);
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = slots.entries.len() as u32;
        slots.entries.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle::new(index, 1)
    }

    /// Removes the mapping and hands back the value. Unknown or already
    /// released handles are a no-op.
    pub fn release(&self, handle: Handle) -> Option<T> {
        let mut slots = self.slots.write();
        let index = handle.index();
        let slot = slots.entries.get_mut(index)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slots.free.push(index as u32);
        Some(value)
    }

    /// Like [`release`](Self::release) but fails on an unknown handle.
    pub fn take(&self, handle: Handle) -> Result<T> {
        self.release(handle)
            .ok_or(BridgeError::InvalidHandle(handle.into_raw()))
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.read();
        slots.entries.len() - slots.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> HandleRegistry<T> {
    /// Returns a clone of the stored value. Only a read lock is taken, so
    /// resolves from many threads proceed in parallel.
    pub fn resolve(&self, handle: Handle) -> Result<T> {
        let slots = self.slots.read();
        slots
            .entries
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.clone())
            .ok_or(BridgeError::InvalidHandle(handle.into_raw()))
    }
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}
