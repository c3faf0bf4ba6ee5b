//! Open-addressed, linear-probed hash table keyed by interned strings.
//!
//! Used for globals, instance fields, and class method tables. Capacity is
//! always a power of two; growth doubles it once the load factor would
//! exceed 0.75 and drops tombstones while rehashing. Keys are compared by
//! handle identity, matching the interning invariant.

use crate::heap::Heap;
use crate::value::{ObjHandle, Value};

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy, Debug)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(ObjHandle, Value),
}

#[derive(Debug)]
pub struct Table {
    entries: Vec<Slot>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(entries: &[Slot], heap: &Heap, key: ObjHandle) -> usize {
        let cap = entries.len() as u32;
        let mut index = heap.string_hash(key) & (cap - 1);
        let mut first_tombstone: Option<u32> = None;
        loop {
            match entries[index as usize] {
                Slot::Empty => return first_tombstone.unwrap_or(index) as usize,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) if k == key => return index as usize,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) & (cap - 1);
        }
    }

    fn grow(&mut self, heap: &Heap) {
        let new_cap = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let mut new_entries = vec![Slot::Empty; new_cap];
        let mut new_count = 0;
        for slot in &self.entries {
            if let Slot::Occupied(key, value) = *slot {
                let idx = Self::find_slot(&new_entries, heap, key);
                new_entries[idx] = Slot::Occupied(key, value);
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    pub fn get(&self, heap: &Heap, key: ObjHandle) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries[Self::find_slot(&self.entries, heap, key)] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, heap: &Heap, key: ObjHandle) -> bool {
        self.get(heap, key).is_some()
    }

    /// Returns `true` if this inserted a brand-new key.
    pub fn set(&mut self, heap: &Heap, key: ObjHandle, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow(heap);
        }
        let idx = Self::find_slot(&self.entries, heap, key);
        let is_new = !matches!(self.entries[idx], Slot::Occupied(..));
        if is_new && !matches!(self.entries[idx], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[idx] = Slot::Occupied(key, value);
        is_new
    }

    pub fn delete(&mut self, heap: &Heap, key: ObjHandle) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_slot(&self.entries, heap, key);
        if let Slot::Occupied(..) = self.entries[idx] {
            self.entries[idx] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, Value)> + '_ {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(k, v) => Some((*k, *v)),
            _ => None,
        })
    }

    /// Drops every entry whose key handle fails `keep`. Class method tables
    /// and instance fields never need this (their keys are always marked
    /// alongside the owning object), but the same primitive backs the
    /// string interner's weak-reference sweep (see `Heap::sweep_interner`).
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjHandle) -> bool) {
        for slot in &mut self.entries {
            if let Slot::Occupied(k, _) = *slot {
                if !keep(k) {
                    *slot = Slot::Tombstone;
                    self.count -= 1;
                }
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
