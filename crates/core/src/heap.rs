//! The object arena: a free-list of stable [`ObjHandle`]s standing in for
//! an intrusive linked list with a free-list of stable handles instead.
//! Sweeping an
//! unmarked slot returns its index to the free list rather than shifting
//! the vector, so handles never dangle and insertion order among the
//! *currently live* slots is preserved for iteration.

use crate::object::{Obj, ObjKind, ObjString};
use crate::value::{ObjHandle, Value};
use std::collections::HashMap;

enum Slot {
    Occupied { marked: bool, obj: Obj },
    Free { next: Option<u32> },
}

/// Process-wide string interner. Keyed by raw bytes so it
/// can answer "do I already have this string" before any `ObjHandle` exists
/// for it; the handles it stores are a GC weak reference, swept by
/// `Heap::sweep_interner` just before the mark-and-sweep's sweep phase.
#[derive(Default)]
struct Interner {
    by_bytes: HashMap<Box<[u8]>, ObjHandle>,
}

pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    interner: Interner,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub gray_stack: Vec<ObjHandle>,
    objects_freed_last_cycle: usize,
    /// Reserved-object registry: lets host-supplied natives (which only ever
    /// receive `&mut Heap`, never `&mut Vm`) find VM-installed singletons
    /// such as the wrapper/`Exception` classes without a back-reference to
    /// the VM. Populated once at VM startup; its entries are ordinary
    /// `globals` values too, so they are already GC roots through there.
    well_known: HashMap<&'static str, ObjHandle>,
}

/// Default allocation threshold before the first collection, matching the
/// original collector's `nextGC = 1024 * 1024` (see DESIGN.md).
pub const DEFAULT_NEXT_GC: usize = 1024 * 1024;

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free_head: None,
            interner: Interner::default(),
            bytes_allocated: 0,
            next_gc: DEFAULT_NEXT_GC,
            gray_stack: Vec::new(),
            objects_freed_last_cycle: 0,
            well_known: HashMap::new(),
        }
    }

    pub fn register_well_known(&mut self, name: &'static str, handle: ObjHandle) {
        self.well_known.insert(name, handle);
    }

    pub fn well_known(&self, name: &str) -> Option<ObjHandle> {
        self.well_known.get(name).copied()
    }

    pub fn needs_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    pub fn objects_freed_last_cycle(&self) -> usize {
        self.objects_freed_last_cycle
    }

    /// Inserts a fresh object, growing the arena if the free list is empty.
    /// Does **not** check the GC threshold -- callers run collection first
    /// (they own the root set, `Heap` does not).
    pub fn insert(&mut self, obj: Obj) -> ObjHandle {
        self.bytes_allocated += obj.heap_size();
        match self.free_head {
            Some(idx) => {
                let Slot::Free { next } = self.slots[idx as usize] else {
                    unreachable!("free list pointed at an occupied slot")
                };
                self.free_head = next;
                self.slots[idx as usize] = Slot::Occupied { marked: false, obj };
                ObjHandle(idx)
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { marked: false, obj });
                ObjHandle(idx)
            }
        }
    }

    pub fn get(&self, handle: ObjHandle) -> &Obj {
        match &self.slots[handle.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling heap handle {handle}"),
        }
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut Obj {
        match &mut self.slots[handle.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling heap handle {handle}"),
        }
    }

    pub fn kind_of(&self, handle: ObjHandle) -> ObjKind {
        self.get(handle).kind()
    }

    pub fn string_bytes(&self, handle: ObjHandle) -> &[u8] {
        &self.get(handle).as_string().expect("string handle").bytes
    }

    pub fn string_hash(&self, handle: ObjHandle) -> u32 {
        self.get(handle).as_string().expect("string handle").hash
    }

    /// Interns `bytes`, allocating a fresh `ObjString` only on first sight.
    pub fn intern(&mut self, bytes: &[u8]) -> ObjHandle {
        if let Some(&handle) = self.interner.by_bytes.get(bytes) {
            return handle;
        }
        let hash = fnv1a(bytes);
        let handle = self.insert(Obj::String(ObjString { bytes: bytes.into(), hash }));
        self.interner.by_bytes.insert(bytes.into(), handle);
        handle
    }

    // --- GC ---------------------------------------------------------------

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_handle(handle);
        }
    }

    pub fn mark_handle(&mut self, handle: ObjHandle) {
        if let Slot::Occupied { marked, .. } = &mut self.slots[handle.0 as usize] {
            if !*marked {
                *marked = true;
                self.gray_stack.push(handle);
            }
        }
    }

    /// Drains the gray stack, marking every object reachable from the ones
    /// already marked. Equivalent to the original's `blacken` callback,
    /// inlined per object kind since Rust has no vtables to dispatch
    /// through.
    pub fn trace(&mut self) {
        while let Some(handle) = self.gray_stack.pop() {
            self.blacken(handle);
        }
    }

    /// Every handle and value directly reachable from one object, gathered
    /// into owned buffers so the borrow on `self.get(handle)` ends before we
    /// need `&mut self` again to mark them.
    fn blacken(&mut self, handle: ObjHandle) {
        let mut handles: Vec<ObjHandle> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        match self.get(handle) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                handles.extend(f.name);
                values.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                handles.push(c.function);
                handles.extend(c.upvalues.iter().copied());
            }
            Obj::Upvalue(u) => {
                if let crate::object::UpvalueState::Closed(v) = u.state {
                    values.push(v);
                }
            }
            Obj::Class(c) => {
                handles.push(c.name);
                handles.extend(c.superclass);
                values.extend(c.initializer);
                for (k, v) in c.methods.iter() {
                    handles.push(k);
                    values.push(v);
                }
                for (k, v) in c.static_methods.iter() {
                    handles.push(k);
                    values.push(v);
                }
                for (k, v) in c.static_fields.iter() {
                    handles.push(k);
                    values.push(v);
                }
            }
            Obj::Instance(i) => {
                handles.push(i.class);
                values.push(i.this_);
                for (k, v) in i.fields.iter() {
                    handles.push(k);
                    values.push(v);
                }
            }
            Obj::BoundMethod(bm) => {
                values.push(bm.receiver);
                values.push(bm.method);
            }
            Obj::Array(a) => {
                values.extend(a.items.iter().copied());
            }
        }
        for h in handles {
            self.mark_handle(h);
        }
        for v in values {
            self.mark_value(v);
        }
    }

    /// Pre-sweep hook: drops interner entries whose target string wasn't
    /// marked this cycle, so the sweep can free them (otherwise the
    /// interner would resurrect garbage).
    pub fn sweep_interner(&mut self) {
        let slots = &self.slots;
        self.interner.by_bytes.retain(|_, handle| {
            matches!(slots[handle.0 as usize], Slot::Occupied { marked: true, .. })
        });
    }

    /// Frees every unmarked slot, clears the mark bit on everything else,
    /// and retargets `next_gc` to twice the surviving byte count.
    pub fn sweep(&mut self) {
        let mut freed = 0;
        for idx in 0..self.slots.len() {
            match &mut self.slots[idx] {
                Slot::Occupied { marked: marked @ true, .. } => {
                    *marked = false;
                }
                Slot::Occupied { marked: false, .. } => {
                    let old = std::mem::replace(&mut self.slots[idx], Slot::Free { next: self.free_head });
                    if let Slot::Occupied { obj, .. } = old {
                        self.bytes_allocated = self.bytes_allocated.saturating_sub(obj.heap_size());
                    }
                    self.free_head = Some(idx as u32);
                    freed += 1;
                }
                Slot::Free { .. } => {}
            }
        }
        self.objects_freed_last_cycle = freed;
        self.next_gc = self.bytes_allocated * 2;
    }

    /// Iterates every live object, in arena order -- used by the binary
    /// codec to walk reachable functions and by tests.
    pub fn iter_live(&self) -> impl Iterator<Item = (ObjHandle, &Obj)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { obj, .. } => Some((ObjHandle(i as u32), obj)),
            Slot::Free { .. } => None,
        })
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Occupied { .. })).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// 32-bit FNV-1a string hashing.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
