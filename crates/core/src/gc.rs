//! Tri-color mark/sweep collection.
//!
//! `Heap` owns the mechanics (mark bits, gray stack, free list); this module
//! is the four-phase orchestration: mark roots, trace, pre-sweep, sweep.
//! Root enumeration is the caller's job -- the VM and the compiler each know
//! their own live set and neither depends on the other, so `collect` takes a
//! closure rather than a trait object.

use crate::heap::Heap;

/// Runs one full collection cycle. `mark_roots` is called first and must
/// mark every root reachable from the caller's state (VM stack/frames/
/// globals/open upvalues, or the compiler's enclosing-function chain) by
/// calling [`Heap::mark_value`]/[`Heap::mark_handle`] on `heap`.
pub fn collect(heap: &mut Heap, mark_roots: impl FnOnce(&mut Heap)) {
    let before = heap.bytes_allocated;
    mark_roots(heap);
    heap.trace();
    heap.sweep_interner();
    heap.sweep();
    tracing::trace!(
        before_bytes = before,
        after_bytes = heap.bytes_allocated,
        objects_freed = heap.objects_freed_last_cycle(),
        next_gc = heap.next_gc,
        "gc cycle complete"
    );
}
