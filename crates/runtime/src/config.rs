//! Tunables the VM is built from. A small `Config` struct with workspace-wide
//! defaults, rather than scattered constants, matching the corpus's pattern
//! -- the defaults are fixed constants and no
//! user-facing knob exists to change them short of constructing a `VmConfig`
//! by hand.

use ember_core::heap::DEFAULT_NEXT_GC;

#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub frames_max: usize,
    pub stack_max: usize,
    pub gc_heap_grow_factor: usize,
    pub initial_next_gc: usize,
    /// Handlers per frame; more than 16 active at once is a runtime
    /// error at the 17th push.
    pub handlers_max: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            frames_max: 64,
            stack_max: 16384,
            gc_heap_grow_factor: 2,
            initial_next_gc: DEFAULT_NEXT_GC,
            handlers_max: 16,
        }
    }
}
