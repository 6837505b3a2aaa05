//! Allocator & write-barrier interface (spec.md §4.11): the contract the
//! code generator emits calls against, independent of whatever sits
//! behind it. Grounded in the reference workspace's `vm::gc` module —
//! `GcHeader`'s mark bit / size / element-count layout (`vm::gc::header`)
//! and `RootSet`'s stack/global root vectors (`vm::gc::roots`) — but a
//! full tracing collector is out of scope here (spec.md's own words: "a
//! simple tracking allocator" suffices), so this ships only the
//! `TrackingAllocator` the spec calls a valid minimal implementation:
//! a tracking `malloc` with no-op write barriers and safepoints.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::alloc::{self, Layout};

/// Declares which byte offsets inside an allocated layout hold
/// references, so a future tracing collector could walk the heap
/// graph without this allocator needing to understand it (spec.md
/// §4.11: "a type-info registration that declares the reference
/// offsets inside each allocated layout").
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub size: usize,
    pub reference_offsets: Vec<usize>,
}

#[repr(C)]
struct GcHeader {
    type_id: u32,
    size: usize,
    element_count: usize,
}

const HEADER_SIZE: usize = std::mem::size_of::<GcHeader>();

/// The allocator surface the code generator's helper calls bind to
/// (spec.md §4.11). A `write_barrier`/`safepoint_poll` no-op is a
/// conforming implementation; only `alloc`/`alloc_array` must actually
/// produce live, distinct memory.
pub trait Allocator: Send + Sync {
    fn alloc(&self, size: usize, type_id: u32) -> *mut u8;
    fn alloc_array(&self, elem_size: usize, count: usize, type_id: u32) -> *mut u8;
    fn write_barrier(&self, obj: *mut u8, field_offset: usize, new_value: i64);
    fn safepoint_poll(&self);
    fn register_root(&self, slot: *mut i64);
    fn unregister_root(&self, slot: *mut i64);
    fn register_type(&self, type_id: u32, info: TypeInfo);
    fn bytes_allocated(&self) -> usize;
}

/// A tracking `malloc`: every allocation gets a small header (type id,
/// size, element count) and is tracked for `bytes_allocated`
/// accounting; nothing is ever freed or moved, so write barriers and
/// safepoints are no-ops, exactly as spec.md §4.11 describes for the
/// minimal case.
pub struct TrackingAllocator {
    live: Mutex<Vec<*mut u8>>,
    roots: Mutex<Vec<*mut i64>>,
    types: Mutex<FxHashMap<u32, TypeInfo>>,
    bytes_allocated: std::sync::atomic::AtomicUsize,
}

unsafe impl Send for TrackingAllocator {}
unsafe impl Sync for TrackingAllocator {}

impl TrackingAllocator {
    pub fn new() -> Self {
        TrackingAllocator {
            live: Mutex::new(Vec::new()),
            roots: Mutex::new(Vec::new()),
            types: Mutex::new(FxHashMap::default()),
            bytes_allocated: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn raw_alloc(&self, payload_size: usize, type_id: u32, element_count: usize) -> *mut u8 {
        let total = HEADER_SIZE + payload_size;
        let layout = Layout::from_size_align(total, std::mem::align_of::<GcHeader>())
            .expect("allocator.rs: layout size overflowed");
        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }
        unsafe {
            (base as *mut GcHeader).write(GcHeader {
                type_id,
                size: total,
                element_count,
            });
        }
        self.live.lock().push(base);
        self.bytes_allocated.fetch_add(total, std::sync::atomic::Ordering::Relaxed);
        unsafe { base.add(HEADER_SIZE) }
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        TrackingAllocator::new()
    }
}

impl Allocator for TrackingAllocator {
    fn alloc(&self, size: usize, type_id: u32) -> *mut u8 {
        self.raw_alloc(size, type_id, 1)
    }

    fn alloc_array(&self, elem_size: usize, count: usize, type_id: u32) -> *mut u8 {
        self.raw_alloc(elem_size * count, type_id, count)
    }

    /// No-op: spec.md §4.11 permits this for a non-generational
    /// allocator, at the cost of no heap-graph tracking.
    fn write_barrier(&self, _obj: *mut u8, _field_offset: usize, _new_value: i64) {}

    /// No-op: cooperative collection points exist for the code
    /// generator to emit against, but there is no collector here to
    /// pause for (spec.md §9's "cooperative safepoints" note).
    fn safepoint_poll(&self) {}

    fn register_root(&self, slot: *mut i64) {
        self.roots.lock().push(slot);
    }

    fn unregister_root(&self, slot: *mut i64) {
        self.roots.lock().retain(|s| *s != slot);
    }

    fn register_type(&self, type_id: u32, info: TypeInfo) {
        self.types.lock().insert(type_id, info);
    }

    fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Drop for TrackingAllocator {
    fn drop(&mut self) {
        // Never collected during a run (no tracing collector behind
        // this allocator), but freed here so a process that creates
        // and drops many engines in-process (tests) doesn't leak.
        let types = self.types.lock();
        for base in self.live.lock().drain(..) {
            unsafe {
                let header = &*(base as *const GcHeader);
                let total = header.size;
                let layout = Layout::from_size_align(total, std::mem::align_of::<GcHeader>())
                    .expect("allocator.rs: layout size overflowed");
                let _ = types.get(&header.type_id);
                alloc::dealloc(base, layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_distinct_zeroed_regions() {
        let a = TrackingAllocator::new();
        let p1 = a.alloc(32, 1);
        let p2 = a.alloc(32, 1);
        assert_ne!(p1, p2);
        unsafe {
            for i in 0..32 {
                assert_eq!(*p1.add(i), 0);
            }
        }
    }

    #[test]
    fn alloc_array_sizes_by_element_count() {
        let a = TrackingAllocator::new();
        let before = a.bytes_allocated();
        a.alloc_array(8, 10, 2);
        assert_eq!(a.bytes_allocated() - before, HEADER_SIZE + 80);
    }

    #[test]
    fn write_barrier_and_safepoint_poll_are_callable_no_ops() {
        let a = TrackingAllocator::new();
        let p = a.alloc(8, 1);
        a.write_barrier(p, 0, 42);
        a.safepoint_poll();
    }

    #[test]
    fn register_and_unregister_root_round_trips() {
        let a = TrackingAllocator::new();
        let mut slot: i64 = 0;
        a.register_root(&mut slot as *mut i64);
        a.unregister_root(&mut slot as *mut i64);
        assert!(a.roots.lock().is_empty());
    }

    #[test]
    fn register_type_stores_reference_offsets() {
        let a = TrackingAllocator::new();
        a.register_type(7, TypeInfo { size: 24, reference_offsets: vec![0, 8] });
        assert_eq!(a.types.lock().get(&7).unwrap().reference_offsets, vec![0, 8]);
    }
}
