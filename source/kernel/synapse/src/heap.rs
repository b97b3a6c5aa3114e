// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel heap for bare-metal builds
//! OWNERS: @kernel-mm-team
//! PUBLIC API: init(start, size)
//! DEPENDS_ON: linked_list_allocator::Heap, spin::Mutex
//! INVARIANTS: Empty until init(); allocation failure returns null, never panics

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use spin::Mutex;

struct KernelHeap {
    inner: Mutex<Heap>,
}

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap { inner: Mutex::new(Heap::empty()) };

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner
            .lock()
            .allocate_first_fit(layout)
            .ok()
            .map_or(ptr::null_mut(), |block| block.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(block) = NonNull::new(ptr) {
            // SAFETY: `block` came from `alloc` with the same layout.
            unsafe { self.inner.lock().deallocate(block, layout) };
        }
    }
}

/// Hands `[start, start + size)` to the kernel heap.
///
/// # Safety
/// The range must be mapped, writable, unused by anything else, and this must
/// be called once before the first allocation.
pub unsafe fn init(start: *mut u8, size: usize) {
    // SAFETY: forwarded from the caller.
    unsafe { ALLOCATOR.inner.lock().init(start, size) };
    crate::log_info!(target: "heap", "kernel heap at {:p} ({} KiB)", start, size / 1024);
}
