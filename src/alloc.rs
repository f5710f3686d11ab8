//! Page allocation and isolation for the RNG state.
//!
//! On Unix, maps one page with `mmap`, locks it resident with `mlock`, and
//! (where the platform supports it) marks it `INHERIT_ZERO` or
//! `INHERIT_NONE` via `minherit` so a forked child either sees a freshly
//! zeroed copy (tripping the magic-mismatch fork check in `state.rs`) or no
//! mapping at all. Falls back to an ordinary heap allocation, zeroed on
//! drop, when the `mmap` feature is off or the platform call fails.
//!
//! Grounded on `original_source/src/otterylite_alloc.h`'s
//! `ottery_alloc_state`/`ottery_free_state`, restructured as an owning RAII
//! type per spec.md §9's redesign flag ("never hand out the raw pointer;
//! wrap it in a type that frees itself").

use crate::buffer::RngState;
use crate::wipe::secure_zero_val;
use std::mem::size_of;
use std::ptr::NonNull;

/// Owns one `RngState` on a page the OS won't swap or hand to a forked
/// child unmodified. Always wipes the state before releasing the page.
pub struct MappedState {
    ptr: NonNull<RngState>,
    #[cfg(feature = "mmap")]
    mapped: bool,
}

// SAFETY: the RNG state itself is protected by the caller's mutex; this type
// only owns the memory it lives in.
unsafe impl Send for MappedState {}

impl MappedState {
    pub fn new() -> Self {
        #[cfg(all(feature = "mmap", unix))]
        {
            if let Some(ptr) = Self::try_mmap() {
                return MappedState { ptr, mapped: true };
            }
        }
        #[cfg(all(feature = "mmap", windows))]
        {
            if let Some(ptr) = Self::try_virtualalloc() {
                return MappedState { ptr, mapped: true };
            }
        }
        Self::heap()
    }

    #[cfg(all(feature = "mmap", unix))]
    fn try_mmap() -> Option<NonNull<RngState>> {
        let len = size_of::<RngState>();
        // SAFETY: requests an anonymous, private mapping; no fd is involved.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None;
        }

        // SAFETY: addr is a valid len-byte mapping just created above.
        unsafe {
            libc::mlock(addr, len);
            apply_minherit(addr, len);
            std::ptr::write(addr as *mut RngState, RngState::zeroed());
        }

        NonNull::new(addr as *mut RngState)
    }

    #[cfg(all(feature = "mmap", windows))]
    fn try_virtualalloc() -> Option<NonNull<RngState>> {
        use winapi::um::memoryapi::{VirtualAlloc, VirtualLock};
        use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};

        let len = size_of::<RngState>();
        // SAFETY: requests a fresh private committed region.
        let addr = unsafe {
            VirtualAlloc(
                std::ptr::null_mut(),
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if addr.is_null() {
            return None;
        }

        // SAFETY: addr is a valid len-byte region just committed above.
        unsafe {
            VirtualLock(addr, len);
            std::ptr::write(addr as *mut RngState, RngState::zeroed());
        }

        NonNull::new(addr as *mut RngState)
    }

    fn heap() -> Self {
        let boxed = Box::new(RngState::zeroed());
        let ptr = NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw is never null");
        #[cfg(feature = "mmap")]
        {
            MappedState {
                ptr,
                mapped: false,
            }
        }
        #[cfg(not(feature = "mmap"))]
        {
            MappedState { ptr }
        }
    }

    pub fn get(&self) -> &RngState {
        // SAFETY: ptr was initialized by `new` and only freed on `Drop`.
        unsafe { self.ptr.as_ref() }
    }

    pub fn get_mut(&mut self) -> &mut RngState {
        // SAFETY: ptr was initialized by `new` and only freed on `Drop`, and
        // `&mut self` guarantees exclusive access.
        unsafe { self.ptr.as_mut() }
    }
}

#[cfg(target_os = "linux")]
unsafe fn apply_minherit(addr: *mut libc::c_void, len: usize) {
    // SAFETY: addr/len describe the mapping just created by the caller.
    unsafe {
        libc::madvise(addr, len, libc::MADV_DONTFORK);
    }
}

#[cfg(any(target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
unsafe fn apply_minherit(addr: *mut libc::c_void, len: usize) {
    // SAFETY: addr/len describe the mapping just created by the caller.
    // INHERIT_ZERO means a forked child sees this page freshly zeroed,
    // which the magic-mismatch check in state.rs treats as a fork signal.
    unsafe {
        libc::minherit(addr, len, libc::INHERIT_ZERO);
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
unsafe fn apply_minherit(_addr: *mut libc::c_void, _len: usize) {}

impl Drop for MappedState {
    fn drop(&mut self) {
        // SAFETY: ptr is still valid; nothing else can observe the state
        // once we're tearing down the only owner.
        unsafe {
            secure_zero_val(self.ptr.as_mut());
        }

        #[cfg(all(feature = "mmap", unix))]
        {
            if self.mapped {
                // SAFETY: ptr/len match the mapping created in try_mmap.
                unsafe {
                    libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, size_of::<RngState>());
                }
                return;
            }
        }
        #[cfg(all(feature = "mmap", windows))]
        {
            if self.mapped {
                use winapi::um::memoryapi::VirtualFree;
                use winapi::um::winnt::MEM_RELEASE;
                // SAFETY: ptr was committed by try_virtualalloc with this
                // same size; MEM_RELEASE requires a size of 0.
                unsafe {
                    VirtualFree(self.ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
                }
                return;
            }
        }

        // SAFETY: ptr was allocated by Box::into_raw in `heap` and is not
        // aliased elsewhere.
        unsafe {
            drop(Box::from_raw(self.ptr.as_ptr()));
        }
    }
}

impl Default for MappedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_zeroed() {
        let st = MappedState::new();
        assert_eq!(st.get().magic, 0);
        assert_eq!(st.get().idx, 0);
    }

    #[test]
    fn get_mut_is_writable() {
        let mut st = MappedState::new();
        st.get_mut().magic = 0xABCD;
        assert_eq!(st.get().magic, 0xABCD);
    }

    #[test]
    fn drop_does_not_panic() {
        let st = MappedState::new();
        drop(st);
    }
}
