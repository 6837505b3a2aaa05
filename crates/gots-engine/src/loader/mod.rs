//! Executable Loader (spec.md §4.6): takes a sealed, relocated code
//! buffer and maps it into memory that the CPU can execute. Pages are
//! never writable and executable at the same time — we map
//! read-write, copy the bytes in, then `mprotect` to read-execute
//! before handing the pointer back.
//!
//! Mapped regions are intentionally leaked for the process's lifetime:
//! the [`FunctionRegistry`](crate::compiler::registry::FunctionRegistry)
//! hands out addresses that must stay valid as long as any caller might
//! still hold them, and this engine never unloads a compiled function.

use crate::error::LoaderError;

/// Reserves `size` bytes of read-write (never executable) memory, page
/// rounded, for the linker to patch relocations into. Splitting this
/// from [`commit`] lets the pipeline learn every function's final
/// address (`reserved_ptr + base_offset`) *before* any relocation is
/// patched, which is what makes self- and mutually-recursive calls
/// resolvable (spec.md §4.6).
#[cfg(unix)]
pub fn reserve(size: usize) -> Result<*mut u8, LoaderError> {
    use std::ptr;

    if size == 0 {
        return Ok(ptr::NonNull::dangling().as_ptr());
    }

    let rounded = round_up(size, page_size());
    unsafe {
        let addr = libc::mmap(
            ptr::null_mut(),
            rounded,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if addr == libc::MAP_FAILED {
            return Err(LoaderError::MapFailed {
                size: rounded,
                errno: *libc::__errno_location(),
            });
        }
        Ok(addr as *mut u8)
    }
}

/// Remaps a region obtained from [`reserve`] as read-execute. Never
/// writable and executable at the same time (spec.md §4.6).
///
/// # Safety
/// `ptr`/`size` must be exactly the pointer and page-rounded size
/// returned by a prior call to [`reserve`], and every byte in the
/// region must already hold its final, fully-relocated contents.
#[cfg(unix)]
pub unsafe fn commit(ptr: *mut u8, size: usize) -> Result<(), LoaderError> {
    if size == 0 {
        return Ok(());
    }
    let rounded = round_up(size, page_size());
    if libc::mprotect(ptr as *mut libc::c_void, rounded, libc::PROT_READ | libc::PROT_EXEC) != 0 {
        let errno = *libc::__errno_location();
        libc::munmap(ptr as *mut libc::c_void, rounded);
        return Err(LoaderError::ProtectFailed { size: rounded, errno });
    }
    Ok(())
}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// Convenience wrapper over [`reserve`]/[`commit`] for code that has
/// already been fully relocated against its final addresses (no
/// self-reference patching needed) — used by the executable loader's
/// own tests and by single-function fast paths.
#[cfg(unix)]
pub fn map_executable(bytes: &[u8]) -> Result<*const u8, LoaderError> {
    if bytes.is_empty() {
        return reserve(0).map(|p| p as *const u8);
    }
    let ptr = reserve(bytes.len())?;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        commit(ptr, bytes.len())?;
    }
    Ok(ptr as *const u8)
}

#[cfg(not(unix))]
pub fn reserve(_size: usize) -> Result<*mut u8, LoaderError> {
    Err(LoaderError::MapFailed { size: 0, errno: -1 })
}

#[cfg(not(unix))]
pub unsafe fn commit(_ptr: *mut u8, _size: usize) -> Result<(), LoaderError> {
    Err(LoaderError::ProtectFailed { size: 0, errno: -1 })
}

#[cfg(not(unix))]
pub fn map_executable(_bytes: &[u8]) -> Result<*const u8, LoaderError> {
    Err(LoaderError::MapFailed {
        size: 0,
        errno: -1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn maps_a_ret_only_stub_and_it_runs() {
        // 0xC3 is `ret`; a function of no arguments that immediately
        // returns is the smallest possible thing worth mapping.
        let code = [0xC3u8];
        let ptr = map_executable(&code).expect("mmap+mprotect should succeed");
        let func: extern "C" fn() = unsafe { std::mem::transmute(ptr) };
        func();
    }

    #[test]
    fn empty_buffer_maps_to_a_dangling_but_valid_pointer() {
        let ptr = map_executable(&[]).unwrap();
        assert!(!ptr.is_null());
    }
}
