//! Filepath: src/prefetch.rs
//!
//! Software prefetch hint for tree descent.
//!
//! When a lookup resolves the next child page it can ask the CPU to start
//! pulling that page toward the cache before the next level's search reads
//! it. A page is a single contiguous 4 KiB block, so one hint covers the
//! hot first lines of the intra-page search.
//!
//! - **`x86_64`**: `_mm_prefetch` with `_MM_HINT_T0`
//! - **`aarch64`**: `_prefetch`, read, high locality
//! - **Other**: no-op

/// Hint that the memory at `ptr` is about to be read.
///
/// A hint only: safe for any pointer value, never faults, may be ignored
/// by the CPU.
#[inline(always)]
pub(crate) fn prefetch_read<T>(ptr: *const T) {
    if ptr.is_null() {
        return;
    }

    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: _mm_prefetch is a hint and never faults, even for
        // invalid addresses.
        unsafe {
            std::arch::x86_64::_mm_prefetch(ptr.cast::<i8>(), std::arch::x86_64::_MM_HINT_T0);
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: _prefetch is a hint and never faults.
        unsafe {
            std::arch::aarch64::_prefetch(
                ptr.cast::<i8>(),
                std::arch::aarch64::_PREFETCH_READ,
                std::arch::aarch64::_PREFETCH_LOCALITY3,
            );
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = ptr;
    }
}
