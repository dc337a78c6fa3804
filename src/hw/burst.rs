/*!
 * Burst Writes
 *
 * The device accepts one 64-byte burst (four QEs) per producer-port doorbell
 * write. Two x86 primitives can issue it: MOVDIR64B (single 64-byte direct
 * store with guaranteed atomicity) and four non-temporal 16-byte stores into
 * a write-combining mapping. The choice is made once per port from a CPU
 * probe and stored as a function pointer.
 */

use super::wire::QeBurst;
use crate::core::config::BurstPreference;
use std::fmt;

/// Signature of a burst primitive
///
/// # Safety
/// `dst` must be valid for 64 bytes of writes and 64-byte aligned.
pub type EnqueueFourFn = unsafe fn(burst: &QeBurst, dst: *mut u8);

/// Burst primitive family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstKind {
    /// MOVDIR64B direct store
    Movdir64b,
    /// Four MOVNTDQ non-temporal stores
    NonTemporal,
    /// Eight volatile 64-bit stores (non-x86 targets, forced portable mode)
    Volatile,
}

/// Capability-bound burst writer selected once at port configuration
#[derive(Clone, Copy)]
pub struct BurstWriter {
    kind: BurstKind,
    write: EnqueueFourFn,
}

impl BurstWriter {
    /// Select the widest primitive supported by this CPU
    pub fn probe(preference: BurstPreference) -> Self {
        if preference == BurstPreference::Portable {
            return Self::volatile();
        }

        #[cfg(target_arch = "x86_64")]
        {
            if movdir64b_supported() {
                return Self {
                    kind: BurstKind::Movdir64b,
                    write: x86::enqueue_four_movdir64b,
                };
            }
            Self {
                kind: BurstKind::NonTemporal,
                write: x86::enqueue_four_movntdq,
            }
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            Self::volatile()
        }
    }

    pub fn volatile() -> Self {
        Self {
            kind: BurstKind::Volatile,
            write: enqueue_four_volatile,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> BurstKind {
        self.kind
    }

    /// Issue one burst
    ///
    /// # Safety
    /// `dst` must be valid for 64 bytes of writes and 64-byte aligned.
    #[inline(always)]
    pub unsafe fn write(&self, burst: &QeBurst, dst: *mut u8) {
        (self.write)(burst, dst)
    }
}

impl fmt::Debug for BurstWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BurstWriter").field("kind", &self.kind).finish()
    }
}

/// Order all prior stores (including write-combining ones) before any later
/// store, so at most one burst from this core is in flight on the bus.
#[inline(always)]
pub fn store_fence() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_sfence();
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!("dsb st", options(nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
    }
}

/// CPUID.(EAX=7,ECX=0):ECX[28]
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
pub fn movdir64b_supported() -> bool {
    use std::arch::x86_64::{__cpuid, __cpuid_count};

    unsafe {
        if __cpuid(0).eax < 7 {
            return false;
        }
        __cpuid_count(7, 0).ecx & (1 << 28) != 0
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn movdir64b_supported() -> bool {
    false
}

unsafe fn enqueue_four_volatile(burst: &QeBurst, dst: *mut u8) {
    let src = burst.as_ptr() as *const u64;
    let dst = dst as *mut u64;
    for i in 0..8 {
        std::ptr::write_volatile(dst.add(i), *src.add(i));
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::QeBurst;
    use std::arch::x86_64::{__m128i, _mm_load_si128, _mm_stream_si128};

    pub(super) unsafe fn enqueue_four_movdir64b(burst: &QeBurst, dst: *mut u8) {
        std::arch::asm!(
            "movdir64b {dst}, [{src}]",
            dst = in(reg) dst,
            src = in(reg) burst.as_ptr(),
            options(nostack, preserves_flags),
        );
    }

    pub(super) unsafe fn enqueue_four_movntdq(burst: &QeBurst, dst: *mut u8) {
        let src = burst.as_ptr() as *const __m128i;
        let dst = dst as *mut __m128i;
        for i in 0..4 {
            _mm_stream_si128(dst.add(i), _mm_load_si128(src.add(i)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::wire::{EnqueueQe, QeCommand, SchedType};

    fn sample_burst() -> QeBurst {
        let mut burst = QeBurst::new();
        for (i, qe) in burst.qes.iter_mut().enumerate() {
            *qe = EnqueueQe::new(i as u32, SchedType::Atomic, 100 + i as u64)
                .with_command(QeCommand::New);
        }
        burst
    }

    #[test]
    fn test_volatile_writer_copies_line() {
        let burst = sample_burst();
        let mut target = QeBurst::new();
        let writer = BurstWriter::volatile();
        unsafe { writer.write(&burst, &mut target as *mut QeBurst as *mut u8) };
        assert_eq!(target, burst);
    }

    #[test]
    fn test_probed_writer_copies_line() {
        let burst = sample_burst();
        let mut target = QeBurst::new();
        let writer = BurstWriter::probe(BurstPreference::Auto);
        unsafe { writer.write(&burst, &mut target as *mut QeBurst as *mut u8) };
        store_fence();
        assert_eq!(target, burst);
    }

    #[test]
    fn test_portable_preference() {
        assert_eq!(
            BurstWriter::probe(BurstPreference::Portable).kind(),
            BurstKind::Volatile
        );
    }
}
