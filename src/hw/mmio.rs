/*!
 * Mapped Port Memory
 *
 * Views over the two per-port regions the device exposes:
 * - the producer doorbell, a write-combining page that accepts 64-byte bursts
 * - the consumer ring, device-written memory holding 16-byte CQEs tagged
 *   with a 1-bit generation that flips on every wrap
 *
 * Ring slots are read as two 64-bit atomics: the high word (which carries
 * the generation tag) with acquire ordering, then the payload word. A writer
 * publishes a slot in the opposite order, so a matching tag guarantees the
 * payload is visible.
 */

use super::burst::BurstWriter;
use super::wire::{DequeueQe, QeBurst};
use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Producer-port doorbell
///
/// Implementations route one 64-byte burst to the device. Real mappings issue
/// `writer` against the mapped page; emulated ones may intercept the line.
pub trait Doorbell: Send + Sync {
    fn ring(&self, burst: &QeBurst, writer: &BurstWriter);
}

type UnmapFn = Box<dyn FnOnce(NonNull<u8>) + Send + Sync>;

/// Doorbell backed by a mapped device page
pub struct MmioDoorbell {
    addr: NonNull<u8>,
    unmap: Option<UnmapFn>,
}

// SAFETY: the mapped page is only written through `ring`, which issues a
// single burst per call; the device serializes concurrent bursts.
unsafe impl Send for MmioDoorbell {}
unsafe impl Sync for MmioDoorbell {}

impl MmioDoorbell {
    /// Wrap a mapped producer-port page
    ///
    /// # Safety
    /// `addr` must point to a 64-byte aligned, writable mapping that stays
    /// valid until `unmap` runs (or forever if `unmap` is `None`).
    pub unsafe fn new(addr: NonNull<u8>, unmap: Option<UnmapFn>) -> Self {
        Self { addr, unmap }
    }

    pub fn addr(&self) -> NonNull<u8> {
        self.addr
    }
}

impl Doorbell for MmioDoorbell {
    #[inline(always)]
    fn ring(&self, burst: &QeBurst, writer: &BurstWriter) {
        // SAFETY: guaranteed by the constructor contract
        unsafe { writer.write(burst, self.addr.as_ptr()) }
    }
}

impl Drop for MmioDoorbell {
    fn drop(&mut self) {
        if let Some(unmap) = self.unmap.take() {
            unmap(self.addr);
        }
    }
}

/// One 16-byte ring slot as seen by software
#[repr(C, align(16))]
pub struct RingSlot {
    words: [AtomicU64; 2],
}

const _: () = assert!(std::mem::size_of::<RingSlot>() == std::mem::size_of::<DequeueQe>());

impl RingSlot {
    const fn empty() -> Self {
        Self {
            words: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    /// Publish a CQE: payload first, tag word last
    #[inline(always)]
    pub fn publish(&self, cqe: &DequeueQe) {
        let [lo, hi] = cqe.to_words();
        self.words[0].store(lo, Ordering::Relaxed);
        self.words[1].store(hi, Ordering::Release);
    }
}

/// Heap-backed ring memory, used where no device memory exists
pub struct RingMemory {
    slots: Box<[RingSlot]>,
}

impl RingMemory {
    /// Zeroed ring; generation 0 reads as empty to a consumer expecting 1
    pub fn new(depth: u32) -> Arc<Self> {
        let slots = (0..depth).map(|_| RingSlot::empty()).collect();
        Arc::new(Self { slots })
    }

    pub fn depth(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline(always)]
    pub fn slot(&self, idx: u32) -> &RingSlot {
        &self.slots[idx as usize]
    }

    /// Consumer view that keeps this memory alive
    pub fn view(self: &Arc<Self>) -> ConsumerRing {
        let base = NonNull::from(&self.slots[0]).cast::<RingSlot>();
        let backing: Arc<dyn Any + Send + Sync> = self.clone();
        // SAFETY: the view holds `backing`, so the slots outlive it
        unsafe { ConsumerRing::new(base, self.depth(), Some(backing)) }
    }
}

/// Consumer view of a mapped ring
pub struct ConsumerRing {
    base: NonNull<RingSlot>,
    depth: u32,
    _backing: Option<Arc<dyn Any + Send + Sync>>,
}

// SAFETY: slots are only accessed through atomics
unsafe impl Send for ConsumerRing {}
unsafe impl Sync for ConsumerRing {}

impl ConsumerRing {
    /// Wrap `depth` ring slots starting at `base`
    ///
    /// # Safety
    /// `base` must point to `depth` 16-byte aligned slots valid for reads for
    /// the lifetime of the view (or of `backing`, when given). `depth` must be
    /// non-zero.
    pub unsafe fn new(
        base: NonNull<RingSlot>,
        depth: u32,
        backing: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        debug_assert!(depth > 0);
        Self {
            base,
            depth,
            _backing: backing,
        }
    }

    #[inline(always)]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline(always)]
    fn slot(&self, idx: u32) -> &RingSlot {
        debug_assert!(idx < self.depth);
        // SAFETY: idx < depth per the callers' index arithmetic
        unsafe { &*self.base.as_ptr().add(idx as usize) }
    }

    /// Generation tag currently stored at `idx`
    #[inline(always)]
    pub fn gen_at(&self, idx: u32) -> u8 {
        DequeueQe::gen_of_word(self.slot(idx).words[1].load(Ordering::Acquire))
    }

    /// Whether slot `idx` holds an entry of generation `gen`
    #[inline(always)]
    pub fn has_entry(&self, idx: u32, gen: u8) -> bool {
        self.gen_at(idx) == gen
    }

    /// Copy the 16-byte entry out of slot `idx`
    #[inline(always)]
    pub fn read(&self, idx: u32) -> DequeueQe {
        let slot = self.slot(idx);
        let hi = slot.words[1].load(Ordering::Acquire);
        let lo = slot.words[0].load(Ordering::Relaxed);
        DequeueQe::from_words([lo, hi])
    }
}

/// Snapshot of a port's consumer position, used to test for pending data
/// without touching the port itself
#[derive(Clone, Copy)]
pub struct CqProbe<'a> {
    pub ring: &'a ConsumerRing,
    pub idx: u32,
    pub gen: u8,
}

impl CqProbe<'_> {
    #[inline(always)]
    pub fn has_data(&self) -> bool {
        self.ring.has_entry(self.idx, self.gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ring_is_empty_for_gen_one() {
        let mem = RingMemory::new(8);
        let ring = mem.view();
        for idx in 0..8 {
            assert!(!ring.has_entry(idx, 1));
        }
    }

    #[test]
    fn test_publish_then_read() {
        let mem = RingMemory::new(4);
        let ring = mem.view();
        let cqe = DequeueQe {
            data: 42,
            queue_id: 3,
            status: DequeueQe::GEN_BIT,
            ..Default::default()
        };
        mem.slot(2).publish(&cqe);

        let probe = CqProbe {
            ring: &ring,
            idx: 2,
            gen: 1,
        };
        assert!(probe.has_data());
        assert_eq!(ring.read(2), cqe);
    }

    #[test]
    fn test_view_keeps_memory_alive() {
        let mem = RingMemory::new(2);
        let ring = mem.view();
        drop(mem);
        assert_eq!(ring.depth(), 2);
        assert_eq!(ring.gen_at(1), 0);
    }
}
