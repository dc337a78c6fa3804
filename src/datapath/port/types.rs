/*!
 * Port Types
 */

use crate::core::errors::{HqmError, HqmResult};
use crate::core::types::{DomainId, PerType, PoolId, PortId, PortType};
use crate::datapath::domain::SchedulingDomain;
use crate::datapath::handles::{HandleList, HandleToken};
use crate::datapath::manager::Datapath;
use crate::hw::burst::{BurstKind, BurstWriter};
use crate::hw::mmio::{ConsumerRing, CqProbe, Doorbell};
use crate::hw::wire::QeBurst;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// Port creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortArgs {
    pub ldb_credit_pool_id: PoolId,
    pub dir_credit_pool_id: PoolId,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub cq_depth: u32,
    /// History-list entries for an LDB port; ignored for DIR ports
    pub num_ldb_event_state_entries: u32,
}

impl Default for PortArgs {
    fn default() -> Self {
        Self {
            ldb_credit_pool_id: 0,
            dir_credit_pool_id: 0,
            num_ldb_credits: 0,
            num_dir_credits: 0,
            cq_depth: 16,
            num_ldb_event_state_entries: 16,
        }
    }
}

/// Credit thresholds derived from the requested credit counts
///
/// Stored with the port mapping and exposed for inspection; refill and
/// return use the fixed batch size from [`crate::core::DatapathConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTuning {
    pub ldb_low_watermark: u32,
    pub dir_low_watermark: u32,
    pub ldb_quantum: u32,
    pub dir_quantum: u32,
}

impl CreditTuning {
    pub const fn new(num_ldb_credits: u32, num_dir_credits: u32) -> Self {
        Self {
            ldb_low_watermark: num_ldb_credits >> 1,
            dir_low_watermark: num_dir_credits >> 1,
            ldb_quantum: num_ldb_credits >> 2,
            dir_quantum: num_dir_credits >> 2,
        }
    }
}

/// Memory and strategy bound at port creation
pub(crate) struct PortMapping {
    pub doorbell: Box<dyn Doorbell>,
    pub ring: ConsumerRing,
    pub writer: BurstWriter,
    /// Pool each traffic type refills from
    pub pools: PerType<PoolId>,
    pub tuning: CreditTuning,
}

/// Producer/consumer port
///
/// The counters are only written by the thread currently driving the port
/// through a handle, so they use plain loads and stores rather than
/// read-modify-write operations.
///
/// # Performance
/// - Cache-line aligned; counters are touched on every send and receive
#[repr(C, align(64))]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) ty: PortType,
    pub(crate) configured: AtomicBool,
    pub(crate) enabled: AtomicBool,
    pub(crate) int_armed: AtomicBool,
    pub(crate) cq_gen: AtomicU8,
    pub(crate) cq_idx: AtomicU32,
    /// Local credit cache per traffic type
    pub(crate) credits: PerType<AtomicU32>,
    pub(crate) owed_tokens: AtomicU32,
    pub(crate) owed_releases: AtomicU32,
    pub(crate) mapping: ArcSwapOption<PortMapping>,
    pub(crate) handles: Mutex<HandleList>,
    /// Serializes structural operations
    pub(crate) lock: Mutex<()>,
}

impl Port {
    pub(crate) fn new(id: PortId, ty: PortType) -> Self {
        Self {
            id,
            ty,
            configured: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            int_armed: AtomicBool::new(false),
            cq_gen: AtomicU8::new(1),
            cq_idx: AtomicU32::new(0),
            credits: PerType::new(AtomicU32::new(0), AtomicU32::new(0)),
            owed_tokens: AtomicU32::new(0),
            owed_releases: AtomicU32::new(0),
            mapping: ArcSwapOption::empty(),
            handles: Mutex::new(HandleList::new()),
            lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    #[inline]
    pub fn port_type(&self) -> PortType {
        self.ty
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Install a fresh mapping and zero the datapath state
    pub(crate) fn configure(&self, mapping: PortMapping) {
        self.zero_counters();
        self.mapping.store(Some(Arc::new(mapping)));
        self.enabled.store(true, Ordering::Release);
        self.configured.store(true, Ordering::Release);
    }

    /// Drop the mapping and every handle; used by domain reset
    pub(crate) fn reset(&self) {
        self.configured.store(false, Ordering::Release);
        self.enabled.store(false, Ordering::Release);
        self.mapping.store(None);
        self.zero_counters();
        self.handles.lock().clear();
    }

    fn zero_counters(&self) {
        self.credits.ldb.store(0, Ordering::Relaxed);
        self.credits.dir.store(0, Ordering::Relaxed);
        self.owed_tokens.store(0, Ordering::Relaxed);
        self.owed_releases.store(0, Ordering::Relaxed);
        self.cq_idx.store(0, Ordering::Relaxed);
        self.cq_gen.store(1, Ordering::Relaxed);
        self.int_armed.store(false, Ordering::Relaxed);
    }
}

/// Caller handle on a configured port
///
/// Owns a private cache-line aligned staging burst. Borrows the domain
/// handle it was attached through; detached explicitly or on drop.
pub struct PortHandle<'h> {
    pub(crate) dp: &'h Datapath,
    pub(crate) domain: &'h SchedulingDomain,
    pub(crate) port: &'h Port,
    pub(crate) mapping: Arc<PortMapping>,
    pub(crate) staging: Box<QeBurst>,
    pub(crate) token: Option<HandleToken>,
}

impl PortHandle<'_> {
    #[inline]
    pub fn id(&self) -> PortId {
        self.port.id
    }

    #[inline]
    pub fn port_type(&self) -> PortType {
        self.port.ty
    }

    pub fn domain_id(&self) -> DomainId {
        self.domain.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.port.is_enabled()
    }

    /// Dequeued entries not yet returned to the device with a token pop
    pub fn owed_tokens(&self) -> u32 {
        self.port.owed_tokens.load(Ordering::Relaxed)
    }

    /// Dequeued LDB entries not yet released or forwarded
    pub fn owed_releases(&self) -> u32 {
        self.port.owed_releases.load(Ordering::Relaxed)
    }

    /// Credits held in the port's local cache
    pub fn credits(&self, ty: PortType) -> u32 {
        self.port.credits.get(ty).load(Ordering::Relaxed)
    }

    pub fn credit_tuning(&self) -> CreditTuning {
        self.mapping.tuning
    }

    pub fn burst_kind(&self) -> BurstKind {
        self.mapping.writer.kind()
    }

    /// Whether the consumer ring holds an entry at the current position
    #[inline]
    pub fn cq_has_data(&self) -> bool {
        self.probe().has_data()
    }

    #[inline(always)]
    pub(crate) fn probe(&self) -> CqProbe<'_> {
        CqProbe {
            ring: &self.mapping.ring,
            idx: self.port.cq_idx.load(Ordering::Relaxed),
            gen: self.port.cq_gen.load(Ordering::Relaxed),
        }
    }

    /// Reject use after detach
    #[inline]
    pub(crate) fn check(&self) -> HqmResult<()> {
        if self.token.is_none() && self.dp.config().validate_args {
            return Err(HqmError::invalid(format!(
                "{} port {} handle is detached",
                self.port.ty, self.port.id
            )));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_shutdown(&self) -> HqmResult<()> {
        if self.domain.is_shutdown() || self.dp.device.is_reset() {
            return Err(HqmError::Interrupted(format!(
                "domain {} is shutting down",
                self.domain.id()
            )));
        }
        Ok(())
    }

    /// Entry checks shared by every datapath call
    #[inline(always)]
    pub(crate) fn check_datapath(&self) -> HqmResult<()> {
        self.check()?;
        self.check_shutdown()?;
        if self.dp.config().validate_args && !self.domain.is_started() {
            return Err(HqmError::PermissionDenied(format!(
                "domain {} is not started",
                self.domain.id()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PortHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("domain", &self.domain.id())
            .field("port", &self.port.id)
            .field("type", &self.port.ty)
            .field("attached", &self.token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_tuning() {
        let tuning = CreditTuning::new(100, 9);
        assert_eq!(tuning.ldb_low_watermark, 50);
        assert_eq!(tuning.ldb_quantum, 25);
        assert_eq!(tuning.dir_low_watermark, 4);
        assert_eq!(tuning.dir_quantum, 2);
    }

    #[test]
    fn test_fresh_port_state() {
        let port = Port::new(3, PortType::Dir);
        assert!(!port.is_configured());
        assert_eq!(port.cq_gen.load(Ordering::Relaxed), 1);
        assert!(port.mapping.load().is_none());
    }
}
