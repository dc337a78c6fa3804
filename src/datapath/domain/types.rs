/*!
 * Scheduling Domain Types
 */

use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{
    MAX_NUM_DIR_PORTS, MAX_NUM_DIR_QUEUES, MAX_NUM_LDB_PORTS, MAX_NUM_LDB_QUEUES,
    NUM_DIR_CREDIT_POOLS, NUM_LDB_CREDIT_POOLS,
};
use crate::core::types::{DomainId, PerType, PortType, QueueId};
use crate::datapath::handles::{HandleList, HandleToken};
use crate::datapath::manager::Datapath;
use crate::datapath::port::Port;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Resources requested for a new scheduling domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedDomainArgs {
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_ldb_event_state_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
}

/// Resources available to new domains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub num_sched_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_ldb_event_state_entries: u32,
    pub max_contiguous_ldb_event_state_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
}

/// Load-balanced queue parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdbQueueArgs {
    /// Reorder slots for ordered scheduling; 0 for atomic/unordered only
    pub num_sequence_numbers: u32,
    pub lock_id_comp_level: u32,
}

/// Decoded domain alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainAlert {
    /// The device was reset; the domain is unusable
    DeviceReset,
    /// Software requested domain teardown
    DomainReset,
    /// User-posted alert carrying opaque data
    User(u64),
}

/// Software credit pool
///
/// Capacity is fixed at configuration. Ports draw credits in batches and
/// return surplus; the counter is the only shared state.
#[repr(C, align(64))]
pub struct CreditPool {
    pub(crate) configured: AtomicBool,
    pub(crate) avail: AtomicU32,
}

impl CreditPool {
    pub(crate) const fn new() -> Self {
        Self {
            configured: AtomicBool::new(false),
            avail: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    #[inline]
    pub fn available(&self) -> u32 {
        self.avail.load(Ordering::Acquire)
    }
}

/// Per-type queue validity bits
pub(crate) struct QueueBitmap {
    words: Box<[AtomicU64]>,
    bits: usize,
}

impl QueueBitmap {
    pub fn new(bits: usize) -> Self {
        let words = (0..bits.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self { words, bits }
    }

    pub fn set(&self, id: QueueId) -> HqmResult<()> {
        let id = id as usize;
        if id >= self.bits {
            return Err(HqmError::invalid(format!("queue id {} out of range", id)));
        }
        self.words[id / 64].fetch_or(1 << (id % 64), Ordering::Release);
        Ok(())
    }

    #[inline(always)]
    pub fn is_set(&self, id: QueueId) -> bool {
        let id = id as usize;
        id < self.bits && self.words[id / 64].load(Ordering::Acquire) & (1 << (id % 64)) != 0
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }
}

/// Structural state guarded by the domain lock
#[derive(Debug, Default)]
pub(crate) struct DomainState {
    pub budget: PerType<u32>,
    pub remaining: PerType<u32>,
    pub handles: HandleList,
    /// Set while a reset runs with the lock released; refuses attach
    pub tearing_down: bool,
}

#[derive(Default)]
pub(crate) struct AlertThreadState {
    pub started: bool,
    pub join: Option<JoinHandle<()>>,
}

/// Domain state shared with the alert thread
pub(crate) struct DomainShared {
    pub configured: AtomicBool,
    pub started: AtomicBool,
    /// One-way latch until the domain is reset
    pub shutdown: AtomicBool,
    pub alert: Mutex<AlertThreadState>,
    /// Signalled by the alert thread on exit
    pub alert_exit: Condvar,
}

impl DomainShared {
    fn new() -> Self {
        Self {
            configured: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            alert: Mutex::new(AlertThreadState::default()),
            alert_exit: Condvar::new(),
        }
    }
}

/// Scheduling domain: the unit of hardware resource partitioning
///
/// # Performance
/// - Cache-line aligned; the flag block is read on every datapath call
#[repr(C, align(64))]
pub struct SchedulingDomain {
    pub(crate) id: DomainId,
    pub(crate) shared: Arc<DomainShared>,
    pub(crate) queue_valid: PerType<QueueBitmap>,
    pub(crate) pools: PerType<Box<[CreditPool]>>,
    pub(crate) state: Mutex<DomainState>,
    pub(crate) ports: PerType<Box<[Port]>>,
}

impl SchedulingDomain {
    pub(crate) fn new(id: DomainId) -> Self {
        let pools = |n: usize| (0..n).map(|_| CreditPool::new()).collect();
        let ports = |ty: PortType, n: usize| (0..n).map(|i| Port::new(i as u32, ty)).collect();
        Self {
            id,
            shared: Arc::new(DomainShared::new()),
            queue_valid: PerType::new(
                QueueBitmap::new(MAX_NUM_LDB_QUEUES),
                QueueBitmap::new(MAX_NUM_DIR_QUEUES),
            ),
            pools: PerType::new(pools(NUM_LDB_CREDIT_POOLS), pools(NUM_DIR_CREDIT_POOLS)),
            state: Mutex::new(DomainState::default()),
            ports: PerType::new(
                ports(PortType::Ldb, MAX_NUM_LDB_PORTS),
                ports(PortType::Dir, MAX_NUM_DIR_PORTS),
            ),
        }
    }

    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.shared.configured.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn alert_thread_running(&self) -> bool {
        self.shared.alert.lock().started
    }

    pub(crate) fn port(&self, ty: PortType, id: u32) -> HqmResult<&Port> {
        self.ports
            .get(ty)
            .get(id as usize)
            .ok_or_else(|| HqmError::invalid(format!("{} port {} out of range", ty, id)))
    }

    pub(crate) fn pool(&self, ty: PortType, id: u32) -> HqmResult<&CreditPool> {
        self.pools
            .get(ty)
            .get(id as usize)
            .ok_or_else(|| HqmError::invalid(format!("{} credit pool {} out of range", ty, id)))
    }

    /// Credits held by configured pools of one type
    pub fn pool_credits(&self, ty: PortType) -> u32 {
        self.pools
            .get(ty)
            .iter()
            .filter(|p| p.is_configured())
            .map(CreditPool::available)
            .sum()
    }

    /// Remaining and total credit budget of one type
    pub fn credit_budget(&self, ty: PortType) -> (u32, u32) {
        let state = self.state.lock();
        (*state.remaining.get(ty), *state.budget.get(ty))
    }

    /// Whether any port of this domain still has attached handles
    pub(crate) fn any_port_attached(&self) -> bool {
        PortType::ALL
            .iter()
            .flat_map(|&ty| self.ports.get(ty).iter())
            .any(|p| !p.handles.lock().is_empty())
    }
}

/// Caller handle on a configured domain
///
/// Detached explicitly with [`DomainHandle::detach`] or implicitly on drop.
/// Port handles borrow it, so it cannot be detached while they are alive.
pub struct DomainHandle<'dp> {
    pub(crate) dp: &'dp Datapath,
    pub(crate) domain: &'dp SchedulingDomain,
    pub(crate) token: Option<HandleToken>,
}

impl<'dp> DomainHandle<'dp> {
    #[inline]
    pub fn id(&self) -> DomainId {
        self.domain.id
    }

    pub fn domain(&self) -> &'dp SchedulingDomain {
        self.domain
    }

    pub fn datapath(&self) -> &'dp Datapath {
        self.dp
    }

    /// Reject use after detach
    #[inline]
    pub(crate) fn check(&self) -> HqmResult<()> {
        if self.token.is_none() && self.dp.config().validate_args {
            return Err(HqmError::invalid(format!(
                "domain {} handle is detached",
                self.domain.id
            )));
        }
        Ok(())
    }

    /// Fail with Interrupted once the domain is shutting down
    #[inline]
    pub(crate) fn check_shutdown(&self) -> HqmResult<()> {
        if self.domain.is_shutdown() || self.dp.device.is_reset() {
            return Err(HqmError::Interrupted(format!(
                "domain {} is shutting down",
                self.domain.id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DomainHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainHandle")
            .field("domain", &self.domain.id)
            .field("attached", &self.token.is_some())
            .finish()
    }
}
