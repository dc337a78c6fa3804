/*!
 * Emulator Types
 * Sizing configuration, status codes and the device-side bookkeeping records
 */

use crate::core::limits::{
    MAX_NUM_DIR_PORTS, MAX_NUM_DOMAINS, MAX_NUM_LDB_PORTS, MAX_NUM_LDB_QUEUES, NUM_QID_INFLIGHTS,
};
use crate::core::types::{DomainId, PerType, QueueId};
use crate::hw::mmio::RingMemory;
use crate::hw::traits::{HwDomainArgs, HwResources, RawAlert};
use crate::hw::wire::DequeueQe;
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Size of the emulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub num_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub num_qid_inflights: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            num_domains: MAX_NUM_DOMAINS as u32,
            num_ldb_queues: MAX_NUM_LDB_QUEUES as u32,
            num_ldb_ports: MAX_NUM_LDB_PORTS as u32,
            num_dir_ports: MAX_NUM_DIR_PORTS as u32,
            num_hist_list_entries: 2048,
            num_ldb_credits: 8192,
            num_dir_credits: 2048,
            num_qid_inflights: NUM_QID_INFLIGHTS,
        }
    }
}

impl EmulatorConfig {
    pub(super) fn resources(&self) -> HwResources {
        HwResources {
            num_sched_domains: self.num_domains,
            num_ldb_queues: self.num_ldb_queues,
            num_ldb_ports: self.num_ldb_ports,
            num_dir_ports: self.num_dir_ports,
            num_hist_list_entries: self.num_hist_list_entries,
            max_contiguous_hist_list_entries: self.num_hist_list_entries,
            num_ldb_credits: self.num_ldb_credits,
            num_dir_credits: self.num_dir_credits,
        }
    }
}

/// Command status codes reported through `HqmError::Hardware`
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuStatus {
    InsufficientResources = 1,
    InvalidDomain = 2,
    InvalidId = 3,
    DomainStarted = 4,
    DeviceReset = 5,
    AlertChannelClosed = 6,
}

/// Device-side view of a scheduling domain
pub(super) struct EmuDomain {
    pub started: bool,
    /// Resources taken from the device at creation
    pub granted: HwDomainArgs,
    /// Remaining per-domain quota
    pub quota: HwDomainArgs,
    pub alert_tx: Sender<RawAlert>,
    pub alert_rx: Receiver<RawAlert>,
}

impl EmuDomain {
    pub fn new(args: &HwDomainArgs) -> Self {
        let (alert_tx, alert_rx) = flume::unbounded();
        Self {
            started: false,
            granted: *args,
            quota: *args,
            alert_tx,
            alert_rx,
        }
    }
}

/// Producer side of one consumer ring
pub(super) struct EmuCq {
    pub mem: Arc<RingMemory>,
    pub tail: u32,
    pub gen: u8,
    /// Entries written and not yet returned by a token pop
    pub outstanding: u32,
    pub armed: bool,
}

impl EmuCq {
    pub fn new(depth: u32) -> Self {
        Self {
            mem: RingMemory::new(depth),
            tail: 0,
            gen: 1,
            outstanding: 0,
            armed: false,
        }
    }

    #[inline]
    pub fn has_space(&self) -> bool {
        self.outstanding < self.mem.depth()
    }

    /// Write one entry; returns whether an armed interrupt fired
    pub fn push(&mut self, mut cqe: DequeueQe) -> bool {
        cqe.status = (cqe.status & !DequeueQe::GEN_BIT) | self.gen;
        self.mem.slot(self.tail).publish(&cqe);

        self.tail += 1;
        if self.tail == self.mem.depth() {
            self.tail = 0;
            self.gen ^= 1;
        }
        self.outstanding += 1;

        std::mem::take(&mut self.armed)
    }
}

pub(super) struct EmuPort {
    pub domain: DomainId,
    pub enabled: bool,
    pub cq: EmuCq,
    /// Linked load-balanced queues and their priorities
    pub links: Vec<(QueueId, u8)>,
}

impl EmuPort {
    pub fn new(domain: DomainId, depth: u32) -> Self {
        Self {
            domain,
            enabled: true,
            cq: EmuCq::new(depth),
            links: Vec::new(),
        }
    }

    pub fn is_linked(&self, queue: QueueId) -> bool {
        self.links.iter().any(|(q, _)| *q == queue)
    }
}

pub(super) struct EmuQueue {
    pub domain: DomainId,
    /// Last port served, for round-robin distribution
    pub last_port: usize,
    /// Events waiting for consumer-queue space
    pub backlog: VecDeque<DequeueQe>,
}

impl EmuQueue {
    pub fn new(domain: DomainId) -> Self {
        Self {
            domain,
            last_port: usize::MAX,
            backlog: VecDeque::new(),
        }
    }
}

fn slots<T>(n: u32) -> Vec<Option<T>> {
    (0..n).map(|_| None).collect()
}

pub(super) struct EmuState {
    pub config: EmulatorConfig,
    pub reset: bool,
    pub avail: HwResources,
    pub domains: Vec<Option<EmuDomain>>,
    pub ports: PerType<Vec<Option<EmuPort>>>,
    pub queues: PerType<Vec<Option<EmuQueue>>>,
}

impl EmuState {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            avail: config.resources(),
            domains: slots(config.num_domains),
            ports: PerType::new(slots(config.num_ldb_ports), slots(config.num_dir_ports)),
            // Directed queue ids coincide with directed port ids
            queues: PerType::new(slots(config.num_ldb_queues), slots(config.num_dir_ports)),
            reset: false,
            config,
        }
    }
}
