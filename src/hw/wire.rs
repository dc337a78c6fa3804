/*!
 * Wire Formats
 *
 * Bit-exact 16-byte queue entries exchanged with the device.
 *
 * Enqueue QE (producer -> device):
 *
 * | bytes  | field                                             |
 * |--------|---------------------------------------------------|
 * | 0..8   | opaque 64-bit payload                             |
 * | 8..10  | opaque 16-bit tag                                 |
 * | 10     | queue id                                          |
 * | 11     | schedule byte: sched type [1:0], priority [4:2]   |
 * | 12..14 | flow id (BAT_T: token count minus one)            |
 * | 14     | reserved, zeroed on enqueue                       |
 * | 15     | command [3:0], flags [7:4] (zeroed on enqueue)    |
 *
 * Dequeue CQE (device -> consumer) mirrors the layout; byte 15 holds the
 * generation tag [0], the queue-depth hint [1] and the error bit [2].
 */

use crate::core::limits::QE_BURST_SIZE;
use crate::core::types::{PortType, QueueId};
use serde::{Deserialize, Serialize};

/// 4-bit QE command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QeCommand {
    Noop = 0,
    /// Batch token return; returns `flow_id + 1` tokens
    BatT = 1,
    Rel = 2,
    RelT = 3,
    /// Arm the port's CQ interrupt
    Arm = 5,
    New = 8,
    NewT = 9,
    Fwd = 10,
    FwdT = 11,
}

impl QeCommand {
    pub const MASK: u8 = 0x0F;

    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & Self::MASK {
            0 => QeCommand::Noop,
            1 => QeCommand::BatT,
            2 => QeCommand::Rel,
            3 => QeCommand::RelT,
            5 => QeCommand::Arm,
            8 => QeCommand::New,
            9 => QeCommand::NewT,
            10 => QeCommand::Fwd,
            11 => QeCommand::FwdT,
            _ => return None,
        })
    }

    /// NEW and FWD variants consume one credit
    #[inline(always)]
    pub const fn requires_credit(self) -> bool {
        matches!(
            self,
            QeCommand::New | QeCommand::NewT | QeCommand::Fwd | QeCommand::FwdT
        )
    }

    /// Commands that carry an event to a queue
    #[inline(always)]
    pub const fn is_enqueue(self) -> bool {
        self.requires_credit()
    }

    /// Commands that release a history-list entry
    #[inline(always)]
    pub const fn releases_history(self) -> bool {
        matches!(
            self,
            QeCommand::Rel | QeCommand::RelT | QeCommand::Fwd | QeCommand::FwdT
        )
    }

    /// Number of CQ tokens this command returns.
    ///
    /// Token-returning commands set bit 0; ARM shares the bit but returns none.
    #[inline(always)]
    pub const fn token_pops(self, flow_id: u16) -> u32 {
        match self {
            QeCommand::Arm => 0,
            QeCommand::BatT => 1 + flow_id as u32,
            cmd if (cmd as u8) & 0x1 != 0 => 1,
            _ => 0,
        }
    }
}

/// Scheduling type carried in the schedule byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedType {
    Atomic = 0,
    Unordered = 1,
    Ordered = 2,
    Directed = 3,
}

impl SchedType {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => SchedType::Atomic,
            1 => SchedType::Unordered,
            2 => SchedType::Ordered,
            _ => SchedType::Directed,
        }
    }

    /// Traffic class of the destination queue
    #[inline(always)]
    pub const fn port_type(self) -> PortType {
        match self {
            SchedType::Directed => PortType::Dir,
            _ => PortType::Ldb,
        }
    }
}

/// Enqueue queue entry
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueQe {
    pub data: u64,
    pub opaque: u16,
    pub queue_id: u8,
    pub sched: u8,
    pub flow_id: u16,
    pub rsvd: u8,
    pub cmd_byte: u8,
}

const _: () = assert!(std::mem::size_of::<EnqueueQe>() == 16);

impl EnqueueQe {
    /// New event addressed to `queue_id`
    pub fn new(queue_id: QueueId, sched_type: SchedType, data: u64) -> Self {
        Self {
            data,
            queue_id: queue_id as u8,
            sched: sched_type as u8,
            cmd_byte: QeCommand::New as u8,
            ..Default::default()
        }
    }

    pub const fn noop() -> Self {
        Self {
            data: 0,
            opaque: 0,
            queue_id: 0,
            sched: 0,
            flow_id: 0,
            rsvd: 0,
            cmd_byte: QeCommand::Noop as u8,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.sched = (self.sched & 0x3) | ((priority & 0x7) << 2);
        self
    }

    pub fn with_flow_id(mut self, flow_id: u16) -> Self {
        self.flow_id = flow_id;
        self
    }

    pub fn with_opaque(mut self, opaque: u16) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_command(mut self, cmd: QeCommand) -> Self {
        self.set_command(cmd);
        self
    }

    #[inline(always)]
    pub fn set_command(&mut self, cmd: QeCommand) {
        self.cmd_byte = (self.cmd_byte & !QeCommand::MASK) | cmd as u8;
    }

    /// Decoded command; reserved encodings read as NOOP
    #[inline(always)]
    pub fn command(&self) -> QeCommand {
        QeCommand::from_bits(self.cmd_byte).unwrap_or(QeCommand::Noop)
    }

    #[inline(always)]
    pub fn sched_type(&self) -> SchedType {
        SchedType::from_bits(self.sched)
    }

    pub fn priority(&self) -> u8 {
        (self.sched >> 2) & 0x7
    }

    /// Zero the reserved byte and the flag nibble
    #[inline(always)]
    pub fn clear_reserved(&mut self) {
        self.rsvd = 0;
        self.cmd_byte &= QeCommand::MASK;
    }
}

/// Dequeue queue entry
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DequeueQe {
    pub data: u64,
    pub opaque: u16,
    pub queue_id: u8,
    pub sched: u8,
    pub flow_id: u16,
    pub debug: u8,
    pub status: u8,
}

const _: () = assert!(std::mem::size_of::<DequeueQe>() == 16);

impl DequeueQe {
    pub const GEN_BIT: u8 = 1 << 0;
    pub const DEPTH_HINT_BIT: u8 = 1 << 1;
    pub const ERROR_BIT: u8 = 1 << 2;

    #[inline(always)]
    pub fn cq_gen(&self) -> u8 {
        self.status & Self::GEN_BIT
    }

    pub fn depth_hint(&self) -> bool {
        self.status & Self::DEPTH_HINT_BIT != 0
    }

    pub fn is_error(&self) -> bool {
        self.status & Self::ERROR_BIT != 0
    }

    pub fn sched_type(&self) -> SchedType {
        SchedType::from_bits(self.sched)
    }

    pub fn priority(&self) -> u8 {
        (self.sched >> 2) & 0x7
    }

    /// Little-endian words as laid out in device memory
    #[inline(always)]
    pub fn to_words(&self) -> [u64; 2] {
        let hi = self.opaque as u64
            | (self.queue_id as u64) << 16
            | (self.sched as u64) << 24
            | (self.flow_id as u64) << 32
            | (self.debug as u64) << 48
            | (self.status as u64) << 56;
        [self.data, hi]
    }

    #[inline(always)]
    pub fn from_words(words: [u64; 2]) -> Self {
        let hi = words[1];
        Self {
            data: words[0],
            opaque: hi as u16,
            queue_id: (hi >> 16) as u8,
            sched: (hi >> 24) as u8,
            flow_id: (hi >> 32) as u16,
            debug: (hi >> 48) as u8,
            status: (hi >> 56) as u8,
        }
    }

    /// Generation tag extracted from the high word alone
    #[inline(always)]
    pub const fn gen_of_word(hi: u64) -> u8 {
        ((hi >> 56) as u8) & Self::GEN_BIT
    }
}

/// One hardware burst: four contiguous QEs, cache-line aligned
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QeBurst {
    pub qes: [EnqueueQe; QE_BURST_SIZE],
}

const _: () = assert!(std::mem::size_of::<QeBurst>() == 64);

impl QeBurst {
    pub const fn new() -> Self {
        Self {
            qes: [EnqueueQe::noop(); QE_BURST_SIZE],
        }
    }

    /// Reset every slot to NOOP
    #[inline(always)]
    pub fn clear(&mut self) {
        self.qes = [EnqueueQe::noop(); QE_BURST_SIZE];
    }

    pub fn as_ptr(&self) -> *const u8 {
        self as *const Self as *const u8
    }

    /// Reinterpret 64 bytes of device-visible memory as a burst
    ///
    /// # Safety
    /// `ptr` must be valid for 64 bytes of reads and 64-byte aligned.
    pub unsafe fn read_from(ptr: *const u8) -> Self {
        std::ptr::read_volatile(ptr as *const QeBurst)
    }
}

impl Default for QeBurst {
    fn default() -> Self {
        Self::new()
    }
}
