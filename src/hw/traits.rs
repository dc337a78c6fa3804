/*!
 * Hardware Collaborator Interface
 *
 * Everything below the datapath (device probe, BAR mapping, the command
 * interface and interrupt delivery) is reached through [`HqmHardware`].
 * The datapath owns admission control and ring bookkeeping; the collaborator
 * owns id assignment, resource partitioning and the actual scheduling.
 */

use super::mmio::{ConsumerRing, Doorbell};
use crate::core::errors::HqmResult;
use crate::core::types::{DomainId, PortId, PortType, QueueId};
use crate::datapath::interrupt::InterruptController;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resource counts currently available on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwResources {
    pub num_sched_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_hist_list_entries: u32,
    pub max_contiguous_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
}

/// Resources requested for a new scheduling domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwDomainArgs {
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_atomic_inflights: u32,
    pub num_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
}

/// Load-balanced queue parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwLdbQueueArgs {
    pub num_sequence_numbers: u32,
    pub num_qid_inflights: u32,
    pub num_atomic_inflights: u32,
    pub lock_id_comp_level: u32,
}

/// Consumer-port parameters shared by both port types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwPortArgs {
    pub cq_depth: u32,
    pub cq_depth_threshold: u32,
    /// LDB only
    pub cq_history_list_size: u32,
}

/// Alert ids as reported by the device's alert channel
pub mod alert_id {
    pub const PP_ILLEGAL_ENQ: u64 = 0;
    pub const PP_EXCESS_TOKEN_POPS: u64 = 1;
    pub const ILLEGAL_HCW: u64 = 2;
    pub const ILLEGAL_QID: u64 = 3;
    pub const DISABLED_QID: u64 = 4;
    pub const DEVICE_RESET: u64 = 5;
    pub const USER: u64 = 6;
    pub const NUM_ALERTS: u64 = 7;
}

/// Undecoded alert record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAlert {
    pub alert_id: u64,
    pub aux_data: u64,
}

/// Hardware collaborator
///
/// All calls except [`HqmHardware::read_alert`] complete promptly. Errors are
/// reported as [`crate::core::HqmError::Hardware`] with the device's status,
/// or as `InvalidArgument` when an id is out of range.
pub trait HqmHardware: Send + Sync {
    fn get_num_resources(&self) -> HqmResult<HwResources>;

    fn create_domain(&self, args: &HwDomainArgs) -> HqmResult<DomainId>;

    fn create_ldb_queue(&self, domain: DomainId, args: &HwLdbQueueArgs) -> HqmResult<QueueId>;

    /// `port` pairs the queue with an existing directed port
    fn create_dir_queue(&self, domain: DomainId, port: Option<PortId>) -> HqmResult<QueueId>;

    fn create_ldb_port(&self, domain: DomainId, args: &HwPortArgs) -> HqmResult<PortId>;

    /// `queue` pairs the port with an existing directed queue
    fn create_dir_port(
        &self,
        domain: DomainId,
        args: &HwPortArgs,
        queue: Option<QueueId>,
    ) -> HqmResult<PortId>;

    fn map_qid(&self, domain: DomainId, port: PortId, queue: QueueId, priority: u8)
        -> HqmResult<()>;

    fn unmap_qid(&self, domain: DomainId, port: PortId, queue: QueueId) -> HqmResult<()>;

    fn enable_port(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()>;

    fn disable_port(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()>;

    fn start_domain(&self, domain: DomainId) -> HqmResult<()>;

    /// Release every resource owned by the domain
    fn reset_domain(&self, domain: DomainId) -> HqmResult<()>;

    /// Post a user alert on the domain's alert channel
    fn enqueue_domain_alert(&self, domain: DomainId, aux_data: u64) -> HqmResult<()>;

    /// Block until the next alert for `domain`
    fn read_alert(&self, domain: DomainId) -> HqmResult<RawAlert>;

    /// Map the producer-port doorbell
    fn map_doorbell(
        &self,
        domain: DomainId,
        ty: PortType,
        port: PortId,
    ) -> HqmResult<Box<dyn Doorbell>>;

    /// Map the consumer ring
    fn map_consumer_ring(
        &self,
        domain: DomainId,
        ty: PortType,
        port: PortId,
    ) -> HqmResult<ConsumerRing>;

    /// Request an interrupt on the next CQE written to `port`
    fn arm_interrupt(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()>;

    /// Route CQ interrupts and device resets to the datapath's gates
    fn bind_interrupts(&self, controller: Arc<InterruptController>);
}
