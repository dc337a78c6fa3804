/*!
 * Queue Creation
 */

use super::types::{DomainHandle, LdbQueueArgs};
use crate::core::errors::HqmResult;
use crate::core::limits::{NUM_ATM_INFLIGHTS_PER_LDB_QUEUE, NUM_QID_INFLIGHTS};
use crate::core::types::{PortId, PortType, QueueId};
use crate::hw::traits::HwLdbQueueArgs;
use tracing::info;

impl DomainHandle<'_> {
    /// Create a load-balanced queue and mark it valid for enqueue
    ///
    /// Ordered queues get one QID inflight per sequence number; unordered
    /// queues get a quarter of the device's inflight budget.
    pub fn create_ldb_queue(&self, args: &LdbQueueArgs) -> HqmResult<QueueId> {
        self.check()?;
        self.check_shutdown()?;

        let num_qid_inflights = if args.num_sequence_numbers > 0 {
            args.num_sequence_numbers
        } else {
            NUM_QID_INFLIGHTS / 4
        };
        let hw_args = HwLdbQueueArgs {
            num_sequence_numbers: args.num_sequence_numbers,
            num_qid_inflights,
            num_atomic_inflights: NUM_ATM_INFLIGHTS_PER_LDB_QUEUE,
            lock_id_comp_level: args.lock_id_comp_level,
        };

        let _state = self.domain.state.lock();
        let id = self.dp.device.hw().create_ldb_queue(self.domain.id, &hw_args)?;
        self.domain.queue_valid.get(PortType::Ldb).set(id)?;

        info!(
            domain = self.domain.id,
            queue = id,
            seq = args.num_sequence_numbers,
            "Created LDB queue"
        );
        Ok(id)
    }

    /// Create a directed queue, optionally paired with an existing DIR port
    pub fn create_dir_queue(&self, port: Option<PortId>) -> HqmResult<QueueId> {
        self.check()?;
        self.check_shutdown()?;

        let _state = self.domain.state.lock();
        let id = self.dp.device.hw().create_dir_queue(self.domain.id, port)?;
        self.domain.queue_valid.get(PortType::Dir).set(id)?;

        info!(domain = self.domain.id, queue = id, ?port, "Created DIR queue");
        Ok(id)
    }

    /// Whether `queue` was created in this domain
    pub fn queue_is_valid(&self, ty: PortType, queue: QueueId) -> bool {
        self.domain.queue_valid.get(ty).is_set(queue)
    }
}
