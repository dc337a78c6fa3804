/*!
 * Port Lifecycle
 * Creation, attach/detach, queue links and enable/disable
 */

use super::types::{CreditTuning, Port, PortArgs, PortHandle, PortMapping};
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::MAX_LINK_PRIORITY;
use crate::core::types::{PerType, PortId, PortType, QueueId};
use crate::datapath::domain::DomainHandle;
use crate::datapath::interrupt::WakeReason;
use crate::hw::burst::BurstWriter;
use crate::hw::traits::HwPortArgs;
use crate::hw::wire::QeBurst;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

impl DomainHandle<'_> {
    /// Create a load-balanced port bound to two credit pools
    pub fn create_ldb_port(&self, args: &PortArgs) -> HqmResult<PortId> {
        self.create_port(PortType::Ldb, args, None)
    }

    /// Create a directed port, optionally paired with an existing DIR queue
    pub fn create_dir_port(&self, args: &PortArgs, queue: Option<QueueId>) -> HqmResult<PortId> {
        self.create_port(PortType::Dir, args, queue)
    }

    fn create_port(&self, ty: PortType, args: &PortArgs, queue: Option<QueueId>) -> HqmResult<PortId> {
        self.check()?;

        for (pool_ty, pool) in [
            (PortType::Ldb, args.ldb_credit_pool_id),
            (PortType::Dir, args.dir_credit_pool_id),
        ] {
            if !self.domain.pool(pool_ty, pool)?.is_configured() {
                return Err(HqmError::invalid(format!(
                    "{} credit pool {} is not configured",
                    pool_ty, pool
                )));
            }
        }

        self.check_shutdown()?;

        let domain_id = self.domain.id;
        let hw = self.dp.device.hw();
        let hw_args = HwPortArgs {
            cq_depth: args.cq_depth,
            cq_depth_threshold: 1,
            cq_history_list_size: if ty.is_ldb() {
                args.num_ldb_event_state_entries
            } else {
                0
            },
        };

        let _state = self.domain.state.lock();
        let id = match ty {
            PortType::Ldb => hw.create_ldb_port(domain_id, &hw_args),
            PortType::Dir => hw.create_dir_port(domain_id, &hw_args, queue),
        }
        .map_err(|e| {
            error!(domain = domain_id, %ty, error = %e, "Port creation rejected by device");
            e
        })?;
        if let Err(e) = self.bind_port(ty, id, args) {
            // The device has no per-port release; the id returns at domain reset
            warn!(
                domain = domain_id,
                %ty,
                port = id,
                error = %e,
                "Port setup failed, device port held until domain reset"
            );
            return Err(e);
        }

        info!(
            domain = domain_id,
            %ty,
            port = id,
            cq_depth = args.cq_depth,
            ldb_pool = args.ldb_credit_pool_id,
            dir_pool = args.dir_credit_pool_id,
            "Created port"
        );
        Ok(id)
    }

    /// Map a freshly created device port and publish it to the datapath
    fn bind_port(&self, ty: PortType, id: PortId, args: &PortArgs) -> HqmResult<()> {
        let domain_id = self.domain.id;
        let hw = self.dp.device.hw();
        let port = self.domain.port(ty, id)?;

        // Dropping a mapped doorbell unmaps it, so a failed ring mapping
        // leaves nothing behind
        let doorbell = hw.map_doorbell(domain_id, ty, id)?;
        let ring = hw.map_consumer_ring(domain_id, ty, id)?;

        let _port_lock = port.lock.lock();
        port.configure(PortMapping {
            doorbell,
            ring,
            writer: BurstWriter::probe(self.dp.config().burst),
            pools: PerType::new(args.ldb_credit_pool_id, args.dir_credit_pool_id),
            tuning: CreditTuning::new(args.num_ldb_credits, args.num_dir_credits),
        });
        if let Err(e) = self.dp.device.interrupts().enable(ty, id) {
            port.reset();
            return Err(e);
        }
        Ok(())
    }

    /// Attach a handle to a configured LDB port
    pub fn attach_ldb_port(&self, id: PortId) -> HqmResult<PortHandle<'_>> {
        self.attach_port(PortType::Ldb, id)
    }

    /// Attach a handle to a configured DIR port
    pub fn attach_dir_port(&self, id: PortId) -> HqmResult<PortHandle<'_>> {
        self.attach_port(PortType::Dir, id)
    }

    fn attach_port(&self, ty: PortType, id: PortId) -> HqmResult<PortHandle<'_>> {
        self.check()?;

        let port: &Port = self.domain.port(ty, id)?;
        let _guard = port.lock.lock();
        let mapping = port
            .mapping
            .load_full()
            .filter(|_| port.is_configured())
            .ok_or_else(|| HqmError::NotConfigured(format!("{} port {}", ty, id)))?;

        let token = port.handles.lock().attach();
        debug!(domain = self.domain.id, %ty, port = id, "Attached port handle");

        Ok(PortHandle {
            dp: self.dp,
            domain: self.domain,
            port,
            mapping,
            staging: Box::new(QeBurst::new()),
            token: Some(token),
        })
    }
}

impl PortHandle<'_> {
    /// Detach this handle
    pub fn detach(&mut self) -> HqmResult<()> {
        let token = self.token.take().ok_or_else(|| {
            HqmError::invalid(format!("{} port {} handle is detached", self.port.ty, self.port.id))
        })?;
        self.port.handles.lock().detach(token);

        debug!(
            domain = self.domain.id(),
            ty = %self.port.ty,
            port = self.port.id,
            "Detached port handle"
        );
        Ok(())
    }

    /// Link an LDB queue to this port at `priority` (0 is highest)
    pub fn link_queue(&self, queue: QueueId, priority: u8) -> HqmResult<()> {
        self.check()?;
        if priority > MAX_LINK_PRIORITY {
            return Err(HqmError::invalid(format!(
                "priority {} exceeds {}",
                priority, MAX_LINK_PRIORITY
            )));
        }
        self.require_ldb("link")?;
        if self.dp.config().validate_args && !self.domain.queue_valid.get(PortType::Ldb).is_set(queue) {
            return Err(HqmError::invalid(format!(
                "LDB queue {} is not in domain {}",
                queue,
                self.domain.id()
            )));
        }
        self.check_shutdown()?;

        let _guard = self.port.lock.lock();
        self.dp
            .device
            .hw()
            .map_qid(self.domain.id(), self.port.id, queue, priority)?;

        info!(domain = self.domain.id(), port = self.port.id, queue, priority, "Linked queue");
        Ok(())
    }

    /// Remove a queue link from this port
    pub fn unlink_queue(&self, queue: QueueId) -> HqmResult<()> {
        self.check()?;
        self.require_ldb("unlink")?;
        self.check_shutdown()?;

        let _guard = self.port.lock.lock();
        self.dp
            .device
            .hw()
            .unmap_qid(self.domain.id(), self.port.id, queue)?;

        info!(domain = self.domain.id(), port = self.port.id, queue, "Unlinked queue");
        Ok(())
    }

    /// Resume scheduling to this port and allow blocking on it again
    pub fn enable(&self) -> HqmResult<()> {
        self.check()?;
        self.check_shutdown()?;

        let _guard = self.port.lock.lock();
        self.dp
            .device
            .hw()
            .enable_port(self.domain.id(), self.port.ty, self.port.id)?;
        self.port.enabled.store(true, Ordering::Release);
        self.dp.device.interrupts().enable(self.port.ty, self.port.id)?;

        info!(domain = self.domain.id(), ty = %self.port.ty, port = self.port.id, "Enabled port");
        Ok(())
    }

    /// Stop scheduling to this port and wake any blocked consumer
    ///
    /// Idempotent. Entries already in the consumer ring can still be drained.
    pub fn disable(&self) -> HqmResult<()> {
        self.check()?;

        let _guard = self.port.lock.lock();
        self.dp
            .device
            .hw()
            .disable_port(self.domain.id(), self.port.ty, self.port.id)?;
        self.port.enabled.store(false, Ordering::Release);
        self.dp
            .device
            .interrupts()
            .signal(self.port.ty, self.port.id, WakeReason::PortDisabled);

        info!(domain = self.domain.id(), ty = %self.port.ty, port = self.port.id, "Disabled port");
        Ok(())
    }

    fn require_ldb(&self, op: &str) -> HqmResult<()> {
        if !self.port.ty.is_ldb() {
            return Err(HqmError::invalid(format!(
                "cannot {} a queue on DIR port {}",
                op, self.port.id
            )));
        }
        Ok(())
    }
}

impl Drop for PortHandle<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.port.handles.lock().detach(token);
        }
    }
}
