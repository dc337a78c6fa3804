/*!
 * Scheduling Domain Lifecycle
 * Create, attach, detach, start and reset
 */

use super::types::{DomainHandle, DomainState, SchedDomainArgs, SchedulingDomain};
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{NUM_ATM_INFLIGHTS_PER_LDB_QUEUE, NUM_DIR_CREDIT_POOLS, NUM_LDB_CREDIT_POOLS};
use crate::core::types::{DomainId, PerType, PortType};
use crate::datapath::manager::Datapath;
use crate::hw::traits::HwDomainArgs;
use crate::monitoring::span_operation;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info};

impl Datapath {
    /// Create a scheduling domain and record its credit budget
    pub fn create_sched_domain(&self, args: &SchedDomainArgs) -> HqmResult<DomainId> {
        let _guard = self.lock.lock();

        if args.num_ldb_credit_pools as usize > NUM_LDB_CREDIT_POOLS {
            return Err(HqmError::invalid(format!(
                "{} LDB credit pools requested, at most {}",
                args.num_ldb_credit_pools, NUM_LDB_CREDIT_POOLS
            )));
        }
        if args.num_dir_credit_pools as usize > NUM_DIR_CREDIT_POOLS {
            return Err(HqmError::invalid(format!(
                "{} DIR credit pools requested, at most {}",
                args.num_dir_credit_pools, NUM_DIR_CREDIT_POOLS
            )));
        }

        let hw_args = HwDomainArgs {
            num_ldb_queues: args.num_ldb_queues,
            num_ldb_ports: args.num_ldb_ports,
            num_dir_ports: args.num_dir_ports,
            num_atomic_inflights: args.num_ldb_queues * NUM_ATM_INFLIGHTS_PER_LDB_QUEUE,
            num_hist_list_entries: args.num_ldb_event_state_entries,
            num_ldb_credits: args.num_ldb_credits,
            num_dir_credits: args.num_dir_credits,
        };
        let id = self.device.hw().create_domain(&hw_args).map_err(|e| {
            error!(error = %e, "Domain creation rejected by device");
            e
        })?;

        let domain = match self.domain(id) {
            Ok(domain) => domain,
            Err(e) => {
                // No slot for this id; hand it back to the device
                let _ = self.device.hw().reset_domain(id);
                return Err(e);
            }
        };
        domain.reinit(
            &mut domain.state.lock(),
            PerType::new(args.num_ldb_credits, args.num_dir_credits),
        );
        domain.shared.configured.store(true, Ordering::Release);

        info!(
            domain = id,
            ldb_credits = args.num_ldb_credits,
            dir_credits = args.num_dir_credits,
            "Created scheduling domain"
        );
        Ok(id)
    }

    /// Attach a handle to a configured domain
    pub fn attach_sched_domain(&self, id: DomainId) -> HqmResult<DomainHandle<'_>> {
        let domain = self.domain(id)?;
        let mut state = domain.state.lock();
        if !domain.is_configured() || state.tearing_down {
            return Err(HqmError::NotConfigured(format!("domain {}", id)));
        }
        let token = state.handles.attach();
        debug!(domain = id, handles = state.handles.len(), "Attached domain handle");

        Ok(DomainHandle {
            dp: self,
            domain,
            token: Some(token),
        })
    }

    /// Tear a domain down and return its resources to the device
    ///
    /// Requires every domain and port handle to be detached. Stops the alert
    /// thread (waiting for it to exit), unmaps all port memory, then asks the
    /// device to release the domain. Attach is refused from the first check
    /// onward; the domain lock is not held while the alert callback runs.
    pub fn reset_sched_domain(&self, id: DomainId) -> HqmResult<()> {
        let op = span_operation("reset_sched_domain", id);
        let _entered = op.enter();
        op.finish(self.teardown_domain(id))
    }

    fn teardown_domain(&self, id: DomainId) -> HqmResult<()> {
        let domain = self.domain(id)?;
        if !domain.is_configured() {
            return Err(HqmError::NotConfigured(format!("domain {}", id)));
        }

        {
            let mut state = domain.state.lock();
            if state.tearing_down {
                return Err(HqmError::invalid(format!("domain {} reset in progress", id)));
            }
            if !state.handles.is_empty() {
                return Err(HqmError::invalid(format!(
                    "domain {} has {} attached handles",
                    id,
                    state.handles.len()
                )));
            }
            if domain.any_port_attached() {
                return Err(HqmError::invalid(format!(
                    "domain {} has ports with attached handles",
                    id
                )));
            }
            state.tearing_down = true;
        }

        // The alert callback may call back into the domain, so wait unlocked
        if let Err(e) = domain.stop_alert_thread(self.device.hw()) {
            domain.state.lock().tearing_down = false;
            return Err(e);
        }

        let mut state = domain.state.lock();
        for ty in PortType::ALL {
            for port in domain.ports.get(ty).iter() {
                port.reset();
            }
        }

        if let Err(e) = self.device.hw().reset_domain(id) {
            error!(domain = id, error = %e, "Device rejected domain reset");
            state.tearing_down = false;
            return Err(e);
        }

        domain.reinit(&mut state, PerType::default());
        domain.shared.configured.store(false, Ordering::Release);
        drop(state);

        info!(domain = id, "Reset scheduling domain");
        Ok(())
    }
}

impl SchedulingDomain {
    /// Return every field to its post-create state
    pub(crate) fn reinit(&self, state: &mut DomainState, budget: PerType<u32>) {
        *state = DomainState {
            budget,
            remaining: budget,
            ..Default::default()
        };

        for ty in PortType::ALL {
            for pool in self.pools.get(ty).iter() {
                pool.avail.store(0, Ordering::Relaxed);
                pool.configured.store(false, Ordering::Release);
            }
            self.queue_valid.get(ty).clear_all();
            for port in self.ports.get(ty).iter() {
                port.reset();
            }
        }

        self.shared.started.store(false, Ordering::Release);
        self.shared.shutdown.store(false, Ordering::Release);
    }
}

impl DomainHandle<'_> {
    /// Detach this handle
    ///
    /// Fails while any port of the domain still has an attached handle.
    pub fn detach(&mut self) -> HqmResult<()> {
        let token = self
            .token
            .ok_or_else(|| HqmError::invalid(format!("domain {} handle is detached", self.domain.id)))?;

        let mut state = self.domain.state.lock();
        if self.domain.any_port_attached() {
            return Err(HqmError::invalid(format!(
                "domain {} has ports with attached handles",
                self.domain.id
            )));
        }
        state.handles.detach(token);
        self.token = None;

        debug!(domain = self.domain.id, "Detached domain handle");
        Ok(())
    }

    /// Start scheduling; requires a running alert thread
    pub fn start(&self) -> HqmResult<()> {
        self.check()?;
        self.check_shutdown()?;

        let _state = self.domain.state.lock();
        if !self.domain.alert_thread_running() {
            return Err(HqmError::NoAlertThread(format!(
                "domain {} has no alert thread",
                self.domain.id
            )));
        }

        self.dp.device.hw().start_domain(self.domain.id)?;
        self.domain.shared.started.store(true, Ordering::Release);

        info!(domain = self.domain.id, "Started scheduling domain");
        Ok(())
    }
}

impl Drop for DomainHandle<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.domain.state.lock().handles.detach(token);
        }
    }
}
