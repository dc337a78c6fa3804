/*!
 * Datapath Manager
 * Per-open handle owning the domain table of one device
 */

use super::domain::{Resources, SchedulingDomain};
use super::registry::Device;
use crate::core::config::DatapathConfig;
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{MAX_NUM_DOMAINS, NUM_DIR_CREDIT_POOLS, NUM_LDB_CREDIT_POOLS};
use crate::core::types::DomainId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Open datapath on one device
///
/// Owns a fixed table of scheduling domains indexed by the device-assigned
/// domain id. Domain and port handles borrow it, so it outlives them.
pub struct Datapath {
    pub(crate) device: Arc<Device>,
    pub(crate) config: DatapathConfig,
    pub(crate) domains: Box<[SchedulingDomain]>,
    /// Serializes domain creation
    pub(crate) lock: Mutex<()>,
}

impl Datapath {
    pub(crate) fn new(device: Arc<Device>, config: DatapathConfig) -> Self {
        info!(device = device.id(), ?config, "Opened datapath");
        Self {
            domains: (0..MAX_NUM_DOMAINS)
                .map(|i| SchedulingDomain::new(i as DomainId))
                .collect(),
            device,
            config,
            lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &DatapathConfig {
        &self.config
    }

    pub fn domain(&self, id: DomainId) -> HqmResult<&SchedulingDomain> {
        self.domains
            .get(id as usize)
            .ok_or_else(|| HqmError::invalid(format!("domain id {} out of range", id)))
    }

    /// Device resources plus the fixed software credit pool counts
    pub fn get_num_resources(&self) -> HqmResult<Resources> {
        let hw = self.device.hw().get_num_resources()?;
        Ok(Resources {
            num_sched_domains: hw.num_sched_domains,
            num_ldb_queues: hw.num_ldb_queues,
            num_ldb_ports: hw.num_ldb_ports,
            num_dir_ports: hw.num_dir_ports,
            num_ldb_event_state_entries: hw.num_hist_list_entries,
            max_contiguous_ldb_event_state_entries: hw.max_contiguous_hist_list_entries,
            num_ldb_credits: hw.num_ldb_credits,
            num_dir_credits: hw.num_dir_credits,
            num_ldb_credit_pools: NUM_LDB_CREDIT_POOLS as u32,
            num_dir_credit_pools: NUM_DIR_CREDIT_POOLS as u32,
        })
    }

    /// Reset every configured domain
    ///
    /// Fails with `AlreadyExists` while any domain still has an attached
    /// handle; nothing is reset in that case.
    pub fn close(&self) -> HqmResult<()> {
        for domain in self.configured_domains() {
            if !domain.state.lock().handles.is_empty() {
                return Err(HqmError::AlreadyExists(format!(
                    "domain {} has attached handles",
                    domain.id()
                )));
            }
        }

        for domain in self.configured_domains() {
            self.reset_sched_domain(domain.id())?;
        }

        info!(device = self.device.id(), "Closed datapath");
        Ok(())
    }

    fn configured_domains(&self) -> impl Iterator<Item = &SchedulingDomain> {
        self.domains.iter().filter(|d| d.is_configured())
    }
}

impl Drop for Datapath {
    fn drop(&mut self) {
        let ids: Vec<DomainId> = self.configured_domains().map(|d| d.id()).collect();
        for id in ids {
            if let Err(e) = self.reset_sched_domain(id) {
                warn!(domain = id, error = %e, "Domain reset on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Datapath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datapath")
            .field("device", &self.device.id())
            .field("config", &self.config)
            .finish()
    }
}
