/*!
 * Shared fixtures for datapath integration tests
 */

#![allow(dead_code)]

use hqm_datapath::{
    Datapath, DatapathConfig, DeviceRegistry, DomainHandle, EmulatedDevice, EmulatorConfig,
    LdbQueueArgs, PortArgs, SchedDomainArgs,
};
use std::sync::Arc;

/// Open a datapath on a private emulated device
pub fn open(config: DatapathConfig) -> (EmulatedDevice, Datapath) {
    let dev = EmulatedDevice::new(EmulatorConfig::default());
    let registry = DeviceRegistry::new();
    registry.register(0, Arc::new(dev.clone())).unwrap();
    let dp = registry.open_with_config(0, config).unwrap();
    (dev, dp)
}

pub fn domain_args(ldb_credits: u32, dir_credits: u32) -> SchedDomainArgs {
    SchedDomainArgs {
        num_ldb_queues: 2,
        num_ldb_ports: 4,
        num_dir_ports: 4,
        num_ldb_event_state_entries: 256,
        num_ldb_credits: ldb_credits,
        num_dir_credits: dir_credits,
        num_ldb_credit_pools: 1,
        num_dir_credit_pools: 1,
    }
}

pub fn port_args(ldb_pool: u32, dir_pool: u32, cq_depth: u32) -> PortArgs {
    PortArgs {
        ldb_credit_pool_id: ldb_pool,
        dir_credit_pool_id: dir_pool,
        num_ldb_credits: 64,
        num_dir_credits: 64,
        cq_depth,
        num_ldb_event_state_entries: cq_depth,
    }
}

/// A domain with one pool per type and one LDB queue
pub struct Setup<'dp> {
    pub domain: DomainHandle<'dp>,
    pub ldb_pool: u32,
    pub dir_pool: u32,
    pub ldb_queue: u32,
}

/// Configured domain; started with a no-op alert thread when `start` is set
pub fn domain(dp: &Datapath, ldb_credits: u32, dir_credits: u32, start: bool) -> Setup<'_> {
    let id = dp
        .create_sched_domain(&domain_args(ldb_credits, dir_credits))
        .unwrap();
    let domain = dp.attach_sched_domain(id).unwrap();
    let ldb_pool = domain.create_ldb_credit_pool(ldb_credits).unwrap();
    let dir_pool = domain.create_dir_credit_pool(dir_credits).unwrap();
    let ldb_queue = domain.create_ldb_queue(&LdbQueueArgs::default()).unwrap();

    if start {
        domain.launch_alert_thread(|_, _| {}).unwrap();
        domain.start().unwrap();
    }

    Setup {
        domain,
        ldb_pool,
        dir_pool,
        ldb_queue,
    }
}
