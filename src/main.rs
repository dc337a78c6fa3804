/*!
 * HQM Loopback - Demo Entry Point
 *
 * Drives the datapath end to end against the emulated device:
 * - one scheduling domain with an LDB and a DIR credit pool
 * - a producer port and a consumer port linked to one atomic queue
 * - the consumer blocks on its interrupt gate, drains, releases
 *
 * Usage: hqm-loopback [EVENTS]
 */

use hqm_datapath::{
    init_tracing, DatapathConfig, DequeueQe, DeviceRegistry, DomainAlert, EmulatedDevice,
    EmulatorConfig, EnqueueQe, HqmError, LdbQueueArgs, PortArgs, SchedDomainArgs, SchedType,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const DEVICE_ID: u32 = 0;

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let events: u64 = std::env::args()
        .nth(1)
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or(4096);

    let config = DatapathConfig::from_env()?;
    info!(?config, events, "HQM loopback starting");

    let registry = DeviceRegistry::global();
    registry.register(
        DEVICE_ID,
        Arc::new(EmulatedDevice::new(EmulatorConfig::default())),
    )?;
    let dp = registry.open_with_config(DEVICE_ID, config)?;

    let domain_id = dp.create_sched_domain(&SchedDomainArgs {
        num_ldb_queues: 1,
        num_ldb_ports: 2,
        num_dir_ports: 0,
        num_ldb_event_state_entries: 128,
        num_ldb_credits: 256,
        num_dir_credits: 64,
        num_ldb_credit_pools: 1,
        num_dir_credit_pools: 1,
    })?;

    {
        let domain = dp.attach_sched_domain(domain_id)?;
        let ldb_pool = domain.create_ldb_credit_pool(256)?;
        let dir_pool = domain.create_dir_credit_pool(64)?;
        let queue = domain.create_ldb_queue(&LdbQueueArgs::default())?;

        let port_args = PortArgs {
            ldb_credit_pool_id: ldb_pool,
            dir_credit_pool_id: dir_pool,
            num_ldb_credits: 256,
            num_dir_credits: 64,
            cq_depth: 64,
            num_ldb_event_state_entries: 64,
        };
        let producer_id = domain.create_ldb_port(&port_args)?;
        let consumer_id = domain.create_ldb_port(&port_args)?;

        let mut producer = domain.attach_ldb_port(producer_id)?;
        let mut consumer = domain.attach_ldb_port(consumer_id)?;
        consumer.link_queue(queue, 0)?;
        info!(burst = ?producer.burst_kind(), "Burst writer selected");

        domain.launch_alert_thread(|alert, domain| match alert {
            DomainAlert::User(data) => info!(domain, data, "User alert"),
            other => warn!(domain, ?other, "Domain alert"),
        })?;
        domain.start()?;

        let start = Instant::now();
        let received = std::thread::scope(|s| -> Result<u64, HqmError> {
            let rx = s.spawn(move || -> Result<u64, HqmError> {
                let mut buf = [DequeueQe::default(); 32];
                let mut total = 0u64;
                let mut checksum = 0u64;
                while total < events {
                    let n = consumer.recv(&mut buf, true)?;
                    checksum = buf[..n].iter().fold(checksum, |acc, cqe| acc ^ cqe.data);
                    consumer.release(n)?;
                    total += n as u64;
                }
                info!(total, checksum, "Consumer drained all events");
                consumer.detach()?;
                Ok(total)
            });

            let mut next = 0u64;
            let mut burst = [EnqueueQe::noop(); 4];
            while next < events {
                let k = ((events - next) as usize).min(burst.len());
                for (i, qe) in burst[..k].iter_mut().enumerate() {
                    *qe = EnqueueQe::new(queue, SchedType::Atomic, next + i as u64)
                        .with_flow_id((next + i as u64) as u16);
                }
                let sent = producer.send(&burst[..k])?;
                if sent == 0 {
                    std::thread::yield_now();
                }
                next += sent as u64;
            }
            producer.detach()?;

            match rx.join() {
                Ok(result) => result,
                Err(_) => Err(HqmError::Interrupted("consumer thread panicked".into())),
            }
        })?;

        let elapsed = start.elapsed();
        info!(
            received,
            elapsed_us = elapsed.as_micros() as u64,
            mevents_per_sec = received as f64 / elapsed.as_secs_f64() / 1e6,
            "Loopback complete"
        );
    }

    dp.close()?;
    drop(dp);
    registry.unregister(DEVICE_ID)?;
    Ok(())
}
