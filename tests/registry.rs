/*!
 * Global Device Registry Tests
 *
 * These share the process-wide registry and run serially.
 */

mod common;

use common::{domain_args, port_args};
use hqm_datapath::{
    DequeueQe, DeviceRegistry, EmulatedDevice, EmulatorConfig, HqmError, LdbQueueArgs,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn emulated() -> Arc<EmulatedDevice> {
    Arc::new(EmulatedDevice::new(EmulatorConfig::default()))
}

#[test]
#[serial]
fn test_register_open_unregister() {
    let registry = DeviceRegistry::global();
    registry.register(3, emulated()).unwrap();
    assert!(registry.device(3).is_some());

    let first = registry.open(3).unwrap();
    let second = registry.open(3).unwrap();
    assert_eq!(first.device().id(), 3);

    // Independent datapaths share the device's resources
    let before = second.get_num_resources().unwrap();
    let id = first.create_sched_domain(&domain_args(128, 64)).unwrap();
    let after = second.get_num_resources().unwrap();
    assert_eq!(after.num_sched_domains, before.num_sched_domains - 1);

    first.reset_sched_domain(id).unwrap();
    drop(first);
    drop(second);

    // Closing every datapath leaves the device registered
    assert!(registry.device(3).is_some());
    let reopened = registry.open(3).unwrap();
    assert_eq!(reopened.get_num_resources().unwrap(), before);
    drop(reopened);

    registry.unregister(3).unwrap();
    assert!(registry.device(3).is_none());
    assert!(matches!(registry.open(3), Err(HqmError::InvalidArgument(_))));
    assert!(registry.unregister(3).is_err());
}

#[test]
#[serial]
fn test_unregister_wakes_blocked_consumer() {
    let registry = DeviceRegistry::global();
    registry.register(4, emulated()).unwrap();
    let dp = registry.open(4).unwrap();

    let id = dp.create_sched_domain(&domain_args(64, 64)).unwrap();
    let domain = dp.attach_sched_domain(id).unwrap();
    let ldb_pool = domain.create_ldb_credit_pool(64).unwrap();
    let dir_pool = domain.create_dir_credit_pool(64).unwrap();
    domain.create_ldb_queue(&LdbQueueArgs::default()).unwrap();
    let port_id = domain
        .create_ldb_port(&port_args(ldb_pool, dir_pool, 8))
        .unwrap();
    domain.launch_alert_thread(|_, _| {}).unwrap();
    domain.start().unwrap();
    let mut port = domain.attach_ldb_port(port_id).unwrap();

    thread::scope(|scope| {
        let rx = scope.spawn(move || {
            let mut out = [DequeueQe::default(); 4];
            port.recv(&mut out, true)
        });

        thread::sleep(Duration::from_millis(50));
        registry.unregister(4).unwrap();

        let err = rx.join().unwrap().unwrap_err();
        assert!(err.is_interrupted());
    });

    // The open datapath keeps the device alive but refuses work
    assert!(dp.device().is_reset());
    assert!(matches!(
        domain.create_ldb_queue(&LdbQueueArgs::default()),
        Err(HqmError::Interrupted(_))
    ));
    assert!(registry.open(4).is_err());
}

#[test]
#[serial]
fn test_register_conflicts() {
    let registry = DeviceRegistry::global();
    registry.register(5, emulated()).unwrap();
    assert!(matches!(
        registry.register(5, emulated()),
        Err(HqmError::AlreadyExists(_))
    ));
    assert!(registry.register(32, emulated()).is_err());
    registry.unregister(5).unwrap();
}
