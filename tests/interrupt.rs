/*!
 * Interrupt Gate Tests
 * Blocking receive, port disable and device reset wakeups
 */

mod common;

use common::{domain, open, port_args};
use hqm_datapath::{DatapathConfig, DequeueQe, EnqueueQe, HqmError, SchedType};
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;

#[test]
fn test_blocking_recv_wakes_on_delivery() {
    let (_dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 256, 64, true);
    let args = port_args(s.ldb_pool, s.dir_pool, 16);
    let producer_id = s.domain.create_ldb_port(&args).unwrap();
    let consumer_id = s.domain.create_ldb_port(&args).unwrap();
    let mut producer = s.domain.attach_ldb_port(producer_id).unwrap();
    let mut consumer = s.domain.attach_ldb_port(consumer_id).unwrap();
    consumer.link_queue(s.ldb_queue, 0).unwrap();

    let queue = s.ldb_queue;
    thread::scope(|scope| {
        let rx = scope.spawn(move || {
            let mut out = [DequeueQe::default(); 8];
            let n = consumer.recv(&mut out, true).unwrap();
            (n, out[0].data)
        });

        thread::sleep(Duration::from_millis(50));
        let sent = producer
            .send(&[EnqueueQe::new(queue, SchedType::Atomic, 0xfeed)])
            .unwrap();
        assert_eq!(sent, 1);

        let (n, data) = rx.join().unwrap();
        assert_eq!(n, 1);
        assert_eq!(data, 0xfeed);
    });
}

#[test]
fn test_disable_unblocks_every_waiter() {
    let (_dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, true);
    let args = port_args(s.ldb_pool, s.dir_pool, 16);
    let port_id = s.domain.create_ldb_port(&args).unwrap();

    let first = s.domain.attach_ldb_port(port_id).unwrap();
    let second = s.domain.attach_ldb_port(port_id).unwrap();
    let controller = s.domain.attach_ldb_port(port_id).unwrap();

    thread::scope(|scope| {
        let a = scope.spawn(|| first.block(true));
        let b = scope.spawn(|| second.block(true));

        thread::sleep(Duration::from_millis(50));
        controller.disable().unwrap();

        assert!(matches!(a.join().unwrap(), Err(HqmError::PortDisabled(_))));
        assert!(matches!(b.join().unwrap(), Err(HqmError::PortDisabled(_))));
    });

    // Blocking stays refused until the port is enabled again
    assert!(matches!(first.block(false), Err(HqmError::PortDisabled(_))));
}

#[test]
fn test_disable_is_idempotent() {
    let (_dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, true);
    let port_id = s
        .domain
        .create_ldb_port(&port_args(s.ldb_pool, s.dir_pool, 16))
        .unwrap();
    let mut port = s.domain.attach_ldb_port(port_id).unwrap();

    port.disable().unwrap();
    port.disable().unwrap();
    assert!(!port.is_enabled());

    let mut out = [DequeueQe::default(); 4];
    assert!(matches!(
        port.recv(&mut out, false),
        Err(HqmError::PortDisabled(_))
    ));
    assert!(matches!(
        port.recv(&mut out, true),
        Err(HqmError::PortDisabled(_))
    ));

    port.enable().unwrap();
    assert!(port.is_enabled());
    assert_eq!(port.recv(&mut out, false).unwrap(), 0);
}

#[test]
fn test_disabled_port_drains_before_refusing() {
    let (_dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, true);
    let args = port_args(s.ldb_pool, s.dir_pool, 16);
    let producer_id = s.domain.create_ldb_port(&args).unwrap();
    let consumer_id = s.domain.create_ldb_port(&args).unwrap();
    let mut producer = s.domain.attach_ldb_port(producer_id).unwrap();
    let mut consumer = s.domain.attach_ldb_port(consumer_id).unwrap();
    consumer.link_queue(s.ldb_queue, 0).unwrap();

    let batch: Vec<EnqueueQe> = (0..3)
        .map(|i| EnqueueQe::new(s.ldb_queue, SchedType::Atomic, i))
        .collect();
    producer.send(&batch).unwrap();
    consumer.disable().unwrap();

    let mut out = [DequeueQe::default(); 8];
    assert_eq!(consumer.recv(&mut out, true).unwrap(), 3);
    assert!(matches!(
        consumer.recv(&mut out, true),
        Err(HqmError::PortDisabled(_))
    ));
}

#[test]
fn test_enable_delivers_backlog() {
    let (dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, true);
    let args = port_args(s.ldb_pool, s.dir_pool, 16);
    let producer_id = s.domain.create_ldb_port(&args).unwrap();
    let consumer_id = s.domain.create_ldb_port(&args).unwrap();
    let mut producer = s.domain.attach_ldb_port(producer_id).unwrap();
    let mut consumer = s.domain.attach_ldb_port(consumer_id).unwrap();
    consumer.link_queue(s.ldb_queue, 0).unwrap();
    consumer.disable().unwrap();

    producer
        .send(&[EnqueueQe::new(s.ldb_queue, SchedType::Atomic, 5)])
        .unwrap();
    assert_eq!(
        dev.queue_backlog(hqm_datapath::PortType::Ldb, s.ldb_queue),
        Some(1)
    );

    consumer.enable().unwrap();
    let mut out = [DequeueQe::default(); 4];
    assert_eq!(consumer.recv(&mut out, true).unwrap(), 1);
    assert_eq!(out[0].data, 5);
}

#[test]
fn test_device_reset_interrupts_blocked_recv() {
    let (dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, true);
    let port_id = s
        .domain
        .create_ldb_port(&port_args(s.ldb_pool, s.dir_pool, 16))
        .unwrap();
    let mut port = s.domain.attach_ldb_port(port_id).unwrap();

    thread::scope(|scope| {
        let rx = scope.spawn(move || {
            let mut out = [DequeueQe::default(); 4];
            port.recv(&mut out, true)
        });

        thread::sleep(Duration::from_millis(50));
        dev.inject_device_reset();

        let err = rx.join().unwrap().unwrap_err();
        assert!(err.is_interrupted());
    });

    assert!(dp.device().is_reset());
    assert!(matches!(
        s.domain.create_ldb_queue(&Default::default()),
        Err(HqmError::Interrupted(_))
    ));
}

#[test]
fn test_send_after_device_reset_is_interrupted() {
    let (dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 256, 64, true);
    let args = port_args(s.ldb_pool, s.dir_pool, 16);
    let producer_id = s.domain.create_ldb_port(&args).unwrap();
    let consumer_id = s.domain.create_ldb_port(&args).unwrap();
    let mut producer = s.domain.attach_ldb_port(producer_id).unwrap();
    let mut consumer = s.domain.attach_ldb_port(consumer_id).unwrap();
    consumer.link_queue(s.ldb_queue, 0).unwrap();

    let batch: Vec<EnqueueQe> = (0..4)
        .map(|i| EnqueueQe::new(s.ldb_queue, SchedType::Atomic, i))
        .collect();
    assert_eq!(producer.send(&batch).unwrap(), 4);
    let mut out = [DequeueQe::default(); 8];
    assert_eq!(consumer.recv_no_pop(&mut out, false).unwrap(), 4);

    dev.inject_device_reset();

    let interrupted = |r: Result<usize, HqmError>| matches!(r, Err(HqmError::Interrupted(_)));
    assert!(interrupted(producer.send(&batch)));
    assert!(interrupted(producer.adv_send(&batch)));
    assert!(interrupted(consumer.forward(&batch)));
    assert!(interrupted(consumer.release(1)));
    assert!(interrupted(consumer.pop_cq(1)));
    assert!(interrupted(consumer.recv(&mut out, false)));
    assert!(interrupted(consumer.recv_no_pop(&mut out, false)));

    // Nothing was consumed by the refused calls
    assert_eq!(consumer.owed_tokens(), 4);
    assert_eq!(consumer.owed_releases(), 4);
}
