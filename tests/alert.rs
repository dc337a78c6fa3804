/*!
 * Domain Alert Thread Tests
 */

mod common;

use common::{domain, open};
use hqm_datapath::{DatapathConfig, DomainAlert, HqmError, HqmHardware, LdbQueueArgs, PortType};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_user_alert_reaches_callback() {
    let (dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, false);
    let id = s.domain.id();

    let (tx, rx) = flume::unbounded();
    s.domain
        .launch_alert_thread(move |alert, domain| {
            let _ = tx.send((alert, domain));
        })
        .unwrap();
    assert!(s.domain.domain().alert_thread_running());

    dev.enqueue_domain_alert(id, 7).unwrap();
    dev.enqueue_domain_alert(id, 8).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (DomainAlert::User(7), id));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (DomainAlert::User(8), id));
    assert!(s.domain.domain().alert_thread_running());
}

#[test]
fn test_second_alert_thread_is_refused() {
    let (_dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, false);

    s.domain.launch_alert_thread(|_, _| {}).unwrap();
    let err = s.domain.launch_alert_thread(|_, _| {}).unwrap_err();
    assert!(matches!(err, HqmError::AlreadyExists(_)));
}

#[test]
fn test_domain_reset_stops_alert_thread() {
    let (_dev, dp) = open(DatapathConfig::default());
    let mut s = domain(&dp, 64, 64, false);
    let id = s.domain.id();

    let (tx, rx) = flume::unbounded();
    s.domain
        .launch_alert_thread(move |alert, _| {
            let _ = tx.send(alert);
        })
        .unwrap();
    s.domain.start().unwrap();
    s.domain.detach().unwrap();

    dp.reset_sched_domain(id).unwrap();

    // The reset waited for the thread, so the alert is already queued
    assert_eq!(rx.try_recv().unwrap(), DomainAlert::DomainReset);
    assert!(!dp.domain(id).unwrap().alert_thread_running());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_device_reset_alert_latches_shutdown() {
    let (dev, dp) = open(DatapathConfig::default());
    let s = domain(&dp, 64, 64, false);

    let (tx, rx) = flume::unbounded();
    s.domain
        .launch_alert_thread(move |alert, _| {
            let _ = tx.send(alert);
        })
        .unwrap();

    dev.inject_device_reset();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), DomainAlert::DeviceReset);
    assert!(wait_until(|| !s.domain.domain().alert_thread_running()));
    assert!(s.domain.domain().is_shutdown());

    assert!(matches!(
        s.domain.create_ldb_queue(&LdbQueueArgs::default()),
        Err(HqmError::Interrupted(_))
    ));
    assert!(matches!(s.domain.start(), Err(HqmError::Interrupted(_))));
}

#[test]
fn test_panicking_callback_does_not_block_reset() {
    let (dev, dp) = open(DatapathConfig::default());
    let mut s = domain(&dp, 64, 64, false);
    let id = s.domain.id();

    s.domain
        .launch_alert_thread(|alert, _| {
            if let DomainAlert::User(_) = alert {
                panic!("callback failure");
            }
        })
        .unwrap();

    dev.enqueue_domain_alert(id, 1).unwrap();
    assert!(wait_until(|| !s.domain.domain().alert_thread_running()));

    s.domain.detach().unwrap();
    dp.reset_sched_domain(id).unwrap();
    assert!(!dp.domain(id).unwrap().is_configured());
}

#[test]
fn test_reset_callback_can_query_domain() {
    let (_dev, dp) = open(DatapathConfig::default());
    let dp = Arc::new(dp);
    let id = {
        let mut s = domain(&dp, 64, 64, false);
        let id = s.domain.id();

        let (tx, rx) = flume::unbounded();
        let cb_dp = dp.clone();
        s.domain
            .launch_alert_thread(move |alert, d| {
                if alert == DomainAlert::DomainReset {
                    let domain = cb_dp.domain(d).unwrap();
                    let budget = domain.credit_budget(PortType::Ldb);
                    let attach = cb_dp.attach_sched_domain(d).map(|_| ());
                    let _ = tx.send((budget, attach));
                }
            })
            .unwrap();
        s.domain.detach().unwrap();

        let (done_tx, done_rx) = flume::bounded(1);
        let reset_dp = dp.clone();
        let reset = thread::spawn(move || {
            let _ = done_tx.send(reset_dp.reset_sched_domain(id));
        });

        let result = done_rx
            .recv_timeout(TIMEOUT)
            .expect("domain reset did not finish");
        assert!(result.is_ok());
        reset.join().unwrap();

        let (budget, attach) = rx.try_recv().unwrap();
        assert_eq!(budget, (0, 64));
        assert!(matches!(attach, Err(HqmError::NotConfigured(_))));
        id
    };

    assert!(!dp.domain(id).unwrap().is_configured());
    assert!(dp.attach_sched_domain(id).is_err());
}
