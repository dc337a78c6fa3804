/*!
 * Domain Alert Thread
 *
 * One background thread per domain reads the device's alert channel and
 * hands decoded alerts to a user callback. It exits after delivering a
 * domain-reset or device-reset alert. Domain reset stops it by posting the
 * reserved user alert and waiting on `alert_exit` until the thread reports
 * that it has finished.
 */

use super::types::{DomainAlert, DomainHandle, DomainShared, SchedulingDomain};
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{ALERT_EXIT_LOG_INTERVAL, DOMAIN_USER_ALERT_RESET};
use crate::core::types::DomainId;
use crate::hw::traits::{alert_id, HqmHardware, RawAlert};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Map a raw device alert to a domain alert
pub(crate) fn decode(raw: RawAlert) -> HqmResult<DomainAlert> {
    match raw.alert_id {
        alert_id::DEVICE_RESET => Ok(DomainAlert::DeviceReset),
        alert_id::USER if raw.aux_data == DOMAIN_USER_ALERT_RESET => Ok(DomainAlert::DomainReset),
        alert_id::USER => Ok(DomainAlert::User(raw.aux_data)),
        other => Err(HqmError::invalid(format!("unexpected alert id {}", other))),
    }
}

impl DomainHandle<'_> {
    /// Spawn the domain's alert thread
    ///
    /// Fails with `AlreadyExists` if one is already running. The callback
    /// runs on the alert thread and must not block indefinitely.
    pub fn launch_alert_thread<F>(&self, callback: F) -> HqmResult<()>
    where
        F: Fn(DomainAlert, DomainId) + Send + 'static,
    {
        self.check()?;

        let domain_id = self.domain.id;
        let mut alert = self.domain.shared.alert.lock();
        if alert.started {
            return Err(HqmError::AlreadyExists(format!(
                "domain {} alert thread is running",
                domain_id
            )));
        }
        // Previous thread reported exit; reap it before replacing the handle
        if let Some(old) = alert.join.take() {
            let _ = old.join();
        }

        let hw = self.dp.device.hw_arc();
        let shared = self.domain.shared.clone();
        let join = thread::Builder::new()
            .name(format!("hqm-d{}-alert", domain_id))
            .spawn(move || alert_loop(domain_id, hw, shared, callback))
            .map_err(|e| {
                HqmError::ResourceExhausted(format!("alert thread spawn failed: {}", e))
            })?;

        alert.started = true;
        alert.join = Some(join);

        info!(domain = domain_id, "Launched alert thread");
        Ok(())
    }
}

fn alert_loop<F>(domain: DomainId, hw: Arc<dyn HqmHardware>, shared: Arc<DomainShared>, callback: F)
where
    F: Fn(DomainAlert, DomainId),
{
    let _exit = ExitGuard {
        domain,
        shared: shared.clone(),
    };

    loop {
        let alert = match hw.read_alert(domain).and_then(decode) {
            Ok(alert) => alert,
            Err(e) => {
                error!(domain, error = %e, "Alert read failed, exiting alert thread");
                break;
            }
        };

        debug!(domain, ?alert, "Received domain alert");
        if alert == DomainAlert::DeviceReset {
            shared.shutdown.store(true, Ordering::Release);
        }

        callback(alert, domain);

        if matches!(alert, DomainAlert::DomainReset | DomainAlert::DeviceReset) {
            break;
        }
    }
}

/// Reports exit to `stop_alert_thread`, including when the callback panics
struct ExitGuard {
    domain: DomainId,
    shared: Arc<DomainShared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut state = self.shared.alert.lock();
        state.started = false;
        self.shared.alert_exit.notify_all();
        debug!(domain = self.domain, "Alert thread exited");
    }
}

impl SchedulingDomain {
    /// Stop the alert thread if it is running and wait for it to exit
    pub(crate) fn stop_alert_thread(&self, hw: &dyn HqmHardware) -> HqmResult<()> {
        let mut alert = self.shared.alert.lock();

        if alert.started {
            hw.enqueue_domain_alert(self.id, DOMAIN_USER_ALERT_RESET)?;
            while alert.started {
                let timed_out = self
                    .shared
                    .alert_exit
                    .wait_for(&mut alert, ALERT_EXIT_LOG_INTERVAL)
                    .timed_out();
                if timed_out && alert.started {
                    warn!(domain = self.id, "Still waiting for alert thread to exit");
                }
            }
        }

        let join = alert.join.take();
        drop(alert);
        if let Some(join) = join {
            if join.join().is_err() {
                warn!(domain = self.id, "Alert thread panicked");
            }
        }
        Ok(())
    }
}
