/*!
 * Interrupt Gates
 *
 * One gate per consumer port. A thread that finds its consumer ring empty
 * blocks on the gate until the device signals a CQ interrupt, the device is
 * reset, or the port is disabled.
 *
 * Lost wakeups are excluded by ordering: the interrupt is armed before the
 * gate lock is taken, and every signal sets its flag under the gate lock.
 * A CQE that lands between arming and waiting is therefore observed either
 * through the ring probe or through `wake`.
 */

use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{MAX_NUM_DIR_PORTS, MAX_NUM_LDB_PORTS};
use crate::core::types::{PerType, PortId, PortType};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a gate was signalled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// New CQE written to an armed port
    CqInterrupt,
    /// Device reset; latches device shutdown first
    DeviceReset,
    /// Port disabled by software
    PortDisabled,
}

#[derive(Debug, Default)]
struct GateState {
    wake: bool,
    disabled: bool,
}

/// Per-port blocking gate
#[repr(C, align(64))]
pub struct InterruptGate {
    /// Serializes blocking callers; one waiter per port at a time
    blocker: Mutex<()>,
    state: Mutex<GateState>,
    cv: Condvar,
    waiters: AtomicUsize,
}

impl InterruptGate {
    const fn new() -> Self {
        Self {
            blocker: Mutex::new(()),
            state: Mutex::new(GateState {
                wake: false,
                disabled: false,
            }),
            cv: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    fn notify(&self, apply: impl FnOnce(&mut GateState)) {
        let mut state = self.state.lock();
        apply(&mut state);
        drop(state);
        self.cv.notify_all();
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }
}

/// Device-wide set of interrupt gates
pub struct InterruptController {
    gates: PerType<Box<[InterruptGate]>>,
    device_shutdown: AtomicBool,
}

impl InterruptController {
    pub fn new() -> Arc<Self> {
        let make = |n: usize| (0..n).map(|_| InterruptGate::new()).collect();
        Arc::new(Self {
            gates: PerType::new(make(MAX_NUM_LDB_PORTS), make(MAX_NUM_DIR_PORTS)),
            device_shutdown: AtomicBool::new(false),
        })
    }

    pub fn gate(&self, ty: PortType, port: PortId) -> HqmResult<&InterruptGate> {
        self.gates
            .get(ty)
            .get(port as usize)
            .ok_or_else(|| HqmError::invalid(format!("{} port {} has no interrupt gate", ty, port)))
    }

    #[inline]
    pub fn is_device_shutdown(&self) -> bool {
        self.device_shutdown.load(Ordering::Acquire)
    }

    /// Block until the port has data or the wait is cut short
    ///
    /// `has_data` probes the consumer ring at the caller's current position.
    /// `arm`, when given, requests the next CQ interrupt from the device and
    /// runs before the gate lock is taken.
    ///
    /// Returns `PortDisabled` if the gate is disabled on entry or while
    /// waiting, and `Interrupted` on device shutdown.
    pub fn block<P, A>(&self, ty: PortType, port: PortId, has_data: P, arm: Option<A>) -> HqmResult<()>
    where
        P: Fn() -> bool,
        A: FnOnce() -> HqmResult<()>,
    {
        let gate = self.gate(ty, port)?;
        let _blocker = gate.blocker.lock();

        if gate.state.lock().disabled {
            return Err(HqmError::PortDisabled(format!("{} port {}", ty, port)));
        }
        if has_data() {
            return Ok(());
        }
        if let Some(arm) = arm {
            arm()?;
        }

        gate.waiters.fetch_add(1, Ordering::Relaxed);
        let mut state = gate.state.lock();
        let result = loop {
            if state.disabled {
                break Err(HqmError::PortDisabled(format!("{} port {}", ty, port)));
            }
            if self.is_device_shutdown() {
                break Err(HqmError::Interrupted("device reset".into()));
            }
            if state.wake || has_data() {
                state.wake = false;
                break Ok(());
            }
            gate.cv.wait(&mut state);
        };
        drop(state);
        gate.waiters.fetch_sub(1, Ordering::Relaxed);

        result
    }

    /// Wake every waiter on one port
    pub fn signal(&self, ty: PortType, port: PortId, reason: WakeReason) {
        let gate = match self.gate(ty, port) {
            Ok(gate) => gate,
            Err(_) => {
                warn!(%ty, port, ?reason, "Interrupt for unknown port");
                return;
            }
        };

        match reason {
            WakeReason::CqInterrupt => gate.notify(|s| s.wake = true),
            WakeReason::PortDisabled => gate.notify(|s| s.disabled = true),
            WakeReason::DeviceReset => {
                self.device_shutdown.store(true, Ordering::Release);
                gate.notify(|_| {});
            }
        }
    }

    /// Latch device shutdown and wake every gate
    pub fn device_reset(&self) {
        self.device_shutdown.store(true, Ordering::Release);
        for ty in PortType::ALL {
            for gate in self.gates.get(ty).iter() {
                gate.notify(|_| {});
            }
        }
        debug!("Device reset delivered to all interrupt gates");
    }

    /// Allow blocking on the port again
    pub fn enable(&self, ty: PortType, port: PortId) -> HqmResult<()> {
        let gate = self.gate(ty, port)?;
        let mut state = gate.state.lock();
        state.disabled = false;
        state.wake = false;
        Ok(())
    }
}
