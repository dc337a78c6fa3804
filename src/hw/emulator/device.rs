/*!
 * Emulated Device
 *
 * A software [`HqmHardware`] implementation. Consumer rings live in heap
 * memory written with the same generation protocol as the device; doorbell
 * bursts land in a private cache line through the selected burst writer and
 * are then scheduled synchronously.
 */

use super::routing::Wakeups;
use super::types::{EmuDomain, EmuPort, EmuQueue, EmuState, EmuStatus, EmulatorConfig};
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::{MAX_CQ_DEPTH, MIN_CQ_DEPTH};
use crate::core::types::{DomainId, PortId, PortType, QueueId};
use crate::datapath::interrupt::{InterruptController, WakeReason};
use crate::hw::burst::{store_fence, BurstWriter};
use crate::hw::mmio::{ConsumerRing, Doorbell};
use crate::hw::traits::{
    alert_id, HqmHardware, HwDomainArgs, HwLdbQueueArgs, HwPortArgs, HwResources, RawAlert,
};
use crate::hw::wire::QeBurst;
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn status(op: &str, status: EmuStatus) -> HqmError {
    HqmError::hardware(op, status as i32)
}

pub(super) struct EmuShared {
    state: Mutex<EmuState>,
    interrupts: ArcSwapOption<InterruptController>,
}

impl EmuShared {
    fn fire(&self, wakes: Wakeups) {
        if wakes.is_empty() {
            return;
        }
        if let Some(ctl) = self.interrupts.load_full() {
            for (ty, port) in wakes {
                ctl.signal(ty, port, WakeReason::CqInterrupt);
            }
        }
    }
}

/// Software stand-in for the queue manager
#[derive(Clone)]
pub struct EmulatedDevice {
    shared: Arc<EmuShared>,
}

impl EmulatedDevice {
    pub fn new(config: EmulatorConfig) -> Self {
        info!(?config, "Creating emulated HQM device");
        Self {
            shared: Arc::new(EmuShared {
                state: Mutex::new(EmuState::new(config)),
                interrupts: ArcSwapOption::empty(),
            }),
        }
    }

    /// Simulate an unexpected device reset
    ///
    /// Every later command fails, every configured domain receives a
    /// device-reset alert, and every blocked consumer is woken.
    pub fn inject_device_reset(&self) {
        {
            let mut state = self.shared.state.lock();
            state.reset = true;
            for domain in state.domains.iter().flatten() {
                let _ = domain.alert_tx.send(RawAlert {
                    alert_id: alert_id::DEVICE_RESET,
                    aux_data: 0,
                });
            }
        }
        warn!("Injected device reset");
        if let Some(ctl) = self.shared.interrupts.load_full() {
            ctl.device_reset();
        }
    }

    /// Entries currently occupying a port's consumer ring
    pub fn cq_occupancy(&self, ty: PortType, port: PortId) -> Option<u32> {
        let state = self.shared.state.lock();
        state
            .ports
            .get(ty)
            .get(port as usize)?
            .as_ref()
            .map(|p| p.cq.outstanding)
    }

    /// Events waiting in a queue for consumer space
    pub fn queue_backlog(&self, ty: PortType, queue: QueueId) -> Option<usize> {
        let state = self.shared.state.lock();
        state
            .queues
            .get(ty)
            .get(queue as usize)?
            .as_ref()
            .map(|q| q.backlog.len())
    }

    /// Lock the state, refusing commands after a device reset
    fn live(&self, op: &str) -> HqmResult<MutexGuard<'_, EmuState>> {
        let state = self.shared.state.lock();
        if state.reset {
            return Err(status(op, EmuStatus::DeviceReset));
        }
        Ok(state)
    }
}

fn domain_mut<'a>(state: &'a mut EmuState, op: &str, id: DomainId) -> HqmResult<&'a mut EmuDomain> {
    state
        .domains
        .get_mut(id as usize)
        .and_then(Option::as_mut)
        .ok_or_else(|| status(op, EmuStatus::InvalidDomain))
}

fn check_depth(op: &str, depth: u32) -> HqmResult<()> {
    if !(MIN_CQ_DEPTH..=MAX_CQ_DEPTH).contains(&depth) {
        return Err(HqmError::invalid(format!("{}: cq_depth {} out of range", op, depth)));
    }
    Ok(())
}

fn first_free<T>(slots: &[Option<T>]) -> Option<usize> {
    slots.iter().position(Option::is_none)
}

impl HqmHardware for EmulatedDevice {
    fn get_num_resources(&self) -> HqmResult<HwResources> {
        Ok(self.live("get_num_resources")?.avail)
    }

    fn create_domain(&self, args: &HwDomainArgs) -> HqmResult<DomainId> {
        const OP: &str = "create_domain";
        let mut state = self.live(OP)?;
        let avail = state.avail;

        let fits = args.num_ldb_queues <= avail.num_ldb_queues
            && args.num_ldb_ports <= avail.num_ldb_ports
            && args.num_dir_ports <= avail.num_dir_ports
            && args.num_hist_list_entries <= avail.num_hist_list_entries
            && args.num_ldb_credits <= avail.num_ldb_credits
            && args.num_dir_credits <= avail.num_dir_credits;
        if !fits || avail.num_sched_domains == 0 {
            return Err(status(OP, EmuStatus::InsufficientResources));
        }
        let id = first_free(&state.domains)
            .ok_or_else(|| status(OP, EmuStatus::InsufficientResources))?;

        let avail = &mut state.avail;
        avail.num_sched_domains -= 1;
        avail.num_ldb_queues -= args.num_ldb_queues;
        avail.num_ldb_ports -= args.num_ldb_ports;
        avail.num_dir_ports -= args.num_dir_ports;
        avail.num_hist_list_entries -= args.num_hist_list_entries;
        avail.max_contiguous_hist_list_entries = avail.num_hist_list_entries;
        avail.num_ldb_credits -= args.num_ldb_credits;
        avail.num_dir_credits -= args.num_dir_credits;

        state.domains[id] = Some(EmuDomain::new(args));
        debug!(domain = id, "Emulator created domain");
        Ok(id as DomainId)
    }

    fn create_ldb_queue(&self, domain: DomainId, args: &HwLdbQueueArgs) -> HqmResult<QueueId> {
        const OP: &str = "create_ldb_queue";
        let mut state = self.live(OP)?;
        let inflights = state.config.num_qid_inflights;
        {
            let dom = domain_mut(&mut state, OP, domain)?;
            if dom.quota.num_ldb_queues == 0 || args.num_qid_inflights > inflights {
                return Err(status(OP, EmuStatus::InsufficientResources));
            }
            dom.quota.num_ldb_queues -= 1;
        }
        let id = first_free(&state.queues.ldb)
            .ok_or_else(|| status(OP, EmuStatus::InsufficientResources))?;
        state.queues.ldb[id] = Some(EmuQueue::new(domain));
        Ok(id as QueueId)
    }

    fn create_dir_queue(&self, domain: DomainId, port: Option<PortId>) -> HqmResult<QueueId> {
        const OP: &str = "create_dir_queue";
        let mut state = self.live(OP)?;
        domain_mut(&mut state, OP, domain)?;

        let id = match port {
            Some(p) => {
                let paired = matches!(state.ports.dir.get(p as usize), Some(Some(dp)) if dp.domain == domain);
                let free = matches!(state.queues.dir.get(p as usize), Some(None));
                if !paired || !free {
                    return Err(status(OP, EmuStatus::InvalidId));
                }
                p as usize
            }
            None => {
                let state = &*state;
                (0..state.queues.dir.len())
                    .find(|&i| state.queues.dir[i].is_none() && state.ports.dir[i].is_none())
                    .ok_or_else(|| status(OP, EmuStatus::InsufficientResources))?
            }
        };

        if port.is_none() {
            let dom = domain_mut(&mut state, OP, domain)?;
            if dom.quota.num_dir_ports == 0 {
                return Err(status(OP, EmuStatus::InsufficientResources));
            }
            dom.quota.num_dir_ports -= 1;
        }
        state.queues.dir[id] = Some(EmuQueue::new(domain));
        Ok(id as QueueId)
    }

    fn create_ldb_port(&self, domain: DomainId, args: &HwPortArgs) -> HqmResult<PortId> {
        const OP: &str = "create_ldb_port";
        check_depth(OP, args.cq_depth)?;
        let mut state = self.live(OP)?;
        {
            let dom = domain_mut(&mut state, OP, domain)?;
            if dom.quota.num_ldb_ports == 0
                || args.cq_history_list_size > dom.quota.num_hist_list_entries
            {
                return Err(status(OP, EmuStatus::InsufficientResources));
            }
            dom.quota.num_ldb_ports -= 1;
            dom.quota.num_hist_list_entries -= args.cq_history_list_size;
        }
        let id = first_free(&state.ports.ldb)
            .ok_or_else(|| status(OP, EmuStatus::InsufficientResources))?;
        state.ports.ldb[id] = Some(EmuPort::new(domain, args.cq_depth));
        Ok(id as PortId)
    }

    fn create_dir_port(
        &self,
        domain: DomainId,
        args: &HwPortArgs,
        queue: Option<QueueId>,
    ) -> HqmResult<PortId> {
        const OP: &str = "create_dir_port";
        check_depth(OP, args.cq_depth)?;
        let mut state = self.live(OP)?;
        domain_mut(&mut state, OP, domain)?;

        let id = match queue {
            Some(q) => {
                let paired = matches!(state.queues.dir.get(q as usize), Some(Some(dq)) if dq.domain == domain);
                let free = matches!(state.ports.dir.get(q as usize), Some(None));
                if !paired || !free {
                    return Err(status(OP, EmuStatus::InvalidId));
                }
                q as usize
            }
            None => {
                let state = &*state;
                (0..state.ports.dir.len())
                    .find(|&i| state.queues.dir[i].is_none() && state.ports.dir[i].is_none())
                    .ok_or_else(|| status(OP, EmuStatus::InsufficientResources))?
            }
        };

        if queue.is_none() {
            let dom = domain_mut(&mut state, OP, domain)?;
            if dom.quota.num_dir_ports == 0 {
                return Err(status(OP, EmuStatus::InsufficientResources));
            }
            dom.quota.num_dir_ports -= 1;
        }
        state.ports.dir[id] = Some(EmuPort::new(domain, args.cq_depth));
        Ok(id as PortId)
    }

    fn map_qid(&self, domain: DomainId, port: PortId, queue: QueueId, priority: u8) -> HqmResult<()> {
        const OP: &str = "map_qid";
        let mut state = self.live(OP)?;
        let queue_ok = matches!(state.queues.ldb.get(queue as usize), Some(Some(q)) if q.domain == domain);
        match state.ports.ldb.get_mut(port as usize) {
            Some(Some(p)) if p.domain == domain && queue_ok => {
                match p.links.iter_mut().find(|(q, _)| *q == queue) {
                    Some(link) => link.1 = priority,
                    None => p.links.push((queue, priority)),
                }
            }
            _ => return Err(status(OP, EmuStatus::InvalidId)),
        }

        let mut wakes = Wakeups::new();
        state.deliver(PortType::Ldb, queue, &mut wakes);
        drop(state);
        self.shared.fire(wakes);
        Ok(())
    }

    fn unmap_qid(&self, domain: DomainId, port: PortId, queue: QueueId) -> HqmResult<()> {
        const OP: &str = "unmap_qid";
        let mut state = self.live(OP)?;
        match state.ports.ldb.get_mut(port as usize) {
            Some(Some(p)) if p.domain == domain && p.is_linked(queue) => {
                p.links.retain(|(q, _)| *q != queue);
                Ok(())
            }
            _ => Err(status(OP, EmuStatus::InvalidId)),
        }
    }

    fn enable_port(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()> {
        const OP: &str = "enable_port";
        let mut state = self.live(OP)?;
        let sources: Vec<QueueId> = match state.ports.get_mut(ty).get_mut(port as usize) {
            Some(Some(p)) if p.domain == domain => {
                p.enabled = true;
                match ty {
                    PortType::Ldb => p.links.iter().map(|(q, _)| *q).collect(),
                    PortType::Dir => vec![port],
                }
            }
            _ => return Err(status(OP, EmuStatus::InvalidId)),
        };

        let mut wakes = Wakeups::new();
        for qid in sources {
            state.deliver(ty, qid, &mut wakes);
        }
        drop(state);
        self.shared.fire(wakes);
        Ok(())
    }

    fn disable_port(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()> {
        const OP: &str = "disable_port";
        let mut state = self.live(OP)?;
        match state.ports.get_mut(ty).get_mut(port as usize) {
            Some(Some(p)) if p.domain == domain => {
                p.enabled = false;
                Ok(())
            }
            _ => Err(status(OP, EmuStatus::InvalidId)),
        }
    }

    fn start_domain(&self, domain: DomainId) -> HqmResult<()> {
        const OP: &str = "start_domain";
        let mut state = self.live(OP)?;
        let dom = domain_mut(&mut state, OP, domain)?;
        if dom.started {
            return Err(status(OP, EmuStatus::DomainStarted));
        }
        dom.started = true;
        Ok(())
    }

    fn reset_domain(&self, domain: DomainId) -> HqmResult<()> {
        const OP: &str = "reset_domain";
        // Permitted after a device reset so software can tear down
        let mut state = self.shared.state.lock();
        domain_mut(&mut state, OP, domain)?;
        let Some(dom) = state.domains[domain as usize].take() else {
            return Err(status(OP, EmuStatus::InvalidDomain));
        };

        for ty in PortType::ALL {
            for slot in state.ports.get_mut(ty).iter_mut() {
                if slot.as_ref().is_some_and(|p| p.domain == domain) {
                    *slot = None;
                }
            }
            for slot in state.queues.get_mut(ty).iter_mut() {
                if slot.as_ref().is_some_and(|q| q.domain == domain) {
                    *slot = None;
                }
            }
        }

        let granted = dom.granted;
        let avail = &mut state.avail;
        avail.num_sched_domains += 1;
        avail.num_ldb_queues += granted.num_ldb_queues;
        avail.num_ldb_ports += granted.num_ldb_ports;
        avail.num_dir_ports += granted.num_dir_ports;
        avail.num_hist_list_entries += granted.num_hist_list_entries;
        avail.max_contiguous_hist_list_entries = avail.num_hist_list_entries;
        avail.num_ldb_credits += granted.num_ldb_credits;
        avail.num_dir_credits += granted.num_dir_credits;

        debug!(domain, "Emulator released domain resources");
        Ok(())
    }

    fn enqueue_domain_alert(&self, domain: DomainId, aux_data: u64) -> HqmResult<()> {
        const OP: &str = "enqueue_domain_alert";
        let mut state = self.shared.state.lock();
        let dom = domain_mut(&mut state, OP, domain)?;
        dom.alert_tx
            .send(RawAlert {
                alert_id: alert_id::USER,
                aux_data,
            })
            .map_err(|_| status(OP, EmuStatus::AlertChannelClosed))
    }

    fn read_alert(&self, domain: DomainId) -> HqmResult<RawAlert> {
        const OP: &str = "read_alert";
        let rx = {
            let mut state = self.shared.state.lock();
            domain_mut(&mut state, OP, domain)?.alert_rx.clone()
        };
        rx.recv().map_err(|_| status(OP, EmuStatus::AlertChannelClosed))
    }

    fn map_doorbell(
        &self,
        domain: DomainId,
        ty: PortType,
        port: PortId,
    ) -> HqmResult<Box<dyn Doorbell>> {
        const OP: &str = "map_doorbell";
        let state = self.live(OP)?;
        match state.ports.get(ty).get(port as usize) {
            Some(Some(p)) if p.domain == domain => Ok(Box::new(EmuDoorbell {
                shared: self.shared.clone(),
                ty,
                port,
                line: Mutex::new(Box::new(QeBurst::new())),
            })),
            _ => Err(status(OP, EmuStatus::InvalidId)),
        }
    }

    fn map_consumer_ring(
        &self,
        domain: DomainId,
        ty: PortType,
        port: PortId,
    ) -> HqmResult<ConsumerRing> {
        const OP: &str = "map_consumer_ring";
        let state = self.live(OP)?;
        match state.ports.get(ty).get(port as usize) {
            Some(Some(p)) if p.domain == domain => Ok(p.cq.mem.view()),
            _ => Err(status(OP, EmuStatus::InvalidId)),
        }
    }

    fn arm_interrupt(&self, domain: DomainId, ty: PortType, port: PortId) -> HqmResult<()> {
        const OP: &str = "arm_interrupt";
        let mut state = self.live(OP)?;
        match state.ports.get_mut(ty).get_mut(port as usize) {
            Some(Some(p)) if p.domain == domain => {
                p.cq.armed = true;
                Ok(())
            }
            _ => Err(status(OP, EmuStatus::InvalidId)),
        }
    }

    fn bind_interrupts(&self, controller: Arc<InterruptController>) {
        self.shared.interrupts.store(Some(controller));
    }
}

/// Doorbell that captures the burst in a private line, then schedules it
struct EmuDoorbell {
    shared: Arc<EmuShared>,
    ty: PortType,
    port: PortId,
    line: Mutex<Box<QeBurst>>,
}

impl Doorbell for EmuDoorbell {
    fn ring(&self, burst: &QeBurst, writer: &BurstWriter) {
        let captured = {
            let mut line = self.line.lock();
            // SAFETY: the line is a 64-byte aligned QeBurst owned by this doorbell
            unsafe { writer.write(burst, &mut **line as *mut QeBurst as *mut u8) };
            store_fence();
            **line
        };

        let mut wakes = Wakeups::new();
        {
            let mut state = self.shared.state.lock();
            if state.reset {
                return;
            }
            state.process_burst(self.ty, self.port, &captured, &mut wakes);
        }
        self.shared.fire(wakes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BurstPreference;
    use crate::hw::wire::{EnqueueQe, QeCommand, SchedType};

    fn domain_args() -> HwDomainArgs {
        HwDomainArgs {
            num_ldb_queues: 1,
            num_ldb_ports: 2,
            num_dir_ports: 2,
            num_hist_list_entries: 64,
            num_ldb_credits: 256,
            num_dir_credits: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_domain_quota_accounting() {
        let dev = EmulatedDevice::new(EmulatorConfig::default());
        let before = dev.get_num_resources().unwrap();
        let id = dev.create_domain(&domain_args()).unwrap();
        let after = dev.get_num_resources().unwrap();
        assert_eq!(after.num_ldb_credits, before.num_ldb_credits - 256);

        dev.reset_domain(id).unwrap();
        assert_eq!(dev.get_num_resources().unwrap(), before);
    }

    #[test]
    fn test_dir_pairing() {
        let dev = EmulatedDevice::new(EmulatorConfig::default());
        let d = dev.create_domain(&domain_args()).unwrap();
        let port_args = HwPortArgs {
            cq_depth: 8,
            cq_depth_threshold: 1,
            cq_history_list_size: 0,
        };
        let p = dev.create_dir_port(d, &port_args, None).unwrap();
        let q = dev.create_dir_queue(d, Some(p)).unwrap();
        assert_eq!(p, q);
        assert!(dev.create_dir_queue(d, Some(p)).is_err());
    }

    #[test]
    fn test_doorbell_delivers_to_ring() {
        let dev = EmulatedDevice::new(EmulatorConfig::default());
        let d = dev.create_domain(&domain_args()).unwrap();
        let port_args = HwPortArgs {
            cq_depth: 8,
            cq_depth_threshold: 1,
            cq_history_list_size: 8,
        };
        let p = dev.create_ldb_port(d, &port_args).unwrap();
        let q = dev.create_ldb_queue(d, &HwLdbQueueArgs::default()).unwrap();
        dev.map_qid(d, p, q, 0).unwrap();

        let bell = dev.map_doorbell(d, PortType::Ldb, p).unwrap();
        let ring = dev.map_consumer_ring(d, PortType::Ldb, p).unwrap();
        let writer = BurstWriter::probe(BurstPreference::Auto);

        let mut burst = QeBurst::new();
        burst.qes[0] = EnqueueQe::new(q, SchedType::Atomic, 77);
        bell.ring(&burst, &writer);

        assert!(ring.has_entry(0, 1));
        assert_eq!(ring.read(0).data, 77);
        assert_eq!(dev.cq_occupancy(PortType::Ldb, p), Some(1));

        let mut pop = QeBurst::new();
        pop.qes[0] = EnqueueQe::noop().with_command(QeCommand::BatT);
        bell.ring(&pop, &writer);
        assert_eq!(dev.cq_occupancy(PortType::Ldb, p), Some(0));
    }

    #[test]
    fn test_device_reset_fails_commands() {
        let dev = EmulatedDevice::new(EmulatorConfig::default());
        let d = dev.create_domain(&domain_args()).unwrap();
        dev.inject_device_reset();

        let alert = dev.read_alert(d).unwrap();
        assert_eq!(alert.alert_id, alert_id::DEVICE_RESET);
        assert!(matches!(
            dev.start_domain(d),
            Err(HqmError::Hardware { status, .. }) if status == EmuStatus::DeviceReset as i32
        ));
        assert!(dev.reset_domain(d).is_ok());
    }
}
