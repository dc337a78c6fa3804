/*!
 * Emulated Scheduling
 *
 * Parses doorbell bursts and moves events from queues into consumer rings.
 * The policy is intentionally simple: load-balanced queues are served
 * round-robin across linked, enabled ports with ring space; directed queues
 * feed the port with the same id. Events that cannot be placed wait in the
 * queue's backlog until a token pop or a new link frees a destination.
 */

use super::types::EmuState;
use crate::core::types::{DomainId, PortId, PortType, QueueId};
use crate::hw::wire::{DequeueQe, EnqueueQe, QeBurst, QeCommand};
use tracing::{trace, warn};

/// Ports whose armed interrupt fired during one operation
pub(super) type Wakeups = Vec<(PortType, PortId)>;

impl EmuState {
    /// Apply every QE in a burst written by (`ty`, `port`)
    pub fn process_burst(&mut self, ty: PortType, port: PortId, burst: &QeBurst, wakes: &mut Wakeups) {
        let domain = match self.ports.get(ty).get(port as usize) {
            Some(Some(p)) => p.domain,
            _ => {
                warn!(%ty, port, "Burst from unconfigured port dropped");
                return;
            }
        };

        for qe in burst.qes.iter() {
            let cmd = qe.command();

            if cmd.is_enqueue() {
                self.enqueue(domain, qe, wakes);
            }

            let pops = cmd.token_pops(qe.flow_id);
            if pops > 0 {
                self.pop_tokens(ty, port, pops, wakes);
            }

            if cmd == QeCommand::Arm {
                if let Some(Some(p)) = self.ports.get_mut(ty).get_mut(port as usize) {
                    p.cq.armed = true;
                }
            }
        }
    }

    fn enqueue(&mut self, domain: DomainId, qe: &EnqueueQe, wakes: &mut Wakeups) {
        let qtype = qe.sched_type().port_type();
        let qid = qe.queue_id as QueueId;

        let queue = match self.queues.get_mut(qtype).get_mut(qid as usize) {
            Some(Some(q)) if q.domain == domain => q,
            _ => {
                warn!(domain, %qtype, queue = qid, "Enqueue to invalid queue dropped");
                return;
            }
        };

        queue.backlog.push_back(DequeueQe {
            data: qe.data,
            opaque: qe.opaque,
            queue_id: qe.queue_id,
            sched: qe.sched,
            flow_id: qe.flow_id,
            debug: 0,
            status: 0,
        });
        self.deliver(qtype, qid, wakes);
    }

    /// Return CQ space to a port and refill it from its queues
    pub fn pop_tokens(&mut self, ty: PortType, port: PortId, n: u32, wakes: &mut Wakeups) {
        let sources: Vec<QueueId> = match self.ports.get_mut(ty).get_mut(port as usize) {
            Some(Some(p)) => {
                if n > p.cq.outstanding {
                    warn!(%ty, port, n, outstanding = p.cq.outstanding, "Excess token pop");
                }
                p.cq.outstanding = p.cq.outstanding.saturating_sub(n);
                match ty {
                    PortType::Ldb => p.links.iter().map(|(q, _)| *q).collect(),
                    PortType::Dir => vec![port],
                }
            }
            _ => return,
        };

        for qid in sources {
            self.deliver(ty, qid, wakes);
        }
    }

    /// Move as much of a queue's backlog as destination space allows
    pub fn deliver(&mut self, qtype: PortType, qid: QueueId, wakes: &mut Wakeups) {
        loop {
            let has_backlog = match self.queues.get(qtype).get(qid as usize) {
                Some(Some(q)) => !q.backlog.is_empty(),
                _ => return,
            };
            if !has_backlog {
                return;
            }

            let Some(dest) = self.pick_port(qtype, qid) else {
                return;
            };

            let (mut cqe, remaining) = match self.queues.get_mut(qtype).get_mut(qid as usize) {
                Some(Some(q)) => match q.backlog.pop_front() {
                    Some(cqe) => {
                        q.last_port = dest;
                        (cqe, q.backlog.len())
                    }
                    None => return,
                },
                _ => return,
            };
            if remaining > 0 {
                cqe.status |= DequeueQe::DEPTH_HINT_BIT;
            }

            if let Some(Some(port)) = self.ports.get_mut(qtype).get_mut(dest) {
                trace!(%qtype, queue = qid, port = dest, "Scheduled event");
                if port.cq.push(cqe) {
                    wakes.push((qtype, dest as PortId));
                }
            }
        }
    }

    fn pick_port(&self, qtype: PortType, qid: QueueId) -> Option<usize> {
        let queue = self.queues.get(qtype).get(qid as usize)?.as_ref()?;
        let ports = self.ports.get(qtype);

        match qtype {
            PortType::Dir => {
                let port = ports.get(qid as usize)?.as_ref()?;
                (port.domain == queue.domain && port.enabled && port.cq.has_space())
                    .then_some(qid as usize)
            }
            PortType::Ldb => {
                let n = ports.len();
                let start = queue.last_port.wrapping_add(1) % n.max(1);
                (0..n).map(|i| (start + i) % n).find(|&idx| {
                    ports[idx].as_ref().is_some_and(|p| {
                        p.domain == queue.domain
                            && p.enabled
                            && p.is_linked(qid)
                            && p.cq.has_space()
                    })
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{EmuDomain, EmuPort, EmuQueue, EmulatorConfig};
    use super::*;
    use crate::hw::traits::HwDomainArgs;
    use crate::hw::wire::SchedType;

    fn state_with_ldb(ports: &[(PortId, u32)]) -> EmuState {
        let mut state = EmuState::new(EmulatorConfig::default());
        state.domains[0] = Some(EmuDomain::new(&HwDomainArgs::default()));
        state.queues.ldb[0] = Some(EmuQueue::new(0));
        for &(id, depth) in ports {
            let mut port = EmuPort::new(0, depth);
            port.links.push((0, 0));
            state.ports.ldb[id as usize] = Some(port);
        }
        state
    }

    fn burst_of(n: usize) -> QeBurst {
        let mut burst = QeBurst::new();
        for (i, qe) in burst.qes.iter_mut().take(n).enumerate() {
            *qe = EnqueueQe::new(0, SchedType::Atomic, i as u64);
        }
        burst
    }

    #[test]
    fn test_round_robin_across_linked_ports() {
        let mut state = state_with_ldb(&[(1, 8), (2, 8)]);
        let mut wakes = Wakeups::new();
        state.process_burst(PortType::Ldb, 1, &burst_of(4), &mut wakes);

        let outstanding = |s: &EmuState, id: usize| s.ports.ldb[id].as_ref().unwrap().cq.outstanding;
        assert_eq!(outstanding(&state, 1), 2);
        assert_eq!(outstanding(&state, 2), 2);
        assert!(wakes.is_empty());
    }

    #[test]
    fn test_backlog_drains_on_pop() {
        let mut state = state_with_ldb(&[(1, 2)]);
        let mut wakes = Wakeups::new();
        state.process_burst(PortType::Ldb, 1, &burst_of(4), &mut wakes);
        assert_eq!(state.queues.ldb[0].as_ref().unwrap().backlog.len(), 2);

        state.pop_tokens(PortType::Ldb, 1, 2, &mut wakes);
        assert_eq!(state.queues.ldb[0].as_ref().unwrap().backlog.len(), 0);
        assert_eq!(state.ports.ldb[1].as_ref().unwrap().cq.outstanding, 2);
    }

    #[test]
    fn test_armed_port_reports_wakeup_once() {
        let mut state = state_with_ldb(&[(1, 8)]);
        state.ports.ldb[1].as_mut().unwrap().cq.armed = true;
        let mut wakes = Wakeups::new();
        state.process_burst(PortType::Ldb, 1, &burst_of(3), &mut wakes);
        assert_eq!(wakes, vec![(PortType::Ldb, 1)]);
    }
}
