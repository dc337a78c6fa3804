/*!
 * Enqueue Fast Path
 *
 * Events are staged four at a time in the handle's cache-line buffer and
 * written to the producer doorbell as one burst. NEW and FWD commands draw
 * from the port's local credit cache; when the cache runs dry the port makes
 * exactly one refill attempt from its bound pool and stops accepting events
 * if that also comes back empty. Already staged events are still written.
 *
 * # Performance
 * - No locks and no logging per event
 * - One CAS per refill; counters are written back once per call
 */

use super::types::PortHandle;
use crate::core::config::OverRequestPolicy;
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::QE_BURST_SIZE;
use crate::core::types::PortType;
use crate::hw::burst::store_fence;
use crate::hw::wire::{EnqueueQe, QeCommand};
use std::iter;
use std::sync::atomic::Ordering;

impl PortHandle<'_> {
    /// Enqueue new events
    ///
    /// Every event is sent as NEW regardless of its command bits. Returns
    /// the number accepted, which is less than `events.len()` when credits
    /// run out.
    pub fn send(&mut self, events: &[EnqueueQe]) -> HqmResult<usize> {
        self.send_as(events, Some(QeCommand::New))
    }

    /// Forward events: release the held history entry and enqueue onward
    pub fn forward(&mut self, events: &[EnqueueQe]) -> HqmResult<usize> {
        self.send_as(events, Some(QeCommand::Fwd))
    }

    /// Send events with their own commands
    ///
    /// Only the NEW and FWD variants consume credits.
    pub fn adv_send(&mut self, events: &[EnqueueQe]) -> HqmResult<usize> {
        self.send_as(events, None)
    }

    /// Release up to `n` held history-list entries (LDB ports only)
    ///
    /// Requests above the owed count are clamped or rejected according to
    /// the datapath's over-request policy.
    pub fn release(&mut self, n: usize) -> HqmResult<usize> {
        self.check_datapath()?;
        if !self.port.ty.is_ldb() {
            return Err(HqmError::invalid(format!(
                "release on DIR port {}",
                self.port.id
            )));
        }

        let owed = self.port.owed_releases.load(Ordering::Relaxed) as usize;
        let n = self.clamp_request("release", n, owed)?;
        let batch = self.dp.config().release_batch_size;
        let rel = EnqueueQe::noop().with_command(QeCommand::Rel);

        let mut done = 0;
        while done < n {
            let k = batch.min(n - done);
            let sent = self.transmit(iter::repeat(rel).take(k), true);
            done += sent;
            if sent < k {
                break;
            }
        }
        Ok(done)
    }

    /// Return up to `n` consumer-queue tokens to the device
    ///
    /// Returns the number of tokens popped.
    pub fn pop_cq(&mut self, n: usize) -> HqmResult<usize> {
        self.check_datapath()?;
        let owed = self.port.owed_tokens.load(Ordering::Relaxed) as usize;
        let n = self.clamp_request("pop", n, owed)?;
        Ok(self.pop_tokens(n))
    }

    fn send_as(&mut self, events: &[EnqueueQe], cmd: Option<QeCommand>) -> HqmResult<usize> {
        self.check_datapath()?;
        if self.dp.config().validate_args {
            self.validate_queues(events, cmd)?;
        }

        let staged = events.iter().map(|ev| {
            let mut qe = *ev;
            if let Some(cmd) = cmd {
                qe.set_command(cmd);
            }
            qe.clear_reserved();
            qe
        });
        Ok(self.transmit(staged, true))
    }

    /// Every enqueue must target a queue created in this domain
    fn validate_queues(&self, events: &[EnqueueQe], cmd: Option<QeCommand>) -> HqmResult<()> {
        for ev in events {
            if !cmd.unwrap_or_else(|| ev.command()).is_enqueue() {
                continue;
            }
            let ty = ev.sched_type().port_type();
            if !self.domain.queue_valid.get(ty).is_set(ev.queue_id as u32) {
                return Err(HqmError::invalid(format!(
                    "{} queue {} is not in domain {}",
                    ty,
                    ev.queue_id,
                    self.domain.id()
                )));
            }
        }
        Ok(())
    }

    fn clamp_request(&self, op: &str, n: usize, owed: usize) -> HqmResult<usize> {
        if n <= owed {
            return Ok(n);
        }
        match self.dp.config().over_request {
            OverRequestPolicy::Clamp => Ok(owed),
            OverRequestPolicy::Reject => Err(HqmError::invalid(format!(
                "{} of {} exceeds {} owed on {} port {}",
                op, n, owed, self.port.ty, self.port.id
            ))),
        }
    }

    /// Issue one BAT_T returning `n` tokens; no entry checks
    pub(crate) fn pop_tokens(&mut self, n: usize) -> usize {
        // The flow id field holds the count minus one
        let n = n.min(u16::MAX as usize + 1);
        if n == 0 {
            return 0;
        }
        let pop = EnqueueQe::noop()
            .with_command(QeCommand::BatT)
            .with_flow_id((n - 1) as u16);
        self.transmit(iter::once(pop), false);
        n
    }

    /// Issue one ARM for the port's consumer-queue interrupt
    pub(crate) fn arm_cq_interrupt(&mut self) {
        let arm = EnqueueQe::noop().with_command(QeCommand::Arm);
        self.transmit(iter::once(arm), false);
        self.port.int_armed.store(true, Ordering::Relaxed);
    }

    /// Burst loop shared by every send variant
    ///
    /// `fence` orders each burst after the previous one; token pops and
    /// interrupt arms skip it.
    fn transmit<I>(&mut self, events: I, fence: bool) -> usize
    where
        I: IntoIterator<Item = EnqueueQe>,
    {
        let port = self.port;
        let batch = self.dp.config().credit_batch_size;
        let mut events = events.into_iter().peekable();

        let mut cached = [
            port.credits.ldb.load(Ordering::Relaxed),
            port.credits.dir.load(Ordering::Relaxed),
        ];
        let mut used = [0u32; 2];
        let mut owed_tokens = port.owed_tokens.load(Ordering::Relaxed);
        let mut owed_releases = port.owed_releases.load(Ordering::Relaxed);
        let mut sent = 0;
        let mut exhausted = false;

        while !exhausted && events.peek().is_some() {
            self.staging.clear();
            let mut j = 0;

            while j < QE_BURST_SIZE {
                let Some(qe) = events.peek().copied() else {
                    break;
                };
                let cmd = qe.command();

                if cmd.requires_credit() {
                    let ty = qe.sched_type().port_type();
                    let t = ty.index();
                    if cached[t] == used[t] {
                        cached[t] += self.refill(ty, batch);
                        if cached[t] == used[t] {
                            exhausted = true;
                            break;
                        }
                    }
                    used[t] += 1;
                }

                events.next();
                self.staging.qes[j] = qe;
                j += 1;

                owed_tokens = owed_tokens.saturating_sub(cmd.token_pops(qe.flow_id));
                if cmd.releases_history() {
                    owed_releases = owed_releases.saturating_sub(1);
                }
            }

            if j != 0 {
                if fence {
                    store_fence();
                }
                self.mapping.doorbell.ring(&self.staging, &self.mapping.writer);
            }
            sent += j;
        }

        port.owed_tokens.store(owed_tokens, Ordering::Relaxed);
        port.owed_releases.store(owed_releases, Ordering::Relaxed);

        for ty in PortType::ALL {
            let t = ty.index();
            let remaining = cached[t] - used[t];
            let kept = self.return_surplus(ty, remaining, batch);
            port.credits.get(ty).store(kept, Ordering::Relaxed);
        }

        sent
    }

    /// One refill attempt from the bound pool
    #[inline]
    fn refill(&self, ty: PortType, batch: u32) -> u32 {
        let pool_id = *self.mapping.pools.get(ty);
        match self.domain.pools.get(ty).get(pool_id as usize) {
            Some(pool) => pool.try_take(batch),
            None => 0,
        }
    }

    /// Give one batch back once the cache holds two; returns what remains
    #[inline]
    fn return_surplus(&self, ty: PortType, cached: u32, batch: u32) -> u32 {
        if cached < batch.saturating_mul(2) {
            return cached;
        }
        let pool_id = *self.mapping.pools.get(ty);
        match self.domain.pools.get(ty).get(pool_id as usize) {
            Some(pool) => {
                pool.give(batch);
                cached - batch
            }
            None => cached,
        }
    }
}
