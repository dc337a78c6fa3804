/*!
 * Dequeue Fast Path
 *
 * Consumers drain the ring while the slot's generation tag matches the
 * port's expected tag; the tag flips each time the read index wraps. With
 * `wait`, an empty ring arms the port's CQ interrupt (once, until it fires)
 * and sleeps on the port's interrupt gate.
 */

use super::types::PortHandle;
use crate::core::errors::{HqmError, HqmResult};
use crate::hw::wire::DequeueQe;
use std::sync::atomic::Ordering;

/// Arm hook for callers that already armed through the doorbell
const NO_ARM: Option<fn() -> HqmResult<()>> = None;

impl PortHandle<'_> {
    /// Drain up to `out.len()` entries and pop their tokens
    ///
    /// With `wait`, blocks until at least one entry arrives, the port is
    /// disabled (`PortDisabled`) or the domain shuts down (`Interrupted`).
    pub fn recv(&mut self, out: &mut [DequeueQe], wait: bool) -> HqmResult<usize> {
        self.receive(out, wait, true)
    }

    /// Drain without popping; the caller returns tokens with [`Self::pop_cq`]
    pub fn recv_no_pop(&mut self, out: &mut [DequeueQe], wait: bool) -> HqmResult<usize> {
        self.receive(out, wait, false)
    }

    /// Block until the consumer ring has data
    ///
    /// With `arm`, requests the CQ interrupt from the device before
    /// sleeping. Only one thread blocks on a port at a time; others queue
    /// behind it.
    pub fn block(&self, arm: bool) -> HqmResult<()> {
        self.check()?;
        self.check_shutdown()?;

        let probe = self.probe();
        let hw = self.dp.device.hw();
        let (domain, ty, port) = (self.domain.id(), self.port.ty, self.port.id);
        let arm_fn = arm.then(|| move || hw.arm_interrupt(domain, ty, port));

        self.dp
            .device
            .interrupts()
            .block(ty, port, || probe.has_data(), arm_fn)
    }

    fn receive(&mut self, out: &mut [DequeueQe], wait: bool, pop: bool) -> HqmResult<usize> {
        self.check_datapath()?;

        if !self.port.is_enabled() && !self.cq_has_data() {
            return Err(self.disabled());
        }

        while wait && !self.cq_has_data() {
            if !self.port.int_armed.load(Ordering::Relaxed) {
                self.arm_cq_interrupt();
            }

            let probe = self.probe();
            let result = self.dp.device.interrupts().block(
                self.port.ty,
                self.port.id,
                || probe.has_data(),
                NO_ARM,
            );
            // A delivered interrupt consumes the arm
            self.port.int_armed.store(result.is_err(), Ordering::Relaxed);
            result?;

            self.check_shutdown()?;
            if !self.port.is_enabled() && !self.cq_has_data() {
                return Err(self.disabled());
            }
        }

        let cnt = self.drain(out);
        if cnt == 0 {
            return Ok(0);
        }

        let port = self.port;
        let n = cnt as u32;
        port.owed_tokens
            .store(port.owed_tokens.load(Ordering::Relaxed) + n, Ordering::Relaxed);
        port.owed_releases
            .store(port.owed_releases.load(Ordering::Relaxed) + n, Ordering::Relaxed);
        let credits = port.credits.get(port.ty);
        credits.store(credits.load(Ordering::Relaxed) + n, Ordering::Relaxed);

        if pop {
            self.pop_tokens(cnt);
        }
        Ok(cnt)
    }

    /// Copy entries out of the ring and advance the read position
    #[inline]
    fn drain(&mut self, out: &mut [DequeueQe]) -> usize {
        let ring = &self.mapping.ring;
        let depth = ring.depth();
        let mut idx = self.port.cq_idx.load(Ordering::Relaxed);
        let mut gen = self.port.cq_gen.load(Ordering::Relaxed);

        let mut cnt = 0;
        while cnt < out.len() && ring.has_entry(idx, gen) {
            out[cnt] = ring.read(idx);
            cnt += 1;
            idx += 1;
            if idx == depth {
                idx = 0;
                gen ^= 1;
            }
        }

        self.port.cq_idx.store(idx, Ordering::Relaxed);
        self.port.cq_gen.store(gen, Ordering::Relaxed);
        cnt
    }

    fn disabled(&self) -> HqmError {
        HqmError::PortDisabled(format!(
            "{} port {} is disabled and drained",
            self.port.ty, self.port.id
        ))
    }
}
