/*!
 * Credit Pools
 *
 * Pools are sub-allocated from the domain's credit budget and are the only
 * shared source of credits. Ports move credits between a pool and their
 * private cache in fixed batches:
 * - refill takes `min(avail, batch)` with one compare-and-swap; a lost race
 *   yields nothing rather than retrying on the fast path
 * - surplus goes back one batch at a time once a cache holds two batches
 */

use super::types::{CreditPool, DomainHandle};
use crate::core::errors::{HqmError, HqmResult};
use crate::core::types::{PoolId, PortType};
use std::sync::atomic::Ordering;
use tracing::info;

impl CreditPool {
    /// Take up to `batch` credits with a single CAS attempt
    ///
    /// Returns the number taken; 0 if the pool is empty or the CAS lost.
    #[inline]
    pub(crate) fn try_take(&self, batch: u32) -> u32 {
        let avail = self.avail.load(Ordering::Acquire);
        if avail == 0 {
            return 0;
        }
        let take = avail.min(batch);
        match self
            .avail
            .compare_exchange(avail, avail - take, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => take,
            Err(_) => 0,
        }
    }

    #[inline]
    pub(crate) fn give(&self, n: u32) {
        self.avail.fetch_add(n, Ordering::AcqRel);
    }
}

impl DomainHandle<'_> {
    /// Carve an LDB credit pool out of the domain's remaining LDB budget
    pub fn create_ldb_credit_pool(&self, num_credits: u32) -> HqmResult<PoolId> {
        self.create_credit_pool(PortType::Ldb, num_credits)
    }

    /// Carve a DIR credit pool out of the domain's remaining DIR budget
    pub fn create_dir_credit_pool(&self, num_credits: u32) -> HqmResult<PoolId> {
        self.create_credit_pool(PortType::Dir, num_credits)
    }

    fn create_credit_pool(&self, ty: PortType, num_credits: u32) -> HqmResult<PoolId> {
        self.check()?;
        self.check_shutdown()?;

        let mut state = self.domain.state.lock();
        let remaining = *state.remaining.get(ty);
        if num_credits > remaining {
            return Err(HqmError::invalid(format!(
                "{} credits requested, {} {} credits remain in domain {}",
                num_credits, remaining, ty, self.domain.id
            )));
        }

        let (id, pool) = self
            .domain
            .pools
            .get(ty)
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_configured())
            .ok_or_else(|| {
                HqmError::invalid(format!("domain {} has no free {} credit pool", self.domain.id, ty))
            })?;

        pool.avail.store(num_credits, Ordering::Release);
        pool.configured.store(true, Ordering::Release);
        *state.remaining.get_mut(ty) -= num_credits;

        info!(
            domain = self.domain.id,
            %ty,
            pool = id,
            credits = num_credits,
            "Created credit pool"
        );
        Ok(id as PoolId)
    }

    /// Credits currently available in a configured pool
    pub fn credit_pool_available(&self, ty: PortType, pool: PoolId) -> HqmResult<u32> {
        let pool = self.domain.pool(ty, pool)?;
        if !pool.is_configured() {
            return Err(HqmError::NotConfigured(format!("{} credit pool", ty)));
        }
        Ok(pool.available())
    }
}
