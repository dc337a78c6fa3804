/*!
 * Scheduling Domains
 *
 * Domain lifecycle, software credit pools, queue creation and the per-domain
 * alert thread.
 */

mod alert;
mod credits;
mod lifecycle;
mod queues;
mod types;

pub use types::{
    CreditPool, DomainAlert, DomainHandle, LdbQueueArgs, Resources, SchedDomainArgs,
    SchedulingDomain,
};
