/*!
 * Datapath
 *
 * Device registry, scheduling domains, credit pools, ports and the
 * per-port interrupt gates.
 */

pub mod domain;
pub mod handles;
pub mod interrupt;
pub mod manager;
pub mod port;
pub mod registry;

pub use domain::{
    CreditPool, DomainAlert, DomainHandle, LdbQueueArgs, Resources, SchedDomainArgs,
    SchedulingDomain,
};
pub use handles::{HandleList, HandleToken};
pub use interrupt::{InterruptController, InterruptGate, WakeReason};
pub use manager::Datapath;
pub use port::{CreditTuning, Port, PortArgs, PortHandle};
pub use registry::{Device, DeviceRegistry};
