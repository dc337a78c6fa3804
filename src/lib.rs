/*!
 * HQM Datapath Library
 *
 * User-space datapath for a hardware queue manager: scheduling domains,
 * software credit pools, producer/consumer ports with burst enqueue and
 * generation-tagged dequeue, per-port interrupt gates and domain alerts.
 * The device itself is reached through the [`hw::HqmHardware`] trait; an
 * in-process [`hw::EmulatedDevice`] implements it for tests and demos.
 */

pub mod core;
pub mod datapath;
pub mod hw;
pub mod monitoring;

// Re-exports
pub use crate::core::{
    BurstPreference, DatapathConfig, HqmError, HqmResult, OverRequestPolicy, PerType, PortType,
};
pub use datapath::{
    CreditTuning, Datapath, Device, DeviceRegistry, DomainAlert, DomainHandle, LdbQueueArgs,
    PortArgs, PortHandle, Resources, SchedDomainArgs, WakeReason,
};
pub use hw::{DequeueQe, EmulatedDevice, EmulatorConfig, EnqueueQe, HqmHardware, QeCommand, SchedType};
pub use monitoring::init_tracing;
