/*!
 * Hardware Interface
 *
 * Wire formats, mapped port memory and the burst-write strategies used by the
 * datapath, plus the collaborator trait through which the device is driven.
 */

pub mod burst;
pub mod emulator;
pub mod mmio;
pub mod traits;
pub mod wire;

pub use burst::{store_fence, BurstKind, BurstWriter};
pub use emulator::{EmulatedDevice, EmulatorConfig};
pub use mmio::{ConsumerRing, CqProbe, Doorbell, MmioDoorbell, RingMemory};
pub use traits::{HqmHardware, HwDomainArgs, HwLdbQueueArgs, HwPortArgs, HwResources, RawAlert};
pub use wire::{DequeueQe, EnqueueQe, QeBurst, QeCommand, SchedType};
