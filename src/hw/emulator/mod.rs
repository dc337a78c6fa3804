/*!
 * Emulated Device
 * Software implementation of the hardware collaborator for tests, benches
 * and hosts without the device
 */

mod device;
mod routing;
mod types;

pub use device::EmulatedDevice;
pub use types::{EmuStatus, EmulatorConfig};
