/*!
 * Device Registry
 *
 * Process-wide map from device id to the device's collaborator and interrupt
 * controller. A device is registered once by whatever layer probed it; every
 * `open` hands out an independent [`Datapath`] that keeps the device alive
 * until it is dropped.
 */

use super::interrupt::InterruptController;
use super::manager::Datapath;
use crate::core::config::DatapathConfig;
use crate::core::errors::{HqmError, HqmResult};
use crate::core::limits::MAX_NUM_DEVICES;
use crate::core::types::DeviceId;
use crate::hw::traits::HqmHardware;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// A registered device
pub struct Device {
    id: DeviceId,
    hw: Arc<dyn HqmHardware>,
    interrupts: Arc<InterruptController>,
}

impl Device {
    fn new(id: DeviceId, hw: Arc<dyn HqmHardware>) -> Arc<Self> {
        let interrupts = InterruptController::new();
        hw.bind_interrupts(interrupts.clone());
        Arc::new(Self { id, hw, interrupts })
    }

    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[inline]
    pub fn hw(&self) -> &dyn HqmHardware {
        &*self.hw
    }

    pub(crate) fn hw_arc(&self) -> Arc<dyn HqmHardware> {
        self.hw.clone()
    }

    #[inline]
    pub fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    /// Whether the device has been reset or unregistered
    pub fn is_reset(&self) -> bool {
        self.interrupts.is_device_shutdown()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("reset", &self.is_reset())
            .finish()
    }
}

/// Device registry
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Arc<Device>, RandomState>,
}

static GLOBAL: OnceLock<DeviceRegistry> = OnceLock::new();

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static DeviceRegistry {
        GLOBAL.get_or_init(DeviceRegistry::new)
    }

    /// Register a probed device under `id`
    pub fn register(&self, id: DeviceId, hw: Arc<dyn HqmHardware>) -> HqmResult<Arc<Device>> {
        if id as usize >= MAX_NUM_DEVICES {
            return Err(HqmError::invalid(format!(
                "device id {} exceeds {}",
                id, MAX_NUM_DEVICES
            )));
        }

        match self.devices.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HqmError::AlreadyExists(format!(
                "device {} is already registered",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let device = Device::new(id, hw);
                slot.insert(device.clone());
                info!(device = id, "Registered HQM device");
                Ok(device)
            }
        }
    }

    /// Tear a device down
    ///
    /// Latches device reset and wakes every blocked consumer. Datapaths that
    /// are still open keep the device alive but every call on them fails.
    pub fn unregister(&self, id: DeviceId) -> HqmResult<()> {
        let (_, device) = self
            .devices
            .remove(&id)
            .ok_or_else(|| HqmError::invalid(format!("device {} is not registered", id)))?;

        device.interrupts.device_reset();
        let holders = Arc::strong_count(&device) - 1;
        if holders > 0 {
            warn!(device = id, holders, "Unregistered device still has open datapaths");
        } else {
            info!(device = id, "Unregistered HQM device");
        }
        Ok(())
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.get(&id).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Open a datapath with the default configuration
    pub fn open(&self, id: DeviceId) -> HqmResult<Datapath> {
        self.open_with_config(id, DatapathConfig::default())
    }

    pub fn open_with_config(&self, id: DeviceId, config: DatapathConfig) -> HqmResult<Datapath> {
        config.validate()?;
        let device = self
            .device(id)
            .ok_or_else(|| HqmError::invalid(format!("device {} is not registered", id)))?;
        Ok(Datapath::new(device, config))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
