//! Device discovery
//!
//! Installs system-wide arrival/removal notifications and keeps a registry of
//! the devices currently present. The notification callback only updates the
//! registry and publishes events; it never blocks the driver thread.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};

use super::hal::{DeckLink, DeviceNotificationCallback, DiscoveryDriver};
use crate::error::{AppError, Result};
use crate::events::{DeckLinkEvent, DeviceRef, EventBus};

struct Notifier {
    registry: RwLock<Vec<Arc<dyn DeckLink>>>,
    events: Arc<EventBus>,
}

impl DeviceNotificationCallback for Notifier {
    fn device_arrived(&self, device: Arc<dyn DeckLink>) {
        let device_ref = DeviceRef::of(device.as_ref());
        info!("DeckLink device arrived: {} ({:#x})", device_ref.name, device_ref.id);

        {
            let mut registry = self.registry.write();
            registry.retain(|d| d.persistent_id() != device_ref.id);
            registry.push(device.clone());
        }

        self.events.publish(DeckLinkEvent::DeviceArrived {
            device: device_ref,
            handle: device,
        });
    }

    fn device_removed(&self, device: Arc<dyn DeckLink>) {
        let device_ref = DeviceRef::of(device.as_ref());
        info!("DeckLink device removed: {} ({:#x})", device_ref.name, device_ref.id);

        self.registry
            .write()
            .retain(|d| d.persistent_id() != device_ref.id);

        self.events
            .publish(DeckLinkEvent::DeviceRemoved { device: device_ref });
    }
}

/// Device discovery service
pub struct DeviceDiscovery {
    driver: Arc<dyn DiscoveryDriver>,
    enabled: Mutex<bool>,
    notifier: Arc<Notifier>,
}

impl DeviceDiscovery {
    pub fn new(driver: Arc<dyn DiscoveryDriver>, events: Arc<EventBus>) -> Self {
        Self {
            driver,
            enabled: Mutex::new(false),
            notifier: Arc::new(Notifier {
                registry: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    /// Install device notifications. A second call is a no-op.
    pub fn enable(&self) -> Result<()> {
        let mut enabled = self.enabled.lock();
        if *enabled {
            return Ok(());
        }
        self.driver
            .install_device_notifications(self.notifier.clone())
            .map_err(|e| AppError::hardware("device discovery", e))?;
        *enabled = true;
        info!("Device discovery enabled");
        Ok(())
    }

    /// Uninstall device notifications. Idempotent.
    ///
    /// No removal notifications arrive afterwards, so the registry is cleared.
    pub fn disable(&self) -> Result<()> {
        let mut enabled = self.enabled.lock();
        if !*enabled {
            return Ok(());
        }
        self.driver
            .uninstall_device_notifications()
            .map_err(|e| AppError::hardware("device discovery", e))?;
        *enabled = false;
        self.notifier.registry.write().clear();
        info!("Device discovery disabled");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }

    /// Devices present right now, in arrival order
    pub fn devices(&self) -> Vec<Arc<dyn DeckLink>> {
        self.notifier.registry.read().clone()
    }

    pub fn get(&self, persistent_id: u64) -> Option<Arc<dyn DeckLink>> {
        self.notifier
            .registry
            .read()
            .iter()
            .find(|d| d.persistent_id() == persistent_id)
            .cloned()
    }

    /// First present device whose display name contains `pattern`
    pub fn find_by_name(&self, pattern: &str) -> Option<Arc<dyn DeckLink>> {
        self.notifier
            .registry
            .read()
            .iter()
            .find(|d| d.display_name().contains(pattern))
            .cloned()
    }
}

impl Drop for DeviceDiscovery {
    fn drop(&mut self) {
        if let Err(e) = self.disable() {
            warn!("Failed to disable device discovery: {}", e);
        }
    }
}
