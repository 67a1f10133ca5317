//! The device inventory a plugin session advertises and the health overlay applied to it.
use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use crate::device_plugin_api::v1beta1::Device;

/// Healthy means the device is allocatable (whether already allocated or not)
pub const HEALTHY: &str = "Healthy";
/// Unhealthy means the device is not allocatable
pub const UNHEALTHY: &str = "Unhealthy";

/// Health of a single advertised device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Health {
    /// Allocatable
    Healthy,
    /// Not allocatable
    Unhealthy,
}

impl Health {
    /// The string the device plugin API uses for this health value
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => HEALTHY,
            Health::Unhealthy => UNHEALTHY,
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change in health of one device, identified by the ID it was advertised with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthEvent {
    /// Advertised device ID (its position in the inventory)
    pub device_id: String,
    /// New health of the device
    pub health: Health,
}

impl HealthEvent {
    /// Shorthand for an event marking `device_id` unhealthy
    pub fn unhealthy<S: Into<String>>(device_id: S) -> Self {
        HealthEvent {
            device_id: device_id.into(),
            health: Health::Unhealthy,
        }
    }
}

/// Device names found by the last scan plus the IDs marked unhealthy during the current session.
/// Unhealthy is sticky: there is no way back to healthy until a new session starts.
#[derive(Debug, Default)]
pub(crate) struct Inventory {
    devices: Vec<String>,
    unhealthy: HashSet<String>,
}

impl Inventory {
    pub(crate) fn devices(&self) -> &[String] {
        &self.devices
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Replaces the device list, keeping health marks
    pub(crate) fn replace(&mut self, devices: Vec<String>) {
        self.devices = devices;
    }

    /// Replaces the device list and forgets every health mark. Used when a session starts.
    pub(crate) fn reset(&mut self, devices: Vec<String>) {
        self.devices = devices;
        self.unhealthy.clear();
    }

    /// Applies a health event, returning whether any record changed.
    pub(crate) fn apply(&mut self, event: &HealthEvent) -> bool {
        if !self.contains_id(&event.device_id) {
            warn!(device_id = %event.device_id, "Health event for a device that is not in the inventory");
        }
        match event.health {
            Health::Unhealthy => self.unhealthy.insert(event.device_id.clone()),
            Health::Healthy => {
                if self.unhealthy.contains(&event.device_id) {
                    debug!(device_id = %event.device_id, "Ignoring recovery, unhealthy devices stay unhealthy for the session");
                }
                false
            }
        }
    }

    fn contains_id(&self, id: &str) -> bool {
        id.parse::<usize>()
            .map(|idx| idx < self.devices.len())
            .unwrap_or(false)
    }

    /// Builds the records sent to the kubelet: one per device, identified by its position.
    pub(crate) fn records(&self) -> Vec<Device> {
        (0..self.devices.len())
            .map(|idx| {
                let id = idx.to_string();
                let health = if self.unhealthy.contains(&id) {
                    Health::Unhealthy
                } else {
                    Health::Healthy
                };
                Device {
                    id,
                    health: health.as_str().to_string(),
                    topology: None,
                }
            })
            .collect()
    }
}
