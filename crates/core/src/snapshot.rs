use serde::{Deserialize, Serialize};

use crate::{SimResult, SimulationError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub name: String,
    pub words: Vec<u32>,
}

/// Version-tagged register state of one device, fields in declaration order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub device: String,
    pub version: u32,
    pub fields: Vec<FieldSnapshot>,
}

impl DeviceSnapshot {
    pub fn field(&self, name: &str) -> Option<&[u32]> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.words.as_slice())
    }

    /// `other` can be restored into a device that produced `self`.
    pub fn check_compatible(&self, other: &DeviceSnapshot) -> SimResult<()> {
        if self.device != other.device {
            return Err(SimulationError::Snapshot(format!(
                "device model '{}' cannot restore '{}'",
                self.device, other.device
            )));
        }
        if self.version != other.version {
            return Err(SimulationError::Snapshot(format!(
                "{}: version {} is not supported (expected {})",
                self.device, other.version, self.version
            )));
        }
        let layout = |s: &DeviceSnapshot| {
            s.fields
                .iter()
                .map(|f| (f.name.clone(), f.words.len()))
                .collect::<Vec<_>>()
        };
        if layout(self) != layout(other) {
            return Err(SimulationError::Snapshot(format!(
                "{}: field layout differs",
                self.device
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MachineSnapshot {
    /// `(bus name, state)` in bus order.
    pub peripherals: Vec<(String, DeviceSnapshot)>,
}
