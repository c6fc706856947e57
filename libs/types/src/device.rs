//! Target device for materialized values
//!
//! A pipe is bound to exactly one device through its configuration. Values
//! received on the pipe are tagged with that device; values tagged with a
//! non-host device are staged through host memory before transmission.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,
    /// Accelerator memory identified by ordinal
    Accelerator(u32),
}

impl Device {
    /// True when values on this device can be handed to a socket directly
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(ordinal) => write!(f, "accelerator:{}", ordinal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device '{0}': expected \"cpu\" or \"accelerator:<ordinal>\"")]
pub struct ParseDeviceError(String);

impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }
        let ordinal = s
            .strip_prefix("accelerator:")
            .or_else(|| s.strip_prefix("cuda:"))
            .ok_or_else(|| ParseDeviceError(s.to_string()))?;
        ordinal
            .parse::<u32>()
            .map(Device::Accelerator)
            .map_err(|_| ParseDeviceError(s.to_string()))
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
