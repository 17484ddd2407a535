//! Audio device enumeration
//!
//! Lists output devices of the default host for the settings UI and resolves
//! a stored device name back to a cpal device.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use super::error::{AudioError, AudioResult};

/// Information about an audio output device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDeviceInfo {
    /// Device name as reported by the host
    pub name: String,
    /// Whether this is the system default output
    pub is_default: bool,
    /// Common sample rates the device supports
    pub sample_rates: Vec<u32>,
    /// Maximum output channels
    pub max_channels: u16,
}

/// Enumerate output devices, default device first
pub fn list_output_devices() -> AudioResult<Vec<OutputDeviceInfo>> {
    let host = cpal::default_host();

    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    let mut infos: Vec<OutputDeviceInfo> = Vec::new();
    for device in devices {
        let name = match device.name() {
            Ok(name) => name,
            Err(_) => continue,
        };

        let configs: Vec<_> = match device.supported_output_configs() {
            Ok(configs) => configs.collect(),
            Err(_) => continue,
        };
        if configs.is_empty() {
            continue;
        }

        let mut sample_rates: Vec<u32> = Vec::new();
        let mut max_channels: u16 = 0;
        for config in &configs {
            max_channels = max_channels.max(config.channels());
            for rate in [44_100, 48_000, 88_200, 96_000, 176_400, 192_000] {
                if rate >= config.min_sample_rate().0
                    && rate <= config.max_sample_rate().0
                    && !sample_rates.contains(&rate)
                {
                    sample_rates.push(rate);
                }
            }
        }
        sample_rates.sort_unstable();

        infos.push(OutputDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            sample_rates,
            max_channels,
        });
    }

    if infos.is_empty() {
        return Err(AudioError::NoDevices);
    }

    infos.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));

    log::info!("enumerated {} audio output devices", infos.len());
    Ok(infos)
}

/// Resolve a device by name, or the system default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();

    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDefaultDevice("no default output device".to_string())),
        Some(wanted) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?;
            for device in devices {
                if device.name().ok().as_deref() == Some(wanted) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(wanted.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // May legitimately fail on machines without audio hardware.
        match list_output_devices() {
            Ok(devices) => {
                assert!(!devices.is_empty());
                // Default device sorts first when present
                if devices.iter().any(|d| d.is_default) {
                    assert!(devices[0].is_default);
                }
            }
            Err(AudioError::NoDevices) | Err(AudioError::ConfigError(_)) => {
                println!("no audio devices available (expected in CI)");
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_unknown_device_not_found() {
        match find_output_device(Some("definitely-not-a-real-device")) {
            Err(AudioError::DeviceNotFound(_)) => {}
            Err(_) => println!("no audio host available (expected in CI)"),
            Ok(_) => panic!("found a device that should not exist"),
        }
    }
}
