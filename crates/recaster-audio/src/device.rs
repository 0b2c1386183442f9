//! Audio device enumeration and selection.

use recaster_ipc::{AudioDeviceInfo, AudioSelection};
use tracing::{debug, info, instrument};

use crate::error::AudioError;
use crate::AudioResult;

/// Name fragments that identify loopback-style inputs, matched case-insensitively.
pub const LOOPBACK_KEYWORDS: [&str; 5] = ["mix", "stereo", "loopback", "立体声混音", "what u hear"];

/// The input a session will capture from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedInput {
    Silence,
    Device(AudioDeviceInfo),
}

/// List input devices with at least one input channel.
///
/// The silence sentinel always heads the list.
#[instrument(name = "enumerate_input_devices")]
pub fn enumerate_input_devices() -> Vec<AudioDeviceInfo> {
    #[cfg_attr(not(feature = "device-audio"), allow(unused_mut))]
    let mut devices = vec![AudioDeviceInfo::silence()];

    #[cfg(feature = "device-audio")]
    devices.extend(native::input_devices());

    debug!(count = devices.len(), "Enumerated audio input devices");
    devices
}

/// First device whose name contains one of [`LOOPBACK_KEYWORDS`].
pub fn find_loopback_device(devices: &[AudioDeviceInfo]) -> Option<&AudioDeviceInfo> {
    devices.iter().filter(|d| !d.is_silence()).find(|device| {
        let name = device.name.to_lowercase();
        LOOPBACK_KEYWORDS.iter().any(|keyword| name.contains(keyword))
    })
}

/// Resolve an operator selection against the enumerated device list.
pub fn resolve_selection(
    selection: AudioSelection,
    devices: &[AudioDeviceInfo],
) -> AudioResult<ResolvedInput> {
    match selection {
        AudioSelection::Silence => Ok(ResolvedInput::Silence),
        AudioSelection::Device(index) => devices
            .iter()
            .find(|d| !d.is_silence() && d.index == index as i32)
            .cloned()
            .map(ResolvedInput::Device)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("input device #{index}"))),
        AudioSelection::Auto => {
            let device = find_loopback_device(devices).ok_or(AudioError::NoLoopbackDevice)?;
            info!(name = %device.name, index = device.index, "Selected loopback device");
            Ok(ResolvedInput::Device(device.clone()))
        }
    }
}

#[cfg(feature = "device-audio")]
pub(crate) mod native {
    use cpal::traits::{DeviceTrait, HostTrait};
    use recaster_ipc::AudioDeviceInfo;
    use tracing::warn;

    use crate::error::AudioError;
    use crate::AudioResult;

    pub(crate) fn input_devices() -> Vec<AudioDeviceInfo> {
        let host = cpal::default_host();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate input devices: {}", e);
                return Vec::new();
            }
        };

        devices
            .enumerate()
            .filter_map(|(index, device)| {
                let name = device.name().ok()?;
                let config = device.default_input_config().ok()?;
                let max_input_channels = device
                    .supported_input_configs()
                    .ok()
                    .and_then(|configs| configs.map(|c| c.channels()).max())
                    .unwrap_or(config.channels());
                if max_input_channels == 0 {
                    return None;
                }
                Some(AudioDeviceInfo {
                    index: index as i32,
                    name,
                    max_input_channels,
                    default_sample_rate: config.sample_rate().0,
                })
            })
            .collect()
    }

    /// Find the cpal device for a descriptor, preferring a name match.
    pub(crate) fn open_device(info: &AudioDeviceInfo) -> AudioResult<cpal::Device> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .collect();

        let by_name = devices
            .iter()
            .position(|d| d.name().map(|n| n == info.name).unwrap_or(false));
        let position = by_name.or_else(|| usize::try_from(info.index).ok());

        position
            .and_then(|p| devices.into_iter().nth(p))
            .ok_or_else(|| AudioError::DeviceNotFound(info.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: i32, name: &str) -> AudioDeviceInfo {
        AudioDeviceInfo {
            index,
            name: name.to_string(),
            max_input_channels: 2,
            default_sample_rate: 48_000,
        }
    }

    #[test]
    fn test_loopback_heuristic_case_insensitive() {
        let devices = vec![
            AudioDeviceInfo::silence(),
            device(0, "Microphone (USB)"),
            device(1, "Stereo MIX (Realtek)"),
            device(2, "Loopback Audio"),
        ];
        assert_eq!(find_loopback_device(&devices).unwrap().index, 1);

        let devices = vec![device(0, "麦克风"), device(3, "立体声混音 (Realtek)")];
        assert_eq!(find_loopback_device(&devices).unwrap().index, 3);

        let devices = vec![device(0, "What U Hear (Sound Blaster)")];
        assert_eq!(find_loopback_device(&devices).unwrap().index, 0);
    }

    #[test]
    fn test_auto_without_loopback_fails() {
        let devices = vec![AudioDeviceInfo::silence(), device(0, "Microphone")];
        assert!(matches!(
            resolve_selection(AudioSelection::Auto, &devices),
            Err(AudioError::NoLoopbackDevice)
        ));
    }

    #[test]
    fn test_resolve_explicit_and_silence() {
        let devices = vec![AudioDeviceInfo::silence(), device(0, "Microphone")];
        assert_eq!(
            resolve_selection(AudioSelection::Silence, &devices).unwrap(),
            ResolvedInput::Silence
        );
        assert_eq!(
            resolve_selection(AudioSelection::Device(0), &devices).unwrap(),
            ResolvedInput::Device(device(0, "Microphone"))
        );
        assert!(matches!(
            resolve_selection(AudioSelection::Device(7), &devices),
            Err(AudioError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_enumeration_starts_with_silence() {
        let devices = enumerate_input_devices();
        assert!(devices[0].is_silence());
        assert!(devices.iter().skip(1).all(|d| d.max_input_channels >= 1));
    }
}
