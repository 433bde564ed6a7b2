//! # Device Detection and Management
//!
//! Handles automatic detection and selection of compute devices (CPU/GPU) for
//! ML inference, plus the best-effort GPU telemetry the health endpoint
//! reports.

use candle_core::Device;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// Automatically select the best available device
    Auto,
    /// Force CPU usage
    Cpu,
    /// Force CUDA GPU usage (will fallback to CPU if not available)
    Cuda,
    /// Force Metal GPU usage (will fallback to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl Default for DevicePreference {
    fn default() -> Self {
        DevicePreference::Auto
    }
}

/// GPU telemetry for the health snapshot. Fields are optional because the
/// query is best-effort: a non-NVIDIA host reports the device kind only.
#[derive(Debug, Clone, Serialize)]
pub struct GpuTelemetry {
    pub name: String,
    pub memory_total_mb: Option<u64>,
    pub memory_used_mb: Option<u64>,
}

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Get a device honoring the configured preference
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::get_cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::get_metal_device().unwrap_or(Device::Cpu),
        }
    }

    /// Get the best available device (cached)
    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    fn detect_best_device() -> Device {
        info!("Detecting best available compute device...");

        if let Some(cuda_device) = Self::get_cuda_device() {
            info!("Selected CUDA GPU for inference");
            return cuda_device;
        }

        if let Some(metal_device) = Self::get_metal_device() {
            info!("Selected Metal GPU for inference");
            return metal_device;
        }

        info!("Using CPU for inference (no GPU acceleration available)");
        Device::Cpu
    }

    fn get_cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => {
                debug!("CUDA device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    fn get_metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => {
                debug!("Metal device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    /// Short device-kind label used in responses and logs
    pub fn device_kind(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }

    /// Live GPU telemetry for an accelerated device, `None` on CPU.
    ///
    /// Queried from `nvidia-smi` for CUDA hosts. The query runs on every
    /// call — the health endpoint promises uncached, current numbers.
    pub fn gpu_telemetry(device: &Device) -> Option<GpuTelemetry> {
        match device {
            Device::Cpu => None,
            Device::Cuda(_) => Some(Self::query_nvidia_smi().unwrap_or_else(|| GpuTelemetry {
                name: "NVIDIA GPU (CUDA)".to_string(),
                memory_total_mb: None,
                memory_used_mb: None,
            })),
            Device::Metal(_) => Some(GpuTelemetry {
                name: "Apple Silicon (Metal)".to_string(),
                memory_total_mb: None,
                memory_used_mb: None,
            }),
        }
    }

    fn query_nvidia_smi() -> Option<GpuTelemetry> {
        let output = std::process::Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total,memory.used",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;

        if !output.status.success() {
            warn!("nvidia-smi exited with {}; GPU memory unavailable", output.status);
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next()?;
        parse_nvidia_smi_line(line)
    }
}

/// Parse one `name, memory.total, memory.used` CSV line from nvidia-smi.
fn parse_nvidia_smi_line(line: &str) -> Option<GpuTelemetry> {
    let mut parts = line.splitn(3, ',').map(str::trim);
    let name = parts.next()?.to_string();
    if name.is_empty() {
        return None;
    }
    let memory_total_mb = parts.next().and_then(|v| v.parse::<u64>().ok());
    let memory_used_mb = parts.next().and_then(|v| v.parse::<u64>().ok());

    Some(GpuTelemetry {
        name,
        memory_total_mb,
        memory_used_mb,
    })
}

/// Create a device from the configured preference string, falling back to
/// auto-detection on an unrecognized value.
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => DeviceManager::get_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            DeviceManager::get_best_device()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("invalid".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_device_manager_cpu_fallback() {
        let device = DeviceManager::get_device(DevicePreference::Cpu);
        assert!(matches!(device, Device::Cpu));
        assert_eq!(DeviceManager::device_kind(&device), "cpu");
    }

    #[test]
    fn test_cpu_has_no_gpu_telemetry() {
        assert!(DeviceManager::gpu_telemetry(&Device::Cpu).is_none());
    }

    #[test]
    fn test_parse_nvidia_smi_line() {
        let telemetry =
            parse_nvidia_smi_line("NVIDIA GeForce RTX 4070 SUPER, 12282, 3145").unwrap();
        assert_eq!(telemetry.name, "NVIDIA GeForce RTX 4070 SUPER");
        assert_eq!(telemetry.memory_total_mb, Some(12282));
        assert_eq!(telemetry.memory_used_mb, Some(3145));

        assert!(parse_nvidia_smi_line("").is_none());
    }

    #[test]
    fn test_parse_nvidia_smi_line_tolerates_missing_fields() {
        let telemetry = parse_nvidia_smi_line("Some GPU").unwrap();
        assert_eq!(telemetry.name, "Some GPU");
        assert_eq!(telemetry.memory_total_mb, None);
        assert_eq!(telemetry.memory_used_mb, None);
    }
}
