//! Compute device selection and GPU detection
//!
//! The extractor picks its device once at construction. `Auto` prefers the
//! first CUDA device when the crate is built with CUDA support and one is
//! present, and falls back to the CPU otherwise.

use std::fmt;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::registry::KnownModel;

/// Requested compute device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePreference {
    /// Accelerator if available, else CPU
    #[default]
    Auto,
    /// Always the CPU
    Cpu,
    /// A specific CUDA device ordinal
    Cuda(usize),
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| format!("unknown device '{s}' (expected auto, cpu, cuda or cuda:N)")),
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePreference> for String {
    fn from(value: DevicePreference) -> Self {
        value.to_string()
    }
}

/// Information about detected GPU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    /// GPU name/model
    pub name: String,
    /// Total VRAM in GB
    pub vram_total_gb: f32,
    /// Available/free VRAM in GB
    pub vram_available_gb: f32,
    /// Driver version
    pub driver_version: String,
}

impl GpuInfo {
    /// Detect the first NVIDIA GPU via nvidia-smi
    ///
    /// Returns None if nvidia-smi is missing or reports nothing usable.
    pub fn detect() -> Option<Self> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total,memory.free,driver_version",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        Self::parse_csv_line(String::from_utf8_lossy(&output.stdout).lines().next()?)
    }

    /// Parse one line of nvidia-smi CSV output
    fn parse_csv_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 4 {
            return None;
        }

        let vram_total_mb: f32 = parts[1].parse().ok()?;
        let vram_free_mb: f32 = parts[2].parse().ok()?;

        Some(Self {
            name: parts[0].to_string(),
            vram_total_gb: vram_total_mb / 1024.0,
            vram_available_gb: vram_free_mb / 1024.0,
            driver_version: parts[3].to_string(),
        })
    }

    /// Whether the model's weights fit in free VRAM with some headroom
    pub fn fits(&self, model: &KnownModel) -> bool {
        self.vram_available_gb >= model.weights_gb * 1.2
    }
}

/// Whether this build can run models on CUDA at all
pub fn cuda_compiled() -> bool {
    cfg!(feature = "cuda")
}

/// Human-readable device report for a preference and optional model
pub fn device_status_summary(preference: DevicePreference, model: Option<&KnownModel>) -> String {
    let mut summary = format!("Requested device: {preference}\n");
    summary.push_str(&format!(
        "CUDA support compiled in: {}\n",
        if cuda_compiled() { "yes" } else { "no" }
    ));

    match GpuInfo::detect() {
        Some(gpu) => {
            summary.push_str(&format!(
                "GPU: {}\n\
                 VRAM: {:.1}GB total, {:.1}GB available\n\
                 Driver: {}",
                gpu.name, gpu.vram_total_gb, gpu.vram_available_gb, gpu.driver_version
            ));
            if let Some(model) = model {
                summary.push_str(&format!(
                    "\n{} (~{:.1}GB weights): {}",
                    model.name,
                    model.weights_gb,
                    if gpu.fits(model) {
                        "fits in free VRAM"
                    } else {
                        "too large for free VRAM, expect CPU-speed runs"
                    }
                ));
            }
        }
        None => summary.push_str("No compatible GPU detected. Inference will use the CPU."),
    }

    summary
}
