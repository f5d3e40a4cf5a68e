use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::PerformanceOverrides;
use crate::error::{JimakuError, Result};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

// Ascending VRAM breakpoints for tier selection (GiB).
const MID_THRESHOLD_GB: f64 = 10.0;
const HIGH_THRESHOLD_GB: f64 = 15.0;
const ULTRA_THRESHOLD_GB: f64 = 22.0;

// VRAM reserved for the display/OS, and the translation model's footprint.
const VRAM_SAFETY_BUFFER_GB: f64 = 4.0;
const TRANSLATION_OVERHEAD_GB: f64 = 8.1;

/// Immutable snapshot of host capability, taken once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub accelerator: Option<AcceleratorInfo>,
    pub logical_cpus: usize,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub memory_bytes: u64,
}

impl CapabilityDescriptor {
    pub fn accelerator_memory_gb(&self) -> Option<f64> {
        self.accelerator
            .as_ref()
            .map(|a| a.memory_bytes as f64 / GIB)
    }
}

/// Ordered performance tier, minimal to maximal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProfileTier {
    CpuOnly,
    Low,
    Mid,
    High,
    Ultra,
}

impl fmt::Display for ProfileTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileTier::CpuOnly => "CPU_ONLY",
            ProfileTier::Low => "LOW",
            ProfileTier::Mid => "MID",
            ProfileTier::High => "HIGH",
            ProfileTier::Ultra => "ULTRA",
        };
        write!(f, "{}", name)
    }
}

impl ProfileTier {
    fn batch_cap(&self) -> usize {
        match self {
            ProfileTier::Ultra => 32,
            ProfileTier::High => 16,
            ProfileTier::Mid => 8,
            ProfileTier::Low => 4,
            ProfileTier::CpuOnly => 1,
        }
    }
}

/// Numeric precision mode for model weights and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Float16,
    Int8Float16,
    Int8,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Precision::Float16 => "float16",
            Precision::Int8Float16 => "int8_float16",
            Precision::Int8 => "int8",
        };
        write!(f, "{}", name)
    }
}

/// Explicit device placement. Models bind to exactly one device; automatic
/// placement modes that can spill to host memory are never used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cuda(u32),
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda(index) => write!(f, "cuda:{}", index),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Settings derived from hardware capability, immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub tier: ProfileTier,
    pub device: Device,
    pub max_batch_size: usize,
    pub precision: Precision,
    pub beam_size: u32,
    pub thread_count: usize,
}

impl PerformanceProfile {
    /// Applies explicit user overrides from the config. Overrides win over
    /// derived values, except the batch ceiling never exceeds the tier cap.
    pub fn with_overrides(mut self, overrides: &PerformanceOverrides) -> Self {
        if let Some(batch) = overrides.batch_size {
            self.max_batch_size = batch.clamp(1, self.tier.batch_cap());
        }
        if let Some(beam) = overrides.beam_size {
            self.beam_size = beam.max(1);
        }
        if let Some(threads) = overrides.thread_count {
            self.thread_count = threads.max(1);
        }
        self
    }
}

/// Source of accelerator information, injectable for testing.
pub trait AcceleratorProbe {
    fn query(&self) -> Result<Option<AcceleratorInfo>>;
}

/// Probes NVIDIA hardware through nvidia-smi.
pub struct NvidiaSmiProbe;

impl AcceleratorProbe for NvidiaSmiProbe {
    fn query(&self) -> Result<Option<AcceleratorInfo>> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .map_err(|e| JimakuError::Hardware(format!("nvidia-smi not available: {}", e)))?;

        if !output.status.success() {
            return Err(JimakuError::Hardware(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(first_line) = stdout.lines().next() else {
            return Ok(None);
        };

        let Some((name, mem_mib)) = first_line.rsplit_once(',') else {
            return Err(JimakuError::Hardware(format!(
                "unexpected nvidia-smi output: {}",
                first_line
            )));
        };

        let mem_mib: u64 = mem_mib
            .trim()
            .parse()
            .map_err(|e| JimakuError::Hardware(format!("bad memory value: {}", e)))?;

        Ok(Some(AcceleratorInfo {
            name: name.trim().to_string(),
            memory_bytes: mem_mib * 1024 * 1024,
        }))
    }
}

/// Inspects host capability. A failing accelerator query is non-fatal: it
/// degrades to a CPU-only descriptor with a warning.
pub fn detect(probe: &dyn AcceleratorProbe) -> CapabilityDescriptor {
    let logical_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let accelerator = match probe.query() {
        Ok(info) => info,
        Err(e) => {
            warn!("Accelerator query failed ({}), falling back to CPU", e);
            None
        }
    };

    match &accelerator {
        Some(info) => info!(
            "Detected accelerator: {} ({:.1} GB)",
            info.name,
            info.memory_bytes as f64 / GIB
        ),
        None => info!("No accelerator detected, CPU-only mode"),
    }

    CapabilityDescriptor {
        accelerator,
        logical_cpus,
        arch: std::env::consts::ARCH.to_string(),
    }
}

/// Selects the performance profile by thresholding accelerator memory
/// against ascending breakpoints. No accelerator means the CPU-only tier.
pub fn select_profile(descriptor: &CapabilityDescriptor, num_beams: u32) -> PerformanceProfile {
    let Some(vram_gb) = descriptor.accelerator_memory_gb() else {
        return cpu_only_profile(descriptor);
    };

    let tier = if vram_gb >= ULTRA_THRESHOLD_GB {
        ProfileTier::Ultra
    } else if vram_gb >= HIGH_THRESHOLD_GB {
        ProfileTier::High
    } else if vram_gb >= MID_THRESHOLD_GB {
        ProfileTier::Mid
    } else {
        ProfileTier::Low
    };

    let max_batch_size = dynamic_batch_size(tier, vram_gb, num_beams);

    let precision = match tier {
        ProfileTier::Low => Precision::Int8Float16,
        _ => Precision::Float16,
    };

    let profile = PerformanceProfile {
        tier,
        device: Device::Cuda(0),
        max_batch_size,
        precision,
        beam_size: 5,
        thread_count: descriptor.logical_cpus,
    };

    debug!(
        "Selected profile {} (batch {}, precision {})",
        profile.tier, profile.max_batch_size, profile.precision
    );
    profile
}

fn cpu_only_profile(descriptor: &CapabilityDescriptor) -> PerformanceProfile {
    PerformanceProfile {
        tier: ProfileTier::CpuOnly,
        device: Device::Cpu,
        max_batch_size: 1,
        precision: Precision::Int8,
        beam_size: 5,
        thread_count: descriptor.logical_cpus.saturating_sub(2).max(1),
    }
}

/// Proportional batch sizing: usable VRAM after the safety buffer, minus the
/// model's own footprint, divided by the per-item cost. Wider beams roughly
/// double the per-item activation memory.
fn dynamic_batch_size(tier: ProfileTier, vram_gb: f64, num_beams: u32) -> usize {
    let target_vram = (vram_gb - VRAM_SAFETY_BUFFER_GB).max(4.0);
    let per_item = if num_beams <= 5 { 0.40 } else { 0.80 };
    let dynamic = ((target_vram - TRANSLATION_OVERHEAD_GB) / per_item).floor() as i64;
    (dynamic.max(1) as usize).min(tier.batch_cap())
}
