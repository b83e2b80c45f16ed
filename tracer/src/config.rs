//! Driver configuration, loaded from JSON and overridden from the command line.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use simd_assembler::{ActiveProfile, Budget, ElementWidth, Target, R16, R8};
use tracer_pool::AddressMode;

/// Which address window frame memory is carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSetting {
    /// 64-bit window.
    Wide,
    /// 32-bit window.
    Low32,
}

impl From<AddressSetting> for AddressMode {
    fn from(setting: AddressSetting) -> Self {
        match setting {
            AddressSetting::Wide => AddressMode::Wide,
            AddressSetting::Low32 => AddressMode::Low32,
        }
    }
}

/// Runtime configuration of the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Visible width in pixels.
    pub x_res: usize,
    /// Height in rows.
    pub y_res: usize,
    /// Row pitch in pixels; `0` means `x_res`.
    pub x_row: usize,
    /// Worker threads; `0` means available parallelism.
    pub threads: usize,
    /// Frames to render.
    pub frames: u32,
    /// Address window for frame memory.
    pub address_mode: AddressSetting,
    /// Profile name, e.g. `a64_256`.
    pub profile: String,
    /// 64-bit lanes instead of 32-bit.
    pub fp64: bool,
    /// Vector register budget, `8` or `16`.
    pub registers: u8,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            x_res: 800,
            y_res: 480,
            x_row: 0,
            threads: 0,
            frames: 4,
            address_mode: AddressSetting::Wide,
            profile: ActiveProfile::NAME.to_owned(),
            fp64: ActiveProfile::ELEMENT == ElementWidth::W64,
            registers: <<ActiveProfile as Target>::Regs as Budget>::LIMIT,
        }
    }
}

impl TracerConfig {
    /// Read a JSON config file; missing keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Row pitch with the `0` default resolved.
    pub fn row_pitch(&self) -> usize {
        if self.x_row == 0 {
            self.x_res
        } else {
            self.x_row
        }
    }

    /// Worker count with the `0` default resolved.
    pub fn worker_count(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism().map_or(1, usize::from)
        } else {
            self.threads
        }
    }

    /// Reject settings the renderer cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.x_res == 0 || self.y_res == 0 {
            bail!("resolution {}x{} is empty", self.x_res, self.y_res);
        }
        if self.row_pitch() < self.x_res {
            bail!("row pitch {} is narrower than x_res {}", self.x_row, self.x_res);
        }
        if self.worker_count() > self.y_res {
            bail!(
                "{} workers for {} rows leaves workers without a band",
                self.worker_count(),
                self.y_res
            );
        }
        if self.worker_count() > 256 {
            bail!("at most 256 workers are supported");
        }
        if self.registers != R8::LIMIT && self.registers != R16::LIMIT {
            bail!(
                "register budget {} is not one of {} or {}",
                self.registers,
                R8::LIMIT,
                R16::LIMIT
            );
        }
        Ok(())
    }
}
