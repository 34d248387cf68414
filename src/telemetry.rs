//! Hardware stats shown next to the optimizer. Display only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStats
{   pub name: String
  , /// Percent, 0-100
    pub load: f32
  , /// MB
    pub memory_used: f32
  , /// MB
    pub memory_total: f32
  , /// Celsius
    pub temperature: f32
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStats
{   pub cpu_percent: f32
  , pub ram_percent: f32
  , pub gpu_found: bool
  , pub gpus: Vec<GpuStats>
}

impl SystemStats
{   /// Stats for a machine without a visible GPU
    pub fn cpu_only(cpu_percent: f32, ram_percent: f32) -> Self
    {   SystemStats
        {   cpu_percent
          , ram_percent
          , gpu_found: false
          , gpus: vec![]
        }
    }

    pub fn with_gpus(mut self, gpus: Vec<GpuStats>) -> Self
    {   self.gpu_found = !gpus.is_empty();
        self.gpus = gpus;
        self
    }
}

/// Polled by a UI; has no effect on optimization
pub trait TelemetrySource: Send + Sync
{   fn stats(&self) -> SystemStats;
}
