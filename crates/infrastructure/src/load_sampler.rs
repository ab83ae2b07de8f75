use std::sync::Mutex;

use mcu_core::LoadSampler;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// 采样本机CPU或内存使用率（百分比）
pub struct SystemLoadSampler {
    item: String,
    system: Mutex<System>,
}

impl SystemLoadSampler {
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
        }
    }
}

impl LoadSampler for SystemLoadSampler {
    fn item(&self) -> &str {
        &self.item
    }

    fn sample(&self) -> f64 {
        let Ok(mut system) = self.system.lock() else {
            return 0.0;
        };
        match self.item.as_str() {
            "memory" | "mem" => {
                system.refresh_memory();
                let total = system.total_memory();
                if total == 0 {
                    0.0
                } else {
                    system.used_memory() as f64 / total as f64 * 100.0
                }
            }
            _ => {
                system.refresh_cpu_all();
                f64::from(system.global_cpu_usage())
            }
        }
    }
}

/// 返回固定值的采样器，mock模式和测试使用
pub struct FixedLoadSampler {
    item: String,
    value: f64,
}

impl FixedLoadSampler {
    pub fn new(item: impl Into<String>, value: f64) -> Self {
        Self {
            item: item.into(),
            value,
        }
    }
}

impl LoadSampler for FixedLoadSampler {
    fn item(&self) -> &str {
        &self.item
    }

    fn sample(&self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_sampler_reports_percentage() {
        let sampler = SystemLoadSampler::new("memory");
        let value = sampler.sample();
        assert!((0.0..=100.0).contains(&value));
        assert_eq!(sampler.item(), "memory");
    }
}
