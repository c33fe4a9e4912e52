use std::time::Duration;

pub const DEFAULT_CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Host-side source of CPU and memory utilization.
pub trait LocalSampler {
    /// Global CPU utilization over a short sampling window, in percent
    fn cpu_usage_percent(&mut self) -> f32;
    /// Used share of total memory, in percent
    fn ram_usage_percent(&mut self) -> f32;
}

#[derive(Debug)]
pub struct SysinfoSampler {
    system: sysinfo::System,
    interval: Duration,
}

impl SysinfoSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            system: sysinfo::System::new(),
            interval: interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl LocalSampler for SysinfoSampler {
    fn cpu_usage_percent(&mut self) -> f32 {
        // usage is computed from the difference between two refreshes
        self.system.refresh_cpu_usage();
        std::thread::sleep(self.interval);
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }

    fn ram_usage_percent(&mut self) -> f32 {
        self.system.refresh_memory();
        used_percent(self.system.used_memory(), self.system.total_memory())
    }
}

fn used_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

pub(crate) fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cpu_usage_percent() {
        let mut sampler = SysinfoSampler::new(Duration::ZERO);
        let usage = sampler.cpu_usage_percent();

        println!("{usage}");
        assert!((0.0..=100.0).contains(&clamp_percent(usage)));
    }

    #[test]
    fn test_ram_usage_percent() {
        let mut sampler = SysinfoSampler::new(DEFAULT_CPU_SAMPLE_INTERVAL);
        let usage = sampler.ram_usage_percent();

        println!("{usage}");
        assert!((0.0..=100.0).contains(&usage));
    }

    #[test]
    fn test_interval_floor() {
        let sampler = SysinfoSampler::new(Duration::ZERO);
        assert_eq!(sampler.interval, sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[test]
    fn test_used_percent() {
        assert_eq!(used_percent(0, 0), 0.0);
        assert_eq!(used_percent(512, 1024), 50.0);
        assert_eq!(used_percent(1024, 1024), 100.0);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(117.5), 100.0);
        assert_eq!(clamp_percent(f32::NAN), 0.0);
        assert_eq!(clamp_percent(63.2), 63.2);
    }
}
