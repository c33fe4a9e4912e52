use serde::{Deserialize, Serialize};

/// Display identity of a polled host. Has no effect on how the host is polled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostIdentity {
    pub host: String,
    pub label: String,
}

impl HostIdentity {
    pub fn new(host: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            label: label.into(),
        }
    }
}

impl std::fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.host)
    }
}

/// One on-demand sample of a host's health metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    /// Degrees Celsius, exactly as reported by the diagnostic command
    pub cpu_temperature: String,
    /// Percentage in `[0, 100]`
    pub cpu_usage: f32,
    /// Percentage in `[0, 100]`
    pub ram_usage: f32,
}

impl std::fmt::Display for MetricReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CPU temp: {} C", self.cpu_temperature)?;
        writeln!(f, "CPU usage: {:.1}%", self.cpu_usage)?;
        write!(f, "RAM usage: {:.1}%", self.ram_usage)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = HostIdentity::new("172.20.10.6", "Raspberry Pi 1");
        assert_eq!(identity.to_string(), "Raspberry Pi 1 (172.20.10.6)");
    }

    #[test]
    fn test_reading_display() {
        let reading = MetricReading {
            cpu_temperature: "42.0".to_owned(),
            cpu_usage: 17.5,
            ram_usage: 63.2,
        };
        assert_eq!(
            reading.to_string(),
            "CPU temp: 42.0 C\nCPU usage: 17.5%\nRAM usage: 63.2%"
        );
    }

    #[test]
    fn test_reading_display_rounds_percentages() {
        let reading = MetricReading {
            cpu_temperature: "51.5".to_owned(),
            cpu_usage: 12.345679,
            ram_usage: 40.0,
        };
        assert_eq!(
            reading.to_string(),
            "CPU temp: 51.5 C\nCPU usage: 12.3%\nRAM usage: 40.0%"
        );
    }
}
