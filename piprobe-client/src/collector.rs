use std::time::Duration;

use log::{debug, info};
use piprobe_proto::{HostIdentity, MetricReading};

use crate::{
    error::{CollectorError, ExecutionError, ParseError},
    sampler::{self, LocalSampler, SysinfoSampler},
    session::{Credentials, RemoteSession, SshOptions, SshSession},
};

/// Raspberry Pi firmware query, answers with `temp=<celsius>'C`
pub const TEMPERATURE_COMMAND: &str = "vcgencmd measure_temp";

/// Whether a remote command's exit status is checked before its output is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitStatusPolicy {
    /// Use stdout whatever the exit status is
    #[default]
    Ignore,
    /// Fail on a non-zero exit status
    Require,
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub ssh: SshOptions,
    pub exit_status: ExitStatusPolicy,
    pub cpu_sample_interval: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            ssh: SshOptions::default(),
            exit_status: ExitStatusPolicy::default(),
            cpu_sample_interval: sampler::DEFAULT_CPU_SAMPLE_INTERVAL,
        }
    }
}

/// Owns one session to a single host and reads its health metrics on demand.
///
/// The collector is open from construction until [`close`](Self::close) or drop.
/// Once closed, every accessor fails with [`ExecutionError::SessionClosed`];
/// there is no reconnection.
pub struct RemoteMetricsCollector<S: RemoteSession = SshSession, L: LocalSampler = SysinfoSampler>
{
    identity: HostIdentity,
    session: Option<S>,
    sampler: L,
    exit_status: ExitStatusPolicy,
}

impl RemoteMetricsCollector {
    pub fn open(
        identity: HostIdentity,
        credentials: &Credentials,
        options: &CollectorOptions,
    ) -> Result<Self, CollectorError> {
        let session = SshSession::connect(&identity.host, credentials, &options.ssh)?;
        Ok(Self::with_parts(
            identity,
            session,
            SysinfoSampler::new(options.cpu_sample_interval),
            options.exit_status,
        ))
    }
}

impl<S: RemoteSession, L: LocalSampler> RemoteMetricsCollector<S, L> {
    pub fn with_parts(
        identity: HostIdentity,
        session: S,
        sampler: L,
        exit_status: ExitStatusPolicy,
    ) -> Self {
        Self {
            identity,
            session: Some(session),
            sampler,
            exit_status,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut S, ExecutionError> {
        self.session.as_mut().ok_or(ExecutionError::SessionClosed)
    }

    /// Run `command` on the host and return its stdout.
    pub fn run_command(&mut self, command: &str) -> Result<String, CollectorError> {
        let exit_status = self.exit_status;
        let output = self.session()?.exec(command)?;

        if exit_status == ExitStatusPolicy::Require && output.exit_status != 0 {
            return Err(ExecutionError::NonZeroExit {
                command: command.to_owned(),
                status: output.exit_status,
                stderr: output.stderr.trim().to_owned(),
            }
            .into());
        }

        Ok(output.stdout)
    }

    /// CPU temperature in degrees Celsius, as printed by the firmware
    pub fn cpu_temperature(&mut self) -> Result<String, CollectorError> {
        let output = self.run_command(TEMPERATURE_COMMAND)?;
        Ok(parse_temperature(&output)?.to_owned())
    }

    pub fn cpu_usage_percent(&mut self) -> Result<f32, CollectorError> {
        self.session()?;
        Ok(sampler::clamp_percent(self.sampler.cpu_usage_percent()))
    }

    pub fn ram_usage_percent(&mut self) -> Result<f32, CollectorError> {
        self.session()?;
        Ok(sampler::clamp_percent(self.sampler.ram_usage_percent()))
    }

    pub fn read(&mut self) -> Result<MetricReading, CollectorError> {
        let reading = MetricReading {
            cpu_temperature: self.cpu_temperature()?,
            cpu_usage: self.cpu_usage_percent()?,
            ram_usage: self.ram_usage_percent()?,
        };
        debug!("{}: {reading:?}", self.identity);
        Ok(reading)
    }

    /// Release the session. Further calls are no-ops.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            info!("closing collector for {}", self.identity);
            session.close();
        }
    }
}

impl<S: RemoteSession, L: LocalSampler> Drop for RemoteMetricsCollector<S, L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extract `<value>` from `key=<value>'C`
fn parse_temperature(output: &str) -> Result<&str, ParseError> {
    let line = output.trim();
    let (_, rest) = line
        .split_once('=')
        .ok_or_else(|| ParseError::MissingSeparator(line.to_owned()))?;
    let value = rest
        .strip_suffix("'C")
        .ok_or_else(|| ParseError::MissingUnit(line.to_owned()))?;

    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(value),
        _ => Err(ParseError::InvalidNumber(line.to_owned())),
    }
}
