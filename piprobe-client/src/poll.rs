use std::{
    io::Write,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use piprobe_proto::HostIdentity;

use crate::{
    collector::{CollectorOptions, RemoteMetricsCollector},
    error::{CollectorError, ExecutionError},
    sampler::{LocalSampler, SysinfoSampler},
    session::{Credentials, RemoteSession, SshSession},
};

const RECONNECT_MINIMUM_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_MAXIMUM_INTERVAL: Duration = Duration::from_secs(300);

/// Everything needed to open a collector for one host.
#[derive(Debug, Clone)]
pub struct Target {
    pub identity: HostIdentity,
    pub credentials: Credentials,
    pub port: u16,
}

pub trait Connector {
    type Session: RemoteSession;
    type Sampler: LocalSampler;

    fn connect(
        &mut self,
        target: &Target,
    ) -> Result<RemoteMetricsCollector<Self::Session, Self::Sampler>, CollectorError>;
}

pub struct SshConnector {
    options: CollectorOptions,
}

impl SshConnector {
    pub fn new(options: CollectorOptions) -> Self {
        Self { options }
    }
}

impl Connector for SshConnector {
    type Session = SshSession;
    type Sampler = SysinfoSampler;

    fn connect(&mut self, target: &Target) -> Result<RemoteMetricsCollector, CollectorError> {
        let mut options = self.options.clone();
        options.ssh.port = target.port;
        RemoteMetricsCollector::open(target.identity.clone(), &target.credentials, &options)
    }
}

/// Polls every configured host in turn, forever or for a fixed number of cycles.
///
/// A failing host is logged and skipped; it never stops the others from being
/// polled. Hosts whose session is lost are reopened with exponential backoff.
pub struct Poller<C: Connector> {
    connector: C,
    slots: Vec<HostSlot<C::Session, C::Sampler>>,
    sample_delay: Duration,
}

struct HostSlot<S: RemoteSession, L: LocalSampler> {
    target: Target,
    collector: Option<RemoteMetricsCollector<S, L>>,
    backoff: ReconnectBackoff,
}

impl<C: Connector> Poller<C> {
    pub fn new(connector: C, targets: Vec<Target>, sample_delay: Duration) -> Self {
        Self::with_backoff(
            connector,
            targets,
            sample_delay,
            RECONNECT_MINIMUM_INTERVAL,
            RECONNECT_MAXIMUM_INTERVAL,
        )
    }

    fn with_backoff(
        connector: C,
        targets: Vec<Target>,
        sample_delay: Duration,
        minimal_interval: Duration,
        maximal_interval: Duration,
    ) -> Self {
        let slots = targets
            .into_iter()
            .map(|target| HostSlot {
                target,
                collector: None,
                backoff: ReconnectBackoff::new(minimal_interval, maximal_interval),
            })
            .collect();

        Self {
            connector,
            slots,
            sample_delay,
        }
    }

    /// Run `cycles` polling cycles, or forever when `None`.
    pub fn run<W: Write>(&mut self, out: &mut W, cycles: Option<u64>) -> anyhow::Result<()> {
        let mut done = 0;
        while cycles.is_none_or(|cycles| done < cycles) {
            self.cycle(out)?;
            done += 1;
        }

        self.close_all();
        Ok(())
    }

    /// Poll every host once. Only a failure to write the output is returned.
    pub fn cycle<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        for slot in &mut self.slots {
            slot.poll(&mut self.connector, out)?;
            out.flush()?;

            if !self.sample_delay.is_zero() {
                std::thread::sleep(self.sample_delay);
            }
        }
        Ok(())
    }

    pub fn close_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut collector) = slot.collector.take() {
                collector.close();
            }
        }
    }
}

impl<S: RemoteSession, L: LocalSampler> HostSlot<S, L> {
    fn poll<C, W>(&mut self, connector: &mut C, out: &mut W) -> std::io::Result<()>
    where
        C: Connector<Session = S, Sampler = L>,
        W: Write,
    {
        let identity = &self.target.identity;

        if self.collector.is_none() {
            let now = Instant::now();
            if !self.backoff.is_ready(now) {
                debug!("{identity}: waiting before reconnecting");
                return Ok(());
            }
            match connector.connect(&self.target) {
                Ok(collector) => {
                    self.backoff.reset();
                    self.collector = Some(collector);
                }
                Err(e) => {
                    let wait = self.backoff.failed(now);
                    warn!("{identity}: {e}");
                    info!("{identity}: reconnecting in {} seconds...", wait.as_secs());
                    return Ok(());
                }
            }
        }
        let Some(collector) = self.collector.as_mut() else {
            return Ok(());
        };

        match collector.read() {
            Ok(reading) => writeln!(out, "{identity}\n{reading}\n")?,
            // the host answered, so the session is still usable
            Err(
                e @ (CollectorError::Parse(_)
                | CollectorError::Execution(ExecutionError::NonZeroExit { .. })),
            ) => warn!("{identity}: {e}"),
            Err(e) => {
                warn!("{identity}: {e}");
                collector.close();
                self.collector = None;
                let wait = self.backoff.failed(Instant::now());
                info!("{identity}: reconnecting in {} seconds...", wait.as_secs());
            }
        }
        Ok(())
    }
}

/// Per-host exponential backoff between reconnection attempts.
#[derive(Debug)]
struct ReconnectBackoff {
    minimal_interval: Duration,
    maximal_interval: Duration,
    curr_interval: Duration,
    next_attempt: Option<Instant>,
}

impl ReconnectBackoff {
    fn new(minimal_interval: Duration, maximal_interval: Duration) -> Self {
        debug_assert!(minimal_interval <= maximal_interval);

        Self {
            minimal_interval,
            maximal_interval,
            curr_interval: minimal_interval,
            next_attempt: None,
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Schedule the next attempt and return how long it is deferred
    fn failed(&mut self, now: Instant) -> Duration {
        let wait = self.curr_interval;
        self.next_attempt = Some(now + wait);
        self.curr_interval = (self.curr_interval * 2).min(self.maximal_interval);
        wait
    }

    fn reset(&mut self) {
        self.curr_interval = self.minimal_interval;
        self.next_attempt = None;
    }
}
