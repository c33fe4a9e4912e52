#![forbid(unsafe_code)]

use std::{io, path::PathBuf, time::Duration};

use argh::FromArgs;
use simple_logger::SimpleLogger;

mod collector;
mod config;
mod error;
#[cfg(test)]
mod mock;
mod poll;
mod sampler;
mod session;

#[derive(FromArgs, Debug)]
#[argh(description = "Print CPU temperature, CPU usage and RAM usage of remote hosts over SSH.")]
struct ClientConfig {
    #[argh(
        option,
        short = 'c',
        default = "PathBuf::from(\"piprobe.toml\")",
        description = "path to the config file"
    )]
    pub config: PathBuf,
    #[argh(option, description = "stop after this many polling cycles")]
    pub cycles: Option<u64>,
    #[argh(
        option,
        description = "seconds to wait after polling each host, overrides the config file"
    )]
    pub delay: Option<u64>, // in seconds
}

fn main() -> anyhow::Result<()> {
    SimpleLogger::new().env().init()?;

    let cfg: ClientConfig = argh::from_env();
    log::debug!("Client config: {cfg:#?}");

    let conf = config::load(&cfg.config)?;
    log::debug!("Loaded config: {conf:#?}");

    let targets = conf.targets()?;
    let sample_delay = Duration::from_secs(cfg.delay.unwrap_or(conf.sample_delay));

    let connector = poll::SshConnector::new(conf.collector_options());
    let mut poller = poll::Poller::new(connector, targets, sample_delay);

    poller.run(&mut io::stdout().lock(), cfg.cycles)
}
