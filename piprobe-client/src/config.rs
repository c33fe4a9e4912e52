use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use confique::Config;
use piprobe_proto::HostIdentity;
use serde::Deserialize;

use crate::{
    collector::{CollectorOptions, ExitStatusPolicy},
    poll::Target,
    session::{Credentials, DEFAULT_SSH_PORT, HostKeyPolicy, SshOptions},
};

#[derive(Config, Debug)]
pub struct Conf {
    /// Seconds to wait after polling each host
    #[config(default = 5, env = "PIPROBE_SAMPLE_DELAY")]
    pub sample_delay: u64,

    /// Length of the CPU usage sampling window in milliseconds
    #[config(default = 1000, env = "PIPROBE_CPU_SAMPLE_INTERVAL_MS")]
    pub cpu_sample_interval_ms: u64,

    /// Host key verification: `accept-new` (default), `strict` or `accept-any`
    pub host_key_policy: Option<HostKeyPolicy>,

    /// Known hosts file, `~/.ssh/known_hosts` if unset
    pub known_hosts: Option<PathBuf>,

    /// Reject readings whose remote command exits with a non-zero status
    #[config(default = false, env = "PIPROBE_CHECK_EXIT_STATUS")]
    pub check_exit_status: bool,

    /// Hosts to poll, in order
    pub hosts: Vec<HostConf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConf {
    pub host: String,
    pub label: String,
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Environment variable holding the password
    pub password_env: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

pub fn load(path: &Path) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

impl Conf {
    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            ssh: SshOptions {
                port: DEFAULT_SSH_PORT,
                host_key_policy: self.host_key_policy.unwrap_or_default(),
                known_hosts: self.known_hosts.clone(),
            },
            exit_status: if self.check_exit_status {
                ExitStatusPolicy::Require
            } else {
                ExitStatusPolicy::Ignore
            },
            cpu_sample_interval: Duration::from_millis(self.cpu_sample_interval_ms),
        }
    }

    /// Resolve every host's password from the process environment.
    pub fn targets(&self) -> anyhow::Result<Vec<Target>> {
        self.targets_with(|name| std::env::var(name).ok())
    }

    fn targets_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Vec<Target>> {
        if self.hosts.is_empty() {
            anyhow::bail!("Config error: no hosts configured");
        }
        self.hosts.iter().map(|host| host.target(&lookup)).collect()
    }
}

impl HostConf {
    pub fn password_var(&self) -> String {
        self.password_env
            .clone()
            .unwrap_or_else(|| default_password_var(&self.label))
    }

    fn target(&self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Target> {
        let var = self.password_var();
        let password = lookup(&var).ok_or_else(|| {
            anyhow::anyhow!(
                "Config error: password for {} ({}) not set, export {var}",
                self.label,
                self.host
            )
        })?;

        Ok(Target {
            identity: HostIdentity::new(&self.host, &self.label),
            credentials: Credentials {
                username: self.username.clone(),
                password,
            },
            port: self.port,
        })
    }
}

/// `PIPROBE_<LABEL>_PASSWORD`, with the label uppercased and non-alphanumerics as `_`
pub fn default_password_var(label: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PIPROBE_{label}_PASSWORD")
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn load_str(toml: &str) -> anyhow::Result<Conf> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        file.write_all(toml.as_bytes())?;
        Ok(Conf::builder().file(file.path()).load()?)
    }

    const TWO_PIS: &str = r#"
        sample_delay = 2
        host_key_policy = "strict"
        known_hosts = "/tmp/piprobe_known_hosts"

        [[hosts]]
        host = "172.20.10.6"
        label = "Raspberry Pi 1"
        username = "pi"

        [[hosts]]
        host = "172.20.10.8"
        label = "Raspberry Pi 2"
        username = "jacks"
        port = 2222
        password_env = "PI2_PASSWORD"
    "#;

    #[test]
    fn test_load() {
        let conf = load_str(TWO_PIS).expect("config should load");

        assert_eq!(conf.sample_delay, 2);
        assert_eq!(conf.cpu_sample_interval_ms, 1000);
        assert!(!conf.check_exit_status);
        assert_eq!(conf.hosts.len(), 2);
        assert_eq!(conf.hosts[0].port, 22);
        assert_eq!(conf.hosts[1].port, 2222);

        let options = conf.collector_options();
        assert_eq!(options.ssh.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(
            options.ssh.known_hosts,
            Some(PathBuf::from("/tmp/piprobe_known_hosts"))
        );
        assert_eq!(options.exit_status, ExitStatusPolicy::Ignore);
        assert_eq!(options.cpu_sample_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_defaults() {
        let conf = load_str(
            r#"
            check_exit_status = true

            [[hosts]]
            host = "pi.local"
            label = "pi"
            username = "pi"
            "#,
        )
        .expect("config should load");

        assert_eq!(conf.sample_delay, 5);
        let options = conf.collector_options();
        assert_eq!(options.ssh.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(options.exit_status, ExitStatusPolicy::Require);
    }

    #[test]
    fn test_missing_hosts() {
        assert!(load_str("sample_delay = 1").is_err());
    }

    #[test]
    fn test_unknown_policy() {
        let res = load_str(
            r#"
            host_key_policy = "yolo"
            hosts = []
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_default_password_var() {
        assert_eq!(
            default_password_var("Raspberry Pi 1"),
            "PIPROBE_RASPBERRY_PI_1_PASSWORD"
        );
        assert_eq!(default_password_var("pi-2.lan"), "PIPROBE_PI_2_LAN_PASSWORD");
    }

    #[test]
    fn test_targets() {
        let conf = load_str(TWO_PIS).expect("config should load");
        let targets = conf
            .targets_with(|name| match name {
                "PIPROBE_RASPBERRY_PI_1_PASSWORD" => Some("1984".to_owned()),
                "PI2_PASSWORD" => Some("jacks".to_owned()),
                _ => None,
            })
            .expect("passwords are set");

        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets[0].identity,
            HostIdentity::new("172.20.10.6", "Raspberry Pi 1")
        );
        assert_eq!(targets[0].credentials.username, "pi");
        assert_eq!(targets[0].credentials.password, "1984");
        assert_eq!(targets[1].credentials.password, "jacks");
        assert_eq!(targets[1].port, 2222);
    }

    #[test]
    fn test_missing_password() {
        let conf = load_str(TWO_PIS).expect("config should load");
        let err = conf
            .targets_with(|name| (name == "PI2_PASSWORD").then(|| "jacks".to_owned()))
            .unwrap_err();

        assert!(err.to_string().contains("PIPROBE_RASPBERRY_PI_1_PASSWORD"));
    }

    #[test]
    fn test_no_hosts() {
        let conf = load_str("hosts = []").expect("config should load");
        assert!(conf.targets_with(|_| None).is_err());
    }
}
