//! Command line, environment overlay and the resolved daemon settings.
//!
//! Every value flag can also come from the environment. For identifier `web`
//! and flag `etcd-servers` the lookup order is:
//!
//! 1. `--etcd-servers`
//! 2. `WARDEN_WEB_ETCD_SERVERS`
//! 3. `WARDEN_ETCD_SERVERS`
//! 4. the built-in default
//!
//! Empty variables count as unset.

use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use warden_core::config::{
    environment_prefixes, parse_duration, to_environment_key, validate_identifier,
    DEFAULT_POLL_INTERVAL, DEFAULT_TTL_SECS,
};
use warden_core::{ConfigError, ElectionConfig};
use warden_etcd::{EtcdConfig, EtcdError, DEFAULT_ENDPOINT};

/// Base prefix of every environment variable the daemon reads.
pub const ENV_PREFIX: &str = "WARDEN";

/// Run a systemd unit on whichever host holds an etcd lease.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated list of etcd client URLs [default: http://localhost:2379]
    #[arg(long, value_name = "URLS")]
    pub etcd_servers: Option<String>,

    /// Lifetime of the lease in seconds [default: 30]
    #[arg(long, value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// Time between two lease checks, e.g. 5s or 500ms [default: 5s]
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub sleep: Option<Duration>,

    /// Value identifying this instance in the lease [default: host name]
    #[arg(long, value_name = "TOKEN")]
    pub whoami: Option<String>,

    /// Unit to start while leading [default: <IDENTIFIER>.service]
    #[arg(long, value_name = "UNIT")]
    pub unit: Option<String>,

    /// Lease key [default: /warden/<IDENTIFIER>]
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,

    /// Use the user service manager instead of the system one
    #[arg(long)]
    pub user: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Print the resolved settings as JSON and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Name of the supervised service
    #[arg(value_name = "IDENTIFIER")]
    pub identifier: String,
}

/// Fully resolved daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub identifier: String,
    pub etcd_servers: Vec<String>,
    pub election: ElectionConfig,
    pub user_mode: bool,
    pub log_json: bool,
    #[serde(skip)]
    pub dry_run: bool,
}

impl Settings {
    pub fn etcd_config(&self) -> Result<EtcdConfig, EtcdError> {
        EtcdConfig::new(&self.etcd_servers)
    }
}

/// Reads `<prefix>_<FLAG>` variables, most specific prefix first.
pub struct EnvironmentOverlay<L> {
    prefixes: [String; 2],
    lookup: L,
}

impl<L> EnvironmentOverlay<L>
where
    L: Fn(&str) -> Option<String>,
{
    pub fn new(base: &str, identifier: &str, lookup: L) -> Self {
        Self {
            prefixes: environment_prefixes(base, identifier),
            lookup,
        }
    }

    /// First non-empty variable for `flag`, as `(variable, value)`.
    pub fn get(&self, flag: &str) -> Option<(String, String)> {
        let suffix = to_environment_key(flag);
        self.prefixes.iter().find_map(|prefix| {
            let variable = format!("{}_{}", prefix, suffix);
            (self.lookup)(&variable)
                .filter(|value| !value.is_empty())
                .map(|value| (variable, value))
        })
    }

    pub fn parse<T>(
        &self,
        flag: &str,
        parser: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        match self.get(flag) {
            None => Ok(None),
            Some((variable, value)) => parser(&value).map(Some).map_err(|reason| {
                ConfigError::InvalidEnvironment {
                    variable,
                    value,
                    reason,
                }
            }),
        }
    }

    /// `flag_value` when given on the command line, the environment otherwise.
    fn layered<T>(
        &self,
        flag_value: Option<T>,
        flag: &str,
        parser: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        match flag_value {
            Some(value) => Ok(Some(value)),
            None => self.parse(flag, parser),
        }
    }
}

impl Cli {
    /// Resolve against the process environment and the local host name.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        self.resolve_with(|variable| std::env::var(variable).ok(), host_name)
    }

    /// Resolve with an injected environment and host name source. The host
    /// name is only asked for when no `whoami` value is configured.
    pub fn resolve_with<L, H>(self, lookup: L, host_name: H) -> Result<Settings, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
        H: FnOnce() -> Result<String, ConfigError>,
    {
        validate_identifier(&self.identifier)?;
        let env = EnvironmentOverlay::new(ENV_PREFIX, &self.identifier, lookup);

        let etcd_servers = env
            .layered(self.etcd_servers, "etcd-servers", parse_string)?
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let etcd_servers = split_list(&etcd_servers);
        EtcdConfig::new(&etcd_servers)
            .map_err(|e| ConfigError::invalid_value("etcd-servers", e.to_string()))?;

        let ttl_secs = env
            .layered(self.ttl, "ttl", parse_seconds)?
            .unwrap_or(DEFAULT_TTL_SECS);
        let poll_interval = env
            .layered(self.sleep, "sleep", parse_duration)?
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let whoami = match env.layered(self.whoami, "whoami", parse_string)? {
            Some(whoami) => whoami,
            None => host_name()?,
        };

        let mut election = ElectionConfig::for_identifier(&self.identifier, whoami)?
            .with_ttl_secs(ttl_secs)
            .with_poll_interval(poll_interval);
        if let Some(unit) = env.layered(self.unit, "unit", parse_string)? {
            election = election.with_unit_name(unit);
        }
        if let Some(key) = env.layered(self.key, "key", parse_string)? {
            election = election.with_lease_key(key);
        }
        election.validate()?;

        Ok(Settings {
            identifier: self.identifier,
            etcd_servers,
            election,
            user_mode: self.user,
            log_json: self.log_json,
            dry_run: self.dry_run,
        })
    }
}

/// Host name of this machine, the default instance token.
pub fn host_name() -> Result<String, ConfigError> {
    let name = nix::unistd::gethostname().map_err(|e| ConfigError::HostIdentity {
        reason: e.to_string(),
    })?;
    let name = name.into_string().map_err(|raw| ConfigError::HostIdentity {
        reason: format!("host name {:?} is not valid UTF-8", raw),
    })?;
    if name.is_empty() {
        return Err(ConfigError::HostIdentity {
            reason: "host name is empty".to_string(),
        });
    }
    Ok(name)
}

fn parse_string(value: &str) -> Result<String, String> {
    Ok(value.to_string())
}

fn parse_seconds(value: &str) -> Result<u64, String> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| e.to_string())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
