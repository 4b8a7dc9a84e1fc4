//! `ServiceSupervisor` backed by the `systemctl` command line tool.

use crate::parse::{parse_job_failure, parse_show_output, SHOW_PROPERTIES};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warden_core::{
    JobResult, ServiceSupervisor, SupervisorError, SupervisorResult, UnitStatus,
    UnitSubscription,
};

/// Default time allowed for a `systemctl show` query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How to invoke `systemctl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemctlConfig {
    /// Program to run, `systemctl` from `PATH` by default
    pub program: PathBuf,
    /// Arguments placed before every subcommand, e.g. `--host=admin@db1`
    pub global_args: Vec<String>,
    /// Talk to the user service manager instead of the system one
    pub user_mode: bool,
    /// Upper bound for status queries; start and stop jobs are not bounded
    pub query_timeout: Duration,
}

impl Default for SystemctlConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            global_args: Vec::new(),
            user_mode: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl SystemctlConfig {
    pub fn user() -> Self {
        Self {
            user_mode: true,
            ..Self::default()
        }
    }
}

/// Drives units with `systemctl start/stop --job-mode=fail` and observes them
/// by polling `systemctl show`.
#[derive(Debug, Clone)]
pub struct SystemctlSupervisor {
    config: SystemctlConfig,
}

impl SystemctlSupervisor {
    pub fn new(config: SystemctlConfig) -> Self {
        Self { config }
    }

    /// Create the supervisor and check that the service manager answers.
    pub async fn connect(config: SystemctlConfig) -> SupervisorResult<Self> {
        let supervisor = Self::new(config);
        let output = supervisor
            .query(&["show", "--property=Version"])
            .await
            .map_err(|e| SupervisorError::unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(SupervisorError::unavailable(stderr_of(&output)));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!(
            "Connected to {} service manager ({})",
            if supervisor.config.user_mode { "user" } else { "system" },
            version.trim()
        );
        Ok(supervisor)
    }

    pub fn config(&self) -> &SystemctlConfig {
        &self.config
    }

    /// Current status of `unit`, `None` if systemd does not know it.
    pub async fn unit_status(&self, unit: &str) -> SupervisorResult<Option<UnitStatus>> {
        let properties = format!("--property={}", SHOW_PROPERTIES);
        let output = self
            .query(&["show", &properties, unit])
            .await
            .map_err(|e| SupervisorError::subscription(unit, e.to_string()))?;

        if !output.status.success() {
            return Err(SupervisorError::subscription(unit, stderr_of(&output)));
        }
        Ok(parse_show_output(
            unit,
            &String::from_utf8_lossy(&output.stdout),
        ))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.config.program);
        command.args(&self.config.global_args);
        if self.config.user_mode {
            command.arg("--user");
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!("Running {} {}", self.config.program.display(), args.join(" "));
        self.command(args).output().await
    }

    async fn query(&self, args: &[&str]) -> std::io::Result<Output> {
        match tokio::time::timeout(self.config.query_timeout, self.run(args)).await {
            Ok(output) => output,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("systemctl {} timed out", args.join(" ")),
            )),
        }
    }
}

#[async_trait]
impl ServiceSupervisor for SystemctlSupervisor {
    async fn start_unit(&self, unit: &str) -> SupervisorResult<JobResult> {
        let output = self
            .run(&["start", "--job-mode=fail", unit])
            .await
            .map_err(|e| SupervisorError::start_failed(unit, e.to_string()))?;

        if output.status.success() {
            info!("Started {}", unit);
            return Ok(JobResult::Done);
        }

        let stderr = stderr_of(&output);
        match parse_job_failure(&stderr) {
            Some(result) => {
                warn!("Start job for {} finished with {}: {}", unit, result, stderr);
                Ok(result)
            }
            None => Err(SupervisorError::start_failed(unit, stderr)),
        }
    }

    async fn stop_unit(&self, unit: &str) -> SupervisorResult<()> {
        let output = self
            .run(&["stop", "--job-mode=fail", unit])
            .await
            .map_err(|e| SupervisorError::stop_failed(unit, e.to_string()))?;

        if output.status.success() {
            info!("Stopped {}", unit);
            Ok(())
        } else {
            Err(SupervisorError::stop_failed(unit, stderr_of(&output)))
        }
    }

    async fn subscribe_unit_changes(
        &self,
        unit: &str,
        interval: Duration,
    ) -> SupervisorResult<UnitSubscription> {
        let initial = self.unit_status(unit).await?;

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let _ = changes_tx.send(snapshot(unit, initial.clone()));

        let poller = StatusPoller {
            supervisor: self.clone(),
            unit: unit.to_string(),
            interval,
            last: initial,
            changes: changes_tx,
            errors: errors_tx,
        };
        tokio::spawn(poller.run());

        Ok(UnitSubscription {
            changes: changes_rx,
            errors: errors_rx,
        })
    }
}

/// Background task behind one subscription. Ends when the subscriber drops
/// the change stream.
struct StatusPoller {
    supervisor: SystemctlSupervisor,
    unit: String,
    interval: Duration,
    last: Option<UnitStatus>,
    changes: mpsc::UnboundedSender<warden_core::UnitSnapshot>,
    errors: mpsc::UnboundedSender<SupervisorError>,
}

impl StatusPoller {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.changes.closed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.supervisor.unit_status(&self.unit).await {
                Ok(status) if status != self.last => {
                    debug!("Unit {} changed: {:?}", self.unit, status);
                    self.last = status.clone();
                    if self.changes.send(snapshot(&self.unit, status)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Polling {} failed: {}", self.unit, e);
                    if self.errors.send(e).is_err() && self.changes.is_closed() {
                        break;
                    }
                }
            }
        }
        debug!("Stopped polling {}", self.unit);
    }
}

fn snapshot(unit: &str, status: Option<UnitStatus>) -> warden_core::UnitSnapshot {
    let mut snapshot = HashMap::new();
    snapshot.insert(unit.to_string(), status);
    snapshot
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("systemctl exited with {}", output.status)
    } else {
        stderr
    }
}
