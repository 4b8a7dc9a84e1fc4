//! # Warden systemd adapter
//!
//! [`SystemctlSupervisor`] implements [`warden_core::ServiceSupervisor`] by
//! shelling out to `systemctl`:
//!
//! - start and stop run with `--job-mode=fail` and wait for the job result
//! - unit changes are observed by polling `systemctl show` at the
//!   subscription interval; a snapshot is emitted only when the status changes
//! - `--user` targets the calling user's service manager

pub mod parse;
pub mod systemctl;

pub use parse::{parse_job_failure, parse_show_output};
pub use systemctl::{SystemctlConfig, SystemctlSupervisor};
