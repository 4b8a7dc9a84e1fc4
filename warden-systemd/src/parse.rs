//! Parsers for `systemctl` output.

use warden_core::{ActiveState, JobResult, UnitStatus};

/// Properties requested from `systemctl show`.
pub const SHOW_PROPERTIES: &str = "Id,LoadState,ActiveState,SubState";

/// Parse the `Key=Value` lines of `systemctl show -p Id,LoadState,ActiveState,SubState`.
///
/// Returns `None` when systemd does not know the unit.
pub fn parse_show_output(unit: &str, output: &str) -> Option<UnitStatus> {
    let mut id = None;
    let mut load_state = None;
    let mut active_state = None;
    let mut sub_state = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Id" if !value.is_empty() => id = Some(value),
            "LoadState" => load_state = Some(value),
            "ActiveState" => active_state = Some(value),
            "SubState" => sub_state = Some(value),
            _ => {}
        }
    }

    match load_state {
        None | Some("not-found") => None,
        Some(load_state) => Some(UnitStatus {
            name: id.unwrap_or(unit).to_string(),
            load_state: load_state.to_string(),
            active_state: ActiveState::parse(active_state.unwrap_or("inactive")),
            sub_state: sub_state.unwrap_or_default().to_string(),
        }),
    }
}

/// Recover the job result from the message `systemctl start` prints when the
/// job did not finish with `done`.
///
/// Returns `None` when the job was never enqueued (unknown unit, conflicting
/// transaction, no bus), which is an error rather than a job result.
pub fn parse_job_failure(stderr: &str) -> Option<JobResult> {
    let message = stderr.to_lowercase();

    if message.contains("a dependency job for") {
        Some(JobResult::Dependency)
    } else if !message.contains("job for") {
        None
    } else if message.contains("timeout") || message.contains("timed out") {
        Some(JobResult::Timeout)
    } else if message.contains("canceled") || message.contains("cancelled") {
        Some(JobResult::Canceled)
    } else if message.contains("failed") {
        Some(JobResult::Failed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = "web.service";

    #[test]
    fn test_parse_running_unit() {
        let output = "Id=web.service\nLoadState=loaded\nActiveState=active\nSubState=running\n";
        let status = parse_show_output(UNIT, output).unwrap();
        assert_eq!(status, UnitStatus::new(UNIT, ActiveState::Active));
    }

    #[test]
    fn test_parse_failed_unit_in_any_order() {
        let output = "SubState=failed\nActiveState=failed\nLoadState=loaded\nId=web.service\n";
        let status = parse_show_output(UNIT, output).unwrap();
        assert!(status.active_state.is_failed());
        assert_eq!(status.sub_state, "failed");
    }

    #[test]
    fn test_parse_unknown_unit() {
        let output = "Id=web.service\nLoadState=not-found\nActiveState=inactive\nSubState=dead\n";
        assert_eq!(parse_show_output(UNIT, output), None);
        assert_eq!(parse_show_output(UNIT, ""), None);
    }

    #[test]
    fn test_parse_uses_requested_name_without_id() {
        let output = "LoadState=loaded\nActiveState=activating\nSubState=start\n";
        let status = parse_show_output(UNIT, output).unwrap();
        assert_eq!(status.name, UNIT);
        assert_eq!(status.active_state, ActiveState::Activating);
    }

    #[test]
    fn test_job_failures() {
        assert_eq!(
            parse_job_failure(
                "Job for web.service failed because the control process exited with error code.\n"
            ),
            Some(JobResult::Failed)
        );
        assert_eq!(
            parse_job_failure("Job for web.service failed because a timeout was exceeded.\n"),
            Some(JobResult::Timeout)
        );
        assert_eq!(
            parse_job_failure("Job for web.service canceled.\n"),
            Some(JobResult::Canceled)
        );
        assert_eq!(
            parse_job_failure("A dependency job for web.service failed. See 'journalctl -xe' for details.\n"),
            Some(JobResult::Dependency)
        );
    }

    #[test]
    fn test_errors_are_not_job_results() {
        assert_eq!(
            parse_job_failure("Failed to start web.service: Unit web.service not found.\n"),
            None
        );
        assert_eq!(
            parse_job_failure("Failed to connect to bus: No such file or directory\n"),
            None
        );
    }
}
