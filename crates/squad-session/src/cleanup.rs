//! Kill session processes left behind by a previous run.
//!
//! Every hosted program is started with [`SESSION_MARKER_ENV`] set to its
//! session id, which its children inherit. Cleanup scans the process table
//! for that marker, so it finds orphans without any bookkeeping on disk.

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System, UpdateKind};

use crate::error::{Result, SessionError};

/// Environment variable carrying the sanitized session id.
pub const SESSION_MARKER_ENV: &str = "SQUAD_SESSION";

/// Kill every process whose session id starts with `prefix`.
///
/// Returns how many processes were killed. Processes that refuse to die are
/// reported together in [`SessionError::CleanupFailed`].
pub fn cleanup_sessions(prefix: &str) -> Result<usize> {
    kill_marked(|id| id.starts_with(prefix))
}

/// Kill every process carrying exactly the session id `id`.
pub fn kill_session_processes(id: &str) -> Result<usize> {
    kill_marked(|marker| marker == id)
}

fn kill_marked(select: impl Fn(&str) -> bool) -> Result<usize> {
    let mut sys = System::new();
    // The default refresh leaves environments unread.
    sys.refresh_processes_specifics(ProcessRefreshKind::new().with_environ(UpdateKind::Always));
    let current = sysinfo::get_current_pid().ok();

    let targets: Vec<(Pid, String)> = sys
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != current)
        .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
        .filter_map(|(pid, process)| {
            marker_value(process.environ())
                .filter(|id| select(id))
                .map(|id| (*pid, id.to_string()))
        })
        .collect();

    let mut killed = 0;
    let mut failures = Vec::new();
    for (pid, id) in targets {
        let sent = sys.process(pid).map(|process| process.kill());
        match sent {
            Some(true) => {
                log::info!("killed orphaned process {pid} of session {id}");
                killed += 1;
            }
            // Gone between the scan and the kill.
            None => {}
            Some(false) => {
                if still_running(&mut sys, pid) {
                    failures.push(format!("{id} (pid {pid})"));
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(killed)
    } else {
        log::warn!("could not kill {} session process(es)", failures.len());
        Err(SessionError::CleanupFailed(failures))
    }
}

fn still_running(sys: &mut System, pid: Pid) -> bool {
    sys.refresh_process(pid)
        && sys
            .process(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// The session id in a process environment, if it carries one.
pub fn marker_value(environ: &[String]) -> Option<&str> {
    environ.iter().find_map(|entry| {
        entry
            .strip_prefix(SESSION_MARKER_ENV)
            .and_then(|rest| rest.strip_prefix('='))
    })
}
