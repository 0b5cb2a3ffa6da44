use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Instant;

use squad_pty::{HostOptions, HostedTerminal, SpawnOptions};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::attach::{spawn_bridge, AttachHandle, DetachSignal, RawModeGuard};
use crate::backend::SessionBackend;
use crate::capture::CaptureRange;
use crate::cleanup::{kill_session_processes, SESSION_MARKER_ENV};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::monitor::{ContentTracker, PromptMatcher};
use crate::naming::sanitize_with_prefix;

/// Lifecycle of a session: `NotStarted -> Running -> Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Closed,
}

struct Lifecycle {
    state: SessionState,
    /// Present exactly while `state` is `Running`.
    host: Option<Arc<HostedTerminal>>,
}

/// One managed terminal session: a program hosted in a PTY, identified by a
/// sanitized name.
///
/// Start, Close and Restore take the lifecycle lock exclusively; every other
/// operation takes it shared just long enough to clone the host handle, so
/// slow captures or an attached client never block Close.
pub struct TerminalSession {
    name: String,
    sanitized_name: String,
    program: String,
    config: Arc<SessionConfig>,
    prompts: PromptMatcher,
    lifecycle: RwLock<Lifecycle>,
    content: ContentTracker,
    bridge: Mutex<Option<DetachSignal>>,
}

impl TerminalSession {
    /// Create a session with the default configuration. No side effects.
    pub fn new(name: &str, program: &str) -> Self {
        Self::with_config(name, program, Arc::new(SessionConfig::default()))
    }

    pub fn with_config(name: &str, program: &str, config: Arc<SessionConfig>) -> Self {
        let sanitized_name = sanitize_with_prefix(&config.name_prefix, name);
        let prompts = PromptMatcher::new(config.prompt_patterns.as_slice());
        Self {
            name: name.to_string(),
            sanitized_name,
            program: program.to_string(),
            config,
            prompts,
            lifecycle: RwLock::new(Lifecycle {
                state: SessionState::NotStarted,
                host: None,
            }),
            content: ContentTracker::default(),
            bridge: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sanitized_name(&self) -> &str {
        &self.sanitized_name
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    /// OS process id of the hosted program while running.
    pub fn process_id(&self) -> Option<u32> {
        self.lifecycle().host.as_ref()?.process_id()
    }

    /// Title set by the program, falling back to the session name.
    pub fn title(&self) -> String {
        self.lifecycle()
            .host
            .as_ref()
            .and_then(|host| host.title())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Bridge arbitrary async I/O to the session. Replaces any active bridge.
    pub fn attach_with<R, W>(&self, input: R, output: W) -> Result<AttachHandle>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let host = self.running_host()?;
        self.bridge(host, input, output, None, None)
    }

    /// Start a bridge, first resizing the PTY to the client's terminal.
    fn bridge<R, W>(
        &self,
        host: Arc<HostedTerminal>,
        input: R,
        output: W,
        client_size: Option<(u16, u16)>,
        raw_mode: Option<RawModeGuard>,
    ) -> Result<AttachHandle>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if let Some((cols, rows)) = client_size.filter(|&(cols, rows)| cols > 0 && rows > 0) {
            if let Err(e) = host.resize(cols, rows) {
                log::warn!("failed to match {} to the client size: {e}", self.sanitized_name);
            }
        }
        let handle = spawn_bridge(
            &self.sanitized_name,
            host,
            input,
            output,
            self.config.detach_key,
            raw_mode,
        )?;
        if let Some(previous) = self.bridge_slot().replace(handle.signal()) {
            previous.detach();
        }
        Ok(handle)
    }

    fn lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle_mut(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bridge_slot(&self) -> MutexGuard<'_, Option<DetachSignal>> {
        self.bridge.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running_host(&self) -> Result<Arc<HostedTerminal>> {
        let lifecycle = self.lifecycle();
        match (&lifecycle.state, &lifecycle.host) {
            (SessionState::Running, Some(host)) => Ok(Arc::clone(host)),
            _ => Err(SessionError::NotRunning(self.sanitized_name.clone())),
        }
    }

    fn spawn_options(&self, work_dir: &Path) -> Result<SpawnOptions> {
        let argv = shell_words::split(&self.program).map_err(|e| {
            SessionError::LaunchFailed(format!("cannot parse program {:?}: {e}", self.program))
        })?;
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| SessionError::LaunchFailed("empty program".to_string()))?;

        let mut spawn = SpawnOptions::new(program)
            .args(argv)
            .size(self.config.cols, self.config.rows)
            .env(SESSION_MARKER_ENV, &self.sanitized_name)
            .env("TERM", &self.config.term);

        if !work_dir.as_os_str().is_empty() {
            if !work_dir.is_dir() {
                return Err(SessionError::LaunchFailed(format!(
                    "working directory {} does not exist",
                    work_dir.display()
                )));
            }
            spawn = spawn.cwd(work_dir);
        }
        Ok(spawn)
    }

    fn host_options(&self) -> HostOptions {
        HostOptions {
            scrollback: self.config.scrollback_lines,
            replay_bytes: self.config.replay_buffer_bytes,
            label: self.sanitized_name.clone(),
        }
    }

    /// Poll until the program has produced output or the startup window
    /// closes. A program that exits first is a failed launch.
    fn await_ready(&self, host: &HostedTerminal) -> Result<()> {
        let deadline = Instant::now() + self.config.startup_timeout();
        loop {
            if let Some(code) = host.try_wait() {
                if let Err(e) = host.shutdown(self.config.close_timeout()) {
                    log::warn!("cleanup after failed launch of {}: {e}", self.sanitized_name);
                }
                return Err(SessionError::LaunchFailed(format!(
                    "{} exited with status {code} during startup",
                    self.program
                )));
            }
            if host.has_output() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::debug!(
                    "{} produced no output within {:?}; treating it as ready",
                    self.sanitized_name,
                    self.config.startup_timeout()
                );
                return Ok(());
            }
            thread::sleep(self.config.startup_poll());
        }
    }

    fn capture(&self, host: &HostedTerminal, range: CaptureRange) -> Result<String> {
        host.with_screen(|screen| {
            let (first, last) = range.resolve(screen.first_line(), screen.last_line());
            screen.text_range(first, last)
        })
        .map_err(|e| SessionError::CaptureUnavailable(e.to_string()))
    }
}

impl SessionBackend for TerminalSession {
    fn start(&self, work_dir: &Path) -> Result<()> {
        let mut lifecycle = self.lifecycle_mut();
        if lifecycle.state == SessionState::Running {
            return Err(SessionError::AlreadyRunning(self.sanitized_name.clone()));
        }

        let spawn = self.spawn_options(work_dir)?;
        let host = HostedTerminal::launch(&spawn, &self.host_options())
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;
        self.await_ready(&host)?;

        log::info!(
            "started session {} running {:?} (pid {:?})",
            self.sanitized_name,
            self.program,
            host.process_id()
        );
        lifecycle.host = Some(Arc::new(host));
        lifecycle.state = SessionState::Running;
        drop(lifecycle);

        // Outside the lifecycle lock: pollers take the tracker lock first.
        self.content.reset();
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle_mut();
        if lifecycle.state != SessionState::Running {
            return Ok(());
        }
        if lifecycle.host.as_ref().is_some_and(|host| host.is_alive()) {
            return Ok(());
        }

        log::info!("session {} is no longer running", self.sanitized_name);
        if let Some(host) = lifecycle.host.take() {
            if let Err(e) = host.shutdown(self.config.close_timeout()) {
                log::warn!("releasing {}: {e}", self.sanitized_name);
            }
        }
        lifecycle.state = SessionState::Closed;
        drop(lifecycle);
        self.detach_safely()
    }

    fn exists(&self) -> bool {
        self.lifecycle()
            .host
            .as_ref()
            .is_some_and(|host| host.is_alive())
    }

    fn send_keys(&self, keys: &str) -> Result<()> {
        let host = self.running_host()?;
        host.write_input(keys.as_bytes())
            .map_err(|e| SessionError::InputInjectionFailed(e.to_string()))
    }

    fn has_updated(&self) -> (bool, bool) {
        let mut has_prompt = false;
        let observed = self.content.observe_with(|| {
            let content = self.capture_pane_content()?;
            has_prompt = self.prompts.matches(&content);
            Ok::<_, SessionError>(content)
        });
        match observed {
            Ok(updated) => (updated, has_prompt),
            Err(e) => {
                log::debug!("no update check for {}: {e}", self.sanitized_name);
                (false, false)
            }
        }
    }

    fn capture_pane_content(&self) -> Result<String> {
        let host = self.running_host()?;
        self.capture(&host, CaptureRange::VISIBLE)
    }

    fn capture_pane_content_with_options(&self, start: &str, end: &str) -> Result<String> {
        let host = self.running_host()?;
        self.capture(&host, CaptureRange::parse(start, end)?)
    }

    fn set_detached_size(&self, width: u16, height: u16) -> Result<()> {
        let host = self.running_host()?;
        if width == 0 || height == 0 {
            return Err(SessionError::ResizeFailed(format!(
                "invalid size {width}x{height}"
            )));
        }
        host.resize(width, height)
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    fn attach(&self) -> Result<AttachHandle> {
        let host = self.running_host()?;
        let raw_mode = if std::io::stdin().is_terminal() {
            Some(RawModeGuard::enable()?)
        } else {
            None
        };
        let client_size = crossterm::terminal::size().ok();
        self.bridge(
            host,
            tokio::io::stdin(),
            tokio::io::stdout(),
            client_size,
            raw_mode,
        )
    }

    fn detach_safely(&self) -> Result<()> {
        if let Some(signal) = self.bridge_slot().take() {
            signal.detach();
            log::debug!("detached bridge from {}", self.sanitized_name);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle_mut();
        if lifecycle.state != SessionState::Running {
            return Ok(());
        }
        self.detach_safely()?;

        let mut first_error = None;
        if let Some(host) = lifecycle.host.take() {
            if let Err(e) = host.shutdown(self.config.close_timeout()) {
                log::warn!("closing {}: {e}", self.sanitized_name);
                first_error = Some(SessionError::TerminationFailed(e.to_string()));
            }
        }
        // Catches daemonized children that left the program's process tree.
        if let Err(e) = kill_session_processes(&self.sanitized_name) {
            log::warn!("closing {}: {e}", self.sanitized_name);
            if first_error.is_none() {
                first_error = Some(SessionError::TerminationFailed(e.to_string()));
            }
        }
        lifecycle.state = SessionState::Closed;
        log::info!("closed session {}", self.sanitized_name);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        // Bridges hold the host; let them go so it can shut down.
        if let Some(signal) = self.bridge_slot().take() {
            signal.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> SessionConfig {
        SessionConfig {
            prompt_patterns: vec!["PROMPT_READY".to_string()],
            ..SessionConfig::default()
        }
    }

    fn sh_session(name: &str) -> TerminalSession {
        TerminalSession::with_config(name, "/bin/sh", Arc::new(test_config()))
    }

    fn started(name: &str) -> TerminalSession {
        let session = sh_session(name);
        session.start(Path::new("")).unwrap();
        session
    }

    fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        check()
    }

    fn wait_for_text(session: &TerminalSession, needle: &str) -> bool {
        wait_for(Duration::from_secs(5), || {
            session
                .capture_pane_content()
                .map(|content| content.contains(needle))
                .unwrap_or(false)
        })
    }

    async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        seen.extend_from_slice(&buf[..n]);
                        if String::from_utf8_lossy(&seen).contains(needle) {
                            break;
                        }
                    }
                }
            }
        })
        .await;
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn test_create_is_pure() {
        let session = TerminalSession::new("My Task 1", "claude");
        assert_eq!(session.name(), "My Task 1");
        assert_eq!(session.sanitized_name(), "claudesquad_My_Task_1");
        assert_eq!(session.program(), "claude");
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.process_id().is_none());
        assert!(!session.exists());
    }

    #[test]
    fn test_custom_prefix_applies() {
        let config = SessionConfig {
            name_prefix: "team_".to_string(),
            ..SessionConfig::default()
        };
        let session = TerminalSession::with_config("a.b", "sh", Arc::new(config));
        assert_eq!(session.sanitized_name(), "team_a_b");
    }

    #[test]
    fn test_operations_require_running() {
        let session = sh_session("idle");

        assert!(matches!(session.send_keys("x"), Err(SessionError::NotRunning(_))));
        assert!(matches!(session.tap_enter(), Err(SessionError::NotRunning(_))));
        assert!(matches!(
            session.capture_pane_content(),
            Err(SessionError::NotRunning(_))
        ));
        assert!(matches!(
            session.capture_pane_content_with_options("-", "-"),
            Err(SessionError::NotRunning(_))
        ));
        assert!(matches!(
            session.set_detached_size(80, 24),
            Err(SessionError::NotRunning(_))
        ));
        assert!(matches!(
            session.attach_with(tokio::io::empty(), tokio::io::sink()),
            Err(SessionError::NotRunning(_))
        ));
        assert_eq!(session.has_updated(), (false, false));
        assert!(session.detach_safely().is_ok());
        assert!(session.restore().is_ok());
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_close_not_started_is_noop() {
        let session = sh_session("never started");
        assert!(session.close().is_ok());
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let session = started("twice");
        let pid = session.process_id();
        assert!(pid.is_some());

        let err = session.start(Path::new("")).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning(ref id) if id == "claudesquad_twice"));
        assert_eq!(session.process_id(), pid);
        assert!(session.exists());

        session.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = started("close me");
        assert!(session.exists());

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.exists());
        assert!(session.process_id().is_none());

        assert!(session.close().is_ok());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.send_keys("x"), Err(SessionError::NotRunning(_))));
        assert!(matches!(
            session.capture_pane_content(),
            Err(SessionError::NotRunning(_))
        ));
    }

    #[test]
    fn test_missing_program_fails_launch() {
        let session = TerminalSession::new("missing", "/definitely/not/a/program --flag");
        let err = session.start(Path::new("")).unwrap_err();
        assert!(matches!(err, SessionError::LaunchFailed(_)));
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(!session.exists());
    }

    #[test]
    fn test_immediate_exit_fails_launch() {
        let session = TerminalSession::new("quitter", "/bin/sh -c 'exit 3'");
        let err = session.start(Path::new("")).unwrap_err();
        assert!(
            matches!(err, SessionError::LaunchFailed(ref msg) if msg.contains("status 3")),
            "{err}"
        );
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_unparsable_program_fails_launch() {
        let session = TerminalSession::new("quotes", "sh -c 'unterminated");
        assert!(matches!(
            session.start(Path::new("")),
            Err(SessionError::LaunchFailed(_))
        ));

        let session = TerminalSession::new("empty", "   ");
        assert!(matches!(
            session.start(Path::new("")),
            Err(SessionError::LaunchFailed(_))
        ));
    }

    #[test]
    fn test_missing_work_dir_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let session = sh_session("nowhere");
        let err = session.start(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SessionError::LaunchFailed(_)));
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_restart_after_close() {
        let session = started("again");
        session.close().unwrap();

        session.start(Path::new("")).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.exists());
        session.close().unwrap();
    }

    #[test]
    fn test_external_kill_is_detected() {
        let session = started("killed");
        let pid = session.process_id().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        assert!(wait_for(Duration::from_secs(5), || !session.exists()));
        session.restore().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_restore_keeps_live_session() {
        let session = started("alive");
        session.restore().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        session.close().unwrap();
    }

    #[test]
    fn test_send_keys_reaches_screen() {
        let session = started("keys");
        session.send_keys("echo KEYS_$((6*7))").unwrap();
        session.tap_enter().unwrap();

        assert!(wait_for_text(&session, "KEYS_42"));
        session.close().unwrap();
    }

    #[test]
    fn test_work_dir_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let session = sh_session("env check");
        session.start(dir.path()).unwrap();

        session.send_keys("echo \"at:$(pwd -P)\"\r").unwrap();
        assert!(wait_for_text(&session, &format!("at:{}", canonical.display())));

        session.send_keys("echo \"id:$SQUAD_SESSION\"\r").unwrap();
        assert!(wait_for_text(&session, "id:claudesquad_env_check"));
        session.close().unwrap();
    }

    #[test]
    fn test_capture_with_options_reaches_scrollback() {
        let config = SessionConfig {
            rows: 5,
            ..test_config()
        };
        let session = TerminalSession::with_config("history", "/bin/sh", Arc::new(config));
        session.start(Path::new("")).unwrap();

        session
            .send_keys("i=0; while [ $i -lt 40 ]; do echo row$i; i=$((i+1)); done\r")
            .unwrap();
        assert!(wait_for_text(&session, "row39"));

        let visible = session.capture_pane_content().unwrap();
        assert_eq!(visible.split('\n').count(), 5);
        assert!(!visible.lines().any(|line| line == "row0"));

        let full = session.capture_pane_content_with_options("-", "-").unwrap();
        assert!(full.lines().any(|line| line == "row0"));
        assert!(full.lines().any(|line| line == "row39"));

        let top = session.capture_pane_content_with_options("0", "0").unwrap();
        assert_eq!(top.split('\n').count(), 1);

        let inverted = session.capture_pane_content_with_options("3", "1").unwrap();
        assert!(inverted.is_empty());

        assert!(matches!(
            session.capture_pane_content_with_options("top", "-"),
            Err(SessionError::InvalidRange(_))
        ));
        session.close().unwrap();
    }

    #[test]
    fn test_has_updated_tracks_changes() {
        let session = started("poller");

        // Let the shell settle: two equal captures in a row.
        assert!(wait_for(Duration::from_secs(5), || !session.has_updated().0));
        assert!(!session.has_updated().0);

        session.send_keys("echo CHANGED_$((1+1))\r").unwrap();
        assert!(wait_for_text(&session, "CHANGED_2"));
        assert!(session.has_updated().0);

        assert!(wait_for(Duration::from_secs(5), || !session.has_updated().0));
        session.close().unwrap();
    }

    #[test]
    fn test_has_updated_detects_prompt() {
        let session = started("prompt");
        assert!(!session.has_updated().1);

        // Quotes keep the echoed command line from matching.
        session.send_keys("echo PROMPT_\"\"READY\r").unwrap();
        assert!(wait_for(Duration::from_secs(5), || session.has_updated().1));
        session.close().unwrap();
    }

    #[test]
    fn test_set_detached_size() {
        let session = started("resize");
        session.set_detached_size(100, 30).unwrap();
        session.send_keys("stty size\r").unwrap();
        assert!(wait_for_text(&session, "30 100"));

        assert!(matches!(
            session.set_detached_size(0, 30),
            Err(SessionError::ResizeFailed(_))
        ));
        session.close().unwrap();
    }

    #[test]
    fn test_title_defaults_to_name() {
        let session = sh_session("Titled Task");
        assert_eq!(session.title(), "Titled Task");
    }

    #[test]
    fn test_end_to_end() {
        let work = tempfile::tempdir().unwrap();
        let session = TerminalSession::new("My Task 1", "/bin/sh");
        assert_eq!(session.sanitized_name(), "claudesquad_My_Task_1");

        session.start(work.path()).unwrap();
        assert!(session.exists());

        session.send_keys("echo hi\r").unwrap();
        // The echoed command line also contains "hi"; only output is a bare line.
        assert!(wait_for(Duration::from_secs(5), || {
            session
                .capture_pane_content()
                .map(|content| content.lines().any(|line| line == "hi"))
                .unwrap_or(false)
        }));

        session.close().unwrap();
        assert!(!session.exists());
    }

    #[test]
    fn test_close_always_transitions() {
        // Trapping HUP makes the kill escalate; a zero reap window may or may
        // not see the exit, but Close must finish either way.
        let config = SessionConfig {
            close_timeout_ms: 0,
            ..test_config()
        };
        let session = TerminalSession::with_config(
            "stubborn",
            "/bin/sh -c \"trap '' HUP; echo TRAPPED; while :; do sleep 1; done\"",
            Arc::new(config),
        );
        session.start(Path::new("")).unwrap();
        assert!(wait_for_text(&session, "TRAPPED"));

        let result = session.close();
        if let Err(e) = &result {
            assert!(matches!(e, SessionError::TerminationFailed(_)), "{e}");
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.process_id().is_none());
        assert!(matches!(session.send_keys("x"), Err(SessionError::NotRunning(_))));
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_attach_requires_runtime() {
        let session = started("no runtime");
        assert!(matches!(
            session.attach_with(tokio::io::empty(), tokio::io::sink()),
            Err(SessionError::Attach(_))
        ));
        session.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_attach_bridges_both_directions() {
        let session = started("bridge");
        session.send_keys("echo BEFORE_$((2+2))\r").unwrap();
        assert!(wait_for_text(&session, "BEFORE_4"));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let handle = session.attach_with(server_read, server_write).unwrap();

        // Earlier output is replayed.
        let replayed = read_until(&mut client_read, "BEFORE_4").await;
        assert!(replayed.contains("BEFORE_4"), "got: {replayed}");

        client_write.write_all(b"echo ATTACH_$((2+3))\r").await.unwrap();
        let live = read_until(&mut client_read, "ATTACH_5").await;
        assert!(live.contains("ATTACH_5"), "got: {live}");

        // Ctrl-Q ends the bridge but not the session.
        client_write.write_all(&[0x11]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("bridge stopped")
            .unwrap();
        assert!(session.exists());
        assert_eq!(session.state(), SessionState::Running);

        session.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detach_safely_stops_bridge() {
        let session = started("detach");
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = session.attach_with(server_read, server_write).unwrap();
        let signal = handle.signal();

        session.detach_safely().unwrap();
        assert!(signal.is_detached());
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("bridge stopped")
            .unwrap();
        assert!(session.exists());

        // Nothing left to detach.
        assert!(session.detach_safely().is_ok());
        session.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_attach_replaces_previous() {
        let session = started("replace");
        let (_first_client, first) = tokio::io::duplex(1024);
        let (first_read, first_write) = tokio::io::split(first);
        let first_handle = session.attach_with(first_read, first_write).unwrap();

        let (_second_client, second) = tokio::io::duplex(1024);
        let (second_read, second_write) = tokio::io::split(second);
        let second_handle = session.attach_with(second_read, second_write).unwrap();

        assert!(first_handle.signal().is_detached());
        assert!(!second_handle.signal().is_detached());
        session.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_ends_bridge() {
        let session = started("close bridge");
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = session.attach_with(server_read, server_write).unwrap();

        session.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("bridge stopped")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_ends_bridge_despite_background_job() {
        let session = started("background job");
        session.send_keys("sleep 30 & echo BG_$((4+4))\r").unwrap();
        assert!(wait_for_text(&session, "BG_8"));

        let (_client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = session.attach_with(server_read, server_write).unwrap();

        // The bridge only ends once the PTY hangs up, which needs the sleep gone.
        session.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("bridge stopped")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_adopts_client_size() {
        let session = started("client size");
        let host = session.running_host().unwrap();
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = session
            .bridge(host, server_read, server_write, Some((90, 20)), None)
            .unwrap();

        session.send_keys("stty size\r").unwrap();
        assert!(wait_for_text(&session, "20 90"));

        handle.detach();
        session.close().unwrap();
    }
}
