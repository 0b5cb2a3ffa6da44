use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
    #[error("PTY kill failed: {0}")]
    KillFailed(String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// What to run inside a new PTY and how to size it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnOptions {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn a program inside a new PTY.
    ///
    /// The slave side is dropped once the child holds it, so reads on the
    /// master see EOF (or an error) after the child and its descendants exit.
    pub fn spawn(options: &SpawnOptions) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(options.command())
            .map_err(|e| {
                PtyError::SpawnFailed(format!("failed to spawn {}: {e}", options.program))
            })?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {} (pid {:?}) in {}x{} PTY",
            options.program,
            child.process_id(),
            options.cols,
            options.rows
        );

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer,
            child,
        })
    }

    /// Resize the PTY to new dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Write bytes to the PTY master (input -> program).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Blocking read of program output.
    ///
    /// Fails once the reader has been handed to an I/O thread via
    /// [`PtyHandle::take_reader`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PtyError> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.read(buf)?),
            None => Err(PtyError::Io(std::io::Error::other(
                "PTY reader was moved to an I/O thread",
            ))),
        }
    }

    /// Move the PTY reader out, for use on a dedicated I/O thread.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running. Reaps the child.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Poll for exit until `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Force-terminate the child. A child that already exited is left alone.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        if self.try_wait().is_some() {
            return Ok(());
        }
        self.child
            .kill()
            .map_err(|e| PtyError::KillFailed(format!("{e}")))
    }

    /// Kill the child and every process it started.
    ///
    /// Background jobs hold the PTY slave open, so the master only hangs up
    /// once they are gone too.
    pub fn kill_tree(&mut self) -> Result<(), PtyError> {
        let members = match self.process_id() {
            Some(pid) => SessionMembers::scan(pid),
            None => SessionMembers::default(),
        };
        let result = self.kill();
        members.kill();
        result
    }

    /// OS process id of the child, when the platform exposes one.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}

/// Processes in a child's session or below it in the process tree.
#[derive(Default)]
struct SessionMembers {
    sys: System,
    pids: Vec<Pid>,
}

impl SessionMembers {
    /// Parent chains longer than this are treated as unrelated.
    const MAX_DEPTH: usize = 64;

    fn scan(root: u32) -> Self {
        let root = Pid::from_u32(root);
        let current = sysinfo::get_current_pid().ok();
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::new());

        let processes = sys.processes();
        let descends_from_root = |pid: Pid| {
            let mut pid = pid;
            for _ in 0..Self::MAX_DEPTH {
                match processes.get(&pid).and_then(|process| process.parent()) {
                    Some(parent) if parent == root => return true,
                    Some(parent) => pid = parent,
                    None => return false,
                }
            }
            false
        };
        let pids = processes
            .iter()
            .filter(|(pid, _)| **pid != root && Some(**pid) != current)
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .filter(|(pid, process)| process.session_id() == Some(root) || descends_from_root(**pid))
            .map(|(pid, _)| *pid)
            .collect();

        Self { sys, pids }
    }

    fn kill(&self) {
        for pid in &self.pids {
            if let Some(process) = self.sys.process(*pid) {
                if !process.kill() {
                    log::debug!("could not kill session member {pid}");
                }
            }
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            log::warn!("failed to kill PTY child on drop: {e}");
        }
    }
}
