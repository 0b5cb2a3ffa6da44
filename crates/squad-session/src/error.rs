/// Errors returned by session operations.
///
/// Every failure surfaces here; no operation substitutes a placeholder value
/// for something it could not do.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already running: {0}")]
    AlreadyRunning(String),

    #[error("session not running: {0}")]
    NotRunning(String),

    #[error("failed to launch session: {0}")]
    LaunchFailed(String),

    #[error("failed to terminate session: {0}")]
    TerminationFailed(String),

    #[error("pane content unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("failed to send input: {0}")]
    InputInjectionFailed(String),

    #[error("invalid capture range selector: {0:?}")]
    InvalidRange(String),

    #[error("failed to resize session: {0}")]
    ResizeFailed(String),

    #[error("failed to attach: {0}")]
    Attach(String),

    #[error("failed to clean up {} session process(es): {}", .0.len(), .0.join("; "))]
    CleanupFailed(Vec<String>),
}

pub type Result<T> = std::result::Result<T, SessionError>;
