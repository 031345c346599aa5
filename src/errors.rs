use thiserror::Error;

/// Error taxonomy for the watchdog.
///
/// Transient sensing failures (unreadable capture, no parseable entry) are
/// not errors at all; they surface as `None`/empty results and the loop
/// carries on. These variants cover genuine faults: OS calls that failed,
/// safety checks that did not pass, and configuration problems.
#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("Platform error: {0}")]
    PlatformError(String),

    /// The target window could not be confirmed as the OS foreground window.
    /// Raised instead of clicking blind; callers treat it as "action failed".
    #[error("Focus not acquired: {0}")]
    FocusNotAcquired(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    /// Startup-fatal. Carries every problem found, one per line.
    #[error("Invalid configuration:\n{0}")]
    InvalidConfiguration(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
