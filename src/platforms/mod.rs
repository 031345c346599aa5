//! External collaborators behind one trait: window directory, screen
//! capture, OCR, process control and input injection.
//!
//! The supervisor core never touches an OS API directly; it drives a
//! [`DesktopEngine`]. Window/process/input primitives are synchronous and
//! blocking (the loop is single-threaded and cooperative by design);
//! capture and OCR are async the same way the platform backends expose
//! them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::WatchdogError;
use crate::geometry::{Point, Rect};

#[cfg(target_os = "windows")]
pub mod windows;

/// Opaque identifier for a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

/// A matched top-level window, with the title cached at match time (for
/// logging only; decisions re-query the OS) and the owning process id.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub pid: u32,
}

/// Raw RGBA pixel buffer from a capture.
#[derive(Debug, Clone)]
pub struct ScreenshotResult {
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[async_trait::async_trait]
pub trait DesktopEngine: Send + Sync {
    /// First visible top-level window whose title contains the substring
    /// (case-insensitive), or `None`.
    fn find_window_by_title(
        &self,
        title_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError>;

    /// First visible top-level window whose owning process's executable
    /// path contains the substring (case-insensitive), or `None`.
    fn find_window_by_process_path(
        &self,
        path_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError>;

    /// Whether the OS still knows this window.
    fn window_exists(&self, id: WindowId) -> bool;

    fn foreground_window(&self) -> Result<Option<WindowId>, WatchdogError>;

    /// Restore from minimized if needed, raise, and request foreground.
    /// Best effort; callers verify via [`DesktopEngine::foreground_window`].
    fn bring_to_foreground(&self, id: WindowId) -> Result<(), WatchdogError>;

    fn client_size(&self, id: WindowId) -> Result<(u32, u32), WatchdogError>;

    /// Screen coordinates of the client area's top-left corner.
    fn client_origin(&self, id: WindowId) -> Result<Point, WatchdogError>;

    fn move_window(&self, id: WindowId, rect: Rect) -> Result<(), WatchdogError>;

    /// Primary monitor work area (excludes the taskbar).
    fn work_area(&self) -> Result<Rect, WatchdogError>;

    /// Capture a client-relative region of a window.
    async fn capture_client_region(
        &self,
        id: WindowId,
        region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError>;

    /// Capture a raw screen region, independent of any window.
    async fn capture_screen_region(
        &self,
        region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError>;

    /// Extract text from a capture. Unreadable images yield empty text,
    /// never an error.
    async fn ocr_screenshot(
        &self,
        screenshot: &ScreenshotResult,
    ) -> Result<String, WatchdogError>;

    /// Persist a capture for offline diagnosis.
    fn save_screenshot(
        &self,
        screenshot: &ScreenshotResult,
        path: &Path,
    ) -> Result<(), WatchdogError>;

    fn move_pointer(&self, x: i32, y: i32) -> Result<(), WatchdogError>;
    fn click(&self, x: i32, y: i32) -> Result<(), WatchdogError>;
    fn double_click(&self, x: i32, y: i32) -> Result<(), WatchdogError>;

    /// Send a keypress to the foreground window. Only ever used to
    /// dismiss modal confirmation dialogs the panel may pop up.
    fn press_key(&self, key: &str) -> Result<(), WatchdogError>;

    /// Launch an executable with the given working directory; returns the
    /// child process id.
    fn launch(&self, exe: &Path, cwd: &Path) -> Result<u32, WatchdogError>;

    /// Whether a process with this exact image name is running.
    fn process_running(&self, image_name: &str) -> Result<bool, WatchdogError>;

    /// Count running processes with this exact image name.
    fn count_processes(&self, image_name: &str) -> Result<usize, WatchdogError>;

    /// Restart the OS shell process (explorer). Last-resort remedy for a
    /// recurring panel error state.
    fn restart_shell(&self) -> Result<(), WatchdogError>;
}

/// Create the engine for the current platform.
pub fn create_engine() -> Result<Arc<dyn DesktopEngine>, WatchdogError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsEngine::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(WatchdogError::UnsupportedPlatform(
            "the supervised panel is a Windows application; no engine exists for this platform"
                .to_string(),
        ))
    }
}

/// Force `window` to the foreground and verify it actually got there,
/// retrying with short backoff. Errs when focus cannot be confirmed;
/// callers must not click without this succeeding.
pub async fn force_foreground(
    engine: &dyn DesktopEngine,
    window: &WindowInfo,
    attempts: u32,
) -> Result<(), WatchdogError> {
    for attempt in 1..=attempts {
        if let Err(e) = engine.bring_to_foreground(window.id) {
            warn!(attempt, error = %e, "bring_to_foreground failed");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        if engine.foreground_window()? == Some(window.id) {
            return Ok(());
        }
        warn!(attempt, title = %window.title, "focus not confirmed, retrying");
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    Err(WatchdogError::FocusNotAcquired(format!(
        "'{}' not foreground after {attempts} attempts",
        window.title
    )))
}

/// Click with a 1-pixel jitter-and-return first. Input-event deduplication
/// can silently drop a click issued at the exact coordinate of the previous
/// one; the nudge defeats it.
pub fn jittered_click(engine: &dyn DesktopEngine, target: Point) -> Result<(), WatchdogError> {
    engine.move_pointer(target.x + 1, target.y)?;
    engine.move_pointer(target.x, target.y)?;
    engine.click(target.x, target.y)
}

/// Double-click variant of [`jittered_click`].
pub fn jittered_double_click(
    engine: &dyn DesktopEngine,
    target: Point,
) -> Result<(), WatchdogError> {
    engine.move_pointer(target.x + 1, target.y)?;
    engine.move_pointer(target.x, target.y)?;
    engine.double_click(target.x, target.y)
}
