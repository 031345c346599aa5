//! Win32 implementation of [`DesktopEngine`].
//!
//! Window discovery and geometry go through the raw Win32 surface
//! (`EnumWindows`, `GetClientRect`, `ClientToScreen`); input synthesis
//! through `uiautomation`'s `Mouse` and `Keyboard`; capture through
//! `xcap`; OCR through `uni-ocr`; process queries through `sysinfo`.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgba};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};
use uiautomation::inputs::{Keyboard, Mouse};
use uiautomation::types::Point as InputPoint;
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, EnumWindows, GetClientRect, GetForegroundWindow, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, MoveWindow,
    SetForegroundWindow, SetProcessDPIAware, ShowWindow, SystemParametersInfoW, POINT,
    SPI_GETWORKAREA, SW_RESTORE, SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS,
};

use super::{DesktopEngine, ScreenshotResult, WindowId, WindowInfo};
use crate::errors::WatchdogError;
use crate::geometry::{Point, Rect};

pub struct WindowsEngine {
    system: Mutex<System>,
}

impl WindowsEngine {
    pub fn new() -> Result<Self, WatchdogError> {
        set_dpi_awareness();
        Ok(Self {
            system: Mutex::new(System::new()),
        })
    }

    fn find_windows(&self, kind: MatchKind) -> Result<Vec<WindowInfo>, WatchdogError> {
        let mut ctx = EnumContext {
            kind,
            matches: Vec::new(),
        };
        unsafe {
            EnumWindows(Some(enum_proc), LPARAM(&mut ctx as *mut EnumContext as isize))
                .map_err(|e| {
                    WatchdogError::PlatformError(format!("EnumWindows failed: {e}"))
                })?;
        }
        Ok(ctx.matches)
    }
}

/// Make the process DPI-aware so Windows reports real pixel coordinates.
/// Per-monitor v2 preferred, legacy system awareness as fallback.
fn set_dpi_awareness() {
    unsafe {
        if SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2).is_err() {
            let _ = SetProcessDPIAware();
        }
    }
}

fn hwnd(id: WindowId) -> HWND {
    HWND(id.0 as *mut core::ffi::c_void)
}

enum MatchKind {
    TitleSubstring(String),
    ProcessPathSubstring(String),
}

struct EnumContext {
    kind: MatchKind,
    matches: Vec<WindowInfo>,
}

unsafe extern "system" fn enum_proc(window: HWND, lparam: LPARAM) -> windows::Win32::Foundation::BOOL {
    let ctx = &mut *(lparam.0 as *mut EnumContext);
    if !IsWindowVisible(window).as_bool() {
        return TRUE;
    }

    let mut buf = [0u16; 512];
    let len = GetWindowTextW(window, &mut buf) as usize;
    let title = String::from_utf16_lossy(&buf[..len]);

    let mut pid = 0u32;
    GetWindowThreadProcessId(window, Some(&mut pid));

    let matched = match &ctx.kind {
        MatchKind::TitleSubstring(sub) => {
            !title.is_empty() && title.to_lowercase().contains(sub)
        }
        MatchKind::ProcessPathSubstring(sub) => query_process_image_path(pid)
            .map(|p| p.to_lowercase().contains(sub))
            .unwrap_or(false),
    };
    if matched {
        ctx.matches.push(WindowInfo {
            id: WindowId(window.0 as isize),
            title,
            pid,
        });
    }
    TRUE
}

/// Full executable path for a PID, or `None` when the process cannot be
/// opened (access denied, already gone).
fn query_process_image_path(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buf = [0u16; 1024];
        let mut size = buf.len() as u32;
        let ok = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            PWSTR(buf.as_mut_ptr()),
            &mut size,
        )
        .is_ok();
        let _ = CloseHandle(handle);
        ok.then(|| String::from_utf16_lossy(&buf[..size as usize]))
    }
}

#[async_trait::async_trait]
impl DesktopEngine for WindowsEngine {
    fn find_window_by_title(
        &self,
        title_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError> {
        let sub = title_substring.to_lowercase();
        if sub.is_empty() {
            return Ok(None);
        }
        let matches = self.find_windows(MatchKind::TitleSubstring(sub))?;
        if matches.len() > 1 {
            warn!(
                count = matches.len(),
                first = %matches[0].title,
                "multiple windows match title substring; using first"
            );
        }
        Ok(matches.into_iter().next())
    }

    fn find_window_by_process_path(
        &self,
        path_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError> {
        let sub = path_substring.to_lowercase();
        if sub.is_empty() {
            return Ok(None);
        }
        let matches = self.find_windows(MatchKind::ProcessPathSubstring(sub))?;
        if matches.len() > 1 {
            warn!(
                count = matches.len(),
                first = %matches[0].title,
                "multiple windows match process path; using first"
            );
        }
        Ok(matches.into_iter().next())
    }

    fn window_exists(&self, id: WindowId) -> bool {
        unsafe { IsWindow(hwnd(id)).as_bool() }
    }

    fn foreground_window(&self) -> Result<Option<WindowId>, WatchdogError> {
        let fg = unsafe { GetForegroundWindow() };
        if fg.0.is_null() {
            Ok(None)
        } else {
            Ok(Some(WindowId(fg.0 as isize)))
        }
    }

    fn bring_to_foreground(&self, id: WindowId) -> Result<(), WatchdogError> {
        let handle = hwnd(id);
        unsafe {
            if IsIconic(handle).as_bool() {
                debug!("window is minimized, restoring");
                let _ = ShowWindow(handle, SW_RESTORE);
            }
            let _ = BringWindowToTop(handle);
            if !SetForegroundWindow(handle).as_bool() {
                // The OS refuses foreground changes in some focus-steal
                // scenarios; callers verify and retry.
                debug!("SetForegroundWindow not honored");
            }
        }
        Ok(())
    }

    fn client_size(&self, id: WindowId) -> Result<(u32, u32), WatchdogError> {
        let mut rect = RECT::default();
        unsafe {
            GetClientRect(hwnd(id), &mut rect).map_err(|e| {
                WatchdogError::PlatformError(format!("GetClientRect failed: {e}"))
            })?;
        }
        Ok((
            (rect.right - rect.left) as u32,
            (rect.bottom - rect.top) as u32,
        ))
    }

    fn client_origin(&self, id: WindowId) -> Result<Point, WatchdogError> {
        let mut point = POINT { x: 0, y: 0 };
        let ok = unsafe { ClientToScreen(hwnd(id), &mut point) };
        if !ok.as_bool() {
            return Err(WatchdogError::PlatformError(
                "ClientToScreen failed".to_string(),
            ));
        }
        Ok(Point {
            x: point.x,
            y: point.y,
        })
    }

    fn move_window(&self, id: WindowId, rect: Rect) -> Result<(), WatchdogError> {
        unsafe {
            MoveWindow(
                hwnd(id),
                rect.x,
                rect.y,
                rect.w as i32,
                rect.h as i32,
                true,
            )
            .map_err(|e| WatchdogError::PlatformError(format!("MoveWindow failed: {e}")))
        }
    }

    fn work_area(&self) -> Result<Rect, WatchdogError> {
        let mut rect = RECT::default();
        unsafe {
            SystemParametersInfoW(
                SPI_GETWORKAREA,
                0,
                Some(&mut rect as *mut RECT as *mut core::ffi::c_void),
                SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS(0),
            )
            .map_err(|e| {
                WatchdogError::PlatformError(format!("SystemParametersInfoW failed: {e}"))
            })?;
        }
        Ok(Rect {
            x: rect.left,
            y: rect.top,
            w: (rect.right - rect.left) as u32,
            h: (rect.bottom - rect.top) as u32,
        })
    }

    async fn capture_client_region(
        &self,
        id: WindowId,
        region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError> {
        let origin = self.client_origin(id)?;
        self.capture_screen_region(Rect {
            x: origin.x + region.x,
            y: origin.y + region.y,
            w: region.w,
            h: region.h,
        })
        .await
    }

    async fn capture_screen_region(
        &self,
        region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| WatchdogError::PlatformError(format!("Failed to get monitors: {e}")))?;

        // Pick the monitor containing the region's origin; the process is
        // per-monitor DPI aware, so everything is already physical pixels.
        let mut chosen = None;
        for monitor in &monitors {
            let mx = monitor.x().map_err(|e| {
                WatchdogError::PlatformError(format!("Failed to get monitor x: {e}"))
            })?;
            let my = monitor.y().map_err(|e| {
                WatchdogError::PlatformError(format!("Failed to get monitor y: {e}"))
            })?;
            let mw = monitor.width().map_err(|e| {
                WatchdogError::PlatformError(format!("Failed to get monitor width: {e}"))
            })? as i32;
            let mh = monitor.height().map_err(|e| {
                WatchdogError::PlatformError(format!("Failed to get monitor height: {e}"))
            })? as i32;
            if region.x >= mx && region.x < mx + mw && region.y >= my && region.y < my + mh {
                chosen = Some((monitor, mx, my, mw as u32, mh as u32));
                break;
            }
        }
        let (monitor, mx, my, mw, mh) = match chosen {
            Some(c) => c,
            None => {
                let first = monitors.first().ok_or_else(|| {
                    WatchdogError::PlatformError("No monitors available".to_string())
                })?;
                let mx = first.x().map_err(|e| {
                    WatchdogError::PlatformError(format!("Failed to get monitor x: {e}"))
                })?;
                let my = first.y().map_err(|e| {
                    WatchdogError::PlatformError(format!("Failed to get monitor y: {e}"))
                })?;
                let mw = first.width().map_err(|e| {
                    WatchdogError::PlatformError(format!("Failed to get monitor width: {e}"))
                })?;
                let mh = first.height().map_err(|e| {
                    WatchdogError::PlatformError(format!("Failed to get monitor height: {e}"))
                })?;
                (first, mx, my, mw, mh)
            }
        };

        let rel_x = (region.x - mx).max(0) as u32;
        let rel_y = (region.y - my).max(0) as u32;
        let rel_w = region.w.min(mw.saturating_sub(rel_x));
        let rel_h = region.h.min(mh.saturating_sub(rel_y));

        let capture = monitor
            .capture_region(rel_x, rel_y, rel_w, rel_h)
            .map_err(|e| {
                WatchdogError::PlatformError(format!("Failed to capture region: {e}"))
            })?;

        Ok(ScreenshotResult {
            image_data: capture.to_vec(),
            width: rel_w,
            height: rel_h,
        })
    }

    async fn ocr_screenshot(
        &self,
        screenshot: &ScreenshotResult,
    ) -> Result<String, WatchdogError> {
        use uni_ocr::{OcrEngine, OcrProvider};

        let img_buffer: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(
            screenshot.width,
            screenshot.height,
            screenshot.image_data.clone(),
        )
        .ok_or_else(|| {
            WatchdogError::PlatformError(
                "Invalid screenshot data for buffer creation".to_string(),
            )
        })?;
        let dynamic_image = DynamicImage::ImageRgba8(img_buffer);

        let engine = OcrEngine::new(OcrProvider::Auto).map_err(|e| {
            WatchdogError::PlatformError(format!("Failed to create OCR engine: {e}"))
        })?;

        // Unreadable input is a transient sensing condition, not a fault:
        // surface it as empty text and let the caller's parse come up empty.
        match engine.recognize_image(&dynamic_image).await {
            Ok((text, _language, _confidence)) => Ok(text),
            Err(e) => {
                warn!(error = %e, "OCR recognition failed; treating as empty text");
                Ok(String::new())
            }
        }
    }

    fn save_screenshot(
        &self,
        screenshot: &ScreenshotResult,
        path: &Path,
    ) -> Result<(), WatchdogError> {
        let buf: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(
            screenshot.width,
            screenshot.height,
            screenshot.image_data.clone(),
        )
        .ok_or_else(|| {
            WatchdogError::PlatformError(
                "Invalid screenshot data for buffer creation".to_string(),
            )
        })?;
        buf.save(path)
            .map_err(|e| WatchdogError::PlatformError(format!("Failed to save capture: {e}")))
    }

    fn move_pointer(&self, x: i32, y: i32) -> Result<(), WatchdogError> {
        Mouse::default()
            .move_to(InputPoint::new(x, y))
            .map_err(|e| WatchdogError::PlatformError(format!("Mouse move failed: {e}")))
    }

    fn click(&self, x: i32, y: i32) -> Result<(), WatchdogError> {
        Mouse::default()
            .click(InputPoint::new(x, y))
            .map_err(|e| WatchdogError::PlatformError(format!("Mouse click failed: {e}")))
    }

    fn double_click(&self, x: i32, y: i32) -> Result<(), WatchdogError> {
        Mouse::default()
            .double_click(InputPoint::new(x, y))
            .map_err(|e| WatchdogError::PlatformError(format!("Mouse double-click failed: {e}")))
    }

    fn press_key(&self, key: &str) -> Result<(), WatchdogError> {
        Keyboard::default()
            .send_keys(key)
            .map_err(|e| WatchdogError::PlatformError(format!("Keypress failed: {e}")))
    }

    fn launch(&self, exe: &Path, cwd: &Path) -> Result<u32, WatchdogError> {
        let child = Command::new(exe)
            .current_dir(cwd)
            .spawn()
            .map_err(|e| WatchdogError::LaunchFailed(format!("{}: {e}", exe.display())))?;
        Ok(child.id())
    }

    fn process_running(&self, image_name: &str) -> Result<bool, WatchdogError> {
        Ok(self.count_processes(image_name)? > 0)
    }

    fn count_processes(&self, image_name: &str) -> Result<usize, WatchdogError> {
        let mut system = self.system.lock().map_err(|_| {
            WatchdogError::PlatformError("process table lock poisoned".to_string())
        })?;
        system.refresh_processes(ProcessesToUpdate::All, true);
        let needle = image_name.to_lowercase();
        Ok(system
            .processes()
            .values()
            .filter(|p| p.name().to_string_lossy().to_lowercase() == needle)
            .count())
    }

    fn restart_shell(&self) -> Result<(), WatchdogError> {
        Command::new("taskkill")
            .args(["/F", "/IM", "explorer.exe"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        std::thread::sleep(Duration::from_secs(1));
        Command::new("explorer.exe").spawn()?;
        Ok(())
    }
}
