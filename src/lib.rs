//! OCR-driven supervision of a log-only desktop panel.
//!
//! The supervised panel exposes no health API; the only truth about its
//! state is the timestamped log box it paints on screen. This crate
//! screenshots that log box, OCRs it, parses the freshest entry, and
//! clicks the panel's own recovery button when the entry is older than
//! the configured staleness thresholds. Around that core sit window
//! lifecycle management (find, launch, park in a corner), first-run
//! onboarding clicks, and a deferred worker-count reconciliation.
//!
//! All OS interaction goes through the [`platforms::DesktopEngine`]
//! trait, so everything above it is plain testable logic.

pub mod config;
pub mod errors;
pub mod first_run;
pub mod geometry;
pub mod lifecycle;
pub mod normalize;
pub mod parser;
pub mod platforms;
pub mod reconcile;
pub mod recovery;
#[cfg(test)]
mod tests;
pub mod watchdog;

pub use config::{AppConfig, RegionsConfig};
pub use errors::WatchdogError;
pub use parser::LogEntry;
pub use platforms::{create_engine, DesktopEngine, ScreenshotResult, WindowId, WindowInfo};
pub use watchdog::Watchdog;
