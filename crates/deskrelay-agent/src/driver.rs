// crates/deskrelay-agent/src/driver.rs
// ============================================================================
// Module: Desktop Driver
// Description: Seam between primitive handlers and the guest desktop.
// Purpose: Let handlers run against real tools or an in-process fake.
// Dependencies: async-trait, deskrelay-core
// ============================================================================

//! ## Overview
//! [`DesktopDriver`] is the only way handlers touch the guest. Each method is
//! one observable desktop effect. Implementations must be cancel-safe: the
//! agent drops the future when an envelope's timeout elapses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use deskrelay_core::MouseButton;
use deskrelay_core::Point;
use deskrelay_core::ScrollDirection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Driver failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// A helper program could not be started.
    #[error("driver command unavailable: {0}")]
    Unavailable(String),
    /// A helper program exited unsuccessfully.
    #[error("driver command failed: {0}")]
    Failed(String),
    /// Helper output could not be parsed.
    #[error("driver output invalid: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Completed shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOutput {
    /// True when the exit code is zero.
    pub success: bool,
    /// Captured stdout.
    pub output: String,
    /// Captured stderr.
    pub error: String,
    /// Exit code, or -1 when killed by a signal.
    pub returncode: i32,
}

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Guest desktop operations.
#[async_trait]
pub trait DesktopDriver: Send + Sync {
    /// Moves the pointer through `path`, pausing `step_delay` between points.
    async fn move_pointer(&self, path: &[Point], step_delay: Duration) -> Result<(), DriverError>;

    /// Clicks `count` times at the current position.
    async fn click(&self, button: MouseButton, count: u8) -> Result<(), DriverError>;

    /// Returns the current pointer position.
    async fn pointer_position(&self) -> Result<Point, DriverError>;

    /// Presses `keys` together.
    async fn key_press(&self, keys: &[String]) -> Result<(), DriverError>;

    /// Types `text` with `interval` between characters.
    async fn type_text(&self, text: &str, interval: Duration) -> Result<(), DriverError>;

    /// Turns the wheel.
    async fn scroll(&self, direction: ScrollDirection, clicks: u32) -> Result<(), DriverError>;

    /// Captures the screen as PNG bytes.
    async fn capture_png(&self) -> Result<Vec<u8>, DriverError>;

    /// Runs OCR over a PNG and returns tesseract-style TSV.
    async fn ocr_tsv(&self, png: &[u8]) -> Result<String, DriverError>;

    /// Enumerates UI elements; `None` when no enumerator is configured.
    async fn ui_elements(&self) -> Result<Option<Vec<Value>>, DriverError>;

    /// Runs a shell command line.
    async fn shell(&self, command: &str) -> Result<ShellOutput, DriverError>;
}
