// crates/deskrelay-agent/src/command.rs
// ============================================================================
// Module: Command Driver
// Description: Desktop driver backed by external helper programs.
// Purpose: Drive an X11 guest with xdotool, import, and tesseract.
// Dependencies: tokio, deskrelay-config
// ============================================================================

//! ## Overview
//! [`CommandDriver`] runs the helper programs named in [`DriverConfig`]. Every
//! child is spawned with `kill_on_drop`, so a primitive cancelled by its
//! envelope timeout takes its child process with it. Canonical key names are
//! translated to X keysyms here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use deskrelay_config::DriverConfig;
use deskrelay_core::MouseButton;
use deskrelay_core::Point;
use deskrelay_core::ScrollDirection;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::driver::DesktopDriver;
use crate::driver::DriverError;
use crate::driver::ShellOutput;

// ============================================================================
// SECTION: Key Mapping
// ============================================================================

/// Canonical key names and their X keysyms.
const KEYSYMS: &[(&str, &str)] = &[
    ("ctrl", "ctrl"),
    ("alt", "alt"),
    ("shift", "shift"),
    ("super", "super"),
    ("enter", "Return"),
    ("escape", "Escape"),
    ("tab", "Tab"),
    ("backspace", "BackSpace"),
    ("delete", "Delete"),
    ("insert", "Insert"),
    ("space", "space"),
    ("up", "Up"),
    ("down", "Down"),
    ("left", "Left"),
    ("right", "Right"),
    ("home", "Home"),
    ("end", "End"),
    ("pageup", "Prior"),
    ("pagedown", "Next"),
    ("capslock", "Caps_Lock"),
    ("printscreen", "Print"),
    ("plus", "plus"),
];

/// Translates a canonical key name to an X keysym.
#[must_use]
pub fn keysym(key: &str) -> String {
    if let Some((_, sym)) = KEYSYMS.iter().find(|(name, _)| *name == key) {
        return (*sym).to_string();
    }
    if let Some(number) = key.strip_prefix('f').filter(|rest| rest.parse::<u8>().is_ok()) {
        return format!("F{number}");
    }
    key.to_string()
}

/// X button number for a mouse button.
const fn button_number(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

/// X button number for a wheel direction.
const fn wheel_button(direction: ScrollDirection) -> &'static str {
    match direction {
        ScrollDirection::Up => "4",
        ScrollDirection::Down => "5",
    }
}

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Driver running external helper programs.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    /// Helper program configuration.
    config: DriverConfig,
}

impl CommandDriver {
    /// Creates a driver from configuration.
    #[must_use]
    pub const fn new(config: DriverConfig) -> Self {
        Self {
            config,
        }
    }

    /// Builds a command for `argv` with the configured display.
    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true).stdin(Stdio::null());
        if let Some(display) = &self.config.display {
            command.env("DISPLAY", display);
        }
        command
    }

    /// Runs the input helper with `args` and returns stdout.
    async fn input(&self, args: &[String]) -> Result<String, DriverError> {
        let bytes = self.run(&self.config.input_command, args, None).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Runs an argv vector, optionally feeding stdin, and returns stdout.
    async fn run_argv(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>, DriverError> {
        let (program, args) =
            argv.split_first().ok_or_else(|| DriverError::Unavailable("empty command".to_string()))?;
        self.run(program, args, stdin).await
    }

    /// Runs a program to completion and returns stdout.
    async fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>, DriverError> {
        let mut command = self.command(program, args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn().map_err(|err| DriverError::Unavailable(format!("{program}: {err}")))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.map_err(|err| DriverError::Failed(format!("{program} stdin: {err}")))?;
            drop(pipe);
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| DriverError::Failed(format!("{program}: {err}")))?;
        if !output.status.success() {
            return Err(DriverError::Failed(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Builds an owned argument vector.
fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

/// Parses `xdotool getmouselocation --shell` output.
fn parse_location(output: &str) -> Result<Point, DriverError> {
    let mut x = None;
    let mut y = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("X=") {
            x = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("Y=") {
            y = value.trim().parse().ok();
        }
    }
    match (x, y) {
        (Some(x), Some(y)) => Ok(Point::new(x, y)),
        _ => Err(DriverError::Parse(format!("unexpected pointer location output: {output}"))),
    }
}

#[async_trait]
impl DesktopDriver for CommandDriver {
    async fn move_pointer(&self, path: &[Point], step_delay: Duration) -> Result<(), DriverError> {
        for (index, point) in path.iter().enumerate() {
            if index > 0 && !step_delay.is_zero() {
                tokio::time::sleep(step_delay).await;
            }
            self.input(&[
                "mousemove".to_string(),
                point.x.to_string(),
                point.y.to_string(),
            ])
            .await?;
        }
        Ok(())
    }

    async fn click(&self, button: MouseButton, count: u8) -> Result<(), DriverError> {
        let count = count.to_string();
        self.input(&args(&["click", "--repeat", &count, button_number(button)])).await.map(drop)
    }

    async fn pointer_position(&self) -> Result<Point, DriverError> {
        let output = self.input(&args(&["getmouselocation", "--shell"])).await?;
        parse_location(&output)
    }

    async fn key_press(&self, keys: &[String]) -> Result<(), DriverError> {
        let combo = keys.iter().map(|key| keysym(key)).collect::<Vec<_>>().join("+");
        self.input(&["key".to_string(), combo]).await.map(drop)
    }

    async fn type_text(&self, text: &str, interval: Duration) -> Result<(), DriverError> {
        let delay = interval.as_millis().to_string();
        self.input(&args(&["type", "--delay", &delay, "--", text])).await.map(drop)
    }

    async fn scroll(&self, direction: ScrollDirection, clicks: u32) -> Result<(), DriverError> {
        let clicks = clicks.to_string();
        self.input(&args(&["click", "--repeat", &clicks, wheel_button(direction)])).await.map(drop)
    }

    async fn capture_png(&self) -> Result<Vec<u8>, DriverError> {
        self.run_argv(&self.config.capture_command, None).await
    }

    async fn ocr_tsv(&self, png: &[u8]) -> Result<String, DriverError> {
        let bytes = self.run_argv(&self.config.ocr_command, Some(png)).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn ui_elements(&self) -> Result<Option<Vec<Value>>, DriverError> {
        let Some(argv) = &self.config.ui_elements_command else {
            return Ok(None);
        };
        let bytes = self.run_argv(argv, None).await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| DriverError::Parse(format!("ui elements: {err}")))
    }

    async fn shell(&self, command_line: &str) -> Result<ShellOutput, DriverError> {
        let (program, prefix) = self
            .config
            .shell_command
            .split_first()
            .ok_or_else(|| DriverError::Unavailable("empty shell command".to_string()))?;
        let mut argv = prefix.to_vec();
        argv.push(command_line.to_string());
        let output = self
            .command(program, &argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| DriverError::Unavailable(format!("{program}: {err}")))?;
        Ok(ShellOutput {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            error: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode: output.status.code().unwrap_or(-1),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
