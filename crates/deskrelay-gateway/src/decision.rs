// crates/deskrelay-gateway/src/decision.rs
// ============================================================================
// Module: Decision Logic
// Description: Turns tool arguments into minimal primitive commands.
// Purpose: Keep trajectory, key, cadence, and timeout policy on the gateway.
// Dependencies: deskrelay-core, ring, serde
// ============================================================================

//! ## Overview
//! Every primitive tool is translated here into exactly one
//! [`PrimitiveCommand`]. The composition rules live only in this module and
//! never leave the gateway in plaintext:
//!
//! - pointer travel follows a cubic Bézier curve with randomized
//!   perpendicular control points, sampled at [`TRAJECTORY_POINTS`] waypoints
//!   over roughly [`TRAJECTORY_DURATION_MS`];
//! - key combinations are split on `+` and aliases are normalized;
//! - scroll, typing, capture, text search, and shell defaults are applied
//!   and clamped.
//!
//! Arguments are untrusted and are parsed into strict typed shapes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deskrelay_core::CaptureOptions;
use deskrelay_core::MouseButton;
use deskrelay_core::Point;
use deskrelay_core::PrimitiveCommand;
use deskrelay_core::ScrollDirection;
use deskrelay_core::TextSearch;
use deskrelay_core::ToolName;
use ring::rand::SecureRandom;
use ring::rand::SystemRandom;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Waypoints emitted per pointer trajectory.
pub const TRAJECTORY_POINTS: u32 = 20;
/// Total pointer travel time in milliseconds.
pub const TRAJECTORY_DURATION_MS: u64 = 300;
/// Minimum perpendicular offset as a fraction of travel distance.
const MIN_CURVE_FRACTION: f64 = 0.05;
/// Maximum perpendicular offset as a fraction of travel distance.
const MAX_CURVE_FRACTION: f64 = 0.15;
/// Position of the first control point along the line.
const FIRST_CONTROL_AT: f64 = 0.33;
/// Position of the second control point along the line.
const SECOND_CONTROL_AT: f64 = 0.66;
/// Largest accepted screen coordinate.
pub const MAX_COORDINATE: i32 = 16_384;
/// Wheel clicks used when none are requested.
pub const DEFAULT_SCROLL_CLICKS: u32 = 3;
/// Largest accepted wheel click count.
const MAX_SCROLL_CLICKS: u32 = 100;
/// Typing cadence used when none is requested.
pub const DEFAULT_TYPING_INTERVAL_MS: u64 = 50;
/// Largest accepted typing cadence.
const MAX_TYPING_INTERVAL_MS: u64 = 1_000;
/// Shell timeout used when none is requested.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;
/// Minimum OCR confidence kept in captures.
pub const OCR_MIN_CONFIDENCE: f64 = 30.0;
/// Maximum OCR blocks returned per capture.
pub const MAX_TEXT_BLOCKS: usize = 200;
/// Minimum OCR confidence considered by text searches.
pub const SEARCH_MIN_CONFIDENCE: f64 = 0.0;
/// Maximum matches returned by one text search.
pub const MAX_SEARCH_MATCHES: usize = 50;
/// Longest accepted search text in characters.
const MAX_SEARCH_TEXT: usize = 256;
/// Maximum keys in one combination.
const MAX_COMBO_KEYS: usize = 6;

/// Key aliases and their canonical names.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("control", "ctrl"),
    ("ctl", "ctrl"),
    ("return", "enter"),
    ("esc", "escape"),
    ("option", "alt"),
    ("cmd", "super"),
    ("command", "super"),
    ("win", "super"),
    ("windows", "super"),
    ("meta", "super"),
    ("del", "delete"),
    ("ins", "insert"),
    ("bksp", "backspace"),
    ("pgup", "pageup"),
    ("page_up", "pageup"),
    ("pgdn", "pagedown"),
    ("page_down", "pagedown"),
    ("spacebar", "space"),
    ("arrowup", "up"),
    ("arrowdown", "down"),
    ("arrowleft", "left"),
    ("arrowright", "right"),
];

/// Canonical multi-character key names.
const NAMED_KEYS: &[&str] = &[
    "ctrl", "alt", "shift", "super", "enter", "escape", "tab", "backspace", "delete", "insert",
    "space", "up", "down", "left", "right", "home", "end", "pageup", "pagedown", "capslock",
    "printscreen", "plus", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11",
    "f12",
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Decision failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    /// Arguments did not match the tool's shape.
    #[error("invalid arguments: {0}")]
    InvalidArgument(String),
    /// The tool runs on the gateway and has no primitive.
    #[error("tool {0} does not map to a primitive")]
    NotPrimitive(ToolName),
}

// ============================================================================
// SECTION: Randomness
// ============================================================================

/// Source of uniform samples for trajectory jitter.
pub trait JitterSource: Send + Sync {
    /// Returns a sample in `[0, 1)`.
    fn unit(&self) -> f64;
}

/// Jitter drawn from the system RNG.
pub struct SystemJitter {
    /// Underlying RNG.
    rng: SystemRandom,
}

impl SystemJitter {
    /// Creates a system-backed jitter source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for SystemJitter {
    fn unit(&self) -> f64 {
        let mut bytes = [0_u8; 4];
        if self.rng.fill(&mut bytes).is_err() {
            return 0.5;
        }
        f64::from(u32::from_le_bytes(bytes)) / 4_294_967_296.0
    }
}

/// Jitter that always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Draws a uniform sample in `[low, high)`.
fn uniform(jitter: &dyn JitterSource, low: f64, high: f64) -> f64 {
    (high - low).mul_add(jitter.unit(), low)
}

// ============================================================================
// SECTION: Trajectories
// ============================================================================

/// Computes a human-like pointer path from `start` to `end`.
///
/// The returned waypoints exclude `start` and always end exactly at `end`.
/// A zero-length move yields the single destination point.
#[must_use]
pub fn trajectory(start: Point, end: Point, jitter: &dyn JitterSource) -> Vec<Point> {
    let (x0, y0) = (f64::from(start.x), f64::from(start.y));
    let (x3, y3) = (f64::from(end.x), f64::from(end.y));
    let (dx, dy) = (x3 - x0, y3 - y0);
    let distance = dx.hypot(dy);
    if distance < 1.0 {
        return vec![end];
    }
    let (px, py) = (-dy / distance, dx / distance);
    let max_offset = distance * uniform(jitter, MIN_CURVE_FRACTION, MAX_CURVE_FRACTION);
    let first = uniform(jitter, -max_offset, max_offset);
    let second = uniform(jitter, -max_offset, max_offset);
    let (x1, y1) = (dx.mul_add(FIRST_CONTROL_AT, x0) + px * first, dy.mul_add(FIRST_CONTROL_AT, y0) + py * first);
    let (x2, y2) = (dx.mul_add(SECOND_CONTROL_AT, x0) + px * second, dy.mul_add(SECOND_CONTROL_AT, y0) + py * second);

    let mut path = Vec::new();
    for step in 1..=TRAJECTORY_POINTS {
        let t = f64::from(step) / f64::from(TRAJECTORY_POINTS);
        let u = 1.0 - t;
        let b0 = u * u * u;
        let b1 = 3.0 * u * u * t;
        let b2 = 3.0 * u * t * t;
        let b3 = t * t * t;
        let x = b0 * x0 + b1 * x1 + b2 * x2 + b3 * x3;
        let y = b0 * y0 + b1 * y1 + b2 * y2 + b3 * y3;
        path.push(Point::new(to_pixel(x), to_pixel(y)));
    }
    if let Some(last) = path.last_mut() {
        *last = end;
    }
    path
}

/// Delay between waypoints for a path of `points` entries.
#[must_use]
pub fn step_delay_ms(points: usize) -> u64 {
    let points = u64::try_from(points.max(1)).unwrap_or(u64::MAX);
    TRAJECTORY_DURATION_MS / points
}

/// Rounds and clamps a coordinate onto the screen.
#[allow(clippy::cast_possible_truncation, reason = "Value is clamped to the coordinate range.")]
fn to_pixel(value: f64) -> i32 {
    value.round().clamp(0.0, f64::from(MAX_COORDINATE)) as i32
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Splits a key combination and normalizes each key.
///
/// # Errors
///
/// Returns [`DecisionError::InvalidArgument`] for empty segments, unknown
/// multi-character keys, or overly long combinations.
pub fn parse_key_combo(combo: &str) -> Result<Vec<String>, DecisionError> {
    let combo = combo.trim();
    if combo.is_empty() {
        return Err(DecisionError::InvalidArgument("key must be non-empty".to_string()));
    }
    let (body, trailing_plus) = if combo == "+" {
        ("", true)
    } else if let Some(stripped) = combo.strip_suffix("++") {
        (stripped, true)
    } else {
        (combo, false)
    };

    let mut keys = Vec::new();
    if !body.is_empty() {
        for segment in body.split('+') {
            keys.push(normalize_key(segment)?);
        }
    }
    if trailing_plus {
        keys.push("plus".to_string());
    }
    if keys.len() > MAX_COMBO_KEYS {
        return Err(DecisionError::InvalidArgument(format!(
            "key combination exceeds {MAX_COMBO_KEYS} keys"
        )));
    }
    Ok(keys)
}

/// Normalizes one key name.
fn normalize_key(segment: &str) -> Result<String, DecisionError> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return Err(DecisionError::InvalidArgument("empty key in combination".to_string()));
    }
    let mut chars = trimmed.chars();
    if let (Some(single), None) = (chars.next(), chars.next()) {
        if single.is_control() {
            return Err(DecisionError::InvalidArgument("control characters are not keys".to_string()));
        }
        return Ok(single.to_lowercase().collect());
    }
    let lowered = trimmed.to_ascii_lowercase();
    let canonical = KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map_or(lowered.as_str(), |(_, canonical)| canonical);
    if NAMED_KEYS.contains(&canonical) {
        Ok(canonical.to_string())
    } else {
        Err(DecisionError::InvalidArgument(format!("unknown key: {trimmed}")))
    }
}

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// `move_mouse` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MoveArgs {
    /// Destination x.
    x: i32,
    /// Destination y.
    y: i32,
}

/// `click` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClickArgs {
    /// Click x.
    x: i32,
    /// Click y.
    y: i32,
    /// Button to press.
    #[serde(default)]
    button: MouseButton,
    /// Double click.
    #[serde(default)]
    double: bool,
}

/// `scroll` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScrollArgs {
    /// Direction.
    direction: ScrollDirection,
    /// Wheel clicks.
    #[serde(default)]
    clicks: Option<u32>,
    /// Optional x.
    #[serde(default)]
    x: Option<i32>,
    /// Optional y.
    #[serde(default)]
    y: Option<i32>,
}

/// `type_text` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeArgs {
    /// Text to type.
    text: String,
    /// Delay between characters.
    #[serde(default)]
    interval_ms: Option<u64>,
}

/// `press_key` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyArgs {
    /// Key or combination.
    key: String,
}

/// `take_screenshot` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScreenshotArgs {
    /// Run OCR.
    #[serde(default)]
    include_ocr: Option<bool>,
    /// Enumerate UI elements.
    #[serde(default)]
    include_ui_elements: Option<bool>,
}

/// `run_command` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandArgs {
    /// Command line.
    command: String,
    /// Timeout in seconds.
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// `find_text_on_screen` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FindTextArgs {
    /// Text to look for.
    text: String,
    /// Match substrings.
    #[serde(default)]
    partial_match: Option<bool>,
    /// Compare case exactly.
    #[serde(default)]
    case_sensitive: Option<bool>,
}

/// Arguments for tools that take none.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NoArgs {}

/// Parses tool arguments into a typed shape; `null` means no arguments.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T, DecisionError> {
    let value = if arguments.is_null() { Value::Object(serde_json::Map::new()) } else { arguments.clone() };
    serde_json::from_value(value).map_err(|err| DecisionError::InvalidArgument(err.to_string()))
}

/// Validates a screen coordinate pair.
fn point(x: i32, y: i32) -> Result<Point, DecisionError> {
    let range = 0..=MAX_COORDINATE;
    if !range.contains(&x) || !range.contains(&y) {
        return Err(DecisionError::InvalidArgument(format!(
            "coordinates must be within 0..={MAX_COORDINATE}"
        )));
    }
    Ok(Point::new(x, y))
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Timeout policy applied to issued primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    /// Envelope timeout for ordinary primitives.
    pub primitive_timeout_ms: u64,
    /// Ceiling for any envelope timeout.
    pub execution_ceiling_ms: u64,
}

/// A decided primitive and its envelope lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitivePlan {
    /// Command to seal.
    pub command: PrimitiveCommand,
    /// Envelope timeout in milliseconds.
    pub timeout_ms: u64,
    /// Pointer position once the command completes, when it moves the pointer.
    pub pointer_after: Option<Point>,
}

impl DecisionPolicy {
    /// Decides the primitive for a tool invocation.
    ///
    /// `pointer` is the last position this gateway moved the pointer to, if
    /// known. Unknown positions produce a direct single-waypoint move.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] when arguments are invalid or the tool is
    /// not a primitive tool.
    pub fn decide(
        &self,
        tool: ToolName,
        arguments: &Value,
        pointer: Option<Point>,
        jitter: &dyn JitterSource,
    ) -> Result<PrimitivePlan, DecisionError> {
        let ordinary = self.primitive_timeout_ms.min(self.execution_ceiling_ms);
        let travel = |target: Point| {
            pointer.map_or_else(|| vec![target], |start| trajectory(start, target, jitter))
        };
        match tool {
            ToolName::MoveMouse => {
                let args: MoveArgs = parse_args(arguments)?;
                let target = point(args.x, args.y)?;
                let path = travel(target);
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::PointerMove {
                        step_delay_ms: step_delay_ms(path.len()),
                        path,
                    },
                    timeout_ms: ordinary,
                    pointer_after: Some(target),
                })
            }
            ToolName::Click => {
                let args: ClickArgs = parse_args(arguments)?;
                let target = point(args.x, args.y)?;
                let approach = travel(target);
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::Click {
                        target,
                        button: args.button,
                        count: if args.double { 2 } else { 1 },
                        step_delay_ms: step_delay_ms(approach.len()),
                        approach,
                    },
                    timeout_ms: ordinary,
                    pointer_after: Some(target),
                })
            }
            ToolName::GetMousePosition => {
                let _: NoArgs = parse_args(arguments)?;
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::PointerPosition,
                    timeout_ms: ordinary,
                    pointer_after: None,
                })
            }
            ToolName::Scroll => {
                let args: ScrollArgs = parse_args(arguments)?;
                let clicks = args.clicks.unwrap_or(DEFAULT_SCROLL_CLICKS);
                if clicks == 0 || clicks > MAX_SCROLL_CLICKS {
                    return Err(DecisionError::InvalidArgument(format!(
                        "clicks must be within 1..={MAX_SCROLL_CLICKS}"
                    )));
                }
                let at = match (args.x, args.y) {
                    (Some(x), Some(y)) => Some(point(x, y)?),
                    (None, None) => None,
                    _ => {
                        return Err(DecisionError::InvalidArgument(
                            "x and y must be given together".to_string(),
                        ));
                    }
                };
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::Scroll {
                        direction: args.direction,
                        clicks,
                        at,
                    },
                    timeout_ms: ordinary,
                    pointer_after: at,
                })
            }
            ToolName::TypeText => {
                let args: TypeArgs = parse_args(arguments)?;
                let interval_ms = args.interval_ms.unwrap_or(DEFAULT_TYPING_INTERVAL_MS);
                if interval_ms > MAX_TYPING_INTERVAL_MS {
                    return Err(DecisionError::InvalidArgument(format!(
                        "interval_ms must be at most {MAX_TYPING_INTERVAL_MS}"
                    )));
                }
                let chars = u64::try_from(args.text.chars().count()).unwrap_or(u64::MAX);
                let typing = chars.saturating_mul(interval_ms);
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::TypeText {
                        text: args.text,
                        interval_ms,
                    },
                    timeout_ms: ordinary.saturating_add(typing).min(self.execution_ceiling_ms),
                    pointer_after: None,
                })
            }
            ToolName::PressKey => {
                let args: KeyArgs = parse_args(arguments)?;
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::KeyPress {
                        keys: parse_key_combo(&args.key)?,
                    },
                    timeout_ms: ordinary,
                    pointer_after: None,
                })
            }
            ToolName::TakeScreenshot => {
                let args: ScreenshotArgs = parse_args(arguments)?;
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::Capture(capture_options(
                        true,
                        args.include_ocr.unwrap_or(true),
                        args.include_ui_elements.unwrap_or(true),
                    )),
                    timeout_ms: ordinary,
                    pointer_after: None,
                })
            }
            ToolName::GetUiElements => {
                let _: NoArgs = parse_args(arguments)?;
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::Capture(capture_options(false, false, true)),
                    timeout_ms: ordinary,
                    pointer_after: None,
                })
            }
            ToolName::RunCommand => {
                let args: CommandArgs = parse_args(arguments)?;
                if args.command.trim().is_empty() {
                    return Err(DecisionError::InvalidArgument("command must be non-empty".to_string()));
                }
                let seconds = args.timeout_seconds.unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS).max(1);
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::Shell {
                        command: args.command,
                    },
                    timeout_ms: seconds.saturating_mul(1_000).min(self.execution_ceiling_ms),
                    pointer_after: None,
                })
            }
            ToolName::FindTextOnScreen => {
                let args: FindTextArgs = parse_args(arguments)?;
                let text = args.text.trim();
                if text.is_empty() || text.chars().count() > MAX_SEARCH_TEXT {
                    return Err(DecisionError::InvalidArgument(format!(
                        "text must be 1..={MAX_SEARCH_TEXT} characters"
                    )));
                }
                Ok(PrimitivePlan {
                    command: PrimitiveCommand::FindText(TextSearch {
                        text: text.to_string(),
                        partial_match: args.partial_match.unwrap_or(true),
                        case_sensitive: args.case_sensitive.unwrap_or(false),
                        ocr_min_confidence: SEARCH_MIN_CONFIDENCE,
                        max_matches: MAX_SEARCH_MATCHES,
                    }),
                    timeout_ms: ordinary,
                    pointer_after: None,
                })
            }
            ToolName::Wait | ToolName::DescribeSandbox => Err(DecisionError::NotPrimitive(tool)),
        }
    }
}

/// Builds capture options with the fixed OCR policy.
const fn capture_options(include_image: bool, include_ocr: bool, include_ui_elements: bool) -> CaptureOptions {
    CaptureOptions {
        include_image,
        include_ocr,
        include_ui_elements,
        ocr_min_confidence: OCR_MIN_CONFIDENCE,
        max_text_blocks: MAX_TEXT_BLOCKS,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
