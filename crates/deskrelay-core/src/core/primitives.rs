// crates/deskrelay-core/src/core/primitives.rs
// ============================================================================
// Module: Deskrelay Primitive Commands
// Description: Business-logic-free actions executed by the guest agent.
// Purpose: Define the plaintext payload sealed inside execution envelopes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`PrimitiveCommand`] is the complete, already-decided description of one
//! atomic guest action. Pointer paths, key sequences, and timing are chosen by
//! the gateway; the agent replays them verbatim and never branches on intent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Geometry
// ============================================================================

/// Screen coordinate in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: i32,
    /// Vertical position.
    pub y: i32,
}

impl Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Mouse button selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    /// Primary button.
    #[default]
    Left,
    /// Secondary button.
    Right,
    /// Middle button.
    Middle,
}

impl MouseButton {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// Scroll direction selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    /// Scroll towards the top.
    Up,
    /// Scroll towards the bottom.
    Down,
}

impl ScrollDirection {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Capture feature selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Include the base64 PNG image.
    pub include_image: bool,
    /// Run optical text recognition.
    pub include_ocr: bool,
    /// Enumerate UI elements.
    pub include_ui_elements: bool,
    /// Minimum OCR confidence (0-100) for a text block to be kept.
    pub ocr_min_confidence: f64,
    /// Maximum number of OCR blocks returned.
    pub max_text_blocks: usize,
}

/// On-screen text search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSearch {
    /// Text to look for.
    pub text: String,
    /// Match substrings instead of whole words.
    pub partial_match: bool,
    /// Compare without folding case.
    pub case_sensitive: bool,
    /// Minimum OCR confidence (0-100) for a word to be considered.
    pub ocr_min_confidence: f64,
    /// Maximum number of matches returned.
    pub max_matches: usize,
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Wire names of every primitive the agent understands.
pub const PRIMITIVE_ACTIONS: &[&str] = &[
    "pointer_move",
    "click",
    "pointer_position",
    "key_press",
    "type_text",
    "scroll",
    "capture",
    "shell",
    "find_text",
];

/// One atomic guest action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PrimitiveCommand {
    /// Move the pointer through the given waypoints.
    PointerMove {
        /// Waypoints; the last entry is the destination.
        path: Vec<Point>,
        /// Delay between waypoints in milliseconds.
        step_delay_ms: u64,
    },
    /// Move along `approach` and click at `target`.
    Click {
        /// Click position.
        target: Point,
        /// Button to press.
        button: MouseButton,
        /// Number of clicks (1 or 2).
        count: u8,
        /// Waypoints travelled before clicking.
        approach: Vec<Point>,
        /// Delay between waypoints in milliseconds.
        step_delay_ms: u64,
    },
    /// Report the current pointer position.
    PointerPosition,
    /// Press a key or key combination.
    KeyPress {
        /// Keys held together, in press order.
        keys: Vec<String>,
    },
    /// Type literal text.
    TypeText {
        /// Text to type.
        text: String,
        /// Delay between characters in milliseconds.
        interval_ms: u64,
    },
    /// Scroll the wheel.
    Scroll {
        /// Scroll direction.
        direction: ScrollDirection,
        /// Wheel clicks.
        clicks: u32,
        /// Optional pointer position before scrolling.
        at: Option<Point>,
    },
    /// Capture the screen.
    Capture(CaptureOptions),
    /// Run a shell command.
    Shell {
        /// Command line passed to the configured shell.
        command: String,
    },
    /// Capture the screen and search its recognized text.
    FindText(TextSearch),
}

impl PrimitiveCommand {
    /// Returns the wire name of the action.
    #[must_use]
    pub const fn action_name(&self) -> &'static str {
        match self {
            Self::PointerMove { .. } => "pointer_move",
            Self::Click { .. } => "click",
            Self::PointerPosition => "pointer_position",
            Self::KeyPress { .. } => "key_press",
            Self::TypeText { .. } => "type_text",
            Self::Scroll { .. } => "scroll",
            Self::Capture(_) => "capture",
            Self::Shell { .. } => "shell",
            Self::FindText(_) => "find_text",
        }
    }
}

/// Returns true when `name` is a known primitive action.
#[must_use]
pub fn is_known_action(name: &str) -> bool {
    PRIMITIVE_ACTIONS.contains(&name)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use serde_json::json;

    use super::*;

    #[test]
    fn commands_are_tagged_by_action() {
        let command = PrimitiveCommand::Shell {
            command: "whoami".to_string(),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value, json!({"action": "shell", "command": "whoami"}));
        assert!(is_known_action(command.action_name()));
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let parsed: Result<PrimitiveCommand, _> =
            serde_json::from_value(json!({"action": "format_disk"}));
        assert!(parsed.is_err());
        assert!(!is_known_action("format_disk"));
    }

    #[test]
    fn text_search_serializes_flat_under_its_action() {
        let command = PrimitiveCommand::FindText(TextSearch {
            text: "OK".to_string(),
            partial_match: false,
            case_sensitive: true,
            ocr_min_confidence: 0.0,
            max_matches: 10,
        });
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["action"], "find_text");
        assert_eq!(value["text"], "OK");
        assert_eq!(value["case_sensitive"], true);
        let parsed: PrimitiveCommand = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn action_table_covers_every_variant() {
        let samples = [
            PrimitiveCommand::PointerMove {
                path: vec![Point::new(1, 1)],
                step_delay_ms: 0,
            },
            PrimitiveCommand::PointerPosition,
            PrimitiveCommand::KeyPress {
                keys: vec!["ctrl".to_string(), "c".to_string()],
            },
            PrimitiveCommand::Scroll {
                direction: ScrollDirection::Down,
                clicks: 3,
                at: None,
            },
            PrimitiveCommand::FindText(TextSearch {
                text: "Save".to_string(),
                partial_match: true,
                case_sensitive: false,
                ocr_min_confidence: 0.0,
                max_matches: 50,
            }),
        ];
        for sample in samples {
            assert!(PRIMITIVE_ACTIONS.contains(&sample.action_name()));
        }
        assert_eq!(PRIMITIVE_ACTIONS.len(), 9);
    }
}
