// crates/deskrelay-core/src/core/tooling.rs
// ============================================================================
// Module: Deskrelay Tool Catalog
// Description: Canonical tool identifiers, execution classes, and schemas.
// Purpose: Shared, versioned tool contract for relay, gateway, and docs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The tool catalog is the external contract consumed by the orchestration
//! layer. Changes are additive: new tools are appended and
//! [`CATALOG_VERSION`] is bumped; existing names and schemas never change
//! incompatibly.
//! Security posture: tool inputs are untrusted and validated against these
//! schemas before forwarding.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Catalog contract version.
pub const CATALOG_VERSION: &str = "1.2.0";
/// Upper bound on any server-side or agent execution (milliseconds).
pub const EXECUTION_CEILING_MS: u64 = 300_000;

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Canonical tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Move the pointer to a coordinate.
    MoveMouse,
    /// Click at a coordinate.
    Click,
    /// Report the pointer position.
    GetMousePosition,
    /// Scroll the wheel.
    Scroll,
    /// Type text.
    TypeText,
    /// Press a key or combination.
    PressKey,
    /// Capture the screen with OCR and UI elements.
    TakeScreenshot,
    /// Enumerate UI elements.
    GetUiElements,
    /// Run a shell command in the guest.
    RunCommand,
    /// Pause server-side.
    Wait,
    /// Describe the sandbox addressing contract.
    DescribeSandbox,
    /// Locate text on the screen by OCR.
    FindTextOnScreen,
}

/// Where a tool executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecution {
    /// Computed entirely by the gateway.
    Direct,
    /// Requires one guest primitive delivered as an envelope.
    Primitive,
}

impl ToolName {
    /// Returns the canonical string name for the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MoveMouse => "move_mouse",
            Self::Click => "click",
            Self::GetMousePosition => "get_mouse_position",
            Self::Scroll => "scroll",
            Self::TypeText => "type_text",
            Self::PressKey => "press_key",
            Self::TakeScreenshot => "take_screenshot",
            Self::GetUiElements => "get_ui_elements",
            Self::RunCommand => "run_command",
            Self::Wait => "wait",
            Self::DescribeSandbox => "describe_sandbox",
            Self::FindTextOnScreen => "find_text_on_screen",
        }
    }

    /// Returns all tool names in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::MoveMouse,
            Self::Click,
            Self::GetMousePosition,
            Self::Scroll,
            Self::TypeText,
            Self::PressKey,
            Self::TakeScreenshot,
            Self::GetUiElements,
            Self::RunCommand,
            Self::Wait,
            Self::DescribeSandbox,
            Self::FindTextOnScreen,
        ]
    }

    /// Parses a tool name from its string representation.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "move_mouse" => Some(Self::MoveMouse),
            "click" => Some(Self::Click),
            "get_mouse_position" => Some(Self::GetMousePosition),
            "scroll" => Some(Self::Scroll),
            "type_text" => Some(Self::TypeText),
            "press_key" => Some(Self::PressKey),
            "take_screenshot" => Some(Self::TakeScreenshot),
            "get_ui_elements" => Some(Self::GetUiElements),
            "run_command" => Some(Self::RunCommand),
            "wait" => Some(Self::Wait),
            "describe_sandbox" => Some(Self::DescribeSandbox),
            "find_text_on_screen" => Some(Self::FindTextOnScreen),
            _ => None,
        }
    }

    /// Returns where the tool executes.
    #[must_use]
    pub const fn execution(self) -> ToolExecution {
        match self {
            Self::Wait | Self::DescribeSandbox => ToolExecution::Direct,
            _ => ToolExecution::Primitive,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Definitions
// ============================================================================

/// Tool definition advertised to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: ToolName,
    /// Tool description for clients.
    pub description: String,
    /// JSON schema for tool input.
    pub input_schema: Value,
}

/// Versioned tool catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCatalog {
    /// Catalog contract version.
    pub version: String,
    /// Tool definitions in canonical order.
    pub tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Returns the definition for `name`.
    #[must_use]
    pub fn get(&self, name: ToolName) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

/// Returns the canonical tool catalog.
#[must_use]
pub fn tool_catalog() -> ToolCatalog {
    ToolCatalog {
        version: CATALOG_VERSION.to_string(),
        tools: tool_definitions(),
    }
}

/// Returns the canonical tool definitions.
///
/// The order is preserved in listings to keep diffs stable. Append new tools
/// at the end.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::all().iter().map(|name| definition(*name)).collect()
}

/// Builds the definition for one tool.
fn definition(name: ToolName) -> ToolDefinition {
    let (description, input_schema) = match name {
        ToolName::MoveMouse => (
            "Move the pointer to an absolute screen coordinate.",
            tool_input_schema(&json!({"x": coordinate("x"), "y": coordinate("y")}), &["x", "y"]),
        ),
        ToolName::Click => (
            "Move to a coordinate and click with the chosen button.",
            tool_input_schema(
                &json!({
                    "x": coordinate("x"),
                    "y": coordinate("y"),
                    "button": {"type": "string", "enum": ["left", "right", "middle"]},
                    "double": {"type": "boolean", "description": "Double click when true."}
                }),
                &["x", "y"],
            ),
        ),
        ToolName::GetMousePosition => {
            ("Report the current pointer position.", tool_input_schema(&json!({}), &[]))
        }
        ToolName::Scroll => (
            "Scroll the mouse wheel, optionally at a coordinate.",
            tool_input_schema(
                &json!({
                    "direction": {"type": "string", "enum": ["up", "down"]},
                    "clicks": {"type": "integer", "minimum": 1, "maximum": 100},
                    "x": coordinate("x"),
                    "y": coordinate("y")
                }),
                &["direction"],
            ),
        ),
        ToolName::TypeText => (
            "Type literal text into the focused window.",
            tool_input_schema(
                &json!({
                    "text": {"type": "string", "maxLength": 10_000},
                    "interval_ms": {"type": "integer", "minimum": 0, "maximum": 1_000}
                }),
                &["text"],
            ),
        ),
        ToolName::PressKey => (
            "Press a key or a '+'-joined combination such as ctrl+c.",
            tool_input_schema(
                &json!({"key": {"type": "string", "minLength": 1, "maxLength": 64}}),
                &["key"],
            ),
        ),
        ToolName::TakeScreenshot => (
            "Capture the screen with OCR text blocks, UI elements, and pointer position.",
            tool_input_schema(
                &json!({
                    "include_ocr": {"type": "boolean"},
                    "include_ui_elements": {"type": "boolean"}
                }),
                &[],
            ),
        ),
        ToolName::GetUiElements => {
            ("Enumerate visible UI elements.", tool_input_schema(&json!({}), &[]))
        }
        ToolName::RunCommand => (
            "Run a shell command inside the guest and return its output.",
            tool_input_schema(
                &json!({
                    "command": {"type": "string", "minLength": 1, "maxLength": 8_192},
                    "timeout_seconds": {"type": "integer", "minimum": 1, "maximum": 300}
                }),
                &["command"],
            ),
        ),
        ToolName::Wait => (
            "Pause for a number of milliseconds.",
            tool_input_schema(
                &json!({"milliseconds": {"type": "integer", "minimum": 0, "maximum": EXECUTION_CEILING_MS}}),
                &["milliseconds"],
            ),
        ),
        ToolName::DescribeSandbox => (
            "Describe the fixed logical addresses visible inside the sandbox.",
            tool_input_schema(&json!({}), &[]),
        ),
        ToolName::FindTextOnScreen => (
            "Find text on the screen by OCR and return the coordinates of each match.",
            tool_input_schema(
                &json!({
                    "text": {"type": "string", "minLength": 1, "maxLength": 256},
                    "partial_match": {"type": "boolean", "description": "Match substrings of words (default true)."},
                    "case_sensitive": {"type": "boolean", "description": "Compare case exactly (default false)."}
                }),
                &["text"],
            ),
        ),
    };
    ToolDefinition {
        name,
        description: description.to_string(),
        input_schema,
    }
}

// ============================================================================
// SECTION: Schema Helpers
// ============================================================================

/// Builds a standard tool input schema wrapper.
fn tool_input_schema(properties: &Value, required: &[&str]) -> Value {
    with_schema(object_schema(properties, required))
}

/// Builds a strict object schema.
fn object_schema(properties: &Value, required: &[&str]) -> Value {
    let required_values: Vec<Value> =
        required.iter().map(|value| Value::String((*value).to_string())).collect();
    json!({
        "type": "object",
        "required": required_values,
        "properties": properties,
        "additionalProperties": false
    })
}

/// Adds a `$schema` header to a top-level JSON schema.
fn with_schema(schema: Value) -> Value {
    let Value::Object(mut map) = schema else {
        return schema;
    };
    map.insert(
        String::from("$schema"),
        Value::String(String::from("https://json-schema.org/draft/2020-12/schema")),
    );
    Value::Object(map)
}

/// Returns a schema describing a screen coordinate axis.
fn coordinate(axis: &str) -> Value {
    json!({
        "type": "integer",
        "minimum": 0,
        "maximum": 16_384,
        "description": format!("Screen {axis} coordinate in pixels.")
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::*;

    #[test]
    fn names_round_trip_through_parse() {
        for name in ToolName::all() {
            assert_eq!(ToolName::parse(name.as_str()), Some(*name));
        }
        assert_eq!(ToolName::parse("format_disk"), None);
    }

    #[test]
    fn catalog_lists_every_tool_in_order() {
        let catalog = tool_catalog();
        let names: Vec<ToolName> = catalog.tools.iter().map(|tool| tool.name).collect();
        assert_eq!(names, ToolName::all());
        assert_eq!(catalog.version, CATALOG_VERSION);
    }

    #[test]
    fn schemas_are_strict_objects() {
        for tool in tool_definitions() {
            assert_eq!(tool.input_schema["type"], "object");
            assert_eq!(tool.input_schema["additionalProperties"], false);
        }
    }

    #[test]
    fn text_search_requires_text() {
        let catalog = tool_catalog();
        let tool = catalog.get(ToolName::FindTextOnScreen).unwrap();
        assert_eq!(tool.input_schema["required"], json!(["text"]));
        assert_eq!(tool.input_schema["properties"]["partial_match"]["type"], "boolean");
        assert_eq!(ToolName::FindTextOnScreen.execution(), ToolExecution::Primitive);
    }

    #[test]
    fn only_wait_and_describe_run_directly() {
        let direct: Vec<ToolName> = ToolName::all()
            .iter()
            .copied()
            .filter(|name| name.execution() == ToolExecution::Direct)
            .collect();
        assert_eq!(direct, vec![ToolName::Wait, ToolName::DescribeSandbox]);
    }
}
