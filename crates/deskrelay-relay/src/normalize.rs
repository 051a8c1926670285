// crates/deskrelay-relay/src/normalize.rs
// ============================================================================
// Module: Result Normalization
// Description: Declarative tool-to-normalizer table.
// Purpose: Map every tool result onto {success, output, message, ...}.
// Dependencies: deskrelay-core, serde_json
// ============================================================================

//! ## Overview
//! Normalization is lossless. Every field returned by the gateway or agent is
//! kept as is; `success`, `output`, and `message` are added only when absent.
//! Tools without an entry in [`NORMALIZERS`] use the generic rule, whose
//! `output` is `"Action completed"`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deskrelay_core::ErrorKind;
use deskrelay_core::ToolName;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Generic `output` for tools without textual output.
pub const GENERIC_OUTPUT: &str = "Action completed";
/// UI elements named in a summary before it is cut short.
const UI_SUMMARY_LIMIT: usize = 20;
/// Search hits listed in a summary before it is cut short.
const MATCH_SUMMARY_LIMIT: usize = 5;

// ============================================================================
// SECTION: Table
// ============================================================================

/// Field synthesizers for one tool.
struct Normalizer {
    /// Builds `output`.
    output: fn(&Map<String, Value>) -> Value,
    /// Builds `message`.
    message: fn(&Map<String, Value>) -> String,
}

/// Per-tool normalizers; everything else is [`GENERIC`].
const NORMALIZERS: &[(ToolName, Normalizer)] = &[
    (
        ToolName::TakeScreenshot,
        Normalizer {
            output: screenshot_output,
            message: screenshot_message,
        },
    ),
    (
        ToolName::GetMousePosition,
        Normalizer {
            output: position_output,
            message: position_message,
        },
    ),
    (
        ToolName::RunCommand,
        Normalizer {
            output: command_output,
            message: command_message,
        },
    ),
    (
        ToolName::GetUiElements,
        Normalizer {
            output: ui_output,
            message: ui_message,
        },
    ),
    (
        ToolName::FindTextOnScreen,
        Normalizer {
            output: search_output,
            message: search_message,
        },
    ),
];

/// Generic normalizer.
static GENERIC: Normalizer = Normalizer {
    output: generic_output,
    message: generic_message,
};

/// Returns the normalizer for `tool`.
fn normalizer(tool: ToolName) -> &'static Normalizer {
    NORMALIZERS.iter().find(|(name, _)| *name == tool).map_or(&GENERIC, |(_, entry)| entry)
}

// ============================================================================
// SECTION: Entry Points
// ============================================================================

/// Normalizes a successful hop result for `tool`.
#[must_use]
pub fn success(tool: ToolName, result: Value) -> Value {
    let mut fields = match result {
        Value::Object(fields) => fields,
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("result".to_string(), other);
            wrapped
        }
    };
    let entry = normalizer(tool);
    let output = (entry.output)(&fields);
    let message = (entry.message)(&fields);
    fields.entry("success").or_insert(Value::Bool(true));
    fields.entry("output").or_insert(output);
    fields.entry("message").or_insert(Value::String(message));
    Value::Object(fields)
}

/// Builds the normalized failure body.
#[must_use]
pub fn failure(kind: ErrorKind, error: &str) -> Value {
    json!({
        "success": false,
        "error": error,
        "error_kind": kind,
        "output": format!("Error: {error}"),
        "message": error,
    })
}

// ============================================================================
// SECTION: Normalizers
// ============================================================================

/// Generic output.
fn generic_output(_fields: &Map<String, Value>) -> Value {
    Value::String(GENERIC_OUTPUT.to_string())
}

/// Generic message.
fn generic_message(_fields: &Map<String, Value>) -> String {
    GENERIC_OUTPUT.to_string()
}

/// Screenshot output is the image payload.
fn screenshot_output(fields: &Map<String, Value>) -> Value {
    fields.get("image").cloned().unwrap_or_else(|| Value::String("Screenshot captured".to_string()))
}

/// Screenshot message counts the recognized text.
fn screenshot_message(fields: &Map<String, Value>) -> String {
    let blocks = fields
        .get("ocr")
        .and_then(|ocr| ocr.get("textElements"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    format!("Screenshot captured with {blocks} text blocks")
}

/// Position output is `"x,y"`.
fn position_output(fields: &Map<String, Value>) -> Value {
    match (fields.get("x"), fields.get("y")) {
        (Some(x), Some(y)) => Value::String(format!("{x},{y}")),
        _ => Value::String(String::new()),
    }
}

/// Position message.
fn position_message(fields: &Map<String, Value>) -> String {
    format!("Mouse position: {}", position_output(fields).as_str().unwrap_or_default())
}

/// Command output is stdout.
fn command_output(fields: &Map<String, Value>) -> Value {
    fields.get("output").cloned().unwrap_or_else(|| Value::String(String::new()))
}

/// Command message reports the exit code.
fn command_message(fields: &Map<String, Value>) -> String {
    match fields.get("returncode").and_then(Value::as_i64) {
        Some(code) => format!("Command exited with code {code}"),
        None => "Command finished".to_string(),
    }
}

/// UI element output is a short summary.
fn ui_output(fields: &Map<String, Value>) -> Value {
    let section = fields.get("uiElements");
    if section.and_then(|ui| ui.get("success")).and_then(Value::as_bool) == Some(false) {
        return Value::String("UI element enumeration unavailable".to_string());
    }
    let elements = ui_elements(fields);
    let names: Vec<&str> = elements.iter().filter_map(element_label).take(UI_SUMMARY_LIMIT).collect();
    let mut summary = format!("{} UI elements", elements.len());
    if !names.is_empty() {
        summary.push_str(": ");
        summary.push_str(&names.join(", "));
        if elements.len() > names.len() {
            summary.push_str(", ...");
        }
    }
    Value::String(summary)
}

/// UI element message.
fn ui_message(fields: &Map<String, Value>) -> String {
    format!("Found {} UI elements", ui_elements(fields).len())
}

/// Returns the enumerated elements of a capture result.
fn ui_elements(fields: &Map<String, Value>) -> &[Value] {
    fields
        .get("uiElements")
        .and_then(|ui| ui.get("elements"))
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

/// Search output lists where the text was found.
fn search_output(fields: &Map<String, Value>) -> Value {
    let text = fields.get("text").and_then(Value::as_str).unwrap_or_default();
    let matches = fields.get("matches").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
    if matches.is_empty() {
        return Value::String(format!("Text '{text}' not found on screen"));
    }
    let places: Vec<String> = matches
        .iter()
        .take(MATCH_SUMMARY_LIMIT)
        .map(|hit| {
            let word = hit.get("text").and_then(Value::as_str).unwrap_or_default();
            let x = hit.pointer("/center/x").and_then(Value::as_i64).unwrap_or_default();
            let y = hit.pointer("/center/y").and_then(Value::as_i64).unwrap_or_default();
            format!("'{word}' at ({x}, {y})")
        })
        .collect();
    let mut summary = format!("Found {} match(es) for '{text}': {}", matches.len(), places.join(", "));
    if matches.len() > places.len() {
        summary.push_str(", ...");
    }
    Value::String(summary)
}

/// Search message counts the matches.
fn search_message(fields: &Map<String, Value>) -> String {
    let text = fields.get("text").and_then(Value::as_str).unwrap_or_default();
    match fields.get("match_count").and_then(Value::as_u64) {
        Some(0) | None => format!("Text '{text}' not found on screen"),
        Some(count) => format!("Found {count} match(es) for '{text}'"),
    }
}

/// Picks a readable label for one UI element.
fn element_label(element: &Value) -> Option<&str> {
    ["name", "text", "title", "type"]
        .iter()
        .find_map(|key| element.get(*key).and_then(Value::as_str).filter(|label| !label.is_empty()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_tools_get_action_completed() {
        let result = json!({"success": true, "x": 100, "y": 200, "message": "Moved"});
        let value = success(ToolName::MoveMouse, result);
        assert_eq!(value["output"], GENERIC_OUTPUT);
        assert_eq!(value["message"], "Moved");
        assert_eq!(value["x"], 100);
    }

    #[test]
    fn original_fields_are_never_overwritten() {
        let result = json!({"success": false, "output": "", "error": "boom", "returncode": 2});
        let value = success(ToolName::RunCommand, result);
        assert_eq!(value["success"], false);
        assert_eq!(value["output"], "");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["message"], "Command exited with code 2");
    }

    #[test]
    fn screenshot_output_is_the_image() {
        let result = json!({
            "success": true,
            "image": "iVBORw==",
            "ocr": {"totalElements": 1, "textElements": [{"text": "File"}], "truncated": false},
            "uiElements": {"success": true, "totalElements": 0, "elements": []},
            "mousePosition": {"x": 1, "y": 2}
        });
        let value = success(ToolName::TakeScreenshot, result.clone());
        assert_eq!(value["output"], "iVBORw==");
        assert_eq!(value["image"], "iVBORw==");
        assert_eq!(value["ocr"], result["ocr"]);
        assert_eq!(value["uiElements"], result["uiElements"]);
        assert_eq!(value["mousePosition"], json!({"x": 1, "y": 2}));
        assert_eq!(value["message"], "Screenshot captured with 1 text blocks");
    }

    #[test]
    fn position_output_is_x_comma_y() {
        let value = success(ToolName::GetMousePosition, json!({"success": true, "x": 640, "y": 480}));
        assert_eq!(value["output"], "640,480");
    }

    #[test]
    fn ui_elements_are_summarized() {
        let result = json!({
            "success": true,
            "uiElements": {"success": true, "totalElements": 2, "elements": [{"name": "OK"}, {"type": "button"}]}
        });
        let value = success(ToolName::GetUiElements, result);
        assert_eq!(value["output"], "2 UI elements: OK, button");
        assert_eq!(value["message"], "Found 2 UI elements");
        let none = json!({"success": true, "uiElements": {"success": false, "totalElements": 0, "elements": []}});
        let missing = success(ToolName::GetUiElements, none);
        assert_eq!(missing["output"], "UI element enumeration unavailable");
    }

    #[test]
    fn text_search_lists_match_centers() {
        let result = json!({
            "success": true,
            "found": true,
            "text": "Save",
            "match_count": 1,
            "matches": [{"text": "Save", "confidence": 0.91, "center": {"x": 70, "y": 209}}]
        });
        let value = success(ToolName::FindTextOnScreen, result);
        assert_eq!(value["output"], "Found 1 match(es) for 'Save': 'Save' at (70, 209)");
        assert_eq!(value["message"], "Found 1 match(es) for 'Save'");
        assert_eq!(value["found"], true);

        let miss = json!({"success": true, "found": false, "text": "Quit", "match_count": 0, "matches": []});
        let value = success(ToolName::FindTextOnScreen, miss);
        assert_eq!(value["output"], "Text 'Quit' not found on screen");
        assert_eq!(value["message"], "Text 'Quit' not found on screen");
    }

    #[test]
    fn non_object_results_are_wrapped() {
        let value = success(ToolName::Wait, json!(42));
        assert_eq!(value["result"], 42);
        assert_eq!(value["success"], true);
    }

    #[test]
    fn failures_carry_kind_and_text() {
        let value = failure(ErrorKind::TimedOut, "agent call timed out after 100 ms");
        assert_eq!(value["success"], false);
        assert_eq!(value["error_kind"], "timed_out");
        assert_eq!(value["message"], "agent call timed out after 100 ms");
    }
}
