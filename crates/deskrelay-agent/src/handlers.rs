// crates/deskrelay-agent/src/handlers.rs
// ============================================================================
// Module: Primitive Handlers
// Description: Executes one primitive command against a desktop driver.
// Purpose: Produce the raw per-action result returned to the relay.
// Dependencies: deskrelay-core, base64
// ============================================================================

//! ## Overview
//! [`execute`] dispatches exactly one handler per [`PrimitiveCommand`]. The
//! handlers do no decision making: waypoints, key names, cadences, and
//! capture options arrive fully decided inside the envelope.
//!
//! Capture results use the desktop contract keys: `ocr` with
//! `textElements`, `uiElements` with `elements`, and `mousePosition`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use deskrelay_core::CaptureOptions;
use deskrelay_core::Point;
use deskrelay_core::PrimitiveCommand;
use deskrelay_core::TextSearch;
use serde_json::Value;
use serde_json::json;

use crate::driver::DesktopDriver;
use crate::driver::DriverError;
use crate::ocr::find_matches;
use crate::ocr::ocr_text;
use crate::ocr::parse_tsv;

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Runs one primitive and returns its raw result.
///
/// # Errors
///
/// Returns [`DriverError`] when the driver fails.
pub async fn execute(driver: &dyn DesktopDriver, command: &PrimitiveCommand) -> Result<Value, DriverError> {
    match command {
        PrimitiveCommand::PointerMove {
            path,
            step_delay_ms,
        } => {
            driver.move_pointer(path, Duration::from_millis(*step_delay_ms)).await?;
            let end = path.last().copied();
            Ok(json!({
                "success": true,
                "x": end.map(|p| p.x),
                "y": end.map(|p| p.y),
                "message": end.map_or_else(
                    || "Pointer unchanged".to_string(),
                    |p| format!("Moved mouse to ({}, {})", p.x, p.y),
                ),
            }))
        }
        PrimitiveCommand::Click {
            target,
            button,
            count,
            approach,
            step_delay_ms,
        } => {
            let path = if approach.is_empty() { std::slice::from_ref(target) } else { approach.as_slice() };
            driver.move_pointer(path, Duration::from_millis(*step_delay_ms)).await?;
            driver.click(*button, *count).await?;
            Ok(json!({
                "success": true,
                "coordinates": {"x": target.x, "y": target.y},
                "button": button.as_str(),
                "double_click": *count > 1,
                "message": format!("Clicked {} at ({}, {})", button.as_str(), target.x, target.y),
            }))
        }
        PrimitiveCommand::PointerPosition => {
            let point = driver.pointer_position().await?;
            Ok(json!({"success": true, "x": point.x, "y": point.y}))
        }
        PrimitiveCommand::KeyPress {
            keys,
        } => {
            driver.key_press(keys).await?;
            let combo = keys.join("+");
            Ok(json!({
                "success": true,
                "keys": keys,
                "message": format!("Pressed {combo}"),
            }))
        }
        PrimitiveCommand::TypeText {
            text,
            interval_ms,
        } => {
            driver.type_text(text, Duration::from_millis(*interval_ms)).await?;
            let characters = text.chars().count();
            Ok(json!({
                "success": true,
                "characters": characters,
                "message": format!("Typed {characters} characters"),
            }))
        }
        PrimitiveCommand::Scroll {
            direction,
            clicks,
            at,
        } => {
            if let Some(point) = at {
                driver.move_pointer(std::slice::from_ref(point), Duration::ZERO).await?;
            }
            driver.scroll(*direction, *clicks).await?;
            Ok(json!({
                "success": true,
                "direction": direction.as_str(),
                "clicks": clicks,
                "message": format!("Scrolled {} {clicks} clicks", direction.as_str()),
            }))
        }
        PrimitiveCommand::Capture(options) => capture(driver, options).await,
        PrimitiveCommand::Shell {
            command,
        } => {
            let output = driver.shell(command).await?;
            to_value(&output)
        }
        PrimitiveCommand::FindText(search) => find_text(driver, search).await,
    }
}

/// Captures the screen with the requested enrichments.
async fn capture(driver: &dyn DesktopDriver, options: &CaptureOptions) -> Result<Value, DriverError> {
    let needs_image = options.include_image || options.include_ocr;
    let png = if needs_image { Some(driver.capture_png().await?) } else { None };
    let mut result = serde_json::Map::new();
    result.insert("success".to_string(), Value::Bool(true));

    if let (true, Some(png)) = (options.include_image, &png) {
        result.insert("image".to_string(), Value::String(STANDARD.encode(png)));
        result.insert("format".to_string(), Value::String("png".to_string()));
    }
    if let (true, Some(png)) = (options.include_ocr, &png) {
        let tsv = driver.ocr_tsv(png).await?;
        let parsed = parse_tsv(&tsv, options.ocr_min_confidence, options.max_text_blocks);
        let count = parsed.blocks.len();
        result.insert(
            "ocr".to_string(),
            json!({
                "totalElements": count,
                "detectedElements": count,
                "textElements": to_value(&parsed.blocks)?,
                "truncated": parsed.truncated,
            }),
        );
    }
    if options.include_ui_elements {
        let elements = driver.ui_elements().await?;
        let available = elements.is_some();
        let elements = elements.unwrap_or_default();
        result.insert(
            "uiElements".to_string(),
            json!({
                "success": available,
                "totalElements": elements.len(),
                "elements": elements,
            }),
        );
    }
    let pointer: Point = driver.pointer_position().await?;
    result.insert("mousePosition".to_string(), json!({"x": pointer.x, "y": pointer.y}));
    Ok(Value::Object(result))
}

/// Captures the screen and searches the recognized words.
async fn find_text(driver: &dyn DesktopDriver, search: &TextSearch) -> Result<Value, DriverError> {
    let png = driver.capture_png().await?;
    let tsv = driver.ocr_tsv(&png).await?;
    let parsed = parse_tsv(&tsv, search.ocr_min_confidence, usize::MAX);
    let mut matches = find_matches(&parsed.blocks, search);
    let truncated = matches.len() > search.max_matches;
    matches.truncate(search.max_matches);
    Ok(json!({
        "success": true,
        "found": !matches.is_empty(),
        "text": search.text,
        "match_count": matches.len(),
        "matches": to_value(&matches)?,
        "matches_truncated": truncated,
        "ocr_text": ocr_text(&parsed.blocks),
    }))
}

/// Serializes a driver-produced value.
fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, DriverError> {
    serde_json::to_value(value).map_err(|err| DriverError::Parse(err.to_string()))
}
