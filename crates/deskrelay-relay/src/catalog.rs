// crates/deskrelay-relay/src/catalog.rs
// ============================================================================
// Module: Catalog Validation
// Description: Compiled JSON schemas for every catalog tool.
// Purpose: Reject malformed tool arguments before they leave the relay.
// Dependencies: deskrelay-core, jsonschema
// ============================================================================

//! ## Overview
//! Schemas are compiled once (Draft 2020-12) when the relay starts. A tool
//! without arguments may be called with `null` or omitted arguments, which
//! are treated as `{}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use deskrelay_core::ErrorKind;
use deskrelay_core::ToolCatalog;
use deskrelay_core::ToolName;
use deskrelay_core::tooling::tool_catalog;
use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Map;
use serde_json::Value;

use crate::RelayError;
use crate::relay::RelayFailure;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum schema violations listed in one error message.
const MAX_REPORTED_VIOLATIONS: usize = 5;

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Tool catalog with compiled input schemas.
pub struct ToolValidator {
    /// Advertised catalog.
    catalog: ToolCatalog,
    /// Compiled schema per tool.
    validators: BTreeMap<ToolName, Validator>,
}

impl ToolValidator {
    /// Compiles the canonical catalog.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when a schema fails to compile.
    pub fn new() -> Result<Self, RelayError> {
        let catalog = tool_catalog();
        let mut validators = BTreeMap::new();
        for tool in &catalog.tools {
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&tool.input_schema)
                .map_err(|err| RelayError::Config(format!("invalid schema for {}: {err}", tool.name)))?;
            validators.insert(tool.name, validator);
        }
        Ok(Self {
            catalog,
            validators,
        })
    }

    /// Returns the advertised catalog.
    #[must_use]
    pub const fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Resolves `tool` and validates `arguments` against its schema.
    ///
    /// # Errors
    ///
    /// Returns `unknown_tool` for names outside the catalog and
    /// `invalid_request` for schema violations.
    pub fn validate(&self, tool: &str, arguments: Value) -> Result<(ToolName, Value), RelayFailure> {
        let name = ToolName::parse(tool)
            .ok_or_else(|| RelayFailure::new(ErrorKind::UnknownTool, format!("unknown tool: {tool}")))?;
        let arguments = if arguments.is_null() { Value::Object(Map::new()) } else { arguments };
        let validator = self
            .validators
            .get(&name)
            .ok_or_else(|| RelayFailure::new(ErrorKind::Internal, format!("no schema for {name}")))?;
        let violations: Vec<String> = validator
            .iter_errors(&arguments)
            .take(MAX_REPORTED_VIOLATIONS)
            .map(|err| err.to_string())
            .collect();
        if violations.is_empty() {
            Ok((name, arguments))
        } else {
            Err(RelayFailure::new(
                ErrorKind::InvalidRequest,
                format!("invalid arguments for {name}: {}", violations.join("; ")),
            ))
        }
    }
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
    fn valid_arguments_pass() {
        let validator = ToolValidator::new().unwrap();
        let (name, args) = validator.validate("move_mouse", json!({"x": 100, "y": 200})).unwrap();
        assert_eq!(name, ToolName::MoveMouse);
        assert_eq!(args, json!({"x": 100, "y": 200}));
    }

    #[test]
    fn null_arguments_mean_empty_object() {
        let validator = ToolValidator::new().unwrap();
        let (_, args) = validator.validate("take_screenshot", Value::Null).unwrap();
        assert_eq!(args, json!({}));
    }

    #[test]
    fn schema_violations_are_invalid_requests() {
        let validator = ToolValidator::new().unwrap();
        let missing = validator.validate("move_mouse", json!({"x": 100})).unwrap_err();
        assert_eq!(missing.kind, ErrorKind::InvalidRequest);
        let extra = validator.validate("press_key", json!({"key": "a", "shell": "rm"})).unwrap_err();
        assert_eq!(extra.kind, ErrorKind::InvalidRequest);
        let range = validator.validate("click", json!({"x": -1, "y": 5})).unwrap_err();
        assert!(range.message.contains("click"));
    }

    #[test]
    fn unknown_tools_are_rejected() {
        let validator = ToolValidator::new().unwrap();
        let failure = validator.validate("format_disk", json!({})).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::UnknownTool);
    }
}
