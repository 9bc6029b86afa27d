//! Allow-list validation for names that end up in paths, scripts or argv.

use std::sync::LazyLock;

use eda_error::EdaError;
use regex::Regex;

static PROJECT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").unwrap());

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,128}$").unwrap());

/// Project names: `[A-Za-z0-9_-]{1,64}`.
pub fn validate_project_name(name: &str) -> Result<(), EdaError> {
    if PROJECT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(EdaError::invalid(
            "project_name",
            "must be 1-64 characters of letters, digits, '_' or '-'",
        ))
    }
}

/// Verilog/Tcl identifiers such as module and port names.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), EdaError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(EdaError::invalid(
            field,
            "must be an identifier: a letter or '_' followed by letters, digits or '_'",
        ))
    }
}

/// Plain value tokens: `[A-Za-z0-9_.-]{1,128}`.
pub fn validate_token(field: &str, value: &str) -> Result<(), EdaError> {
    if TOKEN_RE.is_match(value) {
        Ok(())
    } else {
        Err(EdaError::invalid(
            field,
            "must be 1-128 characters of letters, digits, '_', '.' or '-'",
        ))
    }
}
