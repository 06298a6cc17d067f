//! Allowlist input validation.
//!
//! The core assumes validated input; the façade runs these checks at its
//! boundary so providers and the query layer can treat malformed names
//! as programmer error.

use crate::{Error, Result};

const MAX_NAME_LEN: usize = 64;
const MAX_ID_LEN: usize = 128;
const MAX_QUERY_LEN: usize = 1024;

/// Entity type names: `[A-Za-z][A-Za-z0-9_]*`, at most 64 chars.
pub fn type_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "type name must be 1..={MAX_NAME_LEN} chars, got {:?}",
            name
        )));
    }
    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidInput(format!("type name '{name}' must start with a letter")));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!("type name '{name}' has invalid characters")));
    }
    Ok(())
}

/// Entity ids: letters, digits, `-`, `_`, `.`, `:`, at most 128 chars.
pub fn id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "id must be 1..={MAX_ID_LEN} chars, got {:?}",
            id
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(Error::InvalidInput(format!("id '{id}' has invalid characters")));
    }
    Ok(())
}

/// Field names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn field_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "field name must be 1..={MAX_NAME_LEN} chars, got {:?}",
            name
        )));
    }
    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
        return Err(Error::InvalidInput(format!(
            "field name '{name}' must start with a letter or underscore"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!("field name '{name}' has invalid characters")));
    }
    Ok(())
}

/// Action types: dot-joined identifiers (`Customer.forEach`).
pub fn action_type(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("action type must not be empty".into()));
    }
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(Error::InvalidInput(format!("action type '{name}' has an empty segment")));
        }
        if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::InvalidInput(format!(
                "action type '{name}' has invalid characters"
            )));
        }
    }
    Ok(())
}

/// Search queries: non-empty, printable, at most 1024 chars.
pub fn search_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("search query must not be empty".into()));
    }
    if query.len() > MAX_QUERY_LEN {
        return Err(Error::InvalidInput(format!(
            "search query exceeds {MAX_QUERY_LEN} chars"
        )));
    }
    if query.chars().any(char::is_control) {
        return Err(Error::InvalidInput("search query contains control characters".into()));
    }
    Ok(())
}
