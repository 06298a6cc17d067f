//! # Schema parser & bi-directional relation resolver
//!
//! Parses declarative entity schemas of the form
//!
//! ```json
//! {
//!   "Post":   { "title": "string", "author": "Author.posts" },
//!   "Author": { "name": "string" }
//! }
//! ```
//!
//! A field definition is a string with an optional trailing `?` (optional)
//! and `[]` (array); a one-element list is the array form of its content.
//! A base token that is not a primitive and starts with an uppercase letter
//! is a relation; `Target.inverseName` names the inverse field on the
//! target type.
//!
//! Parsing runs two passes: the primary pass tokenizes every definition,
//! the inverse pass injects missing inverse fields as array relations
//! pointing back. A relation to a type the schema doesn't define is kept
//! as-is without an injected inverse, so forward references and partial
//! schemas parse cleanly.

pub mod inflect;
pub mod noun;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub use inflect::{conjugate, VerbForms};
pub use noun::{edge_records, noun_record, Cardinality, Edge, Noun, NounOverride};

/// Scalar base types. Everything else is a relation.
pub const PRIMITIVES: &[&str] =
    &["string", "number", "boolean", "date", "datetime", "json", "markdown", "url"];

// ============================================================================
// Parsed forms
// ============================================================================

/// A single tokenized field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedField {
    pub name: String,
    /// Primitive name for scalars, target type name for relations.
    pub base_type: String,
    pub is_array: bool,
    pub is_optional: bool,
    pub is_relation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_name: Option<String>,
}

/// An entity type with its fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub name: String,
    pub fields: Vec<ParsedField>,
}

impl ParsedEntity {
    pub fn field(&self, name: &str) -> Option<&ParsedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A fully parsed schema, entity order preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedSchema {
    pub entities: Vec<ParsedEntity>,
}

impl ParsedSchema {
    pub fn entity(&self, name: &str) -> Option<&ParsedEntity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Flatten to the relation lookup table consumed by query hydration.
    pub fn relation_info(&self) -> RelationInfo {
        let mut map = HashMap::new();
        for entity in &self.entities {
            for field in entity.fields.iter().filter(|f| f.is_relation) {
                if let Some(target) = &field.related_type {
                    map.insert(
                        (entity.name.clone(), field.name.clone()),
                        RelationTarget { target: target.clone(), is_array: field.is_array },
                    );
                }
            }
        }
        RelationInfo { map }
    }
}

/// Where a relation field points and with what multiplicity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationTarget {
    pub target: String,
    pub is_array: bool,
}

/// `(type, field) → target` lookup for relation fields.
#[derive(Debug, Clone, Default)]
pub struct RelationInfo {
    map: HashMap<(String, String), RelationTarget>,
}

impl RelationInfo {
    pub fn relation(&self, ty: &str, field: &str) -> Option<&RelationTarget> {
        self.map.get(&(ty.to_owned(), field.to_owned()))
    }

    pub fn is_relation(&self, ty: &str, field: &str) -> bool {
        self.relation(ty, field).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parse a declarative schema value.
pub fn parse(schema: &Value) -> Result<ParsedSchema> {
    let obj = schema.as_object().ok_or_else(|| {
        Error::InvalidInput("schema must be an object of entity types".into())
    })?;

    // Primary pass: tokenize every field definition.
    let mut entities = Vec::with_capacity(obj.len());
    for (type_name, fields_value) in obj {
        let fields_obj = fields_value.as_object().ok_or_else(|| Error::SchemaError {
            entity: type_name.clone(),
            field: String::new(),
            message: "entity definition must be an object of fields".into(),
        })?;
        let mut fields = Vec::with_capacity(fields_obj.len());
        for (field_name, def) in fields_obj {
            fields.push(parse_field(type_name, field_name, def)?);
        }
        entities.push(ParsedEntity { name: type_name.clone(), fields });
    }

    inject_inverses(&mut entities);

    Ok(ParsedSchema { entities })
}

/// Inverse pass: for every relation carrying an inverse name, inject the
/// inverse as an array relation on the target — unless the target is
/// missing (forward reference) or the user already defined that field.
fn inject_inverses(entities: &mut [ParsedEntity]) {
    let mut injections: Vec<(String, ParsedField)> = Vec::new();
    for entity in entities.iter() {
        for field in &entity.fields {
            let (Some(target), Some(inverse)) = (&field.related_type, &field.inverse_name)
            else {
                continue;
            };
            let Some(target_entity) = entities.iter().find(|e| &e.name == target) else {
                continue;
            };
            if target_entity.field(inverse).is_some() {
                continue;
            }
            injections.push((
                target.clone(),
                ParsedField {
                    name: inverse.clone(),
                    base_type: entity.name.clone(),
                    is_array: true,
                    is_optional: false,
                    is_relation: true,
                    related_type: Some(entity.name.clone()),
                    inverse_name: Some(field.name.clone()),
                },
            ));
        }
    }
    for (target, field) in injections {
        if let Some(entity) = entities.iter_mut().find(|e| e.name == target) {
            // Two relations may race to inject the same inverse name; first wins.
            if entity.field(&field.name).is_none() {
                entity.fields.push(field);
            }
        }
    }
}

fn parse_field(entity: &str, field: &str, def: &Value) -> Result<ParsedField> {
    match def {
        Value::String(s) => parse_field_def(entity, field, s, false),
        Value::Array(items) => match items.as_slice() {
            [Value::String(s)] => parse_field_def(entity, field, s, true),
            _ => Err(schema_err(entity, field, "list form must hold exactly one string")),
        },
        other => Err(schema_err(
            entity,
            field,
            &format!(
                "definition must be a string or one-element list, got {}",
                crate::model::thing::type_of(other)
            ),
        )),
    }
}

fn parse_field_def(entity: &str, field: &str, def: &str, from_list: bool) -> Result<ParsedField> {
    let mut rest = def.trim();
    let mut is_optional = false;
    let mut is_array = from_list;

    // Trailing markers in any order: `?` and `[]`.
    loop {
        if let Some(stripped) = rest.strip_suffix('?') {
            is_optional = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_suffix("[]") {
            is_array = true;
            rest = stripped;
        } else {
            break;
        }
    }

    if rest.is_empty() {
        return Err(schema_err(entity, field, "empty field definition"));
    }
    if !rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(schema_err(entity, field, &format!("invalid characters in '{def}'")));
    }

    let dots = rest.matches('.').count();
    if dots > 1 {
        return Err(schema_err(entity, field, &format!("more than one '.' in '{def}'")));
    }

    if dots == 1 {
        let (target, inverse) = rest.split_once('.').unwrap_or((rest, ""));
        if target.is_empty() || inverse.is_empty() {
            return Err(schema_err(entity, field, &format!("malformed relation '{def}'")));
        }
        if !starts_uppercase(target) {
            return Err(schema_err(
                entity,
                field,
                &format!("relation target '{target}' must start with an uppercase letter"),
            ));
        }
        return Ok(ParsedField {
            name: field.to_owned(),
            base_type: target.to_owned(),
            is_array,
            is_optional,
            is_relation: true,
            related_type: Some(target.to_owned()),
            inverse_name: Some(inverse.to_owned()),
        });
    }

    if PRIMITIVES.contains(&rest) {
        return Ok(ParsedField {
            name: field.to_owned(),
            base_type: rest.to_owned(),
            is_array,
            is_optional,
            is_relation: false,
            related_type: None,
            inverse_name: None,
        });
    }

    if starts_uppercase(rest) {
        return Ok(ParsedField {
            name: field.to_owned(),
            base_type: rest.to_owned(),
            is_array,
            is_optional,
            is_relation: true,
            related_type: Some(rest.to_owned()),
            inverse_name: None,
        });
    }

    Err(schema_err(entity, field, &format!("unknown base type '{rest}'")))
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn schema_err(entity: &str, field: &str, message: &str) -> Error {
    Error::SchemaError { entity: entity.to_owned(), field: field.to_owned(), message: message.to_owned() }
}
