//! Noun and edge metadata derived from a parsed schema.

use serde::{Deserialize, Serialize};

use super::inflect::{pluralize, slugify, split_camel};
use super::{ParsedEntity, ParsedSchema};

/// Default verb set every entity type supports.
pub const DEFAULT_ACTIONS: &[&str] = &["create", "update", "delete"];

/// Metadata describing an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Noun {
    pub name: String,
    pub singular: String,
    pub plural: String,
    pub slug: String,
    pub slug_plural: String,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

/// Partial override for noun inference — any field set here wins over
/// the inferred form.
#[derive(Debug, Clone, Default)]
pub struct NounOverride {
    pub singular: Option<String>,
    pub plural: Option<String>,
    pub slug: Option<String>,
    pub slug_plural: Option<String>,
    pub actions: Option<Vec<String>>,
    pub events: Option<Vec<String>>,
}

/// Derive a noun record from a type name.
///
/// `BlogPost` → singular `blog post`, plural `blog posts`, slug
/// `blog-post`, slug plural `blog-posts`, default create/update/delete
/// actions and their lifecycle events.
pub fn noun_record(type_name: &str, override_: Option<NounOverride>) -> Noun {
    let override_ = override_.unwrap_or_default();
    let singular = override_.singular.unwrap_or_else(|| split_camel(type_name));
    let plural = override_.plural.unwrap_or_else(|| pluralize(&singular));
    let slug = override_.slug.unwrap_or_else(|| slugify(&singular));
    let slug_plural = override_.slug_plural.unwrap_or_else(|| slugify(&plural));
    let actions = override_
        .actions
        .unwrap_or_else(|| DEFAULT_ACTIONS.iter().map(|a| (*a).to_owned()).collect());
    let events = override_.events.unwrap_or_else(|| {
        DEFAULT_ACTIONS
            .iter()
            .map(|a| format!("{type_name}.{}", past_event(a)))
            .collect()
    });
    Noun {
        name: type_name.to_owned(),
        singular,
        plural,
        slug,
        slug_plural,
        actions,
        events,
    }
}

fn past_event(verb: &str) -> String {
    if verb.ends_with('e') {
        format!("{verb}d")
    } else {
        format!("{verb}ed")
    }
}

// ============================================================================
// Edges
// ============================================================================

/// Relation cardinality between two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "one-to-one")]
    OneToOne,
    #[serde(rename = "one-to-many")]
    OneToMany,
    #[serde(rename = "many-to-one")]
    ManyToOne,
    #[serde(rename = "many-to-many")]
    ManyToMany,
}

/// Metadata record for a relation between two types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub name: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    pub cardinality: Cardinality,
}

/// Emit edge records for every relation field of `type_name`.
pub fn edge_records(type_name: &str, schema: &ParsedSchema) -> Vec<Edge> {
    let Some(entity) = schema.entity(type_name) else {
        return Vec::new();
    };
    entity
        .fields
        .iter()
        .filter(|f| f.is_relation)
        .filter_map(|f| {
            let to = f.related_type.clone()?;
            let cardinality = cardinality_of(f.is_array, inverse_is_array(f, &to, schema));
            Some(Edge {
                from: entity.name.clone(),
                name: f.name.clone(),
                to,
                inverse: f.inverse_name.clone(),
                cardinality,
            })
        })
        .collect()
}

/// Looks up whether the inverse side of a relation is an array field.
/// `None` when the relation has no inverse or the target is missing.
fn inverse_is_array(
    field: &super::ParsedField,
    target: &str,
    schema: &ParsedSchema,
) -> Option<bool> {
    let inverse = field.inverse_name.as_deref()?;
    let entity: &ParsedEntity = schema.entity(target)?;
    entity.field(inverse).map(|f| f.is_array)
}

fn cardinality_of(forward_array: bool, inverse_array: Option<bool>) -> Cardinality {
    match (forward_array, inverse_array) {
        (false, Some(false)) => Cardinality::OneToOne,
        (false, _) => Cardinality::ManyToOne,
        (true, Some(false)) => Cardinality::OneToMany,
        (true, Some(true)) => Cardinality::ManyToMany,
        // Array field with no known inverse: one owner, many targets.
        (true, None) => Cardinality::OneToMany,
    }
}
