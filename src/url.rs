//! Entity URL conventions.
//!
//! Entities are logically addressable as `https://{ns}/{type}/{id}` or
//! the short `https://{ns}/{id}` (empty type). Internal artifact keys
//! use the compact `type/id` form.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A parsed entity address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUrl {
    /// Namespace host; empty for compact-form urls.
    pub ns: String,
    /// Entity type; empty for the short form.
    pub ty: String,
    pub id: String,
}

impl EntityUrl {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self { ns: String::new(), ty: ty.into(), id: id.into() }
    }

    /// Compact `type/id` key (or bare `id` when the type is empty).
    pub fn compact(&self) -> String {
        if self.ty.is_empty() {
            self.id.clone()
        } else {
            format!("{}/{}", self.ty, self.id)
        }
    }
}

impl std::fmt::Display for EntityUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.compact())
    }
}

/// Parse any accepted address form.
pub fn parse(url: &str) -> Result<EntityUrl> {
    if let Some(rest) = url.strip_prefix("https://") {
        let mut segments = rest.split('/');
        let ns = segments.next().unwrap_or_default();
        if ns.is_empty() {
            return Err(Error::InvalidInput(format!("entity url '{url}' has no namespace")));
        }
        let parts: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
        return match parts.as_slice() {
            [id] => Ok(EntityUrl { ns: ns.to_owned(), ty: String::new(), id: (*id).to_owned() }),
            [ty, id] => {
                Ok(EntityUrl { ns: ns.to_owned(), ty: (*ty).to_owned(), id: (*id).to_owned() })
            }
            _ => Err(Error::InvalidInput(format!("entity url '{url}' has too many segments"))),
        };
    }

    // Compact form: `type/id`.
    match url.split('/').collect::<Vec<_>>().as_slice() {
        [ty, id] if !ty.is_empty() && !id.is_empty() => {
            Ok(EntityUrl { ns: String::new(), ty: (*ty).to_owned(), id: (*id).to_owned() })
        }
        _ => Err(Error::InvalidInput(format!("unrecognized entity url '{url}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_form() {
        let url = parse("https://example.org/Post/post-1").unwrap();
        assert_eq!(url.ns, "example.org");
        assert_eq!(url.ty, "Post");
        assert_eq!(url.id, "post-1");
        assert_eq!(url.compact(), "Post/post-1");
    }

    #[test]
    fn test_short_form_has_empty_type() {
        let url = parse("https://example.org/post-1").unwrap();
        assert_eq!(url.ty, "");
        assert_eq!(url.id, "post-1");
        assert_eq!(url.compact(), "post-1");
    }

    #[test]
    fn test_compact_form() {
        let url = parse("Post/post-1").unwrap();
        assert_eq!(url.ns, "");
        assert_eq!(url.ty, "Post");
        assert_eq!(url.id, "post-1");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse("https:///Post/1").is_err());
        assert!(parse("https://ns/a/b/c").is_err());
        assert!(parse("justanid").is_err());
        assert!(parse("/missing").is_err());
    }
}
