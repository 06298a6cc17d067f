//! English inflection: noun plurals, slugs, and verb conjugation.
//!
//! Known words come from small closed lexicons; everything else falls
//! through rule-based inflection. The rules are intentionally cheap —
//! good enough for entity-type names and action verbs, not a linguistics
//! library.

use serde::{Deserialize, Serialize};

// ============================================================================
// Nouns
// ============================================================================

/// Irregular plural forms consulted before the rules.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("datum", "data"),
    ("medium", "media"),
    ("analysis", "analyses"),
    ("criterion", "criteria"),
    ("phenomenon", "phenomena"),
    ("status", "statuses"),
];

/// Split a camel-case type name into a lower-case, space-separated phrase.
///
/// `BlogPost` → `blog post`, `HTTPServer` → `http server`.
pub fn split_camel(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev_lower = chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_lower || (chars[i - 1].is_uppercase() && next_lower) {
                out.push(' ');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Pluralize a single word.
pub fn pluralize_word(word: &str) -> String {
    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(s, _)| *s == word) {
        return (*plural).to_owned();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(is_consonant) {
            return format!("{stem}ies");
        }
        return format!("{word}s");
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix("fe") {
        return format!("{stem}ves");
    }
    if let Some(stem) = word.strip_suffix('f') {
        return format!("{stem}ves");
    }
    format!("{word}s")
}

/// Pluralize a phrase by pluralizing its final word.
pub fn pluralize(phrase: &str) -> String {
    match phrase.rsplit_once(' ') {
        Some((head, last)) => format!("{head} {}", pluralize_word(last)),
        None => pluralize_word(phrase),
    }
}

/// Slug form: spaces become dashes.
pub fn slugify(phrase: &str) -> String {
    phrase.replace(' ', "-")
}

fn is_consonant(c: char) -> bool {
    c.is_ascii_alphabetic() && !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

// ============================================================================
// Verbs
// ============================================================================

/// Verb triple: base form, third person, gerund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerbForms {
    /// Base form (`create`).
    pub action: String,
    /// Third person (`creates`).
    pub act: String,
    /// Gerund (`creating`).
    pub activity: String,
}

/// Known verbs whose conjugation the rules would get wrong or that are
/// common enough to pin down.
const VERB_LEXICON: &[(&str, &str, &str)] = &[
    ("create", "creates", "creating"),
    ("update", "updates", "updating"),
    ("delete", "deletes", "deleting"),
    ("get", "gets", "getting"),
    ("set", "sets", "setting"),
    ("list", "lists", "listing"),
    ("search", "searches", "searching"),
    ("find", "finds", "finding"),
    ("make", "makes", "making"),
    ("do", "does", "doing"),
    ("go", "goes", "going"),
    ("have", "has", "having"),
    ("be", "is", "being"),
    ("run", "runs", "running"),
    ("send", "sends", "sending"),
    ("write", "writes", "writing"),
    ("read", "reads", "reading"),
    ("publish", "publishes", "publishing"),
    ("archive", "archives", "archiving"),
    ("process", "processes", "processing"),
    ("sync", "syncs", "syncing"),
    ("retry", "retries", "retrying"),
    ("cancel", "cancels", "cancelling"),
    ("emit", "emits", "emitting"),
    ("flush", "flushes", "flushing"),
];

/// Conjugate a base-form verb into its triple.
pub fn conjugate(base: &str) -> VerbForms {
    let lower = base.to_lowercase();
    if let Some((action, act, activity)) = VERB_LEXICON.iter().find(|(b, _, _)| *b == lower) {
        return VerbForms {
            action: (*action).to_owned(),
            act: (*act).to_owned(),
            activity: (*activity).to_owned(),
        };
    }
    VerbForms { action: lower.clone(), act: third_person(&lower), activity: gerund(&lower) }
}

fn third_person(verb: &str) -> String {
    if let Some(stem) = verb.strip_suffix('y') {
        if stem.chars().last().is_some_and(is_consonant) {
            return format!("{stem}ies");
        }
    }
    if verb.ends_with('s')
        || verb.ends_with('x')
        || verb.ends_with('z')
        || verb.ends_with('o')
        || verb.ends_with("ch")
        || verb.ends_with("sh")
    {
        return format!("{verb}es");
    }
    format!("{verb}s")
}

fn gerund(verb: &str) -> String {
    if let Some(stem) = verb.strip_suffix("ie") {
        return format!("{stem}ying");
    }
    if verb.ends_with('e') && !verb.ends_with("ee") {
        return format!("{}ing", &verb[..verb.len() - 1]);
    }
    if is_short_cvc(verb) {
        let last = verb.chars().last().unwrap_or_default();
        return format!("{verb}{last}ing");
    }
    format!("{verb}ing")
}

/// Short consonant-vowel-consonant words double the final consonant
/// (`run` → `running`, `stop` → `stopping`).
fn is_short_cvc(verb: &str) -> bool {
    if verb.len() < 3 || verb.len() > 4 {
        return false;
    }
    let chars: Vec<char> = verb.chars().collect();
    let n = chars.len();
    let last = chars[n - 1];
    is_consonant(chars[n - 3]) && is_vowel(chars[n - 2]) && is_consonant(last)
        && !matches!(last, 'w' | 'x' | 'y')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_camel() {
        assert_eq!(split_camel("Post"), "post");
        assert_eq!(split_camel("BlogPost"), "blog post");
        assert_eq!(split_camel("HTTPServer"), "http server");
        assert_eq!(split_camel("OrderLineItem"), "order line item");
    }

    #[test]
    fn test_pluralize_rules() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("class"), "classes");
        assert_eq!(pluralize("batch"), "batches");
        assert_eq!(pluralize("dish"), "dishes");
        assert_eq!(pluralize("leaf"), "leaves");
        assert_eq!(pluralize("knife"), "knives");
    }

    #[test]
    fn test_pluralize_irregular() {
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("child"), "children");
        assert_eq!(pluralize("blog person"), "blog people");
    }

    #[test]
    fn test_conjugate_lexicon() {
        let v = conjugate("create");
        assert_eq!(v.act, "creates");
        assert_eq!(v.activity, "creating");
        assert_eq!(conjugate("have").act, "has");
        assert_eq!(conjugate("do").act, "does");
    }

    #[test]
    fn test_conjugate_rules() {
        // y → ies / ying
        let v = conjugate("deploy");
        assert_eq!(v.act, "deploys");
        assert_eq!(v.activity, "deploying");
        let v = conjugate("copy");
        assert_eq!(v.act, "copies");
        assert_eq!(v.activity, "copying");
        // e-drop
        let v = conjugate("merge");
        assert_eq!(v.act, "merges");
        assert_eq!(v.activity, "merging");
        // CVC doubling
        let v = conjugate("plan");
        assert_eq!(v.act, "plans");
        assert_eq!(v.activity, "planning");
        // sibilant
        let v = conjugate("index");
        assert_eq!(v.act, "indexes");
        assert_eq!(v.activity, "indexing");
    }
}
