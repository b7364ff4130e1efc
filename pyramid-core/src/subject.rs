//! Subject normalization and stable pyramid ids.

use crate::types::Variant;

/// Normalize a subject reference.
///
/// Strips wiki-link brackets, collapses whitespace and title-cases each word:
/// `"[[bob  smith]]"` becomes `"Bob Smith"`.
pub fn normalize_subject(raw: &str) -> String {
    raw.replace("[[", "")
        .replace("]]", "")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, dash-separated form of a subject for use in ids.
pub fn subject_slug(subject: &str) -> String {
    subject
        .replace("[[", "")
        .replace("]]", "")
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Stable id derived from variant and subject, e.g. `relationship_bob`.
pub fn pyramid_id(variant: Variant, subject: &str) -> String {
    format!("{}_{}", variant.as_str(), subject_slug(subject))
}

/// Lowercase, trim and dedupe tags, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("[[bob  smith]]"), "Bob Smith");
        assert_eq!(normalize_subject("  ALICE "), "Alice");
        assert_eq!(normalize_subject("[[]]"), "");
    }

    #[test]
    fn test_pyramid_id() {
        assert_eq!(pyramid_id(Variant::Relationship, "Bob"), "relationship_bob");
        assert_eq!(pyramid_id(Variant::Pattern, "value-alignment"), "pattern_value-alignment");
        assert_eq!(pyramid_id(Variant::Time, "2024-W11"), "time_2024-w11");
        assert_eq!(pyramid_id(Variant::Relationship, "[[Mary Ann]]"), "relationship_mary-ann");
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            "Helping".to_string(),
            " helping".to_string(),
            "".to_string(),
            "Home".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["helping", "home"]);
    }
}
