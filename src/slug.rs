use once_cell::sync::Lazy;
use regex::Regex;

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z])([A-Z])").expect("invalid camel boundary pattern"));

static SEPARATOR_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_]+").expect("invalid separator pattern"));

static SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("invalid slug pattern"));

/// Derives a URL slug from a human-readable title.
///
/// CamelCase boundaries and whitespace/underscore runs become `-`; the
/// result is lowercased. The output is not guaranteed to satisfy
/// [`is_valid_slug`] for arbitrary input (punctuation passes through).
pub fn slugify(input: &str) -> String {
    let spaced = CAMEL_BOUNDARY.replace_all(input, "$1-$2");
    SEPARATOR_RUN.replace_all(&spaced, "-").to_lowercase()
}

/// Checks a user-supplied slug against the canonical pattern:
/// lowercase alphanumeric segments joined by single hyphens.
pub fn is_valid_slug(value: &str) -> bool {
    SLUG.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("Winter Jacket"), "winter-jacket");
        assert_eq!(slugify("winterJacket"), "winter-jacket");
        assert_eq!(slugify("winter_jacket  2024"), "winter-jacket-2024");
    }

    #[test]
    fn slugify_is_stable_for_existing_slugs() {
        assert_eq!(slugify("winter-jacket"), "winter-jacket");
    }

    #[test]
    fn valid_slugs() {
        assert!(is_valid_slug("winter-jacket"));
        assert!(is_valid_slug("a"));
        assert!(is_valid_slug("x-1-y-2"));
    }

    #[test]
    fn invalid_slugs() {
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Winter-Jacket"));
        assert!(!is_valid_slug("winter--jacket"));
        assert!(!is_valid_slug("-winter"));
        assert!(!is_valid_slug("winter jacket"));
        assert!(!is_valid_slug("winter/jacket"));
    }
}
