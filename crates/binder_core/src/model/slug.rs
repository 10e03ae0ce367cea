//! Name normalization into filesystem-safe slugs.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Longest accepted subject name or note title, in characters.
pub const MAX_NAME_CHARS: usize = 256;

/// Longest accepted slug, in bytes. Leaves room for a file extension under
/// the common 255-byte file name limit.
pub const MAX_SLUG_LEN: usize = 200;

static WORD_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+|-+").expect("valid separator regex"));
static NON_SLUG_CHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").expect("valid slug char regex"));

/// Converts a human-readable name into a kebab-case slug.
///
/// Words are split on whitespace and dashes, stripped of every character
/// outside `[a-zA-Z0-9]`, lowercased and joined with `-`. Distinct names may
/// map to the same slug (`"Calculus I"` and `"calculus-i"`), so callers must
/// enforce slug uniqueness themselves.
pub fn slugify(name: &str) -> String {
    WORD_SEPARATOR_RE
        .split(name)
        .map(|word| NON_SLUG_CHAR_RE.replace_all(word, "").to_lowercase())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Validation failures for subject names and note titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    /// Name is blank after trim.
    Empty,
    /// Name exceeds `MAX_NAME_CHARS`.
    TooLong { max: usize, actual: usize },
    /// Derived slug exceeds `MAX_SLUG_LEN`.
    SlugTooLong { max: usize, actual: usize },
    /// Name has no character that survives slug normalization.
    NoSlugCharacters(String),
}

impl Display for NameValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "name must not be blank"),
            Self::TooLong { max, actual } => {
                write!(f, "name is {actual} characters long, maximum is {max}")
            }
            Self::SlugTooLong { max, actual } => {
                write!(f, "slug is {actual} bytes long, maximum is {max}")
            }
            Self::NoSlugCharacters(name) => {
                write!(f, "name `{name}` has no characters usable in a slug")
            }
        }
    }
}

impl Error for NameValidationError {}

/// Trims `name` and returns it together with its slug.
pub fn normalize_name(name: &str) -> Result<(String, String), NameValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameValidationError::Empty);
    }
    let char_count = trimmed.chars().count();
    if char_count > MAX_NAME_CHARS {
        return Err(NameValidationError::TooLong {
            max: MAX_NAME_CHARS,
            actual: char_count,
        });
    }
    let slug = slugify(trimmed);
    if slug.is_empty() {
        return Err(NameValidationError::NoSlugCharacters(trimmed.to_string()));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(NameValidationError::SlugTooLong {
            max: MAX_SLUG_LEN,
            actual: slug.len(),
        });
    }
    Ok((trimmed.to_string(), slug))
}
