use std::fmt;

use serde::{Deserialize, Serialize};

/// An identifier value tagged with its scheme, stored on records as
/// `"value|scheme"` (e.g. `9780306406157|isbn`, `12345|oclc`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaggedIdentifier {
    pub value: String,
    pub scheme: String,
}

impl TaggedIdentifier {
    pub fn new(value: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            scheme: scheme.into(),
        }
    }

    /// Parse `"value|scheme"`. Returns `None` when either half is empty or
    /// the separator is missing.
    pub fn parse(raw: &str) -> Option<Self> {
        let (value, scheme) = raw.rsplit_once('|')?;
        let value = value.trim();
        let scheme = scheme.trim().to_lowercase();
        if value.is_empty() || scheme.is_empty() {
            return None;
        }
        Some(Self::new(value, scheme))
    }

    /// Matching form of the identifier. ISBNs collapse to ISBN-13 so that a
    /// record carrying the ISBN-10 matches one carrying the ISBN-13; other
    /// schemes are compared on the trimmed value.
    pub fn normalized(&self) -> Self {
        let value = match self.scheme.as_str() {
            "isbn" => normalize_isbn(&self.value).unwrap_or_else(|| strip_isbn(&self.value)),
            _ => self.value.trim().to_string(),
        };
        Self::new(value, self.scheme.clone())
    }

    pub fn tagged(&self) -> String {
        format!("{}|{}", self.value, self.scheme)
    }
}

impl fmt::Display for TaggedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.value, self.scheme)
    }
}

// ─── ISBN ──────────────────────────────────────────────────

fn strip_isbn(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

fn check_isbn10(digits: &[u8]) -> bool {
    // digits[9] may be 10 (X)
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| (10 - i as u32) * d as u32)
        .sum();
    sum % 11 == 0
}

fn isbn13_checksum(digits: &[u8]) -> u32 {
    digits
        .iter()
        .enumerate()
        .map(|(i, &d)| if i % 2 == 0 { d as u32 } else { d as u32 * 3 })
        .sum()
}

fn isbn10_to_isbn13(digits10: &[u8]) -> String {
    let mut d13: Vec<u8> = vec![9, 7, 8];
    d13.extend_from_slice(&digits10[..9]);
    let check = (10 - (isbn13_checksum(&d13) % 10)) % 10;
    d13.push(check as u8);
    d13.iter().map(|d| d.to_string()).collect()
}

/// Validate an ISBN-10 or ISBN-13 and return its ISBN-13 form.
pub fn normalize_isbn(input: &str) -> Option<String> {
    let stripped = strip_isbn(input);

    match stripped.len() {
        13 => {
            if !stripped.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let digits: Vec<u8> = stripped.bytes().map(|b| b - b'0').collect();
            (isbn13_checksum(&digits) % 10 == 0).then_some(stripped)
        }
        10 => {
            let mut digits: Vec<u8> = Vec::with_capacity(10);
            for (i, c) in stripped.chars().enumerate() {
                if i == 9 && c == 'X' {
                    digits.push(10);
                } else if c.is_ascii_digit() {
                    digits.push(c as u8 - b'0');
                } else {
                    return None;
                }
            }
            check_isbn10(&digits).then(|| isbn10_to_isbn13(&digits))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tagged_identifier() {
        let id = TaggedIdentifier::parse("12345| OCLC ").unwrap();
        assert_eq!(id.value, "12345");
        assert_eq!(id.scheme, "oclc");
        assert_eq!(id.tagged(), "12345|oclc");
    }

    #[test]
    fn parse_rejects_untagged_and_empty() {
        assert!(TaggedIdentifier::parse("12345").is_none());
        assert!(TaggedIdentifier::parse("|isbn").is_none());
        assert!(TaggedIdentifier::parse("123|").is_none());
    }

    #[test]
    fn isbn10_and_isbn13_normalize_to_same_value() {
        let a = TaggedIdentifier::parse("0306406152|isbn").unwrap().normalized();
        let b = TaggedIdentifier::parse("978-0-306-40615-7|isbn").unwrap().normalized();
        assert_eq!(a, b);
        assert_eq!(a.value, "9780306406157");
    }

    #[test]
    fn isbn10_with_x_check() {
        assert_eq!(normalize_isbn("007462542X"), Some("9780074625422".to_string()));
    }

    #[test]
    fn invalid_isbn_keeps_stripped_value() {
        assert_eq!(normalize_isbn("9780306406158"), None);
        let id = TaggedIdentifier::new("978-0306406158", "isbn").normalized();
        assert_eq!(id.value, "9780306406158");
    }

    #[test]
    fn non_isbn_schemes_are_only_trimmed() {
        let id = TaggedIdentifier::new(" 0306406152 ", "oclc").normalized();
        assert_eq!(id.value, "0306406152");
    }
}
