//! Location cleaning and normalization for parking tickets.
//!
//! Ticket locations are hand-entered and arrive in many shapes:
//! - Block addresses: `"1500 MARKET ST"`
//! - With noise words: `"1500 BLOCK OF MARKET ST"`, `"1500BLK MARKET ST"`
//! - Intersections: `"S 15TH ST & MARKET ST"`, `"BROAD ST / SPRING GARDEN ST"`
//! - Trailing postal codes: `"1500 MARKET ST 19102"`
//!
//! This module normalizes them into a canonical form usable as a lookup
//! key.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Regex for "BLOCK OF" / "BLK OF" noise in addresses.
static BLOCK_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+BLOCK\s+OF\s+|\s+BLK\s+OF\s+").expect("valid regex"));

/// Regex for standalone "BLOCK" / "BL" / "BLK" after a house number,
/// with or without a space between the number and the keyword.
static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s*(?:BLOCK|BLK|BL)\s+").expect("valid regex"));

/// Regex for travel-direction suffixes ("EB", "WB", "NB", "SB").
static DIRECTION_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(EB|WB|NB|SB)$").expect("valid regex"));

/// Regex for a trailing ZIP or ZIP+4.
static ZIP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,]+(\d{5})(?:-\d{4})?$").expect("valid regex"));

/// Regex for punctuation that carries no meaning in a lookup key.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,#]").expect("valid regex"));

/// Regex for runs of whitespace.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Non-geocodable location patterns.
static SKIP_PATTERNS: &[&str] = &[
    "UNKNOWN",
    "N/A",
    "NA",
    "NONE",
    "NOT AVAILABLE",
    "UNDETERMINED",
    "UNSPECIFIED",
];

/// Result of cleaning a ticket location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanedAddress {
    /// A street address.
    Street(String),
    /// An intersection of two streets.
    Intersection {
        /// First street.
        street1: String,
        /// Second street.
        street2: String,
    },
    /// The location is not usable (empty, unknown, garbage).
    NotGeocodable,
}

impl fmt::Display for CleanedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Street(street) => f.write_str(street),
            Self::Intersection { street1, street2 } => write!(f, "{street1} & {street2}"),
            Self::NotGeocodable => Ok(()),
        }
    }
}

impl CleanedAddress {
    /// The canonical lookup key, or `None` for [`CleanedAddress::NotGeocodable`].
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::NotGeocodable => None,
            other => Some(other.to_string()),
        }
    }

    /// For intersections, the key with the two streets swapped.
    #[must_use]
    pub fn swapped_key(&self) -> Option<String> {
        match self {
            Self::Intersection { street1, street2 } => Some(format!("{street2} & {street1}")),
            _ => None,
        }
    }
}

/// Splits a trailing postal code off a raw location.
///
/// Returns the remaining text and the 5-digit ZIP, if one was present.
#[must_use]
pub fn split_zip(raw: &str) -> (&str, Option<String>) {
    let trimmed = raw.trim();
    ZIP_SUFFIX_RE.captures(trimmed).map_or((trimmed, None), |caps| {
        let whole = caps.get(0).map_or(trimmed.len(), |m| m.start());
        (&trimmed[..whole], caps.get(1).map(|m| m.as_str().to_string()))
    })
}

fn has_letter(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

fn squash(text: &str) -> String {
    let text = PUNCTUATION_RE.replace_all(text, " ");
    WHITESPACE_RE.replace_all(text.trim(), " ").to_string()
}

/// Cleans and normalizes a ticket location.
///
/// Returns [`CleanedAddress::Street`] for normal addresses,
/// [`CleanedAddress::Intersection`] for cross-street patterns, or
/// [`CleanedAddress::NotGeocodable`] for garbage input.
#[must_use]
pub fn clean_block_address(raw: &str) -> CleanedAddress {
    let addr = squash(&raw.trim().to_uppercase());

    if addr.is_empty() || SKIP_PATTERNS.iter().any(|p| addr == *p) {
        return CleanedAddress::NotGeocodable;
    }

    let addr = DIRECTION_SUFFIX_RE.replace_all(&addr, "").to_string();

    // Intersections: "A / B", "A & B", "A AND B", "A AT B"
    for sep in [" / ", " /", "/ ", "/", " & ", "&", " AND ", " AT "] {
        if let Some(idx) = addr.find(sep) {
            let street1 = addr[..idx].trim().to_string();
            let street2 = addr[idx + sep.len()..].trim().to_string();
            if street1.is_empty() || street2.is_empty() {
                continue;
            }
            // "1500 1/2 MARKET ST" is a fractional house number.
            if sep.contains('/') && !(has_letter(&street1) && has_letter(&street2)) {
                continue;
            }
            return CleanedAddress::Intersection { street1, street2 };
        }
    }

    let addr = BLOCK_OF_RE.replace_all(&addr, " ").to_string();
    let addr = BLOCK_RE.replace(&addr, "$1 ").to_string();
    let addr = addr.trim().to_string();

    if addr.is_empty() {
        return CleanedAddress::NotGeocodable;
    }

    CleanedAddress::Street(addr)
}
