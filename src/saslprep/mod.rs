//! SASLprep (RFC 4013) string preparation for SCRAM credentials.
//!
//! The profile runs in a fixed order on Unicode scalar values:
//!
//! 1. Mapping: "commonly mapped to nothing" code points are dropped.
//! 2. Normalization: NFKC.
//! 3. Prohibited output check (RFC 3454 tables C.1.2 – C.9).
//! 4. Unassigned code point check (stored strings only).
//! 5. Bidirectional check (RFC 3454 section 6).
//!
//! Non-ASCII spaces are allowed and skipped by the checks, but are not
//! rewritten in the returned string.

use stringprep::tables;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Failure to prepare a string with the SASLprep profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaslPrepError {
    /// The prepared string contains a prohibited code point.
    #[error("prohibited character {ch:?} at position {position}")]
    InvalidCharacter {
        /// Offending character
        ch: char,
        /// Index of the character in the normalized string (in chars)
        position: usize,
    },

    /// A stored string contains a code point unassigned in Unicode 3.2.
    #[error("unassigned code point {ch:?} at position {position}")]
    UnassignedCodePoint {
        /// Offending character
        ch: char,
        /// Index of the character in the normalized string (in chars)
        position: usize,
    },

    /// The bidirectional rules of RFC 3454 section 6 are broken.
    #[error("bidirectional rule violated: {0}")]
    BidiViolation(BidiViolation),
}

/// Which bidirectional rule a string broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidiViolation {
    /// Contains both RandALCat and LCat characters.
    MixedDirection,
    /// Contains RandALCat characters but does not start and end with one.
    NotEnclosed,
}

impl std::fmt::Display for BidiViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BidiViolation::MixedDirection => {
                write!(f, "string contains both RandALCat and LCat characters")
            }
            BidiViolation::NotEnclosed => write!(
                f,
                "string contains RandALCat characters but does not start and end with one"
            ),
        }
    }
}

/// Prepare `input` with the SASLprep profile.
///
/// `stored` selects the stored-string variant, which additionally rejects
/// unassigned code points. Queries (e.g. a password typed at login) pass
/// `false`.
///
/// Returns the NFKC-normalized string.
pub fn prepare(input: &str, stored: bool) -> Result<String, SaslPrepError> {
    let mapped: String = input.chars().filter(|&c| !tables::commonly_mapped_to_nothing(c)).collect();
    let normalized: String = mapped.nfkc().collect();

    let mut has_r_al = false;
    let mut has_l = false;

    for (position, ch) in normalized.chars().enumerate() {
        if tables::non_ascii_space_character(ch) {
            continue;
        }
        if is_prohibited(ch) {
            return Err(SaslPrepError::InvalidCharacter { ch, position });
        }
        if stored && tables::unassigned_code_point(ch) {
            return Err(SaslPrepError::UnassignedCodePoint { ch, position });
        }

        has_r_al |= tables::bidi_r_or_al(ch);
        has_l |= tables::bidi_l(ch);
    }

    if has_r_al {
        if has_l {
            return Err(SaslPrepError::BidiViolation(BidiViolation::MixedDirection));
        }
        // Non-ASCII spaces take no part in the first/last rule.
        let mut bidi = normalized
            .chars()
            .filter(|&c| !tables::non_ascii_space_character(c));
        let first = bidi.next();
        let last = bidi.next_back().or(first);
        if !(first.is_some_and(tables::bidi_r_or_al) && last.is_some_and(tables::bidi_r_or_al)) {
            return Err(SaslPrepError::BidiViolation(BidiViolation::NotEnclosed));
        }
    }

    Ok(normalized)
}

fn is_prohibited(ch: char) -> bool {
    tables::ascii_control_character(ch)
        || tables::non_ascii_control_character(ch)
        || tables::private_use(ch)
        || tables::non_character_code_point(ch)
        || tables::surrogate_code(ch)
        || tables::inappropriate_for_plain_text(ch)
        || tables::inappropriate_for_canonical_representation(ch)
        || tables::change_display_properties_or_deprecated(ch)
        || tables::tagging_character(ch)
}
