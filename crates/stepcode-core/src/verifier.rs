//! Output verification.
//!
//! Actual and expected output are compared after trimming both ends and
//! collapsing every run of whitespace into a single space. Formatting and
//! indentation differences are ignored; anything else must match exactly.
//! Existing assignment content depends on this exact rule.

use serde::{Deserialize, Serialize};

/// Outcome of comparing a program's output with the expected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub matches: bool,
}

/// Compare `actual` with `expected` under whitespace normalization.
///
/// Callers must not invoke this for modules without expected output; see
/// [`crate::model::Module::gradable_output`].
pub fn verify(actual: &str, expected: &str) -> Verification {
    Verification {
        matches: normalize(actual) == normalize(expected),
    }
}

/// Trim and collapse whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split(is_whitespace).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

// Unicode White_Space plus the byte-order mark, which editors sometimes
// prepend to expected-output files.
fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}
