//! Output Grader
//!
//! **Normalization Rules (applied to both sides):**
//! - Trailing whitespace of the whole buffer: ignored
//! - Trailing whitespace of each line (including `\r`): ignored
//! - Leading whitespace: significant
//! - Interior blank lines: significant
//!
//! After normalization the two buffers must be byte-identical.

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| !is_space(b)).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Normalized form used for comparison.
pub fn normalize(output: &[u8]) -> Vec<u8> {
    let trimmed = trim_end(output);
    let mut normalized = Vec::with_capacity(trimmed.len());
    for (i, line) in trimmed.split(|b| *b == b'\n').enumerate() {
        if i > 0 {
            normalized.push(b'\n');
        }
        normalized.extend_from_slice(trim_end(line));
    }
    normalized
}

/// Default comparison: equal after normalization.
pub fn grade(expected: &[u8], actual: &[u8]) -> bool {
    normalize(expected) == normalize(actual)
}

/// Problem-specific validators plug in here. No problem ships one yet, so
/// this is exactly the default comparison.
pub mod custom {
    pub fn grade(expected: &[u8], actual: &[u8]) -> bool {
        super::grade(expected, actual)
    }
}
