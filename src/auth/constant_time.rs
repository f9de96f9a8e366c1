/// Compares two byte strings without short-circuiting on the first difference.
///
/// A length mismatch returns immediately; equal-length inputs are always walked
/// to the end with an XOR accumulator so the running time does not depend on
/// where the inputs diverge. Used for OAuth state, session fingerprints and
/// password material.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}

pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}
