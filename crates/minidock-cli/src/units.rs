//! Human-friendly size strings.

use anyhow::{Context, bail};

/// Parses a memory size such as `100M`, `1g` or `4096` into bytes.
///
/// `K`, `M` and `G` are powers of 1024 and case-insensitive; a bare number
/// is a byte count.
///
/// # Errors
///
/// Returns an error for an empty string, a non-numeric value, or a size that
/// does not fit in 64 bits.
pub fn parse_memory(input: &str) -> anyhow::Result<u64> {
    let s = input.trim();
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some(_) => (s, 1),
        None => bail!("memory size is empty"),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid memory size '{input}'"))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("memory size '{input}' is too large"))
}
