//! Ordered voucher code generation.
//!
//! Codes are the Crockford Base32 rendering of an ordinal, padded to a fixed
//! width and prefixed so they read as voucher identifiers (`MU00000A`). The
//! alphabet leaves out `I`, `L`, `O` and `U`, which keeps codes unambiguous
//! when recipients retype them.

use std::collections::HashSet;

/// Crockford Base32 alphabet (32 symbols).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Prefix shared by every generated code.
pub const CODE_PREFIX: &str = "MU";

/// Minimum number of base-32 symbols after the prefix.
const CODE_WIDTH: usize = 6;

/// Produce the `n`th voucher code.
///
/// Pure function of `n`. Values that need more than [`CODE_WIDTH`] symbols
/// simply grow longer, so distinct ordinals never share a code.
pub fn generate_ordered_id(n: u64) -> String {
    let mut digits = Vec::with_capacity(CODE_WIDTH);
    let mut value = n;
    loop {
        digits.push(ALPHABET[(value % 32) as usize]);
        value /= 32;
        if value == 0 {
            break;
        }
    }

    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_WIDTH.max(digits.len()));
    code.push_str(CODE_PREFIX);
    for _ in digits.len()..CODE_WIDTH {
        code.push('0');
    }
    code.extend(digits.iter().rev().map(|&b| b as char));
    code
}

/// Hands out the lowest free ordinal codes for one import.
///
/// The set of persisted codes is read once per import and passed in here; every
/// code handed out is added to the same set so later rows in the batch skip it.
#[derive(Debug)]
pub struct CodeAllocator {
    taken: HashSet<String>,
    ordinal: u64,
}

impl CodeAllocator {
    pub fn new(existing: HashSet<String>) -> Self {
        Self {
            taken: existing,
            ordinal: 1,
        }
    }

    /// Next code not present in the store and not yet assigned in this batch.
    pub fn next_code(&mut self) -> String {
        loop {
            let candidate = generate_ordered_id(self.ordinal);
            self.ordinal += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Ordinal the next call to [`CodeAllocator::next_code`] starts scanning from.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }
}
