//! Collision-free name allocation for combined documents.

use std::collections::HashSet;

/// Hands out names that are unique within one scope of a combined document.
///
/// A name that is not taken yet is kept as-is; otherwise a short alphabetic
/// name (`a`, `b`, .., `z`, `aa`, ..) is minted, skipping anything already
/// in use. One allocator instance lives for exactly one merge invocation
/// and one namespace (variables, fragments, or one selection-set level).
#[derive(Debug, Default)]
pub(crate) struct NameAllocator {
    used: HashSet<String>,
    counter: usize,
}

impl NameAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_reserved<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: names.into_iter().map(Into::into).collect(),
            counter: 0,
        }
    }

    /// Returns `preferred` if it is still free, or mints a fresh name.
    /// Either way the returned name is marked as used.
    pub(crate) fn claim(&mut self, preferred: &str) -> String {
        if self.used.insert(preferred.to_string()) {
            preferred.to_string()
        } else {
            self.mint()
        }
    }

    /// Mints the next unused name from the alphabetic sequence.
    pub(crate) fn mint(&mut self) -> String {
        loop {
            let candidate = alphabetic(self.counter);
            self.counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// `0 -> "a"`, `25 -> "z"`, `26 -> "aa"`, and so on.
fn alphabetic(mut n: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabetic_sequence() {
        assert_eq!(alphabetic(0), "a");
        assert_eq!(alphabetic(1), "b");
        assert_eq!(alphabetic(25), "z");
        assert_eq!(alphabetic(26), "aa");
        assert_eq!(alphabetic(27), "ab");
        assert_eq!(alphabetic(26 + 26 * 26 - 1), "zz");
        assert_eq!(alphabetic(26 + 26 * 26), "aaa");
    }

    #[test]
    fn claim_keeps_free_names() {
        let mut allocator = NameAllocator::new();
        assert_eq!(allocator.claim("id"), "id");
        // Second claim of the same name falls back to minting.
        assert_eq!(allocator.claim("id"), "a");
        assert_eq!(allocator.claim("id"), "b");
    }

    #[test]
    fn mint_skips_reserved_names() {
        let mut allocator = NameAllocator::with_reserved(["a", "c"]);
        assert_eq!(allocator.mint(), "b");
        assert_eq!(allocator.mint(), "d");
    }
}
