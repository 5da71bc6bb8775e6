//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, accurate within
//! ~10% for BPE tokenizers on English text. Budget accounting only needs to
//! be consistent, not exact — the same estimator prices every item.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Per-item overhead for delimiters and provenance markers when the item is
/// injected downstream.
const ITEM_OVERHEAD: usize = 4;

/// Estimate tokens for one context item's rendered text.
pub fn estimate_item_tokens(text: &str) -> usize {
    ITEM_OVERHEAD + estimate_tokens(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn item_includes_overhead() {
        assert_eq!(estimate_item_tokens("test"), 5);
    }
}
