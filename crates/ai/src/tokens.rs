//! Prompt size estimation against a model's context budget.

/// Default prompt budget, in tokens.
pub const DEFAULT_MAX_PROMPT_TOKENS: usize = 2048;

/// Average characters per token for English text and JSON with BPE tokenizers.
const CHARS_PER_TOKEN: usize = 4;

/// Deterministic token estimator.
///
/// Errs on the side of overestimating: characters are counted, not bytes, and
/// partial tokens round up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    pub fn exceeds(&self, text: &str) -> bool {
        self.estimate(text) > self.max_tokens
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PROMPT_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_partial_tokens_up() {
        let budget = TokenBudget::new(2);
        assert_eq!(budget.estimate(""), 0);
        assert_eq!(budget.estimate("abcd"), 1);
        assert_eq!(budget.estimate("abcde"), 2);
    }

    #[test]
    fn exceeds_is_strict() {
        let budget = TokenBudget::new(2);
        assert!(!budget.exceeds("12345678"));
        assert!(budget.exceeds("123456789"));
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(TokenBudget::default().estimate("ééééé"), 2);
    }
}
