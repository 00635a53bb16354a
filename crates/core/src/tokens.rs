/// Counts tokens for a piece of text. Implementations may be exact
/// (tokenizer backed) or estimates.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u32;
}

/// Rough estimate: four characters per token plus a 10% margin.
#[derive(Clone, Copy, Debug, Default)]
pub struct EstimatingCounter;

impl TokenCounter for EstimatingCounter {
    fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as u32;
        let base = chars.div_ceil(4);
        base + base.div_ceil(10)
    }
}

#[cfg(test)]
mod tests {
    use super::{EstimatingCounter, TokenCounter};

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(EstimatingCounter.count(""), 0);
    }

    #[test]
    fn estimate_rounds_up_with_margin() {
        // 8 chars -> 2 base tokens, plus a margin of 1
        assert_eq!(EstimatingCounter.count("abcdefgh"), 3);
        assert_eq!(EstimatingCounter.count("a"), 2);
    }
}
