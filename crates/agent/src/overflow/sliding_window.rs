use async_trait::async_trait;

use super::{
    sort_chronologically, total_tokens_wide, OverflowError, TokenMessage, TokenOverflowStrategy,
    TokenProcessResult,
};

/// Drops the oldest messages until the rest fits in
/// `max_tokens * (1 - reserve_ratio)`.
#[derive(Clone, Debug)]
pub struct SlidingWindowStrategy {
    max_tokens: u32,
    reserve_ratio: f64,
}

impl SlidingWindowStrategy {
    pub fn new(max_tokens: u32, reserve_ratio: f64) -> Self {
        Self { max_tokens, reserve_ratio: reserve_ratio.clamp(0.0, 1.0) }
    }

    pub fn target_tokens(&self) -> u32 {
        (f64::from(self.max_tokens) * (1.0 - self.reserve_ratio)).floor() as u32
    }
}

#[async_trait]
impl TokenOverflowStrategy for SlidingWindowStrategy {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn need_processing(&self, messages: &[TokenMessage]) -> bool {
        total_tokens_wide(messages) > u64::from(self.max_tokens)
    }

    async fn process(
        &self,
        mut messages: Vec<TokenMessage>,
    ) -> Result<TokenProcessResult, OverflowError> {
        if !self.need_processing(&messages) {
            return Ok(TokenProcessResult::unchanged(messages, self.name()));
        }

        sort_chronologically(&mut messages);
        let target = self.target_tokens();
        let mut total = total_tokens_wide(&messages);
        let mut drop_count = 0;
        for message in &messages {
            if total <= u64::from(target) {
                break;
            }
            total -= u64::from(message.token_count);
            drop_count += 1;
        }
        let retained = messages.split_off(drop_count);
        // The retained total never exceeds `target`.
        let total = u32::try_from(total).unwrap_or(target);

        tracing::debug!(
            event_name = "overflow.sliding_window.trimmed",
            dropped = drop_count,
            retained = retained.len(),
            total_tokens = total,
            target_tokens = target,
            "dropped oldest messages to fit the window"
        );

        Ok(TokenProcessResult {
            retained_messages: retained,
            summary: None,
            total_tokens: total,
            strategy_name: self.name(),
            processed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SlidingWindowStrategy;
    use crate::overflow::test_messages::messages;
    use crate::overflow::{total_tokens, TokenOverflowStrategy};

    #[tokio::test]
    async fn within_budget_is_identity() {
        let strategy = SlidingWindowStrategy::new(100, 0.2);
        let input = messages(&[30, 30, 40]);

        assert!(!strategy.need_processing(&input));
        let result = strategy.process(input.clone()).await.expect("process");

        assert!(!result.processed);
        assert_eq!(result.retained_messages, input);
    }

    #[tokio::test]
    async fn over_budget_keeps_most_recent_under_reserved_target() {
        let strategy = SlidingWindowStrategy::new(100, 0.2);
        let input = messages(&[40, 30, 20, 25, 15]);

        assert!(strategy.need_processing(&input));
        let result = strategy.process(input.clone()).await.expect("process");

        assert!(result.processed);
        assert!(result.total_tokens <= 80);
        assert_eq!(result.total_tokens, total_tokens(&result.retained_messages));
        assert_eq!(result.retained_messages, input[2..].to_vec());
    }

    #[tokio::test]
    async fn oversized_latest_message_is_dropped_too() {
        let strategy = SlidingWindowStrategy::new(100, 0.5);
        let input = messages(&[20, 90]);

        let result = strategy.process(input).await.expect("process");

        assert!(result.retained_messages.is_empty());
        assert_eq!(result.total_tokens, 0);
    }

    #[tokio::test]
    async fn huge_counts_do_not_saturate_the_running_total() {
        let strategy = SlidingWindowStrategy::new(100, 0.0);
        let input = messages(&[u32::MAX - 10, 50, 30]);

        assert!(strategy.need_processing(&input));
        let result = strategy.process(input.clone()).await.expect("process");

        assert_eq!(result.retained_messages, input[1..].to_vec());
        assert_eq!(result.total_tokens, 80);
        assert_eq!(result.total_tokens, total_tokens(&result.retained_messages));
    }

    #[tokio::test]
    async fn input_out_of_order_is_trimmed_chronologically() {
        let strategy = SlidingWindowStrategy::new(50, 0.0);
        let mut input = messages(&[30, 30, 20]);
        input.reverse();

        let result = strategy.process(input).await.expect("process");
        let ids: Vec<&str> =
            result.retained_messages.iter().map(|message| message.id.as_str()).collect();

        assert_eq!(ids, vec!["m-1", "m-2"]);
    }
}
