use async_trait::async_trait;

use super::{OverflowError, TokenMessage, TokenOverflowStrategy, TokenProcessResult};

/// Sends everything as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoneStrategy;

#[async_trait]
impl TokenOverflowStrategy for NoneStrategy {
    fn name(&self) -> &'static str {
        "none"
    }

    fn need_processing(&self, _messages: &[TokenMessage]) -> bool {
        false
    }

    async fn process(
        &self,
        messages: Vec<TokenMessage>,
    ) -> Result<TokenProcessResult, OverflowError> {
        Ok(TokenProcessResult::unchanged(messages, self.name()))
    }
}
