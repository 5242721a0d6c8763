//! Context handler: summarizeContext.

use std::sync::Arc;

use async_trait::async_trait;
use clive_bridge::errors::HandlerError;
use clive_bridge::registry::BridgeHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{parse_params, require_non_empty};
use crate::stores::ContextStore;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeParams {
    summary: String,
    #[serde(default)]
    tokens_before: Option<u64>,
}

/// Store the agent's context summary.
///
/// Params: `{summary, tokensBefore?}`. Returns `{stored: true, length}`
/// where `length` counts characters.
pub struct SummarizeContextHandler {
    summaries: Arc<ContextStore>,
}

impl SummarizeContextHandler {
    /// Handler over `summaries`.
    pub fn new(summaries: Arc<ContextStore>) -> Self {
        Self { summaries }
    }
}

#[async_trait]
impl BridgeHandler for SummarizeContextHandler {
    #[instrument(skip_all, fields(method = "summarizeContext"))]
    async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
        let SummarizeParams {
            summary,
            tokens_before,
        } = parse_params(params)?;
        require_non_empty("summary", &summary)?;
        let length = summary.chars().count();
        let _ = self.summaries.record(summary, tokens_before);
        info!(length, tokens_before = ?tokens_before, "context summary stored");
        Ok(json!({ "stored": true, "length": length }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn stores_summary_and_reports_length() {
        let store = Arc::new(ContextStore::default());
        let handler = SummarizeContextHandler::new(Arc::clone(&store));
        let out = handler
            .handle(json!({"summary": "héllo", "tokensBefore": 9000}))
            .await
            .unwrap();
        assert_eq!(out, json!({"stored": true, "length": 5}));
        let latest = store.latest().unwrap();
        assert_eq!(latest.tokens_before, Some(9000));
    }

    #[tokio::test]
    async fn empty_summary_is_rejected() {
        let handler = SummarizeContextHandler::new(Arc::new(ContextStore::default()));
        assert_matches!(
            handler.handle(json!({"summary": ""})).await,
            Err(HandlerError::InvalidParams { .. })
        );
        assert_matches!(
            handler.handle(json!(["not", "an", "object"])).await,
            Err(HandlerError::InvalidParams { .. })
        );
    }
}
