//! `knowledge.*`: search conventions, docs and approved plans.

use clive_rpc::procedure::require_max_len;
use clive_rpc::{RouterBuildError, ValidateInput, procedure};
use clive_tools::SearchQuery;
use serde::{Deserialize, Serialize};

use super::{AppRouter, tool_error};
use crate::context::RequestContext;

const MAX_QUERY_LEN: usize = 1_000;
const MAX_LIMIT: usize = 100;

/// Input of `search`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SearchInput {
    /// Free text.
    pub text: String,
    /// Required tags.
    pub tags: Vec<String>,
    /// Hit cap, `1..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ValidateInput for SearchInput {
    fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() && self.tags.is_empty() {
            return Err("either 'text' or 'tags' is required".into());
        }
        require_max_len("text", &self.text, MAX_QUERY_LEN)?;
        match self.limit {
            Some(limit) if limit == 0 || limit > MAX_LIMIT => {
                Err(format!("'limit' must be between 1 and {MAX_LIMIT}"))
            }
            _ => Ok(()),
        }
    }
}

impl From<SearchInput> for SearchQuery {
    fn from(input: SearchInput) -> Self {
        Self {
            text: input.text,
            tags: input.tags,
            limit: input.limit,
        }
    }
}

/// `search`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "search",
            procedure::<RequestContext>()
                .input::<SearchInput>()
                .query(|input, ctx: RequestContext| async move {
                    ctx.knowledge
                        .search(&input.into())
                        .await
                        .map_err(|e| tool_error("knowledge.search", &e))
                }),
        )
        .build()
}
