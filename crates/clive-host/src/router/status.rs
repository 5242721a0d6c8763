//! `status.*`: working-tree information for the status panel.

use std::sync::LazyLock;

use clive_rpc::{RouterBuildError, RpcError, ValidateInput, procedure};
use clive_tools::ProcessOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{AppRouter, tool_error};
use crate::context::RequestContext;

static GIT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._/~^@{}-]*$").unwrap());

/// Input of `branchChanges`. `base` defaults to the configured diff base.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BranchChangesInput {
    /// Revision to diff against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

impl ValidateInput for BranchChangesInput {
    fn validate(&self) -> Result<(), String> {
        match &self.base {
            Some(base) if !GIT_REF.is_match(base) || base.contains("..") => {
                Err(format!("'base' is not a valid revision: {base}"))
            }
            _ => Ok(()),
        }
    }
}

/// Files changed relative to `base`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchChanges {
    /// Revision diffed against.
    pub base: String,
    /// Workspace-relative paths, in git's order.
    pub files: Vec<String>,
}

/// `branchChanges`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "branchChanges",
            procedure::<RequestContext>()
                .input::<Option<BranchChangesInput>>()
                .query(|input, ctx: RequestContext| async move {
                    let base = input
                        .and_then(|i| i.base)
                        .unwrap_or_else(|| ctx.tools.diff_base.clone());
                    branch_changes(&ctx, base).await
                }),
        )
        .build()
}

async fn branch_changes(ctx: &RequestContext, base: String) -> Result<BranchChanges, RpcError> {
    let mut opts = ProcessOptions::new(&ctx.workspace_root);
    opts.kill_grace_ms = ctx.tools.process_kill_grace_ms;
    let args = ["diff".to_owned(), "--name-only".to_owned(), base.clone()];
    let output = ctx
        .processes
        .run("git", &args, opts)
        .await
        .map_err(|e| tool_error("status.branchChanges", &e))?;
    if output.exit_code != 0 {
        return Err(RpcError::resolver_with(
            format!("git diff failed: {}", output.stderr.trim()),
            json!({ "exitCode": output.exit_code }),
        ));
    }
    let files: Vec<String> = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect();
    debug!(base = %base, count = files.len(), "branch changes listed");
    Ok(BranchChanges { base, files })
}
