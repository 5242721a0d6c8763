//! `process.*`: run a command in the workspace and stream its output.
//!
//! The stream yields stdout/stderr lines as they arrive, then one `exit`
//! item. Cancelling the subscription (or dropping the link) fires the
//! run's token, which stops the child.

use std::path::PathBuf;

use clive_rpc::procedure::{require_max_len, require_non_empty};
use clive_rpc::{RouterBuildError, RpcError, ValidateInput, procedure};
use clive_tools::fs::path::resolve_within;
use clive_tools::{OutputLine, ProcessOptions};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{AppRouter, tool_error};
use crate::context::RequestContext;

const PATH: &str = "process.run";
const MAX_ARGS: usize = 256;

/// Input of `run`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunInput {
    /// Program to start; looked up on `PATH`.
    pub command: String,
    /// Arguments, passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory relative to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl ValidateInput for RunInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("command", &self.command)?;
        require_max_len("command", &self.command, 4_096)?;
        if self.args.len() > MAX_ARGS {
            return Err(format!("too many arguments ({} > {MAX_ARGS})", self.args.len()));
        }
        Ok(())
    }
}

fn working_directory(ctx: &RequestContext, cwd: Option<&str>) -> Result<PathBuf, RpcError> {
    match cwd.map(str::trim) {
        None | Some("" | ".") => Ok(ctx.workspace_root.clone()),
        Some(dir) => resolve_within(&ctx.workspace_root, dir).map_err(|e| tool_error(PATH, &e)),
    }
}

/// `run`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "run",
            procedure::<RequestContext>()
                .input::<RunInput>()
                .subscription(|input, ctx: RequestContext| async move {
                    let mut opts = ProcessOptions::new(working_directory(&ctx, input.cwd.as_deref())?);
                    opts.kill_grace_ms = ctx.tools.process_kill_grace_ms;
                    let token = CancellationToken::new();
                    opts.cancellation = token.clone();

                    let lines = ctx
                        .processes
                        .spawn(&input.command, &input.args, opts)
                        .await
                        .map_err(|e| tool_error(PATH, &e))?;
                    info!(command = %input.command, args = ?input.args, "process started");

                    let guard = token.drop_guard();
                    Ok(lines.map(move |line| {
                        let _held = &guard;
                        Ok::<OutputLine, RpcError>(line)
                    }))
                }),
        )
        .build()
}
