//! `files.*`: writes confined to the workspace.

use clive_rpc::procedure::require_non_empty;
use clive_rpc::{RouterBuildError, ValidateInput, procedure};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AppRouter, tool_error};
use crate::context::RequestContext;

/// Input of `write`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteInput {
    /// Workspace-relative path.
    pub path: String,
    /// Full file content.
    pub content: String,
}

impl ValidateInput for WriteInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("path", &self.path)
    }
}

/// `write`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "write",
            procedure::<RequestContext>()
                .input::<WriteInput>()
                .mutation(|input, ctx: RequestContext| async move {
                    let receipt = ctx
                        .files
                        .write_file(&input.path, &input.content)
                        .await
                        .map_err(|e| tool_error("files.write", &e))?;
                    info!(path = %receipt.path.display(), bytes = receipt.bytes_written, "file written");
                    Ok(receipt)
                }),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFactory, ContextOverrides};
    use crate::router::test_support::Fixture;
    use clive_rpc::ProcedureKind;
    use clive_tools::testutil::ScriptedSpawner;
    use serde_json::json;

    #[tokio::test]
    async fn writes_through_context_writer() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let out = router()
            .unwrap()
            .call(
                "write",
                ProcedureKind::Mutation,
                json!({"path": "src/a.test.ts", "content": "it('works')"}),
                fx.ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["bytesWritten"], json!(11));
        assert_eq!(out["created"], json!(true));
        assert_eq!(fx.files.content_of("src/a.test.ts").as_deref(), Some("it('works')"));
    }

    #[tokio::test]
    async fn default_writer_refuses_escaping_paths() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let ctx = ContextFactory::new(fx.dir.path(), &fx.state, clive_settings::ToolSettings::default())
            .build(&ContextOverrides::new());
        let err = router()
            .unwrap()
            .call(
                "write",
                ProcedureKind::Mutation,
                json!({"path": "../outside.ts", "content": "x"}),
                ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), clive_rpc::errors::INPUT_VALIDATION);
        assert!(!fx.dir.path().parent().unwrap().join("outside.ts").exists());
    }

    #[tokio::test]
    async fn default_writer_creates_parent_directories() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let ctx = ContextFactory::new(fx.dir.path(), &fx.state, clive_settings::ToolSettings::default())
            .build(&ContextOverrides::new());
        let out = router()
            .unwrap()
            .call(
                "write",
                ProcedureKind::Mutation,
                json!({"path": "tests/unit/a.test.ts", "content": "x"}),
                ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["created"], json!(true));
        let written = std::fs::read_to_string(fx.dir.path().join("tests/unit/a.test.ts")).unwrap();
        assert_eq!(written, "x");
    }
}
