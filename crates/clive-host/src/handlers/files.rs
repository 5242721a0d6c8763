//! File handler: writeTestFile.

use std::sync::Arc;

use async_trait::async_trait;
use clive_bridge::errors::HandlerError;
use clive_bridge::registry::BridgeHandler;
use clive_tools::FileWriter;
use metrics::counter;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{parse_params, require_non_empty, tool_error};

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

/// Write a test file inside the workspace.
///
/// Params: `{path, content}`. Returns `{path, bytesWritten, created}`.
pub struct WriteTestFileHandler {
    files: Arc<dyn FileWriter>,
}

impl WriteTestFileHandler {
    /// Handler writing through `files`.
    pub fn new(files: Arc<dyn FileWriter>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl BridgeHandler for WriteTestFileHandler {
    #[instrument(skip_all, fields(method = "writeTestFile"))]
    async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
        let WriteParams { path, content } = parse_params(params)?;
        require_non_empty("path", &path)?;
        let receipt = self
            .files
            .write_file(&path, &content)
            .await
            .map_err(|e| tool_error(&e))?;
        counter!("bridge_test_files_written_total").increment(1);
        info!(path = %receipt.path.display(), bytes = receipt.bytes_written, "test file written");
        Ok(json!({
            "path": receipt.path,
            "bytesWritten": receipt.bytes_written,
            "created": receipt.created,
        }))
    }
}
