//! Capability traits and their data types.
//!
//! Resolvers and bridge handlers hold these as `Arc<dyn Trait>` so tests can
//! substitute doubles without touching the filesystem or spawning processes.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ToolError;

// ─────────────────────────────────────────────────────────────────────────────
// File write
// ─────────────────────────────────────────────────────────────────────────────

/// Confirmation returned by a successful write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    /// Absolute path that was written.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes_written: usize,
    /// `true` if the file did not exist before.
    pub created: bool,
}

/// Writes file content on behalf of the agent.
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Write `content` to `path`, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<WriteReceipt, ToolError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge search
// ─────────────────────────────────────────────────────────────────────────────

/// A knowledge-base query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Free-text query.
    pub text: String,
    /// Every listed tag must be present on a hit.
    pub tags: Vec<String>,
    /// Maximum number of hits. `None` uses the implementation default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Excerpt around the first match.
    pub snippet: String,
    /// Relevance score; higher is better.
    pub score: f64,
    /// Tags attached to the document.
    pub tags: Vec<String>,
}

/// Searches project knowledge (conventions, prior test plans, docs).
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Return hits ordered by descending score.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ToolError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Process spawn
// ─────────────────────────────────────────────────────────────────────────────

/// Options for spawning a child process.
#[derive(Clone, Debug)]
pub struct ProcessOptions {
    /// Working directory of the child.
    pub working_directory: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Cancelling this token stops the child.
    pub cancellation: CancellationToken,
    /// Time between closing the child's stdin and killing it on cancel.
    pub kill_grace_ms: u64,
}

impl ProcessOptions {
    /// Options with a fresh token, empty env and a 500 ms kill grace.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            env: HashMap::new(),
            cancellation: CancellationToken::new(),
            kill_grace_ms: 500,
        }
    }
}

/// One item of streamed process output.
///
/// A stream that ran to completion ends with exactly one `Exit`. A stream
/// that was cancelled ends without one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputLine {
    /// A line from stdout, ANSI escapes removed.
    Stdout {
        /// Line text without the trailing newline.
        text: String,
    },
    /// A line from stderr, ANSI escapes removed.
    Stderr {
        /// Line text without the trailing newline.
        text: String,
    },
    /// The child exited. `-1` when killed by a signal.
    Exit {
        /// Exit status code.
        code: i32,
    },
}

/// Streamed process output. Dropping the stream stops the child.
pub type ProcessStream = BoxStream<'static, OutputLine>;

/// Collected output of a finished process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    /// All stdout lines joined with `\n`.
    pub stdout: String,
    /// All stderr lines joined with `\n`.
    pub stderr: String,
    /// Exit code, `-1` if the stream ended without an exit frame.
    pub exit_code: i32,
}

/// Spawns child processes and streams their output.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Start `command` with `args` and return its output stream.
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        opts: ProcessOptions,
    ) -> Result<ProcessStream, ToolError>;

    /// Run to completion and collect the output.
    async fn run(
        &self,
        command: &str,
        args: &[String],
        opts: ProcessOptions,
    ) -> Result<ProcessOutput, ToolError> {
        let mut stream = self.spawn(command, args, opts).await?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1;
        while let Some(line) = stream.next().await {
            match line {
                OutputLine::Stdout { text } => stdout.push(text),
                OutputLine::Stderr { text } => stderr.push(text),
                OutputLine::Exit { code } => exit_code = code,
            }
        }
        Ok(ProcessOutput {
            stdout: stdout.join("\n"),
            stderr: stderr.join("\n"),
            exit_code,
        })
    }
}
