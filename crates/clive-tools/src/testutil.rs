//! In-memory capability doubles for tests in this and dependent crates.
//!
//! Enabled with the `testutil` feature.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::errors::ToolError;
use crate::traits::{
    FileWriter, OutputLine, ProcessOptions, ProcessSpawner, ProcessStream, WriteReceipt,
};

/// [`FileWriter`] that keeps writes in memory.
#[derive(Debug, Default)]
pub struct RecordingFileWriter {
    writes: Mutex<Vec<(String, String)>>,
}

impl RecordingFileWriter {
    /// Empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All `(path, content)` pairs written so far, in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }

    /// Latest content written to `path`.
    pub fn content_of(&self, path: &str) -> Option<String> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl FileWriter for RecordingFileWriter {
    async fn write_file(&self, path: &str, content: &str) -> Result<WriteReceipt, ToolError> {
        let mut writes = self.writes.lock();
        let created = !writes.iter().any(|(p, _)| p == path);
        writes.push((path.to_string(), content.to_string()));
        Ok(WriteReceipt {
            path: PathBuf::from(path),
            bytes_written: content.len(),
            created,
        })
    }
}

/// [`ProcessSpawner`] that replays a fixed script and records invocations.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    script: Vec<OutputLine>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedSpawner {
    /// Spawner whose every run yields `script`.
    pub fn new(script: Vec<OutputLine>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Script of stdout lines followed by `Exit { code }`.
    pub fn stdout(lines: &[&str], code: i32) -> Arc<Self> {
        let mut script: Vec<OutputLine> = lines
            .iter()
            .map(|l| OutputLine::Stdout { text: (*l).to_string() })
            .collect();
        script.push(OutputLine::Exit { code });
        Self::new(script)
    }

    /// Recorded `(command, args)` pairs.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProcessSpawner for ScriptedSpawner {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        opts: ProcessOptions,
    ) -> Result<ProcessStream, ToolError> {
        self.calls.lock().push((command.to_string(), args.to_vec()));
        let cancel = opts.cancellation;
        Ok(futures::stream::iter(self.script.clone())
            .take_until(async move { cancel.cancelled_owned().await })
            .boxed())
    }
}
