//! Real process spawner using `tokio::process::Command`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use clive_core::text::strip_ansi;
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ToolError;
use crate::traits::{OutputLine, ProcessOptions, ProcessSpawner, ProcessStream};

const OUTPUT_BUFFER: usize = 256;

/// Subprocess execution backed by `tokio::process::Command`.
///
/// Output is read line by line from both pipes and forwarded as it arrives.
/// On cancellation (token or dropped stream) the child's stdin is closed
/// first; if it has not exited after `kill_grace_ms` it is killed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioProcessSpawner;

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        opts: ProcessOptions,
    ) -> Result<ProcessStream, ToolError> {
        if command.trim().is_empty() {
            return Err(ToolError::InvalidInput {
                message: "command must not be empty".into(),
            });
        }

        let mut cmd = tokio::process::Command::new(command);
        let _ = cmd
            .args(args)
            .current_dir(&opts.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &opts.env {
            let _ = cmd.env(key, value);
        }

        debug!(command, ?args, working_dir = %opts.working_directory.display(), "spawning process");

        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let pump = Pump {
            command: command.to_string(),
            child,
            stdin,
            tx,
            cancel: opts.cancellation,
            grace: Duration::from_millis(opts.kill_grace_ms),
        };
        drop(tokio::spawn(pump.run(stdout, stderr)));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

struct Pump {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    tx: mpsc::Sender<OutputLine>,
    cancel: CancellationToken,
    grace: Duration,
}

enum Event {
    Stdout(Option<String>),
    Stderr(Option<String>),
    Stop,
}

impl Pump {
    async fn run<O, E>(mut self, mut stdout: Option<Lines<O>>, mut stderr: Option<Lines<E>>)
    where
        O: AsyncBufRead + Unpin,
        E: AsyncBufRead + Unpin,
    {
        while stdout.is_some() || stderr.is_some() {
            let event = tokio::select! {
                () = self.cancel.cancelled() => Event::Stop,
                () = self.tx.closed() => Event::Stop,
                line = next_line(&mut stdout) => Event::Stdout(line),
                line = next_line(&mut stderr) => Event::Stderr(line),
            };
            let item = match event {
                Event::Stop => return self.terminate().await,
                Event::Stdout(None) => {
                    stdout = None;
                    continue;
                }
                Event::Stderr(None) => {
                    stderr = None;
                    continue;
                }
                Event::Stdout(Some(text)) => OutputLine::Stdout {
                    text: strip_ansi(&text),
                },
                Event::Stderr(Some(text)) => OutputLine::Stderr {
                    text: strip_ansi(&text),
                },
            };
            if self.tx.send(item).await.is_err() {
                return self.terminate().await;
            }
        }

        let status = tokio::select! {
            () = self.cancel.cancelled() => None,
            () = self.tx.closed() => None,
            status = self.child.wait() => Some(status),
        };
        let Some(status) = status else {
            return self.terminate().await;
        };
        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(command = %self.command, error = %e, "process wait failed");
                -1
            }
        };
        debug!(command = %self.command, exit_code = code, "process exited");
        let _ = self.tx.send(OutputLine::Exit { code }).await;
    }

    async fn terminate(mut self) {
        drop(self.stdin.take());
        if tokio::time::timeout(self.grace, self.child.wait()).await.is_err() {
            if let Err(e) = self.child.kill().await {
                warn!(command = %self.command, error = %e, "failed to kill process");
            }
        }
        debug!(command = %self.command, "process cancelled");
    }
}

/// Next line from an optional reader. A finished reader never resolves, so
/// its `select!` branch stays idle.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    async fn collect(stream: ProcessStream) -> Vec<OutputLine> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_stdout_then_exit() {
        let stream = TokioProcessSpawner
            .spawn("sh", &sh("echo one; echo two"), ProcessOptions::new("/tmp"))
            .await
            .unwrap();
        let lines = collect(stream).await;
        assert_eq!(
            lines,
            vec![
                OutputLine::Stdout { text: "one".into() },
                OutputLine::Stdout { text: "two".into() },
                OutputLine::Exit { code: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let out = TokioProcessSpawner
            .run("sh", &sh("echo err >&2; exit 42"), ProcessOptions::new("/tmp"))
            .await
            .unwrap();
        assert_eq!(out.stderr, "err");
        assert_eq!(out.exit_code, 42);
    }

    #[tokio::test]
    async fn strips_ansi_escapes() {
        let out = TokioProcessSpawner
            .run("sh", &sh(r"printf '\033[31mred\033[0m\n'"), ProcessOptions::new("/tmp"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "red");
    }

    #[tokio::test]
    async fn passes_env() {
        let mut opts = ProcessOptions::new("/tmp");
        let _ = opts.env.insert("CLIVE_TEST_VAR".into(), "value".into());
        let out = TokioProcessSpawner
            .run("sh", &sh("echo $CLIVE_TEST_VAR"), opts)
            .await
            .unwrap();
        assert_eq!(out.stdout, "value");
    }

    #[tokio::test]
    async fn cancellation_ends_stream_without_exit() {
        let opts = ProcessOptions {
            kill_grace_ms: 50,
            ..ProcessOptions::new("/tmp")
        };
        let cancel = opts.cancellation.clone();
        let stream = TokioProcessSpawner
            .spawn("sh", &sh("echo started; sleep 30"), opts)
            .await
            .unwrap();

        let handle = tokio::spawn(collect(stream));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let lines = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stream should end after cancel")
            .unwrap();
        assert!(!lines.iter().any(|l| matches!(l, OutputLine::Exit { .. })));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = TokioProcessSpawner
            .spawn("clive-definitely-not-a-binary", &[], ProcessOptions::new("/tmp"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "SPAWN_FAILED");
    }

    #[tokio::test]
    async fn empty_command_is_invalid() {
        let err = TokioProcessSpawner
            .spawn(" ", &[], ProcessOptions::new("/tmp"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
