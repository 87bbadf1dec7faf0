//! Local process execution backend

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{LogSource, ProcessEvent};
use crate::launcher::Launcher;
use crate::process::{ExitStatus, ProcessHandle};

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A local child process; killed if dropped before it exits
pub struct LocalProcessHandle {
    child: Child,
}

/// Stream of process events.
///
/// Ends only when both stdout and stderr have reached end-of-stream.
pub struct ProcessEventStream {
    started: Option<u32>,
    output: BoxStream<'static, ProcessEvent>,
}

#[async_trait]
impl Launcher for LocalLauncher {
    type EventStream = ProcessEventStream;
    type Handle = LocalProcessHandle;

    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)> {
        let mut async_cmd = command.prepare();

        // Configure stdio for streaming
        async_cmd.stdout(Stdio::piped());
        async_cmd.stderr(Stdio::piped());

        let mut child = async_cmd.spawn().map_err(|e| {
            Error::spawn_failed(format!(
                "{}: {}",
                command.get_program().to_string_lossy(),
                e
            ))
        })?;

        let child_id = child.id();
        tracing::debug!("Spawned {} as pid {}", command, child_id);

        let stdout = child
            .stdout
            .take()
            .map(|s| channel(s, LogSource::Stdout, child_id))
            .unwrap_or_else(|| stream::empty().boxed());
        let stderr = child
            .stderr
            .take()
            .map(|s| channel(s, LogSource::Stderr, child_id))
            .unwrap_or_else(|| stream::empty().boxed());

        let events = ProcessEventStream {
            started: Some(child_id),
            // select alternates between the channels so neither starves the other
            output: stream::select(stdout, stderr).boxed(),
        };

        let handle = LocalProcessHandle { child };

        Ok((events, handle))
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .status()
            .await
            .map_err(|e| Error::spawn_failed(format!("Failed to wait for process: {}", e)))?;

        Ok(status.into())
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        // No-op if the child was already reaped
        let _ = self.child.kill();
    }
}

/// One pipe as a stream of newline-terminated chunks.
///
/// Bytes are decoded lossily, so invalid UTF-8 never stops the pipe from being
/// drained. The reader is only dropped at end-of-stream or on a read error.
fn channel<R>(reader: R, source: LogSource, pid: u32) -> BoxStream<'static, ProcessEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(BufReader::new(reader), move |mut reader| async move {
        let mut chunk = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut chunk).await {
                Ok(0) if chunk.is_empty() => return None,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&chunk).into_owned();
                    return Some((ProcessEvent::output(source, text), reader));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Error reading {} of pid {}: {}", source.as_str(), pid, e);
                    return None;
                }
            }
        }
    })
    .boxed()
}

impl Stream for ProcessEventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(pid) = self.started.take() {
            return Poll::Ready(Some(ProcessEvent::Started { pid }));
        }
        self.output.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StdinMode;
    use crate::reconcile::{Transcript, reconcile};

    fn sh(script: &str) -> Command {
        Command::builder("sh")
            .arg("-c")
            .arg(script)
            .stdin(StdinMode::Null)
            .build()
    }

    #[smol_potat::test]
    async fn test_short_lived_output_is_never_lost() {
        // Exit immediately after writing; output must still be observed in full.
        for _ in 0..20 {
            let result = LocalLauncher
                .execute(sh("printf 'one\\ntwo\\n'; echo three >&2"))
                .await
                .unwrap();
            assert!(result.status.success());
            assert!(result.output.contains("one\ntwo\n"));
            assert!(result.output.contains("three\n"));
        }
    }

    #[smol_potat::test]
    async fn test_invalid_utf8_keeps_the_pipe_open() {
        let script = "printf 'a\\377b\\n'; i=0; while [ $i -lt 3000 ]; do echo line$i; i=$((i+1)); done; printf tail; exit 3";
        let result = LocalLauncher.execute(sh(script)).await.unwrap();
        assert_eq!(result.status.exit_code(), 3);
        assert!(result.output.starts_with("a\u{FFFD}b\n"));
        assert!(result.output.contains("\nline2999\n"));
        assert!(result.output.ends_with("line2999\ntail"));
    }

    #[smol_potat::test]
    async fn test_exit_code_and_signal() {
        let result = LocalLauncher.execute(sh("exit 42")).await.unwrap();
        assert_eq!(result.status.exit_code(), 42);

        let result = LocalLauncher.execute(sh("kill -TERM $$")).await.unwrap();
        assert!(result.status.terminated_by_signal());
        assert_eq!(result.status.exit_code(), 143);
    }

    #[smol_potat::test]
    async fn test_started_event_carries_pid() {
        let (events, mut handle) = LocalLauncher.launch(sh("echo hi")).await.unwrap();
        let pid = handle.pid();
        let mut transcript = Transcript::default();
        let status = reconcile(events, &mut handle, &mut transcript).await.unwrap();
        assert!(pid.is_some());
        assert!(status.success());
        assert_eq!(transcript.as_str(), "hi\n");
    }

    #[smol_potat::test]
    async fn test_spawn_failure_names_program() {
        let err = match LocalLauncher
            .launch(Command::new("/nonexistent/definitely-not-here"))
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("spawn should fail"),
        };
        assert!(err.to_string().contains("definitely-not-here"));
    }
}
