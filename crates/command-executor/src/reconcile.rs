//! Output reconciliation.
//!
//! A child's exit notification and the end of its output are two separate events,
//! and for short-lived commands the exit can be observed while lines are still
//! buffered in the pipes. Completion is therefore ordered on stream closure:
//! both channels are drained to end-of-stream first, and only then is the process
//! reaped. Drivers that capture through a log file use [`replay`] instead, since
//! the file is fully materialized before it is read.

use std::io::Write;

use futures::stream::{Stream, StreamExt};
use tracing::debug;

use crate::error::Result;
use crate::event::{LogSource, ProcessEvent};
use crate::process::{ExitStatus, ProcessHandle};

/// Receives output as it is observed
pub trait OutputSink: Send {
    /// Handle one chunk of output, written out verbatim
    fn output(&mut self, source: LogSource, text: &str);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn output(&mut self, source: LogSource, text: &str) {
        (**self).output(source, text)
    }
}

/// Collects the interleaved transcript in arrival order
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    /// Captured text so far
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume into the captured text
    pub fn into_string(self) -> String {
        self.text
    }
}

impl OutputSink for Transcript {
    fn output(&mut self, _source: LogSource, text: &str) {
        self.text.push_str(text);
    }
}

/// Writes output to the wrapper's own stdout/stderr as it arrives
#[derive(Debug, Default, Clone, Copy)]
pub struct Console;

impl OutputSink for Console {
    fn output(&mut self, source: LogSource, text: &str) {
        // A closed terminal must not abort capture of the remaining output.
        let _ = match source {
            LogSource::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            LogSource::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(text.as_bytes()).and_then(|_| err.flush())
            }
        };
    }
}

/// Fans all output out to two sinks
pub struct Tee<A, B>(pub A, pub B);

impl<A: OutputSink, B: OutputSink> OutputSink for Tee<A, B> {
    fn output(&mut self, source: LogSource, text: &str) {
        self.0.output(source, text);
        self.1.output(source, text);
    }
}

/// Drain every output channel of a launched process, then wait for it to exit.
///
/// The returned status is only produced after the event stream has ended, which
/// a launcher signals once all of the child's output streams reached EOF.
pub async fn reconcile<E, H, S>(mut events: E, handle: &mut H, sink: &mut S) -> Result<ExitStatus>
where
    E: Stream<Item = ProcessEvent> + Unpin,
    H: ProcessHandle + ?Sized,
    S: OutputSink + ?Sized,
{
    let mut chunks = 0usize;
    while let Some(event) = events.next().await {
        match event {
            ProcessEvent::Output { source, text } => {
                chunks += 1;
                sink.output(source, &text);
            }
            ProcessEvent::Started { pid } => {
                debug!("Process {} started, draining output", pid);
            }
        }
    }

    let status = handle.wait().await?;
    debug!(
        "Output closed after {} chunks; process exited with {:?}",
        chunks, status
    );
    Ok(status)
}

/// Replay text that was captured through a file
pub fn replay<S: OutputSink + ?Sized>(text: &str, sink: &mut S) {
    for line in text.split_inclusive('\n') {
        sink.output(LogSource::Stdout, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A handle that records whether it was waited on before the stream ended
    struct OrderedHandle {
        stream_done: Arc<AtomicBool>,
        waited_early: bool,
    }

    #[async_trait]
    impl ProcessHandle for OrderedHandle {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        async fn wait(&mut self) -> Result<ExitStatus> {
            if !self.stream_done.load(Ordering::SeqCst) {
                self.waited_early = true;
            }
            Ok(ExitStatus::exited(7))
        }
    }

    #[test]
    fn test_waits_only_after_stream_closure() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let events = stream::iter(vec![
            ProcessEvent::Started { pid: 42 },
            ProcessEvent::output(LogSource::Stdout, "out\n"),
            ProcessEvent::output(LogSource::Stderr, "err\n"),
        ])
        .chain(stream::once(async move {
            flag.store(true, Ordering::SeqCst);
            ProcessEvent::output(LogSource::Stdout, "last")
        }));

        let mut handle = OrderedHandle {
            stream_done: done,
            waited_early: false,
        };
        let mut transcript = Transcript::default();
        let status = futures::executor::block_on(reconcile(
            Box::pin(events),
            &mut handle,
            &mut transcript,
        ))
        .unwrap();

        assert_eq!(status.exit_code(), 7);
        assert!(!handle.waited_early);
        assert_eq!(transcript.as_str(), "out\nerr\nlast");
    }

    #[test]
    fn test_replay_and_tee() {
        let mut first = Transcript::default();
        let mut second = Transcript::default();
        {
            let mut tee = Tee(&mut first, &mut second);
            replay("a\nb \"quoted\" | piped\nno newline", &mut tee);
        }
        assert_eq!(first.as_str(), "a\nb \"quoted\" | piped\nno newline");
        assert_eq!(first.as_str(), second.as_str());
    }
}
