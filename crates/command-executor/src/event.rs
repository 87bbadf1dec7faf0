//! What a launcher reports about a running child

/// Output channel of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl LogSource {
    /// Lowercase channel name
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
        }
    }
}

/// One observation, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The child is running
    Started {
        /// OS process id
        pid: u32,
    },
    /// A chunk of output: one line, with its newline when the child wrote one
    Output {
        /// Channel it arrived on
        source: LogSource,
        /// The text, lossily decoded
        text: String,
    },
}

impl ProcessEvent {
    /// Output on `source`
    pub fn output(source: LogSource, text: impl Into<String>) -> Self {
        ProcessEvent::Output {
            source,
            text: text.into(),
        }
    }
}
