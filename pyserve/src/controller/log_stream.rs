//! Forwards worker stdout/stderr into the host's `tracing` output.

use std::{
    io::{BufRead, BufReader, ErrorKind, Read},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use pyserve_shared::errors::{ServiceError, ServiceResult};

const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }

    /// Stdout at DEBUG, stderr at WARN so interpreter tracebacks show up
    /// under the default filter.
    fn emit(self, pid: u32, line: &str) {
        match self {
            Stream::Stdout => tracing::debug!(target: "worker:stdout", pid, "{}", line),
            Stream::Stderr => tracing::warn!(target: "worker:stderr", pid, "{}", line),
        }
    }
}

/// One reader thread per worker pipe, each running until EOF.
pub(super) struct OutputForwarder {
    pid: u32,
    readers: Vec<(Stream, JoinHandle<()>)>,
}

impl OutputForwarder {
    pub(super) fn start<O, E>(pid: u32, stdout: O, stderr: E) -> ServiceResult<Self>
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let readers = vec![
            (Stream::Stdout, spawn_reader(pid, Stream::Stdout, stdout)?),
            (Stream::Stderr, spawn_reader(pid, Stream::Stderr, stderr)?),
        ];
        Ok(Self { pid, readers })
    }

    /// Wait up to `timeout` for both pipes to close.
    ///
    /// A process that left the worker's group can keep a pipe open
    /// indefinitely. Its reader is detached and exits by itself at EOF.
    /// Returns `true` when both readers finished in time.
    pub(super) fn finish(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.readers.iter().any(|(_, h)| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }

        let mut drained = true;
        for (stream, handle) in self.readers {
            if !handle.is_finished() {
                tracing::debug!(
                    pid = self.pid,
                    stream = stream.name(),
                    "Worker output still open, detaching reader"
                );
                drained = false;
                continue;
            }
            if let Err(e) = handle.join() {
                tracing::warn!(pid = self.pid, stream = stream.name(), "Output reader panicked: {:?}", e);
            }
        }
        drained
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pid: u32,
    stream: Stream,
    pipe: R,
) -> ServiceResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pyserve-worker-{}", stream.name()))
        .spawn(move || forward_lines(pid, stream, BufReader::new(pipe)))
        .map_err(|e| {
            ServiceError::Internal(format!("Failed to spawn {} reader thread: {}", stream.name(), e))
        })
}

/// Read until EOF. Lines that are not valid UTF-8 are logged lossily rather
/// than ending the loop, so the worker never blocks on a full pipe.
fn forward_lines(pid: u32, stream: Stream, mut reader: impl BufRead) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                stream.emit(pid, &strip_ansi(line.trim_end_matches(['\n', '\r'])));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(pid, stream = stream.name(), "Failed to read worker output: {}", e);
                break;
            }
        }
    }
    tracing::trace!(pid, stream = stream.name(), "Worker output closed");
}

/// Drop terminal escape sequences. CSI sequences (`ESC [ ... final`) are
/// removed whole; any other escape takes one following character with it.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
    }

    out
}
