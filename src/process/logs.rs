use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// One line of worker output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub role: String,
    pub stream: OutputStream,
    pub line: String,
}

/// Where worker output goes
#[derive(Debug, Clone)]
pub enum LogSink {
    /// Emitted through tracing, prefixed with the role label
    Tracing,
    Channel(mpsc::UnboundedSender<LogLine>),
}

/// Drain one output pipe line by line until EOF.
///
/// Lines are split on raw `\n` bytes and decoded lossily, so output that is
/// not valid UTF-8 never stops the reader. Lines keep being read after the
/// receiver is gone so the worker never blocks on a full pipe.
pub(super) async fn read_lines<R>(
    reader: R,
    role: String,
    stream: OutputStream,
    lines: mpsc::UnboundedSender<LogLine>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = LogLine {
                    role: role.clone(),
                    stream,
                    line: decode_line(&buf),
                };
                let _ = lines.send(line);
            }
            Err(e) => {
                warn!("Failed to read {} of {} worker: {}", stream.as_str(), role, e);
                break;
            }
        }
    }
}

/// Copy buffered and future lines to `sink`
pub(super) async fn forward_lines(mut lines: mpsc::UnboundedReceiver<LogLine>, sink: LogSink) {
    while let Some(line) = lines.recv().await {
        match &sink {
            LogSink::Tracing => {
                info!(target: "devstack::worker", role = %line.role, stream = line.stream.as_str(), "[{}] {}", line.role, line.line)
            }
            LogSink::Channel(tx) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::decode_line;

    #[test]
    fn test_decode_line_strips_terminators_and_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"ready\r\n"), "ready");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }
}
