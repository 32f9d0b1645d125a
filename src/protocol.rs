//! Line-oriented framing between driver and worker
//!
//! Driver → worker: source lines terminated by `::end::`, or `::exit::` to stop.
//! Worker → driver: result lines terminated by `::fin::`. A frame whose only
//! line is `::pass::` reports an error-free run; anything else is the text of
//! the error the interpreter raised.
//!
//! There are no length prefixes. A payload must not contain a line equal to a
//! request sentinel, and the worker escapes response sentinels it did not mean
//! to send.

use std::io::{self, BufRead, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

pub const END: &str = "::end::";
pub const EXIT: &str = "::exit::";
pub const PASS: &str = "::pass::";
pub const FIN: &str = "::fin::";

/// Retained response text; lines past this are read and dropped
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Retained bytes of a single response line; the rest of the line is dropped
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const SENTINELS: [&str; 4] = [END, EXIT, PASS, FIN];

/// One request as seen by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Source text to execute
    Payload(String),
    /// Driver asked the worker to exit (or closed the stream)
    Exit,
}

/// One response as produced by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pass,
    Error(String),
}

/// Response frame as read by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFrame {
    /// Body text up to (not including) `::fin::`
    Complete(String),
    /// Stream ended before `::fin::`; holds whatever arrived
    Truncated(String),
}

/// Build the driver → worker frame for `includes` followed by `body`.
pub fn encode_request(includes: &str, body: &str) -> Result<String, ProtocolError> {
    let mut frame = String::with_capacity(includes.len() + body.len() + END.len() + 2);
    for part in [includes, body] {
        if part.is_empty() {
            continue;
        }
        frame.push_str(part);
        if !part.ends_with('\n') {
            frame.push('\n');
        }
    }

    for (idx, line) in frame.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        for sentinel in [END, EXIT] {
            if line == sentinel {
                return Err(ProtocolError::ReservedSentinel {
                    line: idx + 1,
                    sentinel,
                });
            }
        }
    }

    frame.push_str(END);
    frame.push('\n');
    Ok(frame)
}

/// The frame that asks a worker to exit.
pub fn exit_frame() -> String {
    format!("{}\n", EXIT)
}

/// Read one request frame (worker side, blocking).
///
/// End of stream, at a frame boundary or in the middle of one, is treated as
/// an exit request: the driver is gone.
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Request> {
    let mut source = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(Request::Exit);
        }
        let trimmed = trim_newline(&line);
        if trimmed == EXIT {
            return Ok(Request::Exit);
        }
        if trimmed == END {
            return Ok(Request::Payload(source));
        }
        source.push_str(trimmed);
        source.push('\n');
    }
}

/// Write one response frame (worker side) and flush it.
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    match response {
        Response::Pass => writeln!(writer, "{}", PASS)?,
        Response::Error(text) => {
            for line in text.lines() {
                writeln!(writer, "{}", escape_line(line))?;
            }
        }
    }
    writeln!(writer, "{}", FIN)?;
    writer.flush()
}

/// Escape a line that would otherwise read as a sentinel.
pub fn escape_line(line: &str) -> String {
    if SENTINELS.contains(&line.trim_end()) {
        format!(" {}", line)
    } else {
        line.to_string()
    }
}

/// Write a request frame (driver side) and flush it.
pub async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

/// Read one response frame (driver side).
///
/// Lines after `::fin::` are left in the reader. Invalid UTF-8 is replaced
/// rather than treated as a transport failure. Each line keeps at most
/// `MAX_LINE_BYTES` and the frame at most `MAX_FRAME_BYTES`; the rest is read
/// and dropped, so the error header on the first line always survives.
pub async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<ResponseFrame> {
    let mut body = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if read_line_bounded(reader, &mut buf, MAX_LINE_BYTES).await? == 0 {
            return Ok(ResponseFrame::Truncated(body));
        }
        let line = String::from_utf8_lossy(&buf);
        let line = trim_newline(&line);
        if line == FIN {
            return Ok(ResponseFrame::Complete(body));
        }

        let room = MAX_FRAME_BYTES.saturating_sub(body.len() + 1);
        if room == 0 {
            continue;
        }
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(truncate_at_char_boundary(line, room));
    }
}

/// Read up to and including the next `\n`, keeping at most `limit` bytes in
/// `buf`. Returns the number of bytes consumed from the reader.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..=pos], true),
            None => (available, false),
        };
        let keep = chunk.len().min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);

        let used = chunk.len();
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
