//! Response framing for the API wire protocol.
//!
//! Every response is a sequence of JSON lines: zero or more `stream` records
//! carrying job output, then exactly one `exit` record with the job status.

use std::io::{self, Write};

use serde::Serialize;

/// Output stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamTarget {
    /// Job standard output.
    Stdout,
    /// Job standard error.
    Stderr,
}

/// A single response record.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiMessage<'a> {
    /// Job output.
    Stream {
        /// Target stream on the client side.
        stream: StreamTarget,
        /// Text payload.
        data: &'a str,
    },
    /// Terminal record.
    Exit {
        /// Job exit status.
        status: i32,
    },
}

/// Writes response records to a stream.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps an output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one record followed by a newline.
    pub fn write_message(&mut self, message: &ApiMessage<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")
    }

    /// Writes `data` as a stream record; empty data writes nothing.
    pub fn write_stream(&mut self, stream: StreamTarget, data: &str) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.write_message(&ApiMessage::Stream { stream, data })
    }

    /// Writes the exit record and flushes.
    pub fn write_exit(&mut self, status: i32) -> io::Result<()> {
        self.write_message(&ApiMessage::Exit { status })?;
        self.writer.flush()
    }

    /// Reports a failure that happened before any job ran.
    pub fn write_error(&mut self, message: &str, status: i32) -> io::Result<()> {
        self.write_stream(StreamTarget::Stderr, &format!("error: {message}\n"))?;
        self.write_exit(status)
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(buffer: Vec<u8>) -> Vec<String> {
        String::from_utf8(buffer)
            .expect("utf8 output")
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn streams_then_exit() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer
            .write_stream(StreamTarget::Stdout, "web\n")
            .expect("stdout record");
        writer.write_stream(StreamTarget::Stderr, "").expect("skipped");
        writer.write_exit(0).expect("exit record");
        assert_eq!(
            lines(writer.into_inner()),
            vec![
                r#"{"kind":"stream","stream":"stdout","data":"web\n"}"#.to_owned(),
                r#"{"kind":"exit","status":0}"#.to_owned(),
            ]
        );
    }

    #[test]
    fn errors_carry_status() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer.write_error("unknown command 'nope'", 127).expect("error records");
        let output = lines(writer.into_inner());
        assert_eq!(output.len(), 2);
        assert!(output[0].contains("\"stream\":\"stderr\""));
        assert_eq!(output[1], r#"{"kind":"exit","status":127}"#);
    }
}
