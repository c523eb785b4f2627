//! Accepted connection streams and bounded request framing.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;

use super::tls::TlsStream;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Stream types accepted by the API listener.
pub enum ConnectionStream {
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    Unix(UnixStream),
    /// TCP connection after TLS termination.
    Tls(Box<dyn TlsStream>),
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

/// Reads one newline-terminated request, at most 64 KiB long.
///
/// Returns `Ok(None)` when the peer closed the connection without sending
/// anything.
pub(crate) fn read_request_line<R: Read>(stream: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let bytes_read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        if bytes_read == 0 {
            return Ok((!buffer.is_empty()).then_some(buffer));
        }

        let received = chunk.get(..bytes_read).unwrap_or_default();
        if let Some(pos) = received.iter().position(|byte| *byte == b'\n') {
            buffer.extend_from_slice(received.get(..=pos).unwrap_or_default());
            enforce_request_limit(buffer.len())?;
            return Ok(Some(buffer));
        }
        buffer.extend_from_slice(received);
        enforce_request_limit(buffer.len())?;
    }
}

fn enforce_request_limit(size: usize) -> io::Result<()> {
    if size > MAX_REQUEST_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request exceeds maximum size",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"{\"command\":\"version\"}\nextra".as_slice(), Some(b"{\"command\":\"version\"}\n".to_vec()))]
    #[case(b"{\"command\":\"info\"}".as_slice(), Some(b"{\"command\":\"info\"}".to_vec()))]
    #[case(b"".as_slice(), None)]
    fn frames_single_line(#[case] input: &[u8], #[case] expected: Option<Vec<u8>>) {
        let mut cursor = Cursor::new(input.to_vec());
        assert_eq!(read_request_line(&mut cursor).expect("read line"), expected);
    }

    #[test]
    fn rejects_oversized_requests() {
        let mut cursor = Cursor::new(vec![b'x'; MAX_REQUEST_BYTES + 1]);
        let error = read_request_line(&mut cursor).expect_err("request too large");
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
