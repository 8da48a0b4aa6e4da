//! Line-delimited transport for the MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! The reading and writing halves are separate types so the server can read
//! the next message while responses for earlier calls are still being
//! produced. Both halves are generic over Tokio I/O traits; [`stdio`] builds
//! the pair used in production, tests use in-memory pipes.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp::protocol::JsonRpcResponse;

/// Reading half: yields one message line at a time.
///
/// Bytes of a partly received line stay in `pending` between calls, so
/// [`LineReader::read_line`] can be dropped mid-line (as a `select!` branch
/// that lost) and resumed without losing input.
pub struct LineReader<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Wraps a buffered reader.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if the stream is closed (EOF). Invalid UTF-8 is
    /// replaced rather than failing the stream; such a line then fails to
    /// parse as JSON like any other garbage.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.reader.read_until(b'\n', &mut self.pending).await?;

        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut raw = std::mem::take(&mut self.pending);
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// Writing half: frames each message as one newline-terminated line.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a JSON-RPC response.
    ///
    /// The response is serialised to JSON and terminated with a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_raw(&json).await
    }

    /// Writes a raw JSON string with newline termination.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        // MCP spec: messages must not contain embedded newlines
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Reader half bound to the process's stdin.
pub type StdinReader = LineReader<BufReader<tokio::io::Stdin>>;

/// Writer half bound to the process's stdout.
pub type StdoutWriter = LineWriter<tokio::io::Stdout>;

/// Creates the stdio transport pair.
#[must_use]
pub fn stdio() -> (StdinReader, StdoutWriter) {
    (
        LineReader::new(BufReader::new(tokio::io::stdin())),
        LineWriter::new(tokio::io::stdout()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::RequestId;

    #[tokio::test]
    async fn read_lines_strip_terminators() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"a\":1}\r\n{\"b\":2}\n")
            .build();
        let mut reader = LineReader::new(BufReader::new(mock));

        assert_eq!(reader.read_line().await.unwrap().unwrap(), r#"{"a":1}"#);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), r#"{"b":2}"#);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unterminated_last_line_is_returned() {
        let mock = tokio_test::io::Builder::new().read(b"{\"a\":1}").build();
        let mut reader = LineReader::new(BufReader::new(mock));

        assert_eq!(reader.read_line().await.unwrap().unwrap(), r#"{"a":1}"#);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_read_keeps_partial_line() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(BufReader::new(server));

        client.write_all(b"{\"id\":2,").await.unwrap();
        let interrupted = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reader.read_line(),
        )
        .await;
        assert!(interrupted.is_err());

        client.write_all(b"\"method\":\"ping\"}\n").await.unwrap();
        assert_eq!(
            reader.read_line().await.unwrap().unwrap(),
            r#"{"id":2,"method":"ping"}"#
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_end_the_stream() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\xff\xfe\n{}\n")
            .build();
        let mut reader = LineReader::new(BufReader::new(mock));

        assert!(reader.read_line().await.unwrap().is_some());
        assert_eq!(reader.read_line().await.unwrap().unwrap(), "{}");
    }

    #[tokio::test]
    async fn write_response_is_one_line() {
        let response = JsonRpcResponse::success(RequestId::Number(1), serde_json::json!({}));
        let expected = format!("{}\n", serde_json::to_string(&response).unwrap());

        let mock = tokio_test::io::Builder::new()
            .write(expected.as_bytes())
            .build();
        let mut writer = LineWriter::new(mock);
        writer.write_response(&response).await.unwrap();
    }

    #[tokio::test]
    async fn serialise_response_no_newlines() {
        let response = JsonRpcResponse::success(
            RequestId::Number(1),
            serde_json::json!({
                "message": "hello\nworld",
                "nested": {"key": "value"}
            }),
        );

        let json = serde_json::to_string(&response).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }

    #[tokio::test]
    async fn serialise_error_no_newlines() {
        let error = JsonRpcResponse::method_not_found(RequestId::Number(1), "test/method");

        let json = serde_json::to_string(&error).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }
}
