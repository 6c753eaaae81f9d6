//! `Content-Length` framing, the same header scheme LSP uses:
//!
//! ```text
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of JSON>
//! ```
//!
//! Header names are matched case-insensitively, unknown headers are skipped,
//! and bare `\n` line endings are tolerated on read.

use crate::rpc::error::FramingError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a declared payload, so a corrupt header cannot make us
/// allocate arbitrary amounts of memory.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Upper bound on the whole header block, including a line that never ends.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Read a single framed message and return its payload bytes.
pub async fn read_message_from<R>(reader: &mut R) -> Result<Vec<u8>, FramingError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut content_length: Option<usize> = None;
    let mut in_header = false;
    let mut budget = MAX_HEADER_SIZE;

    loop {
        if budget == 0 {
            return Err(FramingError::HeaderTooLarge {
                max: MAX_HEADER_SIZE,
            });
        }
        let mut line = String::new();
        let mut limited = (&mut *reader).take(budget as u64);
        let bytes_read = limited.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(if in_header {
                FramingError::Truncated
            } else {
                FramingError::Closed
            });
        }
        in_header = true;
        budget -= bytes_read;
        if !line.ends_with('\n') {
            if budget == 0 {
                return Err(FramingError::HeaderTooLarge {
                    max: MAX_HEADER_SIZE,
                });
            }
            // EOF in the middle of a header line.
            return Err(FramingError::Truncated);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(length) = get_content_length_from(trimmed)? {
            content_length = Some(length);
        }
    }

    let size = content_length.ok_or(FramingError::MissingLength)?;
    if size > MAX_MESSAGE_SIZE {
        return Err(FramingError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::Truncated
        } else {
            FramingError::Io(e)
        }
    })?;
    Ok(payload)
}

/// Parse one header line. Returns the length for a `Content-Length` header and
/// `None` for any other well-formed header.
pub(crate) fn get_content_length_from(line: &str) -> Result<Option<usize>, FramingError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| FramingError::InvalidLength(value.to_string()))
}

/// Write a single framed message. Header and payload go out in one buffer.
pub async fn write_message_to<W>(writer: &mut W, body: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, BufReader};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_message_from_duplex() {
        let (mut a, b) = duplex(1024);

        let writer = tokio::spawn(async move {
            let json = br#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
            write_message_to(&mut a, json).await.expect("write failed");
        });

        let mut reader = BufReader::new(b);
        let body = timeout(TEST_TIMEOUT, read_message_from(&mut reader))
            .await
            .expect("test timed out")
            .expect("read failed");
        assert_eq!(body, br#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#.to_vec());

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_consecutive_messages() {
        let (mut a, b) = duplex(1024);
        write_message_to(&mut a, b"first").await.unwrap();
        write_message_to(&mut a, b"").await.unwrap();
        write_message_to(&mut a, b"third").await.unwrap();
        drop(a);

        let mut reader = BufReader::new(b);
        assert_eq!(read_message_from(&mut reader).await.unwrap(), b"first".to_vec());
        assert_eq!(read_message_from(&mut reader).await.unwrap(), Vec::<u8>::new());
        assert_eq!(read_message_from(&mut reader).await.unwrap(), b"third".to_vec());
        assert!(matches!(
            read_message_from(&mut reader).await,
            Err(FramingError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_lowercase_header_lf_endings_and_extra_headers() {
        let (mut a, b) = duplex(1024);
        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-length: {}\nContent-Type: application/vscode-jsonrpc; charset=utf-8\n\n{}",
            body.len(),
            body
        );
        a.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(b);
        let received = read_message_from(&mut reader).await.unwrap();
        assert_eq!(received, body.as_bytes());
    }

    #[tokio::test]
    async fn test_read_message_from_malformed_content_length() {
        let (mut a, b) = duplex(64);
        a.write_all(b"Content-Length: abc\r\n\r\n").await.unwrap();

        let mut reader = BufReader::new(b);
        let res = read_message_from(&mut reader).await;
        assert!(matches!(res, Err(FramingError::InvalidLength(ref v)) if v == "abc"));
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let (mut a, b) = duplex(64);
        a.write_all(b"X-Other: 1\r\n\r\n").await.unwrap();

        let mut reader = BufReader::new(b);
        let res = read_message_from(&mut reader).await;
        assert!(matches!(res, Err(FramingError::MissingLength)));
    }

    #[tokio::test]
    async fn test_header_without_colon() {
        let (mut a, b) = duplex(64);
        a.write_all(b"garbage\r\n\r\n").await.unwrap();

        let mut reader = BufReader::new(b);
        let res = read_message_from(&mut reader).await;
        assert!(matches!(res, Err(FramingError::MalformedHeader(_))));
    }

    #[tokio::test]
    async fn test_rejects_oversized_message() {
        let (mut a, b) = duplex(128);
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        a.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(b);
        let res = read_message_from(&mut reader).await;
        assert!(matches!(res, Err(FramingError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_rejects_endless_header_line() {
        let (mut a, b) = duplex(4 * MAX_HEADER_SIZE);
        a.write_all(&vec![b'a'; MAX_HEADER_SIZE + 16]).await.unwrap();

        let mut reader = BufReader::new(b);
        let res = timeout(TEST_TIMEOUT, read_message_from(&mut reader))
            .await
            .expect("test timed out");
        assert!(matches!(res, Err(FramingError::HeaderTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_rejects_endless_header_block() {
        let (mut a, b) = duplex(4 * MAX_HEADER_SIZE);
        let many = "X-Filler: 1\r\n".repeat(MAX_HEADER_SIZE / 10);
        a.write_all(many.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(b);
        let res = timeout(TEST_TIMEOUT, read_message_from(&mut reader))
            .await
            .expect("test timed out");
        assert!(matches!(res, Err(FramingError::HeaderTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_truncated() {
        let (mut a, b) = duplex(64);
        a.write_all(b"Content-Length: 10\r\n\r\n{\"a\"").await.unwrap();
        drop(a);

        let mut reader = BufReader::new(b);
        let res = timeout(TEST_TIMEOUT, read_message_from(&mut reader))
            .await
            .expect("test timed out");
        assert!(matches!(res, Err(FramingError::Truncated)));
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_truncated() {
        let (mut a, b) = duplex(64);
        a.write_all(b"Content-Len").await.unwrap();
        drop(a);

        let mut reader = BufReader::new(b);
        let res = read_message_from(&mut reader).await;
        assert!(matches!(res, Err(FramingError::Truncated)));
    }

    #[tokio::test]
    async fn test_write_message_to_exact_bytes() {
        let (mut a, mut b) = duplex(128);
        write_message_to(&mut a, b"{}").await.unwrap();
        drop(a);

        let mut raw = Vec::new();
        b.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, b"Content-Length: 2\r\n\r\n{}".to_vec());
    }
}
