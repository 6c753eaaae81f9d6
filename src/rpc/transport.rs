//! Message transport abstraction over a duplex byte channel.
use crate::rpc::error::FramingError;
use crate::rpc::framing::{read_message_from, write_message_to};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Read side of a transport. Returns one payload per call, header stripped.
/// Only the connection's read task ever calls this.
#[async_trait]
pub trait MessageReader: Send {
    async fn read(&mut self) -> Result<Vec<u8>, FramingError>;
}

/// Write side of a transport. Takes a JSON payload (no headers) and frames it.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write(&mut self, body: &[u8]) -> Result<(), FramingError>;
}

pub struct HeaderReader<R> {
    reader: BufReader<R>,
}

pub struct HeaderWriter<W> {
    writer: W,
}

/// Wrap the two halves of a byte channel (e.g. a child's stdout and stdin)
/// in `Content-Length` framing.
pub fn header_stream<R, W>(reader: R, writer: W) -> (HeaderReader<R>, HeaderWriter<W>)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    (
        HeaderReader {
            reader: BufReader::new(reader),
        },
        HeaderWriter { writer },
    )
}

#[async_trait]
impl<R> MessageReader for HeaderReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self) -> Result<Vec<u8>, FramingError> {
        read_message_from(&mut self.reader).await
    }
}

#[async_trait]
impl<W> MessageWriter for HeaderWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, body: &[u8]) -> Result<(), FramingError> {
        write_message_to(&mut self.writer, body).await
    }
}
