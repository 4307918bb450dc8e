//! IPC transport implementations
//!
//! Frames are newline-delimited JSON envelopes. Reads accumulate into a
//! buffer owned by the reader, so a `receive` that is dropped by a timeout
//! or `select!` loses nothing: the next call continues the same line.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Reading half: decodes one envelope per line
pub struct LineReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buffer: Vec::new(),
        }
    }

    /// Read the next non-empty frame
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buffer).await?;
            if read == 0 && self.buffer.is_empty() {
                return Err(IpcError::ConnectionClosed);
            }

            let line = std::mem::take(&mut self.buffer);
            let text = String::from_utf8_lossy(&line);
            let frame = text.trim();
            if frame.is_empty() {
                continue;
            }

            return decode_frame(frame);
        }
    }
}

fn decode_frame<T: DeserializeOwned>(frame: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let raw: MessageEnvelope<JsonValue> = serde_json::from_str(frame)
        .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

    if !raw.is_compatible() {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: raw.protocol_version,
        });
    }

    let message: T = serde_json::from_value(raw.message)
        .map_err(|e| IpcError::InvalidMessage(e.to_string()))?;

    Ok(MessageEnvelope {
        protocol_version: raw.protocol_version,
        timestamp: raw.timestamp,
        message,
    })
}

/// Writing half: encodes one envelope per line and flushes
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let mut frame = serde_json::to_vec(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        frame.push(b'\n');

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Bidirectional newline-delimited JSON transport
pub struct LineTransport<R, W> {
    reader: LineReader<R>,
    writer: LineWriter<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer: LineWriter::new(writer),
        }
    }
}

/// Stdin/Stdout transport used inside the sidecar process
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> IpcTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        self.writer.send(message).await
    }

    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.reader.receive().await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.close().await
    }
}
