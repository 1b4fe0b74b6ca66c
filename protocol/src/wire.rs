//! Postcard + COBS codec over byte streams.
//!
//! Every message is COBS encoded and terminated with a single zero byte, so a
//! receiver resynchronises on the next zero after any corruption.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single encoded message, including the delimiter.
pub const MAX_MESSAGE_LEN: usize = 8192;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("message exceeds {MAX_MESSAGE_LEN} bytes")]
    Oversized,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_stdvec_cobs(message)?)
}

pub fn decode<T: DeserializeOwned>(buffer: &mut [u8]) -> Result<T, WireError> {
    Ok(postcard::from_bytes_cobs(buffer)?)
}

/// Writes one delimited message to `writer`.
pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let encoded = encode(message)?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Reads one delimited message from `reader`.
///
/// `buffer` accumulates partial messages between calls, which makes this
/// cancellation safe: a read cancelled mid-message loses no bytes and the
/// next call resumes where it left off. The buffer is cleared once a full
/// message has been consumed.
pub async fn read_message<T, R>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(WireError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        };

        buffer.push(byte);

        if byte == 0 {
            let result = decode(buffer);
            buffer.clear();
            return result;
        }

        if buffer.len() >= MAX_MESSAGE_LEN {
            buffer.clear();
            return Err(WireError::Oversized);
        }
    }
}
