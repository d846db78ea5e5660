//! Store wire protocol: newline-delimited JSON commands and replies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::db::types::{DatabaseError, DatabaseResult};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// A command sent to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Insert { collection: String, document: Value },
    Find { collection: String },
}

/// A store's reply to one command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn documents(documents: Vec<Value>) -> Self {
        Self {
            ok: true,
            documents: Some(documents),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            documents: None,
            error: Some(message.into()),
        }
    }
}

/// Write one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> DatabaseResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(|e| DatabaseError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` when the peer closed the stream.
///
/// After [`DatabaseError::FrameTooLarge`] the rest of the oversized line is
/// still buffered, so the stream is out of sync and must be dropped.
pub async fn read_frame<R, T>(reader: &mut R) -> DatabaseResult<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_frame_within(reader, MAX_FRAME_BYTES).await
}

pub(crate) async fn read_frame_within<R, T>(reader: &mut R, limit: u64) -> DatabaseResult<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let read = reader.take(limit).read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if read as u64 >= limit {
            return Err(DatabaseError::FrameTooLarge { limit: limit as usize });
        }
        return Err(DatabaseError::Protocol("truncated frame".to_string()));
    }

    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| DatabaseError::Protocol(e.to_string()))
}
