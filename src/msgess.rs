//! MsgESS (Message Exchange over Stream Sockets), the framing the Spideriment search server speaks on its Unix
//! socket.
//!
//! Every message is laid out as
//!
//! ```text
//! "MsgESSbegin" | version: i32 BE | body length: i32 BE | class: i32 BE | compressed: u8 | data type: u8
//! body
//! "MsgESSend"
//! ```
//!
//! The class is chosen by the application and lets both sides tell queries from replies. A compressed body is
//! gzip data; the length in the header counts the compressed bytes.

use std::io::{self, Read};
#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const PROTOCOL_VERSION: i32 = 3;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 25_000_000;

const MAGIC_BEGIN: &[u8; 11] = b"MsgESSbegin";
const MAGIC_END: &[u8; 9] = b"MsgESSend";
const HEADER_LEN: usize = 25;
const FOOTER_LEN: usize = 9;

/// Message class of a query sent to the search server.
pub const QUERY_MESSAGE_CLASS: i32 = 1;
/// Message class of the search server's reply.
pub const RESPONSE_MESSAGE_CLASS: i32 = 2;

#[derive(Debug, Error)]
pub enum MsgessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid magic header string")]
    InvalidHeader,

    #[error("invalid magic footer string")]
    InvalidFooter,

    #[error("incompatible protocol version {0}")]
    UnsupportedVersion(i32),

    #[error("invalid message length {0}")]
    InvalidLength(i64),

    #[error("message of {size} bytes exceeds the limit of {max} bytes")]
    TooBig { size: usize, max: usize },

    #[error("invalid message class {0}")]
    InvalidClass(i32),

    #[error("unknown data type {0}")]
    UnknownDataType(u8),

    #[error("failed to decompress message body: {0}")]
    Decompress(#[source] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a {expected:?} message, got {got:?}")]
    UnexpectedDataType { expected: DataType, got: DataType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Binary = 1,
    String = 2,
    JsonArray = 3,
    JsonObject = 4,
}

impl TryFrom<u8> for DataType {
    type Error = MsgessError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DataType::Binary),
            2 => Ok(DataType::String),
            3 => Ok(DataType::JsonArray),
            4 => Ok(DataType::JsonObject),
            other => Err(MsgessError::UnknownDataType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub class: i32,
    pub data_type: DataType,
    pub body: Bytes,
}

impl Message {
    pub fn json_object<T: Serialize>(class: i32, value: &T) -> Result<Self, MsgessError> {
        let body = serde_json::to_vec(value)?;
        Ok(Message {
            class,
            data_type: DataType::JsonObject,
            body: Bytes::from(body),
        })
    }

    /// Deserialize the body of a JSON object message.
    pub fn parse_json_object<T: serde::de::DeserializeOwned>(&self) -> Result<T, MsgessError> {
        if self.data_type != DataType::JsonObject {
            return Err(MsgessError::UnexpectedDataType {
                expected: DataType::JsonObject,
                got: self.data_type,
            });
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Frames [`Message`]s on a byte stream. Compressed incoming bodies are inflated, and the size limit applies to
/// both the wire body and its inflated form. Outgoing messages are never compressed.
#[derive(Debug, Clone)]
pub struct MsgessCodec {
    max_message_size: usize,
}

impl MsgessCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for MsgessCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn read_i32(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn gunzip(body: &[u8], max_message_size: usize) -> Result<Bytes, MsgessError> {
    let mut inflated = Vec::new();
    GzDecoder::new(body)
        .take(max_message_size as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(MsgessError::Decompress)?;
    if inflated.len() > max_message_size {
        return Err(MsgessError::TooBig {
            size: inflated.len(),
            max: max_message_size,
        });
    }
    Ok(Bytes::from(inflated))
}

impl Decoder for MsgessCodec {
    type Item = Message;
    type Error = MsgessError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, MsgessError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let header = &src[..HEADER_LEN];
        if &header[0..11] != MAGIC_BEGIN {
            return Err(MsgessError::InvalidHeader);
        }

        let version = read_i32(&header[11..15]);
        if version != PROTOCOL_VERSION {
            return Err(MsgessError::UnsupportedVersion(version));
        }

        let length = read_i32(&header[15..19]);
        if length < 0 {
            return Err(MsgessError::InvalidLength(length as i64));
        }
        let length = length as usize;
        if length > self.max_message_size {
            return Err(MsgessError::TooBig {
                size: length,
                max: self.max_message_size,
            });
        }

        let class = read_i32(&header[19..23]);
        if class < 0 {
            return Err(MsgessError::InvalidClass(class));
        }

        let compressed = header[23] != 0;
        let data_type = DataType::try_from(header[24])?;

        let frame_len = HEADER_LEN + length + FOOTER_LEN;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(length).freeze();
        let footer = src.split_to(FOOTER_LEN);
        if &footer[..] != MAGIC_END {
            return Err(MsgessError::InvalidFooter);
        }

        let body = if compressed {
            gunzip(&body, self.max_message_size)?
        } else {
            body
        };

        log::trace!(
            "decoded msgess message: class {class}, {length} bytes on the wire, {} bytes of body",
            body.len()
        );

        Ok(Some(Message {
            class,
            data_type,
            body,
        }))
    }
}

impl Encoder<Message> for MsgessCodec {
    type Error = MsgessError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), MsgessError> {
        let length = i32::try_from(message.body.len())
            .map_err(|_| MsgessError::InvalidLength(message.body.len() as i64))?;
        if message.class < 0 {
            return Err(MsgessError::InvalidClass(message.class));
        }

        dst.reserve(HEADER_LEN + message.body.len() + FOOTER_LEN);
        dst.put_slice(MAGIC_BEGIN);
        dst.put_i32(PROTOCOL_VERSION);
        dst.put_i32(length);
        dst.put_i32(message.class);
        dst.put_u8(0);
        dst.put_u8(message.data_type as u8);
        dst.put_slice(&message.body);
        dst.put_slice(MAGIC_END);

        log::trace!("encoded msgess message: class {}, {length} bytes", message.class);
        Ok(())
    }
}

#[cfg(unix)]
pub use backend::MsgessSearchBackend;

#[cfg(unix)]
mod backend {
    use super::*;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use tokio::net::UnixStream;
    use tokio_util::codec::Framed;

    use crate::data_models::{SearchQuery, SearchResultItem};
    use crate::error::FrontendError;
    use crate::search_client::{BackendResults, SearchBackend, WireResponse};

    #[derive(Debug, Serialize)]
    struct QueryMessage<'a> {
        search_query: &'a str,
        max_results: usize,
        use_quotient_based_scoring: bool,
    }

    impl From<MsgessError> for FrontendError {
        fn from(e: MsgessError) -> Self {
            match e {
                MsgessError::Io(e) => FrontendError::SearchUnavailable(e.to_string()),
                other => FrontendError::SearchProtocol(other.to_string()),
            }
        }
    }

    /// Talks to the search server over its Unix socket, one connection per query.
    ///
    /// The protocol has no notion of an offset, so the backend asks for everything up to the end of the requested
    /// page plus one extra result, skips the earlier pages locally and uses the extra result only to learn that a
    /// next page exists.
    #[derive(Debug, Clone)]
    pub struct MsgessSearchBackend {
        socket_path: PathBuf,
        connect_timeout: Duration,
        max_message_size: usize,
    }

    impl MsgessSearchBackend {
        pub fn new(socket_path: PathBuf, connect_timeout: Duration) -> Self {
            Self {
                socket_path,
                connect_timeout,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            }
        }

        pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
            self.max_message_size = max_message_size;
            self
        }

        async fn connect(&self) -> Result<UnixStream, FrontendError> {
            match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path)).await
            {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => {
                    log::error!("failed to connect to search server socket: {e}");
                    Err(FrontendError::SearchUnavailable(format!(
                        "failed to connect to search server: {e}"
                    )))
                }
                Err(_) => Err(FrontendError::SearchTimeout(self.connect_timeout)),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for MsgessSearchBackend {
        async fn search(&self, query: &SearchQuery) -> Result<BackendResults, FrontendError> {
            let offset = query.offset();
            let page_end = offset.saturating_add(query.page_size());
            let requested = page_end.saturating_add(1);

            let stream = self.connect().await?;
            let mut framed = Framed::new(stream, MsgessCodec::new(self.max_message_size));

            let request = Message::json_object(
                QUERY_MESSAGE_CLASS,
                &QueryMessage {
                    search_query: query.text(),
                    max_results: requested,
                    use_quotient_based_scoring: query.use_quotient_based_scoring(),
                },
            )?;
            framed.send(request).await?;

            let reply = framed.next().await.ok_or_else(|| {
                FrontendError::SearchUnavailable(
                    "search server closed the connection without replying".to_string(),
                )
            })??;

            if reply.class != RESPONSE_MESSAGE_CLASS {
                return Err(FrontendError::SearchProtocol(format!(
                    "unexpected message class {}",
                    reply.class
                )));
            }

            let wire: WireResponse = reply.parse_json_object()?;
            let available = wire.search_results.len();
            let has_more = available > page_end;

            let items: Vec<SearchResultItem> = wire
                .search_results
                .into_iter()
                .skip(offset)
                .take(query.page_size())
                .map(Into::into)
                .collect();

            let total = if has_more {
                available as u64
            } else {
                offset.saturating_add(items.len()) as u64
            };

            log::debug!("search server returned {available} results over msgess");

            Ok(BackendResults {
                items,
                total_estimate: Some(total),
                elapsed: None,
            })
        }

        fn name(&self) -> &'static str {
            "msgess"
        }
    }
}
