//! Framing used by [`TcpChannel`](crate::channel::TcpChannel).
//!
//! The real wire protocol is a collaborator of this crate; [`JsonLinesCodec`]
//! is a newline delimited JSON stand-in that keeps the channel usable against
//! simple test servers.
use std::fmt::Debug;

use crate::protocol::{Reply, Request};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error while framing. Caused by: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed frame. Caused by: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait WireCodec: Debug + Send + Sync {
    /// Appends the encoded form of `request` to `dst`.
    fn encode(&self, request: &Request, dst: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Removes one complete frame from the front of `src` and decodes it.
    /// Returns `Ok(None)` when `src` does not hold a full frame yet. On error
    /// the offending frame must already be consumed.
    fn decode(&self, src: &mut Vec<u8>) -> Result<Option<Reply>, CodecError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLinesCodec;

impl WireCodec for JsonLinesCodec {
    fn encode(&self, request: &Request, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        serde_json::to_writer(&mut *dst, request)?;
        dst.push(b'\n');
        Ok(())
    }

    fn decode(&self, src: &mut Vec<u8>) -> Result<Option<Reply>, CodecError> {
        loop {
            let end = match src.iter().position(|b| *b == b'\n') {
                Some(end) => end,
                None => return Ok(None),
            };
            let line = src.drain(..=end).collect::<Vec<_>>();
            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}
