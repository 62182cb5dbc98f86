use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// JSON-RPC codec for the plugin protocol. One message per line; blank lines
/// are skipped.
pub(crate) struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonRpcCodec {
    type Error = Error;
    type Item = JSONRPCMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(n) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };

            let line = src.split_to(n + 1);
            let mut json_bytes = &line[..line.len() - 1];
            if json_bytes.last() == Some(&b'\r') {
                json_bytes = &json_bytes[..json_bytes.len() - 1];
            }
            if json_bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            debug!(
                "Decoding JSON-RPC message: {:?}",
                std::str::from_utf8(json_bytes)
            );

            let message: JSONRPCMessage = serde_json::from_slice(json_bytes).map_err(|e| {
                error!("Failed to parse JSON-RPC message: {}", e);
                match std::str::from_utf8(json_bytes) {
                    Ok(text) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (content: {text})"),
                    },
                    Err(_) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (non-UTF8 content)"),
                    },
                }
            })?;
            return Ok(Some(message));
        }
    }
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, item: JSONRPCMessage, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        debug!("Encoded JSON-RPC message: {:?}", std::str::from_utf8(&json));
        Ok(())
    }
}
