/// IRC line codec — frames a byte stream into IRC messages.
///
/// Splits on `\r\n` (per RFC 2812), parses each line into a [`Message`],
/// and serializes outgoing messages with `\r\n` termination.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, ParseError, MAX_MESSAGE_LEN};

/// Codec error: either a protocol parse failure or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_MESSAGE_LEN} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames IRC messages on `\r\n` boundaries.
///
/// Lines are bounded at [`MAX_MESSAGE_LEN`] octets including the
/// terminator; anything longer is rejected rather than truncated.
#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Look for \r\n in the buffer.
        let crlf_pos = src.windows(2).position(|w| w == b"\r\n");

        match crlf_pos {
            Some(pos) => {
                if pos + 2 > MAX_MESSAGE_LEN {
                    return Err(CodecError::LineTooLong);
                }

                // Extract the line (without \r\n), advance the buffer.
                let line_bytes = src.split_to(pos);
                src.advance(2); // skip \r\n

                let line = std::str::from_utf8(&line_bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

                Ok(Some(Message::parse(line)?))
            }
            None => {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_MESSAGE_LEN {
                    return Err(CodecError::LineTooLong);
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
