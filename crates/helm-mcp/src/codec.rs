//! Framing: newline-delimited JSON (default) or LSP-style Content-Length
//! prefixed frames (spec.md §4.A).

use helm_errors::HelmError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::message::McpMessage;

/// Which wire framing a codec uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON value per line, UTF-8.
    #[default]
    NewlineDelimited,
    /// `Content-Length: N\r\n\r\n<N bytes of UTF-8 JSON>`.
    ContentLength,
}

/// Encode a message as the bytes to write to the wire, including framing.
pub fn encode(msg: &McpMessage, framing: Framing) -> Result<Vec<u8>, HelmError> {
    let value = msg.to_value();
    let body = serde_json::to_vec(&value)
        .map_err(|e| HelmError::SchemaError(format!("failed to encode message: {e}")))?;

    Ok(match framing {
        Framing::NewlineDelimited => {
            let mut bytes = body;
            bytes.push(b'\n');
            bytes
        }
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let mut bytes = header.into_bytes();
            bytes.extend_from_slice(&body);
            bytes
        }
    })
}

/// What happened when decoding the next frame from a stream.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A full, well-formed message.
    Message(McpMessage),
    /// A frame boundary was found but the payload didn't parse; the codec
    /// has already resynchronized to the next frame boundary, so decoding
    /// can continue.
    ParseError(String),
    /// The underlying stream closed with no more data.
    Eof,
}

/// Reads one frame at a time from an async buffered reader according to the
/// configured framing. Stateless across calls beyond what's implied by the
/// reader's own position, so it's safe to call repeatedly in a loop.
pub async fn decode_next<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    framing: Framing,
) -> DecodeOutcome {
    match framing {
        Framing::NewlineDelimited => decode_next_newline(reader).await,
        Framing::ContentLength => decode_next_content_length(reader).await,
    }
}

async fn decode_next_newline<R: AsyncBufRead + Unpin>(reader: &mut R) -> DecodeOutcome {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => DecodeOutcome::Eof,
        Ok(_) => {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return DecodeOutcome::ParseError("empty line".to_string());
            }
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(value) => match McpMessage::from_value(value) {
                    Ok(msg) => DecodeOutcome::Message(msg),
                    Err(e) => DecodeOutcome::ParseError(e),
                },
                Err(e) => DecodeOutcome::ParseError(format!("invalid json: {e}")),
            }
        }
        Err(e) => DecodeOutcome::ParseError(format!("read error: {e}")),
    }
}

async fn decode_next_content_length<R: AsyncBufRead + Unpin>(reader: &mut R) -> DecodeOutcome {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => return DecodeOutcome::Eof,
            Ok(_) => {}
            Err(e) => return DecodeOutcome::ParseError(format!("read error: {e}")),
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            match value.trim().parse::<usize>() {
                Ok(n) => content_length = Some(n),
                Err(_) => return DecodeOutcome::ParseError(format!("malformed Content-Length header: {trimmed}")),
            }
        }
        // Other headers are accepted (per the LSP base protocol) and ignored.
    }

    let Some(len) = content_length else {
        return DecodeOutcome::ParseError("missing Content-Length header".to_string());
    };

    let mut body = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut body).await {
        return DecodeOutcome::ParseError(format!("truncated body: {e}"));
    }

    match std::str::from_utf8(&body) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => match McpMessage::from_value(value) {
                Ok(msg) => DecodeOutcome::Message(msg),
                Err(e) => DecodeOutcome::ParseError(e),
            },
            Err(e) => DecodeOutcome::ParseError(format!("invalid json: {e}")),
        },
        Err(e) => DecodeOutcome::ParseError(format!("invalid utf-8: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JsonRpcNotification, McpMessage};
    use std::io::Cursor;

    #[tokio::test]
    async fn newline_round_trip() {
        let msg = McpMessage::Notification(JsonRpcNotification::new("ping", None));
        let bytes = encode(&msg, Framing::NewlineDelimited).unwrap();
        let mut reader = Cursor::new(bytes);
        match decode_next(&mut reader, Framing::NewlineDelimited).await {
            DecodeOutcome::Message(McpMessage::Notification(n)) => assert_eq!(n.method, "ping"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_length_round_trip() {
        let msg = McpMessage::Notification(JsonRpcNotification::new("ping", None));
        let bytes = encode(&msg, Framing::ContentLength).unwrap();
        let mut reader = Cursor::new(bytes);
        match decode_next(&mut reader, Framing::ContentLength).await {
            DecodeOutcome::Message(McpMessage::Notification(n)) => assert_eq!(n.method, "ping"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn newline_malformed_frame_resyncs() {
        let mut data = b"not json\n".to_vec();
        let good = encode(
            &McpMessage::Notification(JsonRpcNotification::new("ping", None)),
            Framing::NewlineDelimited,
        )
        .unwrap();
        data.extend_from_slice(&good);
        let mut reader = Cursor::new(data);

        assert!(matches!(
            decode_next(&mut reader, Framing::NewlineDelimited).await,
            DecodeOutcome::ParseError(_)
        ));
        assert!(matches!(
            decode_next(&mut reader, Framing::NewlineDelimited).await,
            DecodeOutcome::Message(McpMessage::Notification(_))
        ));
    }

    #[tokio::test]
    async fn eof_on_empty_stream() {
        let mut reader = Cursor::new(Vec::new());
        assert!(matches!(
            decode_next(&mut reader, Framing::NewlineDelimited).await,
            DecodeOutcome::Eof
        ));
    }
}

impl std::fmt::Display for DecodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(_) => write!(f, "message"),
            Self::ParseError(e) => write!(f, "parse error: {e}"),
            Self::Eof => write!(f, "eof"),
        }
    }
}
