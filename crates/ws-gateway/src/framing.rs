//! Reassembly of the client byte stream into handshake and query frames.
//!
//! The client transport delivers bytes in arbitrary chunks: one WebSocket
//! message may carry part of a query, several queries, or the handshake
//! followed by queries. [`Framer`] buffers everything and yields complete
//! frames in arrival order. It performs no I/O.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use reql_term::proto::{PROTOCOL_JSON, VERSION_V0_4};
use thiserror::Error;

/// Size of the client handshake: version, key length and protocol.
pub const HANDSHAKE_LEN: usize = 12;

/// Size of a query header: token (u64) and payload length (u32).
pub const QUERY_HEADER_LEN: usize = 12;

pub const DEFAULT_MAX_QUERY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("unsupported protocol version {0:#010x}")]
    ProtocolVersionMismatch(u32),

    #[error("client auth keys are not supported (key length {0})")]
    UnsupportedAuthKey(u32),

    #[error("unsupported protocol encoding {0:#010x}")]
    UnsupportedEncoding(u32),
}

/// A violation of the client framing. Always fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("declared query length {declared} exceeds the limit of {limit} bytes")]
    QueryTooLarge { declared: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandshake {
    pub version: u32,
    pub protocol: u32,
}

/// One complete query message as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFrame {
    pub token: u64,
    /// The whole message, header included, exactly as received.
    pub raw: Bytes,
}

impl QueryFrame {
    /// The JSON payload following the header.
    pub fn payload(&self) -> &[u8] {
        &self.raw[QUERY_HEADER_LEN..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(ClientHandshake),
    Query(QueryFrame),
}

#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    handshake_done: bool,
    max_query_bytes: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUERY_BYTES)
    }
}

impl Framer {
    pub fn new(max_query_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            handshake_done: false,
            max_query_bytes,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame off the head of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed; buffered bytes are
    /// kept for the next call. The first frame of a stream is always the
    /// handshake.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if !self.handshake_done {
            return self.next_handshake();
        }
        if self.buf.len() < QUERY_HEADER_LEN {
            return Ok(None);
        }
        let header = &self.buf[..QUERY_HEADER_LEN];
        let token_lo = u64::from(read_u32(header, 0));
        let token_hi = u64::from(read_u32(header, 4));
        let token = token_lo + (token_hi << 32);
        let declared = read_u32(header, 8) as usize;

        if declared > self.max_query_bytes {
            return Err(FramingError::QueryTooLarge {
                declared,
                limit: self.max_query_bytes,
            });
        }
        let total = QUERY_HEADER_LEN + declared;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }
        let raw = self.buf.split_to(total).freeze();
        Ok(Some(Frame::Query(QueryFrame { token, raw })))
    }

    fn next_handshake(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        let version = read_u32(&self.buf, 0);
        if version != VERSION_V0_4 {
            return Err(HandshakeError::ProtocolVersionMismatch(version).into());
        }
        let key_len = read_u32(&self.buf, 4);
        if key_len != 0 {
            return Err(HandshakeError::UnsupportedAuthKey(key_len).into());
        }
        let protocol = read_u32(&self.buf, 8);
        if protocol != PROTOCOL_JSON {
            return Err(HandshakeError::UnsupportedEncoding(protocol).into());
        }
        self.buf.advance(HANDSHAKE_LEN);
        self.handshake_done = true;
        Ok(Some(Frame::Handshake(ClientHandshake { version, protocol })))
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// The handshake the gateway sends to the backend in place of the client's:
/// version, key length, key and protocol, integers little-endian.
pub fn backend_handshake(auth_key: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HANDSHAKE_LEN + auth_key.len());
    out.put_u32_le(VERSION_V0_4);
    out.put_u32_le(auth_key.len() as u32);
    out.put_slice(auth_key);
    out.put_u32_le(PROTOCOL_JSON);
    out.freeze()
}

/// Encode a query message the way a driver does. Used by tests and tooling.
pub fn encode_query(token: u64, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(QUERY_HEADER_LEN + payload.len());
    out.put_u64_le(token);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    out.freeze()
}

/// The handshake a driver sends for protocol V0_4 with the JSON encoding
/// and no auth key.
pub fn client_handshake() -> Bytes {
    let mut out = BytesMut::with_capacity(HANDSHAKE_LEN);
    out.put_u32_le(VERSION_V0_4);
    out.put_u32_le(0);
    out.put_u32_le(PROTOCOL_JSON);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut Framer) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = framer.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn handshake_words(version: u32, key_len: u32, protocol: u32) -> Vec<u8> {
        [version, key_len, protocol]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    // ---- handshake ----

    #[test]
    fn accepts_supported_handshake() {
        let mut framer = Framer::default();
        framer.push(&client_handshake());
        assert_eq!(
            framer.next_frame().unwrap(),
            Some(Frame::Handshake(ClientHandshake {
                version: VERSION_V0_4,
                protocol: PROTOCOL_JSON,
            }))
        );
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn handshake_split_at_every_boundary() {
        let bytes = client_handshake();
        for split in 0..=bytes.len() {
            let mut framer = Framer::default();
            framer.push(&bytes[..split]);
            let early = framer.next_frame().unwrap();
            framer.push(&bytes[split..]);
            let frames: Vec<Frame> = early.into_iter().chain(drain(&mut framer)).collect();
            assert_eq!(frames.len(), 1, "split at {split}");
            assert!(matches!(frames[0], Frame::Handshake(_)));
        }
    }

    #[test]
    fn rejected_handshake_is_rejected_however_split() {
        let bytes = handshake_words(VERSION_V0_4, 0, 0x1234);
        for split in 0..=bytes.len() {
            let mut framer = Framer::default();
            framer.push(&bytes[..split]);
            let early = framer.next_frame();
            framer.push(&bytes[split..]);
            let result = match early {
                Ok(None) => framer.next_frame(),
                other => other,
            };
            assert_eq!(
                result,
                Err(FramingError::Handshake(HandshakeError::UnsupportedEncoding(0x1234)))
            );
        }
    }

    #[test]
    fn handshake_errors() {
        let cases = [
            (
                handshake_words(0x3f61_ba36, 0, PROTOCOL_JSON),
                HandshakeError::ProtocolVersionMismatch(0x3f61_ba36),
            ),
            (
                handshake_words(VERSION_V0_4, 4, PROTOCOL_JSON),
                HandshakeError::UnsupportedAuthKey(4),
            ),
            (
                handshake_words(VERSION_V0_4, 0, 0x0000_0001),
                HandshakeError::UnsupportedEncoding(1),
            ),
        ];
        for (bytes, expected) in cases {
            let mut framer = Framer::default();
            framer.push(&bytes);
            assert_eq!(framer.next_frame(), Err(FramingError::Handshake(expected)));
        }
    }

    #[test]
    fn surplus_after_handshake_is_kept() {
        let mut framer = Framer::default();
        let mut bytes = client_handshake().to_vec();
        bytes.extend_from_slice(&encode_query(1, b"[2]"));
        framer.push(&bytes);

        let frames = drain(&mut framer);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[1], Frame::Query(q) if q.token == 1 && q.payload() == b"[2]"));
    }

    // ---- queries ----

    fn active_framer() -> Framer {
        let mut framer = Framer::default();
        framer.push(&client_handshake());
        assert!(framer.next_frame().unwrap().is_some());
        framer
    }

    #[test]
    fn token_uses_both_words() {
        let mut framer = active_framer();
        let token = (7u64 << 32) + 3;
        framer.push(&encode_query(token, b"[3]"));
        match framer.next_frame().unwrap() {
            Some(Frame::Query(q)) => {
                assert_eq!(q.token, token);
                assert_eq!(&q.raw[..4], &3u32.to_le_bytes());
                assert_eq!(&q.raw[4..8], &7u32.to_le_bytes());
            }
            other => panic!("expected query frame, got {other:?}"),
        }
    }

    #[test]
    fn coalesced_queries_come_out_in_order() {
        let mut framer = active_framer();
        let mut bytes = encode_query(1, br#"[1,[15,["turtles"]],{}]"#).to_vec();
        bytes.extend_from_slice(&encode_query(2, b"[2]"));
        framer.push(&bytes);

        let tokens: Vec<u64> = drain(&mut framer)
            .into_iter()
            .map(|f| match f {
                Frame::Query(q) => q.token,
                Frame::Handshake(_) => panic!("unexpected handshake"),
            })
            .collect();
        assert_eq!(tokens, vec![1, 2]);
    }

    #[test]
    fn fragmented_query_waits_for_all_bytes() {
        let mut framer = active_framer();
        let message = encode_query(9, br#"[1,[15,["turtles"]]]"#);
        for byte in &message[..message.len() - 1] {
            framer.push(std::slice::from_ref(byte));
            assert_eq!(framer.next_frame().unwrap(), None);
        }
        framer.push(&message[message.len() - 1..]);
        assert_eq!(
            framer.next_frame().unwrap(),
            Some(Frame::Query(QueryFrame { token: 9, raw: message }))
        );
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn raw_bytes_are_preserved_exactly() {
        let mut framer = active_framer();
        let message = encode_query(u64::MAX, "[1,[15,[\"t\u{fc}rtles\"]]]".as_bytes());
        framer.push(&message);
        match framer.next_frame().unwrap() {
            Some(Frame::Query(q)) => assert_eq!(q.raw, message),
            other => panic!("expected query frame, got {other:?}"),
        }
    }

    #[test]
    fn oversized_query_is_fatal() {
        let mut framer = Framer::new(16);
        framer.push(&client_handshake());
        framer.next_frame().unwrap();
        framer.push(&encode_query(1, &[b' '; 17])[..QUERY_HEADER_LEN]);
        assert_eq!(
            framer.next_frame(),
            Err(FramingError::QueryTooLarge {
                declared: 17,
                limit: 16
            })
        );
    }

    #[test]
    fn empty_payload_is_a_frame() {
        let mut framer = active_framer();
        framer.push(&encode_query(5, b""));
        match framer.next_frame().unwrap() {
            Some(Frame::Query(q)) => assert!(q.payload().is_empty()),
            other => panic!("expected query frame, got {other:?}"),
        }
    }

    // ---- backend handshake ----

    #[test]
    fn backend_handshake_layout() {
        let bytes = backend_handshake(b"secret");
        assert_eq!(bytes.len(), 12 + 6);
        assert_eq!(read_u32(&bytes, 0), VERSION_V0_4);
        assert_eq!(read_u32(&bytes, 4), 6);
        assert_eq!(&bytes[8..14], b"secret");
        assert_eq!(read_u32(&bytes, 14), PROTOCOL_JSON);

        let empty = backend_handshake(b"");
        assert_eq!(empty, client_handshake());
    }
}
