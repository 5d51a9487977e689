//! Published messages and their wire encoding
//!
//! A message is encoded once per broadcast and the resulting `Bytes` frame is
//! shared by every subscriber queue.

use bytes::{BufMut, Bytes, BytesMut};

/// Comment frame sent on idle streams to hold intermediaries open
pub const KEEPALIVE_FRAME: &[u8] = b":keepalive\n\n";

/// One event to publish
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name (empty = no `event:` line)
    pub event: String,
    /// Opaque payload, may contain line breaks
    pub data: Bytes,
    /// Path-like tag used for subscription filtering
    pub namespace: String,
}

impl SseMessage {
    /// Create a new message
    pub fn new(
        event: impl Into<String>,
        data: impl Into<Bytes>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a message without an event name or namespace
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self::new(String::new(), data, String::new())
    }

    /// Whether the message carries a payload
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    /// Encode with the `namespace:` line included
    pub fn encode(&self) -> Bytes {
        self.encode_frame(true)
    }

    /// Encode into a complete SSE record
    ///
    /// The payload is split on `\n` and each line becomes one `data:` line;
    /// a trailing `\r` on a line is dropped so CRLF payloads frame the same
    /// way. Line breaks inside the event name or namespace are stripped.
    pub fn encode_frame(&self, advertise_namespace: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());

        if !self.event.is_empty() {
            put_field(&mut buf, b"event:", self.event.as_bytes());
        }

        if advertise_namespace && !self.namespace.is_empty() {
            put_field(&mut buf, b"namespace:", self.namespace.as_bytes());
        }

        for line in self.data.split(|b| *b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            buf.put_slice(b"data:");
            buf.put_slice(line);
            buf.put_u8(b'\n');
        }

        buf.put_u8(b'\n');
        buf.freeze()
    }

    fn encoded_len_hint(&self) -> usize {
        let lines = self.data.iter().filter(|b| **b == b'\n').count() + 1;
        self.event.len() + self.namespace.len() + self.data.len() + lines * 6 + 24
    }
}

fn put_field(buf: &mut BytesMut, name: &[u8], value: &[u8]) {
    buf.put_slice(name);
    for b in value.iter().filter(|b| **b != b'\n' && **b != b'\r') {
        buf.put_u8(*b);
    }
    buf.put_u8(b'\n');
}
