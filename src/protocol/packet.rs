//! Packet framing.
//!
//! One packet is carried by one message frame:
//!
//! ```text
//! <kind>[<attachments>-][<namespace>,][<id>][<json>]
//! ```
//!
//! | Field | Present when |
//! |-------|--------------|
//! | kind | always, one digit `0`-`6` |
//! | attachments | binary kinds only |
//! | namespace | not the default `/` |
//! | id | an acknowledgement is requested (or answered) |
//! | json | payload not empty, or the kind is an event/ack |
//!
//! An event with id 3 in `/chat` carrying `("msg", "hello")`:
//!
//! ```text
//! 2/chat,3["msg","hello"]
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Write;

use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::{Error, Result};
use crate::identifiers::AckId;

// ============================================================================
// Constants
// ============================================================================

/// Namespace used when a packet names none.
pub const DEFAULT_NAMESPACE: &str = "/";

// ============================================================================
// PacketKind
// ============================================================================

/// Application-level packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Namespace connected.
    Connect,
    /// Namespace disconnected.
    Disconnect,
    /// Named event.
    Event,
    /// Acknowledgement of an event.
    Ack,
    /// Namespace-level error.
    Error,
    /// Event with binary attachments.
    BinaryEvent,
    /// Acknowledgement with binary attachments.
    BinaryAck,
}

impl PacketKind {
    /// Returns the wire tag.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::Error => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    /// Parses a wire tag.
    #[must_use]
    pub const fn from_char(tag: char) -> Option<Self> {
        match tag {
            '0' => Some(Self::Connect),
            '1' => Some(Self::Disconnect),
            '2' => Some(Self::Event),
            '3' => Some(Self::Ack),
            '4' => Some(Self::Error),
            '5' => Some(Self::BinaryEvent),
            '6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    /// Returns `true` for `Event` and `BinaryEvent`.
    #[inline]
    #[must_use]
    pub const fn is_event(self) -> bool {
        matches!(self, Self::Event | Self::BinaryEvent)
    }

    /// Returns `true` for `Ack` and `BinaryAck`.
    #[inline]
    #[must_use]
    pub const fn is_ack(self) -> bool {
        matches!(self, Self::Ack | Self::BinaryAck)
    }

    /// Returns `true` for kinds carrying an attachment count.
    #[inline]
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    /// Returns the pseudo-event name lifecycle packets are delivered under.
    #[must_use]
    pub const fn lifecycle_event(self) -> Option<&'static str> {
        match self {
            Self::Connect => Some("connection"),
            Self::Disconnect => Some("disconnection"),
            Self::Error => Some("error"),
            _ => None,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::BinaryEvent => "binary_event",
            Self::BinaryAck => "binary_ack",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// An owned application packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketKind,
    /// Target namespace, `/` by default.
    pub namespace: String,
    /// Correlation id; `None` when no acknowledgement is involved.
    pub id: Option<AckId>,
    /// Payload values. For events the first one is the event name.
    pub payload: Vec<Value>,
}

impl Packet {
    /// Creates a packet with no id and no payload.
    #[must_use]
    pub fn new(kind: PacketKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            id: None,
            payload: Vec::new(),
        }
    }

    /// Creates an event packet; `event` becomes the first payload element.
    #[must_use]
    pub fn event(
        namespace: impl Into<String>,
        event: &str,
        args: Vec<Value>,
        id: Option<AckId>,
    ) -> Self {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(event.to_string()));
        payload.extend(args);

        Self {
            kind: PacketKind::Event,
            namespace: namespace.into(),
            id,
            payload,
        }
    }

    /// Creates an acknowledgement for `id`.
    #[must_use]
    pub fn ack(namespace: impl Into<String>, id: AckId, values: Vec<Value>) -> Self {
        Self {
            kind: PacketKind::Ack,
            namespace: namespace.into(),
            id: Some(id),
            payload: values,
        }
    }

    /// Writes the wire form into `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the payload cannot be serialized or the
    /// writer fails.
    pub fn encode_into<W: Write>(&self, mut writer: W) -> Result<()> {
        let io_error = |e: std::io::Error| Error::encode(e.to_string());

        write!(writer, "{}", self.kind.as_char()).map_err(io_error)?;
        if self.kind.is_binary() {
            writer.write_all(b"0-").map_err(io_error)?;
        }
        if !self.namespace.is_empty() && self.namespace != DEFAULT_NAMESPACE {
            write!(writer, "{},", self.namespace).map_err(io_error)?;
        }
        if let Some(id) = self.id {
            write!(writer, "{id}").map_err(io_error)?;
        }

        let json_error = |e: serde_json::Error| Error::encode(format!("packet payload: {e}"));
        match (self.kind, self.payload.as_slice()) {
            // A bare number would run into the id field
            (PacketKind::Error, [single]) if single.is_string() || single.is_object() => {
                serde_json::to_writer(&mut writer, single).map_err(json_error)
            }
            (kind, []) if !(kind.is_event() || kind.is_ack()) => Ok(()),
            (_, payload) => serde_json::to_writer(&mut writer, payload).map_err(json_error),
        }
    }

    /// Returns the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(32);
        self.encode_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Parses a whole packet, payload included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] on malformed framing or payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut decoder = PacketDecoder::new(bytes)?;
        let payload = decoder.payload_values()?;
        let header = decoder.header;

        Ok(Self {
            kind: header.kind,
            namespace: header.namespace,
            id: header.id,
            payload,
        })
    }
}

// ============================================================================
// PacketHeader
// ============================================================================

/// The leading fields of a packet, parsed eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet kind.
    pub kind: PacketKind,
    /// Namespace, `/` when absent.
    pub namespace: String,
    /// Correlation id.
    pub id: Option<AckId>,
    /// Attachment count of binary kinds.
    pub attachments: usize,
}

impl PacketHeader {
    /// Parses the header; returns it with the offset where the payload starts.
    fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let (&tag, _) = bytes
            .split_first()
            .ok_or_else(|| Error::decode("empty packet"))?;
        let kind = PacketKind::from_char(tag as char)
            .ok_or_else(|| Error::decode(format!("unknown packet kind {:?}", tag as char)))?;
        let mut cursor = 1;

        let mut attachments = 0;
        if kind.is_binary() {
            let digits = count_digits(&bytes[cursor..]);
            if bytes.get(cursor + digits) != Some(&b'-') {
                return Err(Error::decode("binary packet without attachment count"));
            }
            attachments = parse_number(&bytes[cursor..cursor + digits])?;
            cursor += digits + 1;
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if bytes.get(cursor) == Some(&b'/') {
            let rest = &bytes[cursor..];
            let end = rest.iter().position(|&b| b == b',').unwrap_or(rest.len());
            namespace = std::str::from_utf8(&rest[..end])
                .map_err(|_| Error::decode("namespace is not UTF-8"))?
                .to_string();
            cursor += (end + 1).min(rest.len());
        }

        let digits = count_digits(&bytes[cursor..]);
        let id = if digits > 0 {
            let value: u32 = parse_number(&bytes[cursor..cursor + digits])?;
            cursor += digits;
            Some(AckId::new(value))
        } else {
            None
        };

        let header = Self {
            kind,
            namespace,
            id,
            attachments,
        };
        Ok((header, cursor))
    }
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn parse_number<T: std::str::FromStr>(digits: &[u8]) -> Result<T> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::decode("numeric field out of range"))
}

// ============================================================================
// PacketDecoder
// ============================================================================

/// Decoder over one inbound frame.
///
/// The header is parsed up front; the payload is split into raw argument
/// slots only when first asked for, and each slot is decoded straight into
/// the type its consumer declares. Dropping or [`close`](Self::close)-ing the
/// decoder releases the underlying frame whether or not the payload was read.
pub struct PacketDecoder<S> {
    source: S,
    header: PacketHeader,
    payload_start: usize,
    args: Option<Vec<Box<RawValue>>>,
}

impl<S: AsRef<[u8]>> PacketDecoder<S> {
    /// Parses the header of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] on malformed framing.
    pub fn new(source: S) -> Result<Self> {
        let (header, payload_start) = PacketHeader::parse(source.as_ref())?;
        Ok(Self {
            source,
            header,
            payload_start,
            args: None,
        })
    }

    /// Returns the parsed header.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Returns the packet kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }

    /// Returns the namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.header.namespace
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<AckId> {
        self.header.id
    }

    /// Returns the undecoded payload bytes.
    #[must_use]
    pub fn raw_payload(&self) -> &[u8] {
        &self.source.as_ref()[self.payload_start..]
    }

    /// Returns the payload split into raw argument slots.
    ///
    /// A JSON array yields one slot per element, any other value a single
    /// slot, an empty payload no slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not valid JSON.
    pub fn args(&mut self) -> Result<&[Box<RawValue>]> {
        if self.args.is_none() {
            let split = split_payload(self.raw_payload())?;
            self.args = Some(split);
        }
        Ok(self.args.as_deref().unwrap_or_default())
    }

    /// Reads the first payload element as an event name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if it is missing or not a string.
    pub fn event_name(&mut self) -> Result<String> {
        let first = self
            .args()?
            .first()
            .ok_or_else(|| Error::decode("event packet without a name"))?;
        serde_json::from_str(first.get())
            .map_err(|e| Error::decode(format!("event name: {e}")))
    }

    /// Decodes every payload element as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not valid JSON.
    pub fn payload_values(&mut self) -> Result<Vec<Value>> {
        self.args()?
            .iter()
            .map(|raw| {
                serde_json::from_str(raw.get()).map_err(|e| Error::decode(format!("payload: {e}")))
            })
            .collect()
    }

    /// Releases the underlying frame, read or not.
    pub fn close(self) {
        drop(self.source);
    }
}

impl<S> fmt::Debug for PacketDecoder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDecoder")
            .field("header", &self.header)
            .field("payload_start", &self.payload_start)
            .finish_non_exhaustive()
    }
}

/// Splits a JSON payload into raw slots.
fn split_payload(payload: &[u8]) -> Result<Vec<Box<RawValue>>> {
    let trimmed = payload.trim_ascii();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let decode_error = |e: serde_json::Error| Error::decode(format!("packet payload: {e}"));
    if trimmed.first() == Some(&b'[') {
        serde_json::from_slice(trimmed).map_err(decode_error)
    } else {
        let single: Box<RawValue> = serde_json::from_slice(trimmed).map_err(decode_error)?;
        Ok(vec![single])
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    use crate::protocol::FromArgs;

    fn encode_text(packet: &Packet) -> String {
        String::from_utf8(packet.encode().expect("encode")).expect("utf-8")
    }

    #[test]
    fn test_encode_event_with_namespace_and_id() {
        let packet = Packet::event("/chat", "msg", vec![json!("hello")], Some(AckId::new(3)));
        assert_eq!(encode_text(&packet), r#"2/chat,3["msg","hello"]"#);
    }

    #[test]
    fn test_encode_omits_defaults() {
        let packet = Packet::event("/", "ping", Vec::new(), None);
        assert_eq!(encode_text(&packet), r#"2["ping"]"#);

        assert_eq!(encode_text(&Packet::new(PacketKind::Connect, "/")), "0");
        assert_eq!(encode_text(&Packet::new(PacketKind::Connect, "/admin")), "0/admin,");
    }

    #[test]
    fn test_encode_empty_ack_keeps_array() {
        let packet = Packet::ack("/", AckId::new(7), Vec::new());
        assert_eq!(encode_text(&packet), "37[]");
    }

    #[test]
    fn test_encode_error_as_bare_value() {
        let mut packet = Packet::new(PacketKind::Error, "/");
        packet.payload.push(json!("not authorized"));
        assert_eq!(encode_text(&packet), r#"4"not authorized""#);
    }

    #[test]
    fn test_decode_header_fields() {
        let decoder = PacketDecoder::new(r#"2/chat,12["msg",1]"#).expect("header");
        assert_eq!(decoder.kind(), PacketKind::Event);
        assert_eq!(decoder.namespace(), "/chat");
        assert_eq!(decoder.id(), Some(AckId::new(12)));
        assert_eq!(decoder.raw_payload(), br#"["msg",1]"#);
    }

    #[test]
    fn test_decode_namespace_only() {
        let mut decoder = PacketDecoder::new("1/chat").expect("header");
        assert_eq!(decoder.kind(), PacketKind::Disconnect);
        assert_eq!(decoder.namespace(), "/chat");
        assert_eq!(decoder.id(), None);
        assert!(decoder.args().expect("args").is_empty());
    }

    #[test]
    fn test_decode_binary_attachments() {
        let decoder = PacketDecoder::new(r#"52-/files,["upload"]"#).expect("header");
        assert_eq!(decoder.kind(), PacketKind::BinaryEvent);
        assert_eq!(decoder.header().attachments, 2);
        assert_eq!(decoder.namespace(), "/files");
    }

    #[test]
    fn test_decode_rejects_bad_framing() {
        assert!(PacketDecoder::new("").is_err());
        assert!(PacketDecoder::new("9[]").is_err());
        assert!(PacketDecoder::new("5[]").is_err());
        assert!(PacketDecoder::new("299999999999[]").is_err());
    }

    #[test]
    fn test_event_name_and_typed_args() {
        let mut decoder = PacketDecoder::new(r#"2["add",2,3]"#).expect("header");
        assert_eq!(decoder.event_name().expect("name"), "add");

        let args = decoder.args().expect("args");
        let (a, b) = <(i64, i64)>::from_args(&args[1..]).expect("typed args");
        assert_eq!((a, b), (2, 3));
    }

    #[test]
    fn test_missing_args_decode_as_null() {
        let mut decoder = PacketDecoder::new(r#"2["greet"]"#).expect("header");
        let args = decoder.args().expect("args");
        let (name,) = <(Option<String>,)>::from_args(&args[1..]).expect("typed args");
        assert_eq!(name, None);
    }

    #[test]
    fn test_wrong_arg_type_is_decode_error() {
        let mut decoder = PacketDecoder::new(r#"2["add","two"]"#).expect("header");
        let args = decoder.args().expect("args");
        let err = <(i64,)>::from_args(&args[1..]).unwrap_err();
        assert!(err.is_codec_error());
    }

    #[test]
    fn test_event_name_must_be_string() {
        let mut decoder = PacketDecoder::new("2[42]").expect("header");
        assert!(decoder.event_name().is_err());
    }

    #[test]
    fn test_malformed_payload_only_fails_on_read() {
        let mut decoder = PacketDecoder::new("2[\"msg\",").expect("header is fine");
        assert!(decoder.args().is_err());
    }

    #[test]
    fn test_decode_whole_packet() {
        let packet = Packet::decode(br#"3/chat,5["ok",{"n":1}]"#).expect("decode");
        assert_eq!(
            packet,
            Packet::ack("/chat", AckId::new(5), vec![json!("ok"), json!({"n": 1})])
        );
    }

    fn arb_kind() -> impl Strategy<Value = PacketKind> {
        prop_oneof![
            Just(PacketKind::Connect),
            Just(PacketKind::Disconnect),
            Just(PacketKind::Event),
            Just(PacketKind::Ack),
            Just(PacketKind::Error),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            kind in arb_kind(),
            namespace in prop_oneof![Just("/".to_string()), "/[a-z]{1,8}"],
            id in proptest::option::of(any::<u32>()),
            payload in proptest::collection::vec(arb_value(), 0..4),
        ) {
            let packet = Packet {
                kind,
                namespace,
                id: id.map(AckId::new),
                payload,
            };
            let decoded = Packet::decode(&packet.encode().expect("encode")).expect("decode");
            prop_assert_eq!(decoded, packet);
        }
    }
}
