//! Canonical binary encoding for sync messages.
//!
//! Layout: one discriminant byte (see [`crate::messages::tag`]), then the
//! variant's fields. `version` fields are fixed 8-byte big-endian `i64`;
//! sub-indexes and list lengths are unsigned LEB128 varints; strings and
//! site ids are varint-length-prefixed bytes. `Establish.create` is encoded
//! only when present and detected on decode by trailing content, which keeps
//! "absent" distinct from "present with empty string".
//!
//! Decoding is bounds-checked everywhere and never panics; malformed input
//! comes back as [`ProtocolError`]. Round-trip law: `decode(encode(m)) == m`
//! for every constructible message.

use bytes::Bytes;

use tidewire_core::{Change, SeqPair, SiteId};

use crate::error::ProtocolError;
use crate::messages::{tag, Message};

/// Encode a message to its canonical wire form.
pub fn encode_message(msg: &Message) -> Bytes {
    let mut buf = Vec::with_capacity(64);
    buf.push(msg.tag());
    match msg {
        Message::Ack { seq_end } => {
            write_seq_pair(&mut buf, *seq_end);
        }
        Message::Establish {
            from,
            to,
            seq_start,
            create,
        } => {
            write_site_id(&mut buf, from);
            write_site_id(&mut buf, to);
            write_seq_pair(&mut buf, *seq_start);
            if let Some(schema_name) = create {
                write_str(&mut buf, schema_name);
            }
        }
        Message::Changes {
            from,
            seq_start,
            seq_end,
            changes,
        } => {
            write_site_id(&mut buf, from);
            write_seq_pair(&mut buf, *seq_start);
            write_seq_pair(&mut buf, *seq_end);
            write_var_uint(&mut buf, changes.len() as u64);
            for change in changes {
                write_str(&mut buf, &change.table);
                write_str(&mut buf, &change.pks);
                write_str(&mut buf, &change.cid);
                write_str(&mut buf, &change.val);
                write_i64(&mut buf, change.col_version);
                write_i64(&mut buf, change.db_version);
            }
        }
        Message::Request { seq_start } => {
            write_seq_pair(&mut buf, *seq_start);
        }
    }
    Bytes::from(buf)
}

/// Decode a message from its canonical wire form.
pub fn decode_message(buf: &[u8]) -> Result<Message, ProtocolError> {
    let mut reader = Reader::new(buf);
    let discriminant = reader.read_u8()?;
    match discriminant {
        tag::ACK => Ok(Message::Ack {
            seq_end: reader.read_seq_pair()?,
        }),
        tag::ESTABLISH => {
            let from = reader.read_site_id()?;
            let to = reader.read_site_id()?;
            let seq_start = reader.read_seq_pair()?;
            // Presence of the create clause is signalled by trailing
            // content, not by a sentinel value.
            let create = if reader.has_remaining() {
                Some(reader.read_str()?)
            } else {
                None
            };
            Ok(Message::Establish {
                from,
                to,
                seq_start,
                create,
            })
        }
        tag::CHANGES => {
            let from = reader.read_site_id()?;
            let seq_start = reader.read_seq_pair()?;
            let seq_end = reader.read_seq_pair()?;
            let count = reader.read_var_uint()?;
            let mut changes = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                changes.push(Change {
                    table: reader.read_str()?,
                    pks: reader.read_str()?,
                    cid: reader.read_str()?,
                    val: reader.read_str()?,
                    col_version: reader.read_i64()?,
                    db_version: reader.read_i64()?,
                });
            }
            Ok(Message::Changes {
                from,
                seq_start,
                seq_end,
                changes,
            })
        }
        tag::REQUEST => Ok(Message::Request {
            seq_start: reader.read_seq_pair()?,
        }),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn write_var_uint(buf: &mut Vec<u8>, mut n: u64) {
    while n >= 0x80 {
        buf.push((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_var_uint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn write_site_id(buf: &mut Vec<u8>, id: &SiteId) {
    write_var_uint(buf, SiteId::LEN as u64);
    buf.extend_from_slice(id.as_bytes());
}

fn write_seq_pair(buf: &mut Vec<u8>, seq: SeqPair) {
    write_i64(buf, seq.version);
    write_var_uint(buf, u64::from(seq.sub));
}

/// Bounds-checked reader over a received frame.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated {
                wanted: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_var_uint(&mut self) -> Result<u64, ProtocolError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(ProtocolError::VarIntOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(ProtocolError::VarIntOverflow);
            }
        }
    }

    fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_exact(8)?);
        Ok(i64::from_be_bytes(bytes))
    }

    fn read_str(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_var_uint()?;
        if len > self.remaining() as u64 {
            return Err(ProtocolError::Truncated {
                wanted: len as usize,
                remaining: self.remaining(),
            });
        }
        let bytes = self.read_exact(len as usize)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn read_site_id(&mut self) -> Result<SiteId, ProtocolError> {
        let len = self.read_var_uint()?;
        if len != SiteId::LEN as u64 {
            return Err(ProtocolError::InvalidSiteIdLength(len as usize));
        }
        let mut bytes = [0u8; SiteId::LEN];
        bytes.copy_from_slice(self.read_exact(SiteId::LEN)?);
        Ok(SiteId::from_bytes(bytes))
    }

    fn read_seq_pair(&mut self) -> Result<SeqPair, ProtocolError> {
        let version = self.read_i64()?;
        let sub = self.read_var_uint()?;
        let sub = u32::try_from(sub).map_err(|_| ProtocolError::SubIndexOutOfRange(sub))?;
        Ok(SeqPair::new(version, sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(db_version: i64) -> Change {
        Change {
            table: "t".into(),
            pks: "'1'".into(),
            cid: "a".into(),
            val: "'x'".into(),
            col_version: 1,
            db_version,
        }
    }

    #[test]
    fn test_golden_ack() {
        let msg = Message::Ack {
            seq_end: SeqPair::new(9, 0),
        };
        let encoded = encode_message(&msg);
        assert_eq!(&encoded[..], &[0x00, 0, 0, 0, 0, 0, 0, 0, 9, 0x00]);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_golden_request() {
        let msg = Message::Request {
            seq_start: SeqPair::new(300, 1),
        };
        let encoded = encode_message(&msg);
        assert_eq!(
            &encoded[..],
            &[0x03, 0, 0, 0, 0, 0, 0, 0x01, 0x2c, 0x01]
        );
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_golden_establish_without_create() {
        let msg = Message::Establish {
            from: SiteId::from_bytes([0xaa; 16]),
            to: SiteId::from_bytes([0xbb; 16]),
            seq_start: SeqPair::new(5, 0),
            create: None,
        };
        let encoded = encode_message(&msg);

        let mut expected = vec![0x01, 0x10];
        expected.extend_from_slice(&[0xaa; 16]);
        expected.push(0x10);
        expected.extend_from_slice(&[0xbb; 16]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 5, 0x00]);
        assert_eq!(&encoded[..], &expected[..]);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_golden_changes_single_record() {
        let msg = Message::Changes {
            from: SiteId::from_bytes([0xcc; 16]),
            seq_start: SeqPair::ZERO,
            seq_end: SeqPair::new(5, 0),
            changes: vec![Change {
                table: "t".into(),
                pks: "'1'".into(),
                cid: "a".into(),
                val: "'x'".into(),
                col_version: 1,
                db_version: 5,
            }],
        };
        let encoded = encode_message(&msg);

        let mut expected = vec![0x02, 0x10];
        expected.extend_from_slice(&[0xcc; 16]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0x00]); // seq_start
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 5, 0x00]); // seq_end
        expected.push(0x01); // record count
        expected.extend_from_slice(&[0x01, b't']);
        expected.extend_from_slice(&[0x03, b'\'', b'1', b'\'']);
        expected.extend_from_slice(&[0x01, b'a']);
        expected.extend_from_slice(&[0x03, b'\'', b'x', b'\'']);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]); // col_version
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 5]); // db_version
        assert_eq!(&encoded[..], &expected[..]);
        assert_eq!(decode_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_unknown_discriminant_is_protocol_error() {
        let err = decode_message(&[0x07]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(0x07)));
    }

    #[test]
    fn test_empty_buffer_is_truncated() {
        let err = decode_message(&[]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_every_strict_prefix_of_changes_fails() {
        let msg = Message::Changes {
            from: SiteId::from_bytes([0x11; 16]),
            seq_start: SeqPair::new(3, 0),
            seq_end: SeqPair::new(6, 0),
            changes: vec![change(5), change(6)],
        };
        let encoded = encode_message(&msg);
        for len in 0..encoded.len() {
            assert!(
                decode_message(&encoded[..len]).is_err(),
                "prefix of length {len} decoded successfully"
            );
        }
    }

    #[test]
    fn test_every_strict_prefix_of_ack_fails() {
        let encoded = encode_message(&Message::Ack {
            seq_end: SeqPair::new(1 << 40, 3),
        });
        for len in 0..encoded.len() {
            assert!(decode_message(&encoded[..len]).is_err());
        }
    }

    #[test]
    fn test_create_absent_vs_present_empty() {
        let absent = Message::Establish {
            from: SiteId::ZERO,
            to: SiteId::ZERO,
            seq_start: SeqPair::ZERO,
            create: None,
        };
        let present_empty = Message::Establish {
            from: SiteId::ZERO,
            to: SiteId::ZERO,
            seq_start: SeqPair::ZERO,
            create: Some(String::new()),
        };

        let absent_bytes = encode_message(&absent);
        let present_bytes = encode_message(&present_empty);
        assert_eq!(present_bytes.len(), absent_bytes.len() + 1);

        assert_eq!(decode_message(&absent_bytes).unwrap(), absent);
        assert_eq!(decode_message(&present_bytes).unwrap(), present_empty);
    }

    #[test]
    fn test_establish_truncated_create_fails() {
        let msg = Message::Establish {
            from: SiteId::ZERO,
            to: SiteId::ZERO,
            seq_start: SeqPair::ZERO,
            create: Some("todo-v1".into()),
        };
        let encoded = encode_message(&msg);
        // Cut inside the schema-name string: length prefix promises more
        // bytes than remain.
        let err = decode_message(&encoded[..encoded.len() - 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_bad_site_id_length_rejected() {
        // Establish whose `from` claims 4 bytes.
        let mut buf = vec![0x01, 0x04];
        buf.extend_from_slice(&[0xaa; 4]);
        let err = decode_message(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSiteIdLength(4)));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let msg = Message::Establish {
            from: SiteId::ZERO,
            to: SiteId::ZERO,
            seq_start: SeqPair::ZERO,
            create: Some("ab".into()),
        };
        let mut encoded = encode_message(&msg).to_vec();
        let len = encoded.len();
        encoded[len - 1] = 0xff; // corrupt the schema name
        let err = decode_message(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8(_)));
    }

    #[test]
    fn test_varint_overflow_rejected() {
        // Changes-count varint with 11 continuation bytes.
        let mut buf = vec![0x02, 0x10];
        buf.extend_from_slice(&[0x22; 16]);
        buf.extend_from_slice(&[0; 8]);
        buf.push(0x00);
        buf.extend_from_slice(&[0; 8]);
        buf.push(0x00);
        buf.extend_from_slice(&[0xff; 10]);
        buf.push(0x01);
        let err = decode_message(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::VarIntOverflow));
    }

    #[test]
    fn test_negative_versions_roundtrip() {
        // Version clocks are i64; the codec must not mangle the sign bit.
        let msg = Message::Ack {
            seq_end: SeqPair::new(-1, 0),
        };
        let decoded = decode_message(&encode_message(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use tidewire_testkit::generators;

        fn arb_message() -> impl Strategy<Value = Message> {
            prop_oneof![
                generators::seq_pair().prop_map(|seq_end| Message::Ack { seq_end }),
                generators::seq_pair().prop_map(|seq_start| Message::Request { seq_start }),
                (
                    generators::site_id(),
                    generators::site_id(),
                    generators::seq_pair(),
                    proptest::option::of("[a-z0-9-]{0,24}"),
                )
                    .prop_map(|(from, to, seq_start, create)| Message::Establish {
                        from,
                        to,
                        seq_start,
                        create,
                    }),
                (
                    generators::site_id(),
                    generators::seq_pair(),
                    generators::seq_pair(),
                    generators::changes(8),
                )
                    .prop_map(|(from, seq_start, seq_end, changes)| Message::Changes {
                        from,
                        seq_start,
                        seq_end,
                        changes,
                    }),
            ]
        }

        proptest! {
            #[test]
            fn roundtrip_law(msg in arb_message()) {
                let encoded = encode_message(&msg);
                let decoded = decode_message(&encoded).unwrap();
                prop_assert_eq!(decoded, msg);
            }

            #[test]
            fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode_message(&bytes);
            }
        }
    }
}
