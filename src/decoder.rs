//! SNMP trap decoding
//!
//! Minimal BER reader for the two message shapes trapfwd cares about:
//! SNMPv1 `Trap-PDU` and SNMPv2c `SNMPv2-Trap-PDU`. Everything else is
//! rejected with a [`DecodeError`] so the listener can log and move on.

use crate::error::DecodeError;
use crate::oid::Oid;
use crate::trap::{IncomingTrap, Notification, V1Trap, Value, VarBind};
use std::net::{IpAddr, Ipv4Addr};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const PDU_TRAP_V1: u8 = 0xA4;
const PDU_INFORM: u8 = 0xA6;
const PDU_TRAP_V2: u8 = 0xA7;

const VERSION_1: i64 = 0;
const VERSION_2C: i64 = 1;
const VERSION_3: i64 = 3;

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(msg.into())
}

/// Cursor over a BER encoded buffer.
struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| malformed("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let len_bytes = (first & 0x7F) as usize;
        if len_bytes == 0 {
            return Err(malformed("indefinite length encoding is not allowed"));
        }
        if len_bytes > 4 {
            return Err(malformed(format!("length uses {len_bytes} bytes")));
        }
        let mut len = 0usize;
        for _ in 0..len_bytes {
            len = (len << 8) | self.read_byte()? as usize;
        }
        Ok(len)
    }

    /// Read one TLV and return its tag and contents.
    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), DecodeError> {
        let tag = self.read_byte()?;
        let len = self.read_length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed(format!("tag 0x{tag:02x} length {len} exceeds data")))?;
        let contents = &self.data[self.pos..end];
        self.pos = end;
        Ok((tag, contents))
    }

    fn read_expected(&mut self, expected: u8, what: &str) -> Result<&'a [u8], DecodeError> {
        let (tag, contents) = self.read_tlv()?;
        if tag != expected {
            return Err(malformed(format!(
                "expected {what} (0x{expected:02x}), found 0x{tag:02x}"
            )));
        }
        Ok(contents)
    }

    fn read_sequence(&mut self, what: &str) -> Result<BerReader<'a>, DecodeError> {
        Ok(BerReader::new(self.read_expected(TAG_SEQUENCE, what)?))
    }

    fn read_integer(&mut self, what: &str) -> Result<i64, DecodeError> {
        decode_integer(self.read_expected(TAG_INTEGER, what)?)
    }
}

fn decode_integer(bytes: &[u8]) -> Result<i64, DecodeError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(malformed(format!("integer of {} bytes", bytes.len())));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn decode_unsigned(bytes: &[u8], max_bytes: usize) -> Result<u64, DecodeError> {
    let mut significant = bytes;
    while significant.len() > 1 && significant[0] == 0 {
        significant = &significant[1..];
    }
    if significant.is_empty() || significant.len() > max_bytes {
        return Err(malformed(format!("unsigned value of {} bytes", bytes.len())));
    }
    Ok(significant.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_u32(bytes: &[u8]) -> Result<u32, DecodeError> {
    decode_unsigned(bytes, 4).map(|v| v as u32)
}

fn decode_oid(bytes: &[u8]) -> Result<Oid, DecodeError> {
    if bytes.is_empty() {
        return Err(malformed("empty object identifier"));
    }
    let mut subids = Vec::with_capacity(bytes.len() + 1);
    let mut current: u64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        current = (current << 7) | (b & 0x7F) as u64;
        if current > u32::MAX as u64 + 80 {
            return Err(malformed("object identifier arc out of range"));
        }
        if b & 0x80 == 0 {
            subids.push(current);
            current = 0;
        } else if i == bytes.len() - 1 {
            return Err(malformed("truncated object identifier"));
        }
    }

    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a as u32);
    arcs.push(u32::try_from(b).map_err(|_| malformed("object identifier arc out of range"))?);
    for arc in &subids[1..] {
        arcs.push(u32::try_from(*arc).map_err(|_| malformed("object identifier arc out of range"))?);
    }
    Ok(Oid::new(arcs))
}

fn decode_ip(bytes: &[u8]) -> Result<Ipv4Addr, DecodeError> {
    let octets: [u8; 4] = bytes
        .try_into()
        .map_err(|_| malformed(format!("IpAddress of {} bytes", bytes.len())))?;
    Ok(Ipv4Addr::from(octets))
}

fn decode_value(tag: u8, bytes: &[u8]) -> Result<Value, DecodeError> {
    Ok(match tag {
        TAG_INTEGER => Value::Integer(decode_integer(bytes)?),
        TAG_OCTET_STRING => Value::OctetString(bytes.to_vec()),
        TAG_NULL => Value::Null,
        TAG_OID => Value::ObjectId(decode_oid(bytes)?),
        TAG_IP_ADDRESS => Value::IpAddress(decode_ip(bytes)?),
        TAG_COUNTER32 => Value::Counter32(decode_u32(bytes)?),
        TAG_GAUGE32 => Value::Gauge32(decode_u32(bytes)?),
        TAG_TIMETICKS => Value::TimeTicks(decode_u32(bytes)?),
        TAG_OPAQUE => Value::Opaque(bytes.to_vec()),
        TAG_COUNTER64 => Value::Counter64(decode_unsigned(bytes, 8)?),
        TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
        other => return Err(malformed(format!("unknown value tag 0x{other:02x}"))),
    })
}

fn decode_varbinds(reader: &mut BerReader<'_>) -> Result<Vec<VarBind>, DecodeError> {
    let mut list = reader.read_sequence("variable-bindings")?;
    let mut bindings = Vec::new();
    while !list.is_empty() {
        let mut vb = list.read_sequence("VarBind")?;
        let oid = decode_oid(vb.read_expected(TAG_OID, "VarBind name")?)?;
        let (tag, contents) = vb.read_tlv()?;
        bindings.push(VarBind::new(oid, decode_value(tag, contents)?));
    }
    Ok(bindings)
}

/// Decode one datagram into a notification.
///
/// `community` is the only community string accepted; anything else is
/// rejected before the PDU is looked at.
pub fn decode_packet(
    data: &[u8],
    source: IpAddr,
    community: &str,
) -> Result<Notification, DecodeError> {
    if data.first() != Some(&TAG_SEQUENCE) {
        return Err(malformed("not a BER SEQUENCE"));
    }

    let mut outer = BerReader::new(data);
    let mut message = outer.read_sequence("Message")?;

    let version = message.read_integer("version")?;
    match version {
        VERSION_1 | VERSION_2C => {}
        VERSION_3 => return Err(DecodeError::Unsupported("SNMPv3 message".into())),
        v => return Err(DecodeError::Unsupported(format!("SNMP version {v}"))),
    }

    let received = message.read_expected(TAG_OCTET_STRING, "community")?;
    let received = String::from_utf8_lossy(received).into_owned();
    if received != community {
        return Err(DecodeError::Community { received });
    }

    let pdu_tag = message
        .peek_tag()
        .ok_or_else(|| malformed("missing PDU"))?;
    let (_, pdu) = message.read_tlv()?;
    let mut pdu = BerReader::new(pdu);

    match (version, pdu_tag) {
        (VERSION_1, PDU_TRAP_V1) => {
            let enterprise = decode_oid(pdu.read_expected(TAG_OID, "enterprise")?)?;
            let agent_address = decode_ip(pdu.read_expected(TAG_IP_ADDRESS, "agent-addr")?)?;
            let generic_trap = pdu.read_integer("generic-trap")?;
            let specific_trap = pdu.read_integer("specific-trap")?;
            let timestamp = decode_u32(pdu.read_expected(TAG_TIMETICKS, "time-stamp")?)?;
            let variable_bindings = decode_varbinds(&mut pdu)?;
            Ok(Notification::V1(V1Trap {
                source_address: source,
                community: received,
                enterprise,
                agent_address,
                generic_trap,
                specific_trap,
                timestamp,
                variable_bindings,
            }))
        }
        (VERSION_2C, PDU_TRAP_V2) => {
            let _request_id = pdu.read_integer("request-id")?;
            let _error_status = pdu.read_integer("error-status")?;
            let _error_index = pdu.read_integer("error-index")?;
            let variable_bindings = decode_varbinds(&mut pdu)?;
            IncomingTrap::from_bindings(source, received, variable_bindings)
                .map(Notification::V2c)
                .ok_or(DecodeError::MissingTrapOid)
        }
        (VERSION_2C, PDU_INFORM) => Err(DecodeError::Unsupported(
            "InformRequest (acknowledgement not implemented)".into(),
        )),
        (v, tag) => Err(DecodeError::Unsupported(format!(
            "PDU 0x{tag:02x} in SNMP {} message",
            if v == VERSION_1 { "v1" } else { "v2c" }
        ))),
    }
}

/// BER encoder for building trap datagrams in tests.
#[cfg(any(test, feature = "testing"))]
pub mod encode {
    use crate::oid::Oid;
    use crate::trap::Value;

    fn length(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![len as u8]
        } else {
            let bytes: Vec<u8> = len
                .to_be_bytes()
                .iter()
                .copied()
                .skip_while(|b| *b == 0)
                .collect();
            let mut out = vec![0x80 | bytes.len() as u8];
            out.extend(bytes);
            out
        }
    }

    pub fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(length(contents.len()));
        out.extend_from_slice(contents);
        out
    }

    pub fn integer(v: i64) -> Vec<u8> {
        let bytes = v.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        bytes[start..].to_vec()
    }

    fn unsigned(v: u64) -> Vec<u8> {
        let mut bytes: Vec<u8> = v.to_be_bytes().iter().copied().skip_while(|b| *b == 0).collect();
        if bytes.is_empty() || bytes[0] & 0x80 != 0 {
            bytes.insert(0, 0);
        }
        bytes
    }

    pub fn oid(oid: &Oid) -> Vec<u8> {
        let arcs = oid.arcs();
        let mut out = Vec::new();
        let mut push = |mut v: u64| {
            let mut chunk = vec![(v & 0x7F) as u8];
            v >>= 7;
            while v > 0 {
                chunk.push(0x80 | (v & 0x7F) as u8);
                v >>= 7;
            }
            chunk.reverse();
            out.extend(chunk);
        };
        let first = arcs.first().copied().unwrap_or(0) as u64;
        let second = arcs.get(1).copied().unwrap_or(0) as u64;
        push(first * 40 + second);
        for arc in arcs.iter().skip(2) {
            push(*arc as u64);
        }
        out
    }

    pub fn value(v: &Value) -> Vec<u8> {
        match v {
            Value::Integer(i) => tlv(0x02, &integer(*i)),
            Value::OctetString(b) => tlv(0x04, b),
            Value::Null => tlv(0x05, &[]),
            Value::ObjectId(o) => tlv(0x06, &oid(o)),
            Value::IpAddress(a) => tlv(0x40, &a.octets()),
            Value::Counter32(c) => tlv(0x41, &unsigned(*c as u64)),
            Value::Gauge32(c) => tlv(0x42, &unsigned(*c as u64)),
            Value::TimeTicks(c) => tlv(0x43, &unsigned(*c as u64)),
            Value::Opaque(b) => tlv(0x44, b),
            Value::Counter64(c) => tlv(0x46, &unsigned(*c)),
            Value::NoSuchObject => tlv(0x80, &[]),
            Value::NoSuchInstance => tlv(0x81, &[]),
            Value::EndOfMibView => tlv(0x82, &[]),
        }
    }

    pub fn varbinds(bindings: &[(Oid, Value)]) -> Vec<u8> {
        let mut list = Vec::new();
        for (o, v) in bindings {
            let mut vb = tlv(0x06, &oid(o));
            vb.extend(value(v));
            list.extend(tlv(0x30, &vb));
        }
        tlv(0x30, &list)
    }

    /// SNMPv2c SNMPv2-Trap message with the given bindings, in order.
    pub fn v2c_trap(community: &str, bindings: &[(Oid, Value)]) -> Vec<u8> {
        let mut pdu = tlv(0x02, &integer(1234));
        pdu.extend(tlv(0x02, &integer(0)));
        pdu.extend(tlv(0x02, &integer(0)));
        pdu.extend(varbinds(bindings));
        message(1, community, 0xA7, &pdu)
    }

    /// SNMPv1 Trap-PDU message.
    pub fn v1_trap(
        community: &str,
        enterprise: &Oid,
        agent: [u8; 4],
        generic: i64,
        specific: i64,
        ticks: u32,
        bindings: &[(Oid, Value)],
    ) -> Vec<u8> {
        let mut pdu = tlv(0x06, &oid(enterprise));
        pdu.extend(tlv(0x40, &agent));
        pdu.extend(tlv(0x02, &integer(generic)));
        pdu.extend(tlv(0x02, &integer(specific)));
        pdu.extend(tlv(0x43, &unsigned(ticks as u64)));
        pdu.extend(varbinds(bindings));
        message(0, community, 0xA4, &pdu)
    }

    pub fn message(version: i64, community: &str, pdu_tag: u8, pdu: &[u8]) -> Vec<u8> {
        let mut body = tlv(0x02, &integer(version));
        body.extend(tlv(0x04, community.as_bytes()));
        body.extend(tlv(pdu_tag, pdu));
        tlv(0x30, &body)
    }
}
