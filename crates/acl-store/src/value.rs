//! ACL field values and mask/data comparison.
//!
//! Every filter carries a mask and a data value of the same shape. Matching
//! compares the big-endian encoding of the packet value, byte by byte:
//! `(packet & mask) == data`.

use serde::{Deserialize, Serialize};
use sonic_sai::RawSaiObjectId;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::Deref;

/// Value of an ACL filter, action parameter or packet field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclFieldValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    /// Enumeration value (SAI `s32`).
    Enum(i32),
    Mac([u8; 6]),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Oid(RawSaiObjectId),
    /// Object id list; as filter data it matches any member.
    OidList(Vec<RawSaiObjectId>),
    /// Raw bytes (UDF data and masks).
    Bytes(Vec<u8>),
}

/// Big-endian byte view of a value.
#[derive(Debug, Clone)]
pub enum ValueBytes<'a> {
    Inline { buf: [u8; 16], len: usize },
    Borrowed(&'a [u8]),
}

impl Deref for ValueBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ValueBytes::Inline { buf, len } => &buf[..*len],
            ValueBytes::Borrowed(bytes) => bytes,
        }
    }
}

fn inline(src: &[u8]) -> ValueBytes<'static> {
    let mut buf = [0u8; 16];
    buf[..src.len()].copy_from_slice(src);
    ValueBytes::Inline {
        buf,
        len: src.len(),
    }
}

impl AclFieldValue {
    /// Returns the big-endian encoding, or `None` for object id lists.
    pub fn bytes(&self) -> Option<ValueBytes<'_>> {
        Some(match self {
            Self::Bool(v) => inline(&[u8::from(*v)]),
            Self::U8(v) => inline(&[*v]),
            Self::U16(v) => inline(&v.to_be_bytes()),
            Self::U32(v) => inline(&v.to_be_bytes()),
            Self::Enum(v) => inline(&v.to_be_bytes()),
            Self::Mac(mac) => inline(mac),
            Self::Ipv4(addr) => inline(&addr.octets()),
            Self::Ipv6(addr) => inline(&addr.octets()),
            Self::Oid(oid) => inline(&oid.to_be_bytes()),
            Self::Bytes(bytes) => ValueBytes::Borrowed(bytes),
            Self::OidList(_) => return None,
        })
    }

    /// Width of the encoding in bytes.
    pub fn width(&self) -> Option<usize> {
        self.bytes().map(|b| b.len())
    }

    /// Returns an all-ones mask of the same shape, for exact matches.
    pub fn full_mask(&self) -> AclFieldValue {
        match self {
            Self::Bool(_) => Self::Bool(true),
            Self::U8(_) => Self::U8(u8::MAX),
            Self::U16(_) => Self::U16(u16::MAX),
            Self::U32(_) => Self::U32(u32::MAX),
            Self::Enum(_) => Self::Enum(-1),
            Self::Mac(_) => Self::Mac([0xff; 6]),
            Self::Ipv4(_) => Self::Ipv4(Ipv4Addr::BROADCAST),
            Self::Ipv6(_) => Self::Ipv6(Ipv6Addr::from(u128::MAX)),
            Self::Oid(_) => Self::Oid(RawSaiObjectId::MAX),
            Self::OidList(_) => Self::OidList(Vec::new()),
            Self::Bytes(bytes) => Self::Bytes(vec![0xff; bytes.len()]),
        }
    }

    /// Short name of the value shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::Enum(_) => "enum",
            Self::Mac(_) => "mac",
            Self::Ipv4(_) => "ipv4",
            Self::Ipv6(_) => "ipv6",
            Self::Oid(_) => "oid",
            Self::OidList(_) => "oid_list",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Tests a packet value against this value used as filter data.
    ///
    /// Widths of packet, mask and data must agree; a mismatch never matches.
    pub fn matches(&self, mask: &AclFieldValue, packet: &AclFieldValue) -> bool {
        if let Self::OidList(members) = self {
            return match packet {
                Self::Oid(oid) => members.contains(oid),
                Self::OidList(oids) => oids.iter().any(|oid| members.contains(oid)),
                _ => false,
            };
        }
        match (packet.bytes(), mask.bytes(), self.bytes()) {
            (Some(packet), Some(mask), Some(data)) => masked_equal(&packet, &mask, &data),
            _ => false,
        }
    }
}

/// Byte-wise `(packet & mask) == data`.
pub fn masked_equal(packet: &[u8], mask: &[u8], data: &[u8]) -> bool {
    packet.len() == mask.len()
        && mask.len() == data.len()
        && packet
            .iter()
            .zip(mask)
            .zip(data)
            .all(|((p, m), d)| p & m == *d)
}

impl fmt::Display for AclFieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::U8(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::Enum(v) => write!(f, "{}", v),
            Self::Mac(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
            Self::Ipv4(addr) => write!(f, "{}", addr),
            Self::Ipv6(addr) => write!(f, "{}", addr),
            Self::Oid(oid) => write!(f, "0x{:x}", oid),
            Self::OidList(oids) => write!(f, "[{} objects]", oids.len()),
            Self::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for AclFieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for AclFieldValue {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<u16> for AclFieldValue {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for AclFieldValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<Ipv4Addr> for AclFieldValue {
    fn from(addr: Ipv4Addr) -> Self {
        Self::Ipv4(addr)
    }
}

impl From<Ipv6Addr> for AclFieldValue {
    fn from(addr: Ipv6Addr) -> Self {
        Self::Ipv6(addr)
    }
}
