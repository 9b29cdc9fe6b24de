//! ACL types and enums.
//!
//! Stages, match fields, action types and the other small vocabularies of
//! the ACL store. Every enum has a stable upper-case name used by
//! `Display`, `FromStr` and the serde representation of policy files.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sonic_sai::UdfGroupOid;
use std::fmt;
use std::str::FromStr;

/// Rule priority within a table (higher value = evaluated first).
pub type AclPriority = u32;

/// Table priority across tables of the same stage (higher value wins).
pub type AclTablePriority = u64;

/// Small-integer table identifier handed out by the table id allocator.
pub type AclTableIndex = u32;

/// First allocatable table index (SAI_ACL_TABLE_ID_MIN).
pub const ACL_TABLE_ID_MIN: AclTableIndex = 0x1;

/// Last allocatable table index (SAI_ACL_TABLE_ID_MAX).
pub const ACL_TABLE_ID_MAX: AclTableIndex = 0x20;

/// Reserved "unset" table index (SAI_ACL_INVALID_TABLE_ID).
pub const ACL_INVALID_TABLE_ID: AclTableIndex = 0;

/// Serializes a type through its `Display`/`FromStr` pair.
macro_rules! string_serde {
    ($($ty:ty),+ $(,)?) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    )+};
}

/// Declares a fieldless enum with upper-case names and optional aliases.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $what:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Returns the canonical upper-case name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_uppercase().as_str() {
                    $($text $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(format!("Unknown {}: {}", $what, s)),
                }
            }
        }

        string_serde!($name);
    };
}

named_enum! {
    /// ACL stage (pipeline position of a table).
    pub enum AclStage as "ACL stage" {
        /// Applied to incoming packets.
        Ingress => "INGRESS",
        /// Applied to outgoing packets.
        Egress => "EGRESS",
    }
}

impl Default for AclStage {
    fn default() -> Self {
        Self::Ingress
    }
}

named_enum! {
    /// Administrative state of a rule.
    ///
    /// Disabled rules stay indexed and ordered but are skipped by the
    /// evaluator.
    pub enum AdminState as "admin state" {
        Enabled => "ENABLED" | "ENABLE" | "TRUE" | "UP",
        Disabled => "DISABLED" | "DISABLE" | "FALSE" | "DOWN",
    }
}

impl Default for AdminState {
    fn default() -> Self {
        Self::Enabled
    }
}

impl From<bool> for AdminState {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

named_enum! {
    /// What an ACL counter counts.
    pub enum CounterMode as "counter mode" {
        Bytes => "BYTES",
        Packets => "PACKETS",
        BytesAndPackets => "BYTES_PACKETS" | "BOTH",
    }
}

impl Default for CounterMode {
    fn default() -> Self {
        Self::BytesAndPackets
    }
}

named_enum! {
    /// Direction of a sample-packet session attached to a rule.
    pub enum SampleDirection as "sample direction" {
        Ingress => "INGRESS",
        Egress => "EGRESS",
    }
}

impl SampleDirection {
    /// Number of directions (SAI_SAMPLEPACKET_DIR_MAX).
    pub const COUNT: usize = 2;

    /// Slot of this direction in a rule's sample session array.
    pub fn index(&self) -> usize {
        match self {
            Self::Ingress => 0,
            Self::Egress => 1,
        }
    }

    /// All directions, in slot order.
    pub fn all() -> [SampleDirection; Self::COUNT] {
        [Self::Ingress, Self::Egress]
    }
}

named_enum! {
    /// ACL entry action types.
    pub enum AclActionType as "ACL action type" {
        PacketAction => "PACKET_ACTION",
        Redirect => "REDIRECT" | "REDIRECT_ACTION",
        RedirectList => "REDIRECT_LIST",
        Flood => "FLOOD",
        MirrorIngress => "MIRROR_INGRESS" | "MIRROR_INGRESS_ACTION",
        MirrorEgress => "MIRROR_EGRESS" | "MIRROR_EGRESS_ACTION",
        DecrementTtl => "DECREMENT_TTL",
        SetTc => "SET_TC",
        SetPacketColor => "SET_PACKET_COLOR",
        SetInnerVlanId => "SET_INNER_VLAN_ID",
        SetInnerVlanPri => "SET_INNER_VLAN_PRI",
        SetOuterVlanId => "SET_OUTER_VLAN_ID",
        SetOuterVlanPri => "SET_OUTER_VLAN_PRI",
        SetSrcMac => "SET_SRC_MAC",
        SetDstMac => "SET_DST_MAC",
        SetSrcIp => "SET_SRC_IP",
        SetDstIp => "SET_DST_IP",
        SetSrcIpv6 => "SET_SRC_IPV6",
        SetDstIpv6 => "SET_DST_IPV6",
        SetDscp => "SET_DSCP",
        SetEcn => "SET_ECN",
        SetL4SrcPort => "SET_L4_SRC_PORT",
        SetL4DstPort => "SET_L4_DST_PORT",
        SetCpuQueue => "SET_CPU_QUEUE",
        SetAclMetaData => "SET_ACL_META_DATA" | "SET_META_DATA",
        EgressBlockPortList => "EGRESS_BLOCK_PORT_LIST",
        SetUserTrapId => "SET_USER_TRAP_ID",
    }
}

named_enum! {
    /// Packet action carried by a `PACKET_ACTION` action.
    pub enum AclPacketAction as "packet action" {
        Drop => "DROP",
        Forward => "FORWARD",
        Copy => "COPY",
        CopyCancel => "COPY_CANCEL",
        Trap => "TRAP",
        Log => "LOG",
        Deny => "DENY",
        Transit => "TRANSIT",
    }
}

impl AclPacketAction {
    /// SAI encoding (`sai_packet_action_t`).
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Drop => 0,
            Self::Forward => 1,
            Self::Copy => 2,
            Self::CopyCancel => 3,
            Self::Trap => 4,
            Self::Log => 5,
            Self::Deny => 6,
            Self::Transit => 7,
        }
    }

    /// Decodes the SAI encoding.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Drop,
            1 => Self::Forward,
            2 => Self::Copy,
            3 => Self::CopyCancel,
            4 => Self::Trap,
            5 => Self::Log,
            6 => Self::Deny,
            7 => Self::Transit,
            _ => return None,
        })
    }
}

impl Default for AclPacketAction {
    fn default() -> Self {
        Self::Forward
    }
}

/// Declares [`AclMatchField`]: the standard SAI qualifiers plus
/// user-defined fields addressed by index.
macro_rules! match_fields {
    ($($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?) => {
        /// ACL match field (qualifier) specifier.
        ///
        /// `UserDefined(n)` denotes the n-th UDF qualifier of a table; its
        /// byte window is resolved through the UDF group the filter names.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum AclMatchField {
            $($variant,)+
            UserDefined(u16),
        }

        impl AclMatchField {
            /// Every standard (non-UDF) field.
            pub const STANDARD: &'static [AclMatchField] = &[$(AclMatchField::$variant,)+];
        }

        impl fmt::Display for AclMatchField {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($text),)+
                    Self::UserDefined(index) => write!(f, "{}{}", UDF_FIELD_PREFIX, index),
                }
            }
        }

        impl FromStr for AclMatchField {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.to_uppercase();
                if let Some(index) = upper.strip_prefix(UDF_FIELD_PREFIX) {
                    return index
                        .parse()
                        .map(Self::UserDefined)
                        .map_err(|_| format!("Invalid user defined field index: {}", s));
                }
                match upper.as_str() {
                    $($text $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(format!("Unknown ACL match field: {}", s)),
                }
            }
        }
    };
}

const UDF_FIELD_PREFIX: &str = "USER_DEFINED_";

match_fields! {
    SrcIpv6 => "SRC_IPV6",
    DstIpv6 => "DST_IPV6",
    InnerSrcIpv6 => "INNER_SRC_IPV6",
    InnerDstIpv6 => "INNER_DST_IPV6",
    SrcMac => "SRC_MAC",
    DstMac => "DST_MAC",
    SrcIp => "SRC_IP",
    DstIp => "DST_IP",
    InnerSrcIp => "INNER_SRC_IP",
    InnerDstIp => "INNER_DST_IP",
    InPorts => "IN_PORTS",
    OutPorts => "OUT_PORTS",
    InPort => "IN_PORT",
    OutPort => "OUT_PORT",
    SrcPort => "SRC_PORT",
    OuterVlanId => "OUTER_VLAN_ID" | "VLAN_ID",
    OuterVlanPri => "OUTER_VLAN_PRI",
    OuterVlanCfi => "OUTER_VLAN_CFI",
    InnerVlanId => "INNER_VLAN_ID",
    InnerVlanPri => "INNER_VLAN_PRI",
    InnerVlanCfi => "INNER_VLAN_CFI",
    L4SrcPort => "L4_SRC_PORT",
    L4DstPort => "L4_DST_PORT",
    EtherType => "ETHER_TYPE",
    IpProtocol => "IP_PROTOCOL",
    Ipv6NextHeader => "IPV6_NEXT_HEADER" | "NEXT_HEADER",
    Dscp => "DSCP",
    Ecn => "ECN",
    Ttl => "TTL",
    Tos => "TOS",
    IpFlags => "IP_FLAGS",
    TcpFlags => "TCP_FLAGS",
    IpType => "ACL_IP_TYPE" | "IP_TYPE",
    IpFrag => "ACL_IP_FRAG" | "IP_FRAG",
    Ipv6FlowLabel => "IPV6_FLOW_LABEL",
    Tc => "TC",
    IcmpType => "ICMP_TYPE",
    IcmpCode => "ICMP_CODE",
    Icmpv6Type => "ICMPV6_TYPE",
    Icmpv6Code => "ICMPV6_CODE",
    PacketVlan => "PACKET_VLAN",
    TunnelVni => "TUNNEL_VNI",
    FdbDstUserMeta => "FDB_DST_USER_META",
    RouteDstUserMeta => "ROUTE_DST_USER_META",
    NeighborDstUserMeta => "NEIGHBOR_DST_USER_META",
    PortUserMeta => "PORT_USER_META",
    VlanUserMeta => "VLAN_USER_META",
    AclUserMeta => "ACL_USER_META" | "ACL_META_DATA",
    FdbNpuMetaDstHit => "FDB_NPU_META_DST_HIT",
    NeighborNpuMetaDstHit => "NEIGHBOR_NPU_META_DST_HIT",
    RouteNpuMetaDstHit => "ROUTE_NPU_META_DST_HIT",
    AclRangeType => "ACL_RANGE_TYPE",
}

impl AclMatchField {
    /// Returns true for user-defined (UDF) qualifiers.
    pub fn is_user_defined(&self) -> bool {
        matches!(self, Self::UserDefined(_))
    }
}

string_serde!(AclMatchField);

/// UDF addressing: the UDF group supplying the bytes and the qualifier index
/// the group is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UdfField {
    /// UDF group object.
    pub group: UdfGroupOid,
    /// Index of the `USER_DEFINED_n` qualifier.
    pub index: u16,
}

impl UdfField {
    /// Creates UDF addressing.
    pub fn new(group: UdfGroupOid, index: u16) -> Self {
        Self { group, index }
    }

    /// The match field this UDF is exposed as.
    pub fn field(&self) -> AclMatchField {
        AclMatchField::UserDefined(self.index)
    }
}

impl fmt::Display for UdfField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UDF[{}]@{}", self.index, self.group)
    }
}
