//! Recognized packet fields and the concrete flow a lookup is performed against.

use std::fmt;

/// A field recognized by the classifier. Values are always represented as
/// a single `u32` in network-significant order; fields wider than 32 bits
/// (e.g. Ethernet addresses) are truncated to their low 32 bits by the
/// caller before being placed in a `Flow` or `Match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    InPort,
    EthType,
    EthSrc,
    EthDst,
    VlanVid,
    Ipv4Src,
    Ipv4Dst,
    IpProto,
    L4SrcPort,
    L4DstPort,
}

impl FieldId {
    /// The complete set of recognized fields, in a fixed, stable order.
    pub const ALL: [FieldId; 10] = [
        FieldId::InPort,
        FieldId::EthType,
        FieldId::EthSrc,
        FieldId::EthDst,
        FieldId::VlanVid,
        FieldId::Ipv4Src,
        FieldId::Ipv4Dst,
        FieldId::IpProto,
        FieldId::L4SrcPort,
        FieldId::L4DstPort,
    ];

    /// Candidate fields considered by the builder when choosing a split,
    /// in the order they are tried. Mirrors the original source's
    /// preference for the highest-cardinality header fields first.
    pub const SPLIT_CANDIDATES: [FieldId; 7] = [
        FieldId::Ipv4Src,
        FieldId::Ipv4Dst,
        FieldId::L4SrcPort,
        FieldId::L4DstPort,
        FieldId::IpProto,
        FieldId::InPort,
        FieldId::EthType,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap()
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldId::InPort => "in_port",
            FieldId::EthType => "eth_type",
            FieldId::EthSrc => "eth_src",
            FieldId::EthDst => "eth_dst",
            FieldId::VlanVid => "vlan_vid",
            FieldId::Ipv4Src => "ipv4_src",
            FieldId::Ipv4Dst => "ipv4_dst",
            FieldId::IpProto => "ip_proto",
            FieldId::L4SrcPort => "l4_src_port",
            FieldId::L4DstPort => "l4_dst_port",
        };
        f.write_str(name)
    }
}

/// A fully specified assignment of values to every recognized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flow {
    values: [u32; FieldId::ALL.len()],
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: FieldId) -> u32 {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: FieldId, value: u32) -> &mut Self {
        self.values[field.index()] = value;
        self
    }

    pub fn with(mut self, field: FieldId, value: u32) -> Self {
        self.set(field, value);
        self
    }
}
