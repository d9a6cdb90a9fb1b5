//! Frame decoding and the flow-relevance heuristic.
//!
//! A packet is flow-relevant when its application payload starts with one of
//! the ASCII request-method signatures in [`METHOD_SIGNATURES`]. This only
//! catches plaintext HTTP-like requests; encrypted or binary payloads are never
//! classified.

use std::net::Ipv4Addr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::core::flow::{FlowKey, Protocol};

/// Payload prefixes that mark a packet as flow-relevant.
pub const METHOD_SIGNATURES: [&[u8]; 2] = [b"GET", b"POST"];

/// Transport layer of a decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp {
        source_port: u16,
        destination_port: u16,
    },
    Icmp,
    /// Any other transport (UDP, ...). Never tracked.
    Other,
}

/// One IPv4 packet as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub transport: Transport,
    /// Application payload following the transport header.
    pub payload: &'a [u8],
    /// Frame length on the wire, including the link header.
    pub wire_len: usize,
}

/// Outcome of classifying a flow-relevant packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedPacket {
    pub key: FlowKey,
    pub source_port: u16,
    pub size: u64,
}

/// Decode an Ethernet frame. Non-IPv4 and malformed frames yield `None`.
pub fn decode_frame(frame: &[u8], wire_len: usize) -> Option<DecodedPacket<'_>> {
    let sliced = SlicedPacket::from_ethernet(frame).ok()?;
    let Some(NetSlice::Ipv4(ipv4)) = sliced.net else {
        return None;
    };
    let header = ipv4.header();

    let (transport, payload): (Transport, &[u8]) = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            Transport::Tcp {
                source_port: tcp.source_port(),
                destination_port: tcp.destination_port(),
            },
            tcp.payload(),
        ),
        Some(TransportSlice::Icmpv4(icmp)) => (Transport::Icmp, icmp.payload()),
        Some(_) => (Transport::Other, &[][..]),
        None => return None,
    };

    Some(DecodedPacket {
        source: header.source_addr(),
        destination: header.destination_addr(),
        transport,
        payload,
        wire_len,
    })
}

/// True when `payload` starts with a known request-method signature.
pub fn has_method_signature(payload: &[u8]) -> bool {
    METHOD_SIGNATURES.iter().any(|sig| payload.starts_with(sig))
}

/// Turn a decoded packet into a flow observation, or `None` if it is not of interest.
/// TCP ports come from the header; ICMP reports both ports as zero.
pub fn classify(packet: &DecodedPacket<'_>) -> Option<ClassifiedPacket> {
    if packet.payload.is_empty() || !has_method_signature(packet.payload) {
        return None;
    }

    let (protocol, source_port, destination_port) = match packet.transport {
        Transport::Tcp {
            source_port,
            destination_port,
        } => (Protocol::Tcp, source_port, destination_port),
        Transport::Icmp => (Protocol::Icmp, 0, 0),
        Transport::Other => return None,
    };

    Some(ClassifiedPacket {
        key: FlowKey {
            source_address: packet.source,
            destination_address: packet.destination,
            protocol,
            destination_port,
        },
        source_port,
        size: packet.wire_len as u64,
    })
}
