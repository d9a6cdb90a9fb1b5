//! Outbound notification schema.

use std::net::Ipv4Addr;

use serde::Serialize;

use crate::core::flow::{FlowRecord, Protocol};

/// Direction of the interface a flow was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceDirection {
    Ingress,
    Egress,
}

/// Attack identities carried by detection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackType {
    SynFlood,
}

/// Metrics of one flow as reported to the management plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficFlowEvent {
    pub interface_name: String,
    pub interface_type: InterfaceDirection,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
    /// Length of the measurement window in seconds.
    pub measurement_time: u32,
    pub arrival_rate: u64,
    pub arrival_throughput: u64,
}

impl TrafficFlowEvent {
    /// Build the event for a flow snapshot. `src_port` is the enriched source
    /// identity, which may differ from the observed port.
    pub fn from_record(
        record: &FlowRecord,
        interface_name: &str,
        interface_type: InterfaceDirection,
        src_port: u16,
    ) -> Self {
        let metrics = record.metrics();
        Self {
            interface_name: interface_name.to_string(),
            interface_type,
            src_ip: record.source_address,
            dst_ip: record.destination_address,
            protocol: record.protocol,
            src_port,
            dst_port: record.destination_port,
            measurement_time: metrics.measurement_secs(),
            arrival_rate: metrics.rate_per_sec(),
            arrival_throughput: metrics.throughput_per_sec(),
        }
    }
}

/// A structured event delivered over the notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    TrafficFlows(TrafficFlowEvent),
    LinkUp { if_index: u32, flags: Vec<u32> },
    LinkDown { if_index: u32 },
    NsfDetectionDdos { attack_type: AttackType },
}

impl Notification {
    /// Link-up event with one or two link-property flag words.
    pub fn link_up(if_index: u32, flags: u32, extra_flags: Option<u32>) -> Self {
        let mut all = vec![flags];
        all.extend(extra_flags);
        Notification::LinkUp {
            if_index,
            flags: all,
        }
    }

    pub fn link_down(if_index: u32) -> Self {
        Notification::LinkDown { if_index }
    }

    pub fn ddos_detection(attack_type: AttackType) -> Self {
        Notification::NsfDetectionDdos { attack_type }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TrafficFlows(_) => "traffic-flows",
            Notification::LinkUp { .. } => "link-up",
            Notification::LinkDown { .. } => "link-down",
            Notification::NsfDetectionDdos { .. } => "nsf-detection-ddos",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::core::flow::FlowKey;

    fn record() -> FlowRecord {
        let t0 = Instant::now();
        let key = FlowKey {
            source_address: Ipv4Addr::new(192, 168, 1, 20),
            destination_address: Ipv4Addr::new(10, 0, 0, 1),
            protocol: Protocol::Tcp,
            destination_port: 80,
        };
        let mut r = FlowRecord::new(key, 40000, 100, t0);
        r.record_packet(40000, 1400, t0 + Duration::from_secs(2), Duration::from_secs(5));
        r
    }

    #[test]
    fn test_traffic_flow_event_from_record() {
        let event = TrafficFlowEvent::from_record(&record(), "ens3", InterfaceDirection::Ingress, 8443);
        assert_eq!(event.src_port, 8443);
        assert_eq!(event.dst_port, 80);
        assert_eq!(event.measurement_time, 2);
        assert_eq!(event.arrival_rate, 1);
        assert_eq!(event.arrival_throughput, 750);
    }

    #[test]
    fn test_traffic_flow_serializes_with_event_tag() {
        let event = TrafficFlowEvent::from_record(&record(), "ens3", InterfaceDirection::Ingress, 40000);
        let value = serde_json::to_value(Notification::TrafficFlows(event)).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "traffic-flows",
                "interface_name": "ens3",
                "interface_type": "ingress",
                "src_ip": "192.168.1.20",
                "dst_ip": "10.0.0.1",
                "protocol": "tcp",
                "src_port": 40000,
                "dst_port": 80,
                "measurement_time": 2,
                "arrival_rate": 1,
                "arrival_throughput": 750
            })
        );
    }

    #[test]
    fn test_link_up_carries_one_or_two_flags() {
        assert_eq!(
            Notification::link_up(1, 2112, Some(32)),
            Notification::LinkUp {
                if_index: 1,
                flags: vec![2112, 32]
            }
        );
        assert_eq!(
            Notification::link_up(3, 7, None),
            Notification::LinkUp {
                if_index: 3,
                flags: vec![7]
            }
        );
    }

    #[test]
    fn test_detection_serializes_attack_identity() {
        let value = serde_json::to_value(Notification::ddos_detection(AttackType::SynFlood)).unwrap();
        assert_eq!(
            value,
            json!({"event": "nsf-detection-ddos", "attack_type": "syn-flood"})
        );
        assert_eq!(Notification::link_down(2).kind(), "link-down");
    }
}
