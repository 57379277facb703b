//! Decoded device records
//!
//! Typed views over the attribute maps RouterOS returns. Field names on the
//! wire are kebab-case (`rx-bits-per-second`, `mac-address`); the JSON
//! serialization uses camelCase, matching what the browser clients already
//! consume.

use serde::{Deserialize, Serialize};

use super::proto::Reply;

/// One traffic reading for a monitored interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    /// Receive rate in bits per second
    pub rx_bps: u64,
    /// Transmit rate in bits per second
    pub tx_bps: u64,
}

impl TrafficSample {
    /// Build a sample from a `monitor-traffic` data reply.
    ///
    /// A missing or garbled counter reads as zero; the sample is still
    /// delivered.
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            rx_bps: counter(reply, "rx-bits-per-second"),
            tx_bps: counter(reply, "tx-bits-per-second"),
        }
    }
}

fn counter(reply: &Reply, key: &str) -> u64 {
    reply
        .attribute(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// One record from `/interface/print`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRecord {
    /// Interface name (`ether1`, `wlan1`, ...)
    pub name: String,
    /// Interface type as reported by the device
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub running: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl InterfaceRecord {
    /// Build a record from an `/interface/print` data reply.
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            name: reply.attribute("name").unwrap_or_default().to_owned(),
            kind: reply.attribute("type").unwrap_or_default().to_owned(),
            mtu: reply.attribute("mtu").and_then(|v| v.parse().ok()),
            mac_address: reply.attribute("mac-address").map(str::to_owned),
            running: flag(reply, "running"),
            disabled: flag(reply, "disabled"),
            comment: reply.attribute("comment").map(str::to_owned),
        }
    }
}

/// The record from `/system/resource/print`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub uptime: String,
    pub version: String,
    pub board_name: String,
    /// CPU load in percent
    pub cpu_load: u64,
    /// Free RAM in bytes
    pub free_memory: u64,
    /// Total RAM in bytes
    pub total_memory: u64,
}

impl ResourceSnapshot {
    /// Build a snapshot from a `/system/resource/print` data reply.
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            uptime: reply.attribute("uptime").unwrap_or_default().to_owned(),
            version: reply.attribute("version").unwrap_or_default().to_owned(),
            board_name: reply.attribute("board-name").unwrap_or_default().to_owned(),
            cpu_load: counter(reply, "cpu-load"),
            free_memory: counter(reply, "free-memory"),
            total_memory: counter(reply, "total-memory"),
        }
    }
}

fn flag(reply: &Reply, key: &str) -> bool {
    reply.attribute(key) == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_reply(attrs: &[(&str, &str)]) -> Reply {
        let mut words: Vec<String> = vec!["!re".into()];
        words.extend(attrs.iter().map(|(k, v)| format!("={k}={v}")));
        Reply::parse(&words).unwrap()
    }

    #[test]
    fn test_traffic_sample_from_reply() {
        let reply = data_reply(&[
            ("rx-bits-per-second", "1000"),
            ("tx-bits-per-second", "500"),
        ]);
        let sample = TrafficSample::from_reply(&reply);

        assert_eq!(sample.rx_bps, 1000);
        assert_eq!(sample.tx_bps, 500);
    }

    #[test]
    fn test_traffic_sample_missing_counter() {
        let reply = data_reply(&[("rx-bits-per-second", "1000")]);
        let sample = TrafficSample::from_reply(&reply);

        assert_eq!(sample.rx_bps, 1000);
        assert_eq!(sample.tx_bps, 0);
    }

    #[test]
    fn test_interface_record_from_reply() {
        let reply = data_reply(&[
            ("name", "ether1"),
            ("type", "ether"),
            ("mtu", "1500"),
            ("mac-address", "AA:BB:CC:DD:EE:FF"),
            ("running", "true"),
            ("disabled", "false"),
        ]);
        let record = InterfaceRecord::from_reply(&reply);

        assert_eq!(record.name, "ether1");
        assert_eq!(record.kind, "ether");
        assert_eq!(record.mtu, Some(1500));
        assert!(record.running);
        assert!(!record.disabled);
        assert!(record.comment.is_none());
    }

    #[test]
    fn test_interface_record_serializes_camel_case() {
        let reply = data_reply(&[
            ("name", "ether1"),
            ("type", "ether"),
            ("mac-address", "AA:BB:CC:DD:EE:FF"),
        ]);
        let json = serde_json::to_value(InterfaceRecord::from_reply(&reply)).unwrap();

        assert_eq!(json["name"], "ether1");
        assert_eq!(json["type"], "ether");
        assert_eq!(json["macAddress"], "AA:BB:CC:DD:EE:FF");
        // absent optionals are omitted, not null
        assert!(json.get("mtu").is_none());
    }

    #[test]
    fn test_resource_snapshot_from_reply() {
        let reply = data_reply(&[
            ("uptime", "1w2d3h4m5s"),
            ("version", "7.14.2"),
            ("board-name", "RB4011"),
            ("cpu-load", "12"),
            ("free-memory", "536870912"),
            ("total-memory", "1073741824"),
        ]);
        let snapshot = ResourceSnapshot::from_reply(&reply);

        assert_eq!(snapshot.version, "7.14.2");
        assert_eq!(snapshot.cpu_load, 12);
        assert_eq!(snapshot.total_memory, 1_073_741_824);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["boardName"], "RB4011");
        assert_eq!(json["freeMemory"], 536_870_912u64);
    }
}
