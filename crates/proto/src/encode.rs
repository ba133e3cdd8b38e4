//! Outbound PUSH_DATA datagram builders

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::json;

use loragate_radio::{ChipSettings, RadioSample, TrafficStats};

use crate::{Eui, Location, PKT_PUSH_DATA, PROTOCOL_VERSION};

/// Wrap a JSON body into a PUSH_DATA datagram with a fresh random token.
fn push_data(eui: &Eui, body: &str) -> Vec<u8> {
    let token: u16 = rand::rng().random();
    let mut pkt = Vec::with_capacity(12 + body.len());
    pkt.push(PROTOCOL_VERSION);
    pkt.extend_from_slice(&token.to_be_bytes());
    pkt.push(PKT_PUSH_DATA);
    pkt.extend_from_slice(eui.as_bytes());
    pkt.extend_from_slice(body.as_bytes());
    pkt
}

/// PUSH_DATA datagram carrying one received radio packet (`rxpk`).
pub fn data_packet(eui: &Eui, settings: &ChipSettings, sample: &RadioSample) -> Vec<u8> {
    let now = Utc::now();
    let body = json!({
        "rxpk": [{
            "time": now.to_rfc3339_opts(SecondsFormat::Micros, true),
            "tmst": now.timestamp_micros() as u32,
            "chan": 0,
            "rfch": 0,
            "freq": settings.carrier_frequency_mhz,
            "stat": 1,
            "modu": "LORA",
            "datr": format!(
                "SF{}BW{}",
                settings.spreading_factor,
                settings.bandwidth_khz.round() as u32
            ),
            "codr": format!("4/{}", settings.coding_rate),
            "rssi": sample.rssi.round() as i32,
            "lsnr": sample.snr,
            "size": sample.payload().len(),
            "data": BASE64_STANDARD.encode(sample.payload()),
        }]
    });
    push_data(eui, &body.to_string())
}

/// PUSH_DATA datagram carrying a gateway statistics update (`stat`).
pub fn stat_packet(eui: &Eui, location: Option<&Location>, stats: &TrafficStats) -> Vec<u8> {
    let ackr = if stats.forw_packets == 0 {
        100.0
    } else {
        100.0 * stats.forw_packets_crc_good as f64 / stats.forw_packets as f64
    };
    let mut stat = json!({
        "time": Utc::now().format("%Y-%m-%d %H:%M:%S GMT").to_string(),
        "rxnb": stats.recv_packets,
        "rxok": stats.recv_packets_crc_good,
        "rxfw": stats.forw_packets,
        "ackr": ackr,
        "dwnb": 0,
        "txnb": 0,
    });
    if let Some(loc) = location {
        stat["lati"] = json!(loc.latitude);
        stat["long"] = json!(loc.longitude);
        stat["alti"] = json!(loc.altitude);
    }
    push_data(eui, &json!({ "stat": stat }).to_string())
}
