// Router REST API response types
//
// RouterOS returns every scalar as a JSON string, including counters and
// booleans. Numeric accessors parse lazily so a single odd field never
// fails the whole listing.

use serde::{Deserialize, Serialize};

/// Error body returned with non-2xx statuses:
/// `{"error":404,"message":"Not Found","detail":"no such item"}`.
#[derive(Debug, Deserialize)]
pub(crate) struct RouterErrorBody {
    pub message: Option<String>,
    pub detail: Option<String>,
}

/// One `/ip/firewall/address-list` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressListEntry {
    #[serde(rename = ".id")]
    pub id: String,
    pub list: String,
    pub address: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One `/ip/pool` entry. `ranges` is a comma-separated list of
/// `a.b.c.d-e.f.g.h` ranges or prefixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpPool {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ranges: String,
}

/// Generic row with only an id, used for removals.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IdOnly {
    #[serde(rename = ".id")]
    pub id: String,
}

/// One `/ppp/active` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PppActive {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
}

/// Byte counters of one `/interface` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceStats {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rx_byte: Option<String>,
    #[serde(default)]
    pub tx_byte: Option<String>,
}

impl InterfaceStats {
    pub fn rx_bytes(&self) -> u64 {
        parse_counter(self.rx_byte.as_deref())
    }

    pub fn tx_bytes(&self) -> u64 {
        parse_counter(self.tx_byte.as_deref())
    }
}

/// One `/queue/simple` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimpleQueue {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub max_limit: Option<String>,
}

/// Live state of a subscriber session as seen by the router.
///
/// Counters are from the router's perspective on the subscriber's dynamic
/// interface: `bytes_in` is traffic received from the subscriber (upload),
/// `bytes_out` is traffic sent to the subscriber (download).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub id: String,
    pub session_id: Option<String>,
    pub address: Option<String>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

fn parse_counter(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
