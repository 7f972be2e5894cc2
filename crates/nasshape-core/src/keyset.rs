// ── Key-set utilities ──
//
// Parsing of the free-form subnet and device-scope lists stored on a
// traffic class, and the set arithmetic the orchestrators diff with.

use std::collections::BTreeSet;

use ipnet::IpNet;

use crate::error::CoreError;
use crate::model::DeviceId;

/// Parse a comma- or newline-separated subnet list. Blank items are
/// skipped; a bare address is taken as a host route.
pub fn parse_subnets(raw: &str) -> Result<Vec<IpNet>, CoreError> {
    let mut seen = BTreeSet::new();
    let mut subnets = Vec::new();

    for item in split_list(raw) {
        let net = item
            .parse::<IpNet>()
            .or_else(|_| item.parse::<std::net::IpAddr>().map(IpNet::from))
            .map_err(|_| CoreError::InvalidSubnetList {
                input: raw.to_owned(),
                reason: format!("'{item}' is not an IP network"),
            })?;
        // Dedupe while keeping operator order.
        if seen.insert(net) {
            subnets.push(net);
        }
    }
    Ok(subnets)
}

/// Parse a comma-separated list of device ids. Empty means "no explicit scope".
pub fn parse_device_ids(raw: &str) -> Result<BTreeSet<DeviceId>, CoreError> {
    split_list(raw)
        .map(|item| {
            item.parse::<DeviceId>()
                .map_err(|e| CoreError::InvalidDeviceList {
                    input: raw.to_owned(),
                    reason: format!("'{item}': {e}"),
                })
        })
        .collect()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Elements of `previous` missing from `next`.
pub fn removed<T: Ord + Copy>(previous: &BTreeSet<T>, next: &BTreeSet<T>) -> BTreeSet<T> {
    previous.difference(next).copied().collect()
}

/// Union of two key sets.
pub fn union<T: Ord + Copy>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> BTreeSet<T> {
    a.union(b).copied().collect()
}

/// Resolve a target device set: the explicit ids that are also active, or
/// every active device when no explicit scope is given.
pub fn resolve_scope(
    explicit: &BTreeSet<DeviceId>,
    active: &BTreeSet<DeviceId>,
) -> BTreeSet<DeviceId> {
    if explicit.is_empty() {
        active.clone()
    } else {
        explicit.intersection(active).copied().collect()
    }
}
