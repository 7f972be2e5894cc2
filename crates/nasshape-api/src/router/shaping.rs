// Traffic-shaping endpoints
//
// Address lists classify, mangle rules mark, PCQ queue types and queue-tree
// entries meter. Every artifact is keyed by the traffic class name (and the
// speed tier for queue setups) so a sync can always find what an earlier
// sync created.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use super::client::{RouterClient, fields};
use super::models::{AddressListEntry, IpPool};
use crate::error::Error;

const ADDRESS_LIST: &str = "ip/firewall/address-list";
const MANGLE: &str = "ip/firewall/mangle";
const QUEUE_TYPE: &str = "queue/type";
const QUEUE_TREE: &str = "queue/tree";
const IP_POOL: &str = "ip/pool";

/// Traffic direction relative to the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Up,
}

impl Direction {
    pub const BOTH: [Self; 2] = [Self::Down, Self::Up];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Up => "up",
        }
    }
}

// ── Artifact naming ──────────────────────────────────────────────────

/// Address list holding a traffic class's subnets.
pub fn address_list_name(class_name: &str) -> String {
    format!("nasshape-{class_name}")
}

/// Packet mark set by a class's classification rule.
pub fn packet_mark(class_name: &str, dir: Direction) -> String {
    format!("nasshape-{class_name}-{}", dir.as_str())
}

/// Name shared by the PCQ queue type, queue-tree entry and packet mark of
/// one (class, speed) queue setup.
pub fn queue_name(class_name: &str, speed_limit: u32, dir: Direction) -> String {
    format!("nasshape-{class_name}-{speed_limit}-{}", dir.as_str())
}

fn pool_list_name(class_name: &str, speed_limit: u32) -> String {
    format!("nasshape-{class_name}-{speed_limit}-pool")
}

fn class_comment(class_name: &str, dir: Direction) -> String {
    format!("nasshape:{class_name}:{}", dir.as_str())
}

fn queue_comment(class_name: &str, speed_limit: u32, dir: Direction) -> String {
    format!("nasshape:{class_name}:{speed_limit}:{}", dir.as_str())
}

/// Desired PCQ setup for one (class, speed tier) on one router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSpec {
    pub class_name: String,
    /// Contracted speed tier in kbps. Part of the artifact key; never scaled.
    pub speed_limit: u32,
    /// Per-flow rate actually pushed, in kbps (speed tier after multipliers).
    pub rate_limit: u32,
    /// Packets per PCQ sub-queue.
    pub pcq_limit: u32,
    /// Packets across all PCQ sub-queues.
    pub pcq_total_limit: u32,
    /// Router IP pools whose subscribers are metered by this setup.
    pub pools: Vec<String>,
}

impl RouterClient {
    // ── Address lists and mark rules ─────────────────────────────────

    /// Make the class address list contain exactly `subnets`.
    pub async fn sync_address_list(&self, class_name: &str, subnets: &[String]) -> Result<(), Error> {
        let list = address_list_name(class_name);
        self.sync_list_entries(&list, subnets, class_name).await
    }

    /// Ensure the two classification rules (download and upload) for a class.
    pub async fn sync_mark_rule(&self, class_name: &str) -> Result<(), Error> {
        let list = address_list_name(class_name);
        for dir in Direction::BOTH {
            let comment = class_comment(class_name, dir);
            // CDN traffic arrives from the class subnets on the way down.
            let match_field = match dir {
                Direction::Down => "src-address-list",
                Direction::Up => "dst-address-list",
            };
            let desired = fields(&[
                ("chain", "forward".into()),
                ("action", "mark-packet".into()),
                (match_field, list.clone()),
                ("new-packet-mark", packet_mark(class_name, dir)),
                ("passthrough", "true".into()),
                ("comment", comment.clone()),
            ]);
            self.ensure_one(MANGLE, &[("comment", &comment)], &desired)
                .await?;
        }
        debug!(class = class_name, "mark rules in sync");
        Ok(())
    }

    /// Tear down the class address list and its classification rules.
    pub async fn remove_address_list_and_mark_rule(&self, class_name: &str) -> Result<(), Error> {
        for dir in Direction::BOTH {
            let comment = class_comment(class_name, dir);
            self.remove_matching(MANGLE, &[("comment", &comment)]).await?;
        }
        let list = address_list_name(class_name);
        let removed = self.remove_matching(ADDRESS_LIST, &[("list", &list)]).await?;
        info!(class = class_name, entries = removed, "removed address list and mark rules");
        Ok(())
    }

    // ── PCQ queue setups ─────────────────────────────────────────────

    /// Push a full PCQ setup: pool address list, per-tier mark rules,
    /// queue types and queue-tree entries, in that order.
    pub async fn sync_queue_setup(&self, spec: &QueueSpec) -> Result<(), Error> {
        let class_list = address_list_name(&spec.class_name);
        let pool_list = pool_list_name(&spec.class_name, spec.speed_limit);

        let mut ranges = Vec::new();
        for pool in &spec.pools {
            let found: Vec<IpPool> = self.list(IP_POOL, &[("name", pool)]).await?;
            if found.is_empty() {
                return Err(Error::RouterApi {
                    message: format!("IP pool '{pool}' does not exist"),
                    status: 404,
                });
            }
            ranges.extend(found.iter().flat_map(|p| {
                p.ranges
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            }));
        }
        self.sync_list_entries(&pool_list, &ranges, &spec.class_name)
            .await?;

        for dir in Direction::BOTH {
            let name = queue_name(&spec.class_name, spec.speed_limit, dir);
            let comment = queue_comment(&spec.class_name, spec.speed_limit, dir);
            let (src, dst, classifier) = match dir {
                Direction::Down => (&class_list, &pool_list, "dst-address"),
                Direction::Up => (&pool_list, &class_list, "src-address"),
            };

            let mangle = fields(&[
                ("chain", "forward".into()),
                ("action", "mark-packet".into()),
                ("src-address-list", src.clone()),
                ("dst-address-list", dst.clone()),
                ("new-packet-mark", name.clone()),
                ("passthrough", "false".into()),
                ("comment", comment.clone()),
            ]);
            self.ensure_one(MANGLE, &[("comment", &comment)], &mangle)
                .await?;

            let queue_type = fields(&[
                ("name", name.clone()),
                ("kind", "pcq".into()),
                ("pcq-rate", format!("{}k", spec.rate_limit)),
                ("pcq-limit", spec.pcq_limit.to_string()),
                ("pcq-total-limit", spec.pcq_total_limit.to_string()),
                ("pcq-classifier", classifier.into()),
            ]);
            self.ensure_one(QUEUE_TYPE, &[("name", &name)], &queue_type)
                .await?;

            let tree = fields(&[
                ("name", name.clone()),
                ("parent", "global".into()),
                ("packet-mark", name.clone()),
                ("queue", name.clone()),
            ]);
            self.ensure_one(QUEUE_TREE, &[("name", &name)], &tree).await?;
        }

        info!(
            class = %spec.class_name,
            speed_limit = spec.speed_limit,
            rate_limit = spec.rate_limit,
            "queue setup in sync"
        );
        Ok(())
    }

    /// Remove one (class, speed) PCQ setup. Queue-tree entries go before
    /// the queue types they reference.
    pub async fn remove_queue_setup(&self, class_name: &str, speed_limit: u32) -> Result<(), Error> {
        for dir in Direction::BOTH {
            let name = queue_name(class_name, speed_limit, dir);
            self.remove_matching(QUEUE_TREE, &[("name", &name)]).await?;
            self.remove_matching(QUEUE_TYPE, &[("name", &name)]).await?;
            let comment = queue_comment(class_name, speed_limit, dir);
            self.remove_matching(MANGLE, &[("comment", &comment)]).await?;
        }
        let pool_list = pool_list_name(class_name, speed_limit);
        self.remove_matching(ADDRESS_LIST, &[("list", &pool_list)])
            .await?;
        info!(class = class_name, speed_limit, "removed queue setup");
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Make `list` contain exactly `desired` addresses.
    async fn sync_list_entries(
        &self,
        list: &str,
        desired: &[String],
        comment: &str,
    ) -> Result<(), Error> {
        let existing: Vec<AddressListEntry> = self.list(ADDRESS_LIST, &[("list", list)]).await?;
        let wanted: BTreeSet<String> = desired.iter().map(|a| normalize_address(a)).collect();
        let present: BTreeSet<String> = existing
            .iter()
            .map(|e| normalize_address(&e.address))
            .collect();

        for entry in &existing {
            if !wanted.contains(&normalize_address(&entry.address)) {
                self.remove(ADDRESS_LIST, &entry.id).await?;
            }
        }

        for address in wanted.difference(&present) {
            let body = fields(&[
                ("list", list.to_owned()),
                ("address", address.clone()),
                ("comment", comment.to_owned()),
            ]);
            self.create(ADDRESS_LIST, &body).await?;
        }

        debug!(list, entries = wanted.len(), "address list in sync");
        Ok(())
    }
}

/// RouterOS drops a `/32` suffix on host entries; compare without it.
fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix("/32").unwrap_or(trimmed).to_owned()
}
