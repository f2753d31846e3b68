//! # Rebalancing
//!
//! When the membership view changes, each node streams the local keys whose
//! ring owner moved to their new owners in bounded batches. Receivers only
//! accept batches at an exactly matching topology version, so a plan
//! computed against a stale view dies cleanly instead of scattering data.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use lkv_common::proto::{MigrationEntry, Request, Status};
use lkv_common::{LatticeError, LatticeResult};
use lkv_engine::RemovalCause;

use crate::router::DistributedCache;

/// Outcome of one rebalancing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Topology version the plan was computed at.
    pub topology_version: u64,
    /// Local keys examined.
    pub keys_examined: usize,
    /// Keys acknowledged by their new owner and removed locally.
    pub keys_moved: usize,
    /// Keys left behind for a later pass (unreachable owner, send failure).
    pub keys_skipped: usize,
    /// Batches sent over the wire.
    pub batches_sent: usize,
}

impl DistributedCache {
    /// Streams local keys whose owner changed to their new owners.
    ///
    /// Returns once every planned batch was attempted. A `StaleTopology`
    /// reply aborts the pass (the view moved again and the plan is dead);
    /// the caller re-runs after refreshing. Send failures skip the batch
    /// and leave its keys local for the next pass.
    pub async fn rebalance(&self) -> LatticeResult<MigrationReport> {
        self.refresh_ring_if_stale();
        let version = self.membership.version();

        // Plan: group local keys by their new owner.
        let keys = self.local.keys();
        let mut report = MigrationReport {
            topology_version: version,
            keys_examined: keys.len(),
            ..MigrationReport::default()
        };
        let mut plan: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        {
            let state = self.ring.read();
            for key in keys {
                match state.ring.owner_of(&key) {
                    Some(owner) if owner != self.config.node_id => {
                        plan.entry(owner.to_string()).or_default().push(key);
                    }
                    _ => {}
                }
            }
        }
        if plan.is_empty() {
            return Ok(report);
        }
        info!(
            version,
            owners = plan.len(),
            "rebalancing local keys to new owners"
        );

        for (owner, keys) in plan {
            let Some(addr) = self.membership.address_of(&owner) else {
                warn!(owner = %owner, "no address for new owner; keys stay local");
                report.keys_skipped += keys.len();
                continue;
            };

            for chunk in keys.chunks(self.config.migration_batch_size) {
                self.mark_in_transit(chunk);

                // Export at send time so explicit removes and invalidated
                // writes since planning are not resurrected.
                let entries: Vec<MigrationEntry> = chunk
                    .iter()
                    .filter_map(|key| {
                        self.local.export_entry(key).map(|(value, ttl)| MigrationEntry {
                            key: key.clone(),
                            value: (*value).clone(),
                            ttl_ms: ttl.map(|t| t.as_millis() as u64),
                        })
                    })
                    .collect();
                if entries.is_empty() {
                    self.clear_in_transit(chunk);
                    continue;
                }

                let request = Request::migrate_range(self.next_op_id(), version, entries);
                report.batches_sent += 1;
                match self.transport.send(&addr, request).await {
                    Ok(response) if response.status == Status::Ok => {
                        for key in chunk {
                            if self
                                .local
                                .remove_with_cause(key, RemovalCause::Migrated)
                                .ok()
                                .flatten()
                                .is_some()
                            {
                                report.keys_moved += 1;
                            }
                        }
                        self.clear_in_transit(chunk);
                        debug!(owner = %owner, moved = chunk.len(), "migration batch acknowledged");
                    }
                    Ok(response) if response.status == Status::StaleTopology => {
                        self.clear_in_transit(chunk);
                        let receiver = response.receiver_version().unwrap_or(version);
                        warn!(sender = version, receiver, "migration aborted on stale topology");
                        return Err(LatticeError::StaleTopology {
                            sender: version,
                            receiver,
                        });
                    }
                    Ok(_) | Err(_) => {
                        // Keys stay local and authoritative; retry next pass.
                        self.clear_in_transit(chunk);
                        report.keys_skipped += chunk.len();
                        warn!(owner = %owner, "migration batch failed; keys stay local");
                    }
                }
            }
        }

        info!(
            version,
            moved = report.keys_moved,
            skipped = report.keys_skipped,
            "rebalance pass complete"
        );
        Ok(report)
    }

    fn mark_in_transit(&self, keys: &[Vec<u8>]) {
        let mut in_transit = self.in_transit.lock();
        for key in keys {
            in_transit.insert(key.clone());
        }
    }

    fn clear_in_transit(&self, keys: &[Vec<u8>]) {
        let mut in_transit = self.in_transit.lock();
        for key in keys {
            in_transit.remove(key);
        }
    }
}
