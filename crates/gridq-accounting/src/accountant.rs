//! Priority resource accountant.
//!
//! The single source of truth for "how much is committed to live leases"
//! per cluster/pool. All mutation goes through `commit`/`release`; stale
//! reads must never admit two leases that jointly overcommit a band, so
//! callers hold the pool's lock across the check-then-commit sequence.
//!
//! Admission model: band P covers the priority classes numerically ≤ P
//! (lower number = more urgent, as in the placement layer). `can_admit(p,
//! req)` holds iff for every band P ≤ p, the cumulative commitment
//! through P — plus `req` for P = p — fits the capacity available to
//! classes ≤ P. Urgent commitments count against every lazier band's
//! budget; commitments at classes lazier than P are preemptible from P's
//! point of view and do not. Band capacities default to the pool total
//! and can be capped per band.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use gridq_core::ResourceList;

/// Identity of one independently scheduled pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub cluster_id: String,
    pub pool: String,
}

impl PoolKey {
    pub fn new(cluster_id: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            pool: pool.into(),
        }
    }
}

/// Resource accounting for a single cluster/pool.
#[derive(Debug, Default)]
pub struct PoolAccountant {
    /// Pool-wide allocatable capacity, refreshed from capacity reports.
    total: ResourceList,
    /// Optional per-band capacity caps; a band without a cap uses `total`.
    band_caps: BTreeMap<i32, ResourceList>,
    /// Resources committed to issued/renewed leases, per exact class.
    allocated: BTreeMap<i32, ResourceList>,
}

impl PoolAccountant {
    pub fn new(total: ResourceList) -> Self {
        Self {
            total,
            band_caps: BTreeMap::new(),
            allocated: BTreeMap::new(),
        }
    }

    /// Cap the capacity available to classes ≤ `band`.
    pub fn with_band_cap(mut self, band: i32, cap: ResourceList) -> Self {
        self.band_caps.insert(band, cap);
        self
    }

    /// Replace the pool total. Called when a fresh capacity report
    /// changes the cluster's allocatable resources; existing commitments
    /// are untouched (they drain through release/expiry).
    pub fn set_total(&mut self, total: ResourceList) {
        self.total = total;
    }

    pub fn total(&self) -> &ResourceList {
        &self.total
    }

    /// Cumulative commitment through band `band`: everything committed
    /// at classes numerically ≤ `band`.
    pub fn allocated_through(&self, band: i32) -> ResourceList {
        let mut sum = ResourceList::new();
        for (_, res) in self.allocated.range(..=band) {
            sum.add_assign(res);
        }
        sum
    }

    fn band_capacity(&self, band: i32) -> &ResourceList {
        self.band_caps.get(&band).unwrap_or(&self.total)
    }

    /// Would committing `request` at `priority` overcommit any band
    /// P ≤ `priority`?
    pub fn can_admit(&self, priority: i32, request: &ResourceList) -> bool {
        let mut bands: Vec<i32> = self
            .allocated
            .keys()
            .chain(self.band_caps.keys())
            .copied()
            .filter(|p| *p <= priority)
            .collect();
        bands.push(priority);
        bands.sort_unstable();
        bands.dedup();

        bands.iter().all(|band| {
            let cum = self.allocated_through(*band);
            if *band == priority {
                request.fits_with(&cum, self.band_capacity(*band))
            } else {
                cum.fits_within(self.band_capacity(*band))
            }
        })
    }

    /// Commit `request` at `priority`. Callers check `can_admit` first
    /// under the same lock; commit itself never fails so a half-selected
    /// batch is recorded exactly as decided.
    pub fn commit(&mut self, priority: i32, request: &ResourceList) {
        self.allocated
            .entry(priority)
            .or_default()
            .add_assign(request);
        debug!(priority, "resources committed");
    }

    /// Release a previous commitment. Saturates at zero; releasing more
    /// than was committed leaves the band empty rather than negative.
    pub fn release(&mut self, priority: i32, request: &ResourceList) {
        if let Some(band) = self.allocated.get_mut(&priority) {
            band.sub_assign_saturating(request);
            if band.is_zero() {
                self.allocated.remove(&priority);
            }
        }
        debug!(priority, "resources released");
    }
}

/// Per-(cluster, pool) accountant instances.
///
/// The outer lock guards only map shape; each pool serializes through its
/// own mutex, so admission on one cluster never contends with another.
#[derive(Default)]
pub struct AccountantRegistry {
    pools: RwLock<HashMap<PoolKey, Arc<Mutex<PoolAccountant>>>>,
}

impl AccountantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the accountant for a pool.
    pub fn pool(&self, key: &PoolKey) -> Arc<Mutex<PoolAccountant>> {
        if let Some(existing) = self
            .pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return existing.clone();
        }
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PoolAccountant::default())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::Quantity;
    use gridq_core::resource::cpu_mem;

    fn cpu(millis: i64) -> ResourceList {
        cpu_mem(millis, 0)
    }

    #[test]
    fn admits_within_total() {
        let acct = PoolAccountant::new(cpu(10_000));
        assert!(acct.can_admit(1, &cpu(4000)));
        assert!(!acct.can_admit(1, &cpu(11_000)));
    }

    #[test]
    fn spec_scenario_three_fours_into_ten() {
        // One node type with 10 CPU; jobs of 4 CPU at priority 1.
        let mut acct = PoolAccountant::new(cpu(10_000));
        let req = cpu(4000);

        assert!(acct.can_admit(1, &req));
        acct.commit(1, &req);
        assert!(acct.can_admit(1, &req));
        acct.commit(1, &req);
        // 8/10 committed — the third 4-CPU job is deferred.
        assert!(!acct.can_admit(1, &req));

        // Completing one admitted job frees the deferred one.
        acct.release(1, &req);
        assert!(acct.can_admit(1, &req));
    }

    #[test]
    fn urgent_commitment_blocks_lazier_band() {
        let mut acct = PoolAccountant::new(cpu(10_000));
        acct.commit(1, &cpu(8000));

        // Band 10's budget includes the class-1 commitment.
        assert!(!acct.can_admit(10, &cpu(4000)));
        assert!(acct.can_admit(10, &cpu(2000)));
    }

    #[test]
    fn lazier_commitment_is_preemptible_headroom() {
        let mut acct = PoolAccountant::new(cpu(10_000));
        acct.commit(10, &cpu(8000));

        // Class-10 work does not count against band 1: an urgent job can
        // claim the whole pool even though it nominally looks full.
        assert!(acct.can_admit(1, &cpu(10_000)));
    }

    #[test]
    fn band_cap_limits_urgent_classes() {
        let mut acct = PoolAccountant::new(cpu(10_000)).with_band_cap(1, cpu(3000));

        assert!(acct.can_admit(1, &cpu(3000)));
        assert!(!acct.can_admit(1, &cpu(4000)));

        acct.commit(1, &cpu(3000));
        assert!(!acct.can_admit(1, &cpu(1000)));
        // Class 5 answers to band 5 (the total) and the already-satisfied
        // band-1 cap, not to band 1's budget for its own request.
        assert!(acct.can_admit(5, &cpu(7000)));
        assert!(!acct.can_admit(5, &cpu(8000)));
    }

    #[test]
    fn release_saturates_and_clears_band() {
        let mut acct = PoolAccountant::new(cpu(10_000));
        acct.commit(2, &cpu(4000));
        acct.release(2, &cpu(9000));

        assert_eq!(acct.allocated_through(10).get("cpu"), Quantity::ZERO);
        assert!(acct.can_admit(2, &cpu(10_000)));
    }

    #[test]
    fn invariant_holds_across_commit_release_sequences() {
        let mut acct = PoolAccountant::new(cpu(12_000));
        let ops: &[(i32, i64, bool)] = &[
            (1, 4000, true),
            (3, 4000, true),
            (1, 4000, true),
            (1, 2000, false), // release
            (5, 6000, true),
        ];

        for (priority, millis, is_commit) in ops {
            let req = cpu(*millis);
            if *is_commit {
                if acct.can_admit(*priority, &req) {
                    acct.commit(*priority, &req);
                }
            } else {
                acct.release(*priority, &req);
            }
            // No band may exceed its capacity at any point.
            for band in [0, 1, 3, 5, 10] {
                assert!(
                    acct.allocated_through(band).fits_within(acct.total()),
                    "band {band} overcommitted"
                );
            }
        }
    }

    #[test]
    fn registry_hands_out_one_accountant_per_pool() {
        let registry = AccountantRegistry::new();
        let key = PoolKey::new("c1", "default");

        let a = registry.pool(&key);
        a.lock().unwrap().set_total(cpu(5000));

        let b = registry.pool(&key);
        assert_eq!(
            b.lock().unwrap().total().get("cpu"),
            Quantity::from_millis(5000)
        );

        let other = registry.pool(&PoolKey::new("c2", "default"));
        assert!(other.lock().unwrap().total().is_empty());
    }
}
