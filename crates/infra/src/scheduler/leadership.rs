//! Lease-based leader election.
//!
//! Every instance ticks [`LeadershipManager::tick`] on a short interval. The
//! lease is a single key holding the leader's instance id with a TTL; holding
//! it makes the instance responsible for the leader-only job processor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use stationhub_core::{Clock, InstanceId};

use super::keys::KeySpace;
use crate::coordination::{CoordinationStore, StoreResult};

/// Leadership change produced by a tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Promoted,
    Demoted,
}

#[derive(Debug, Default)]
struct LeaseState {
    is_leader: bool,
    /// Last instant the store confirmed we hold the lease.
    confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct LeadershipManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
    instance_id: InstanceId,
    lease_key: String,
    lease_ttl: Duration,
    state: Mutex<LeaseState>,
}

impl<S: CoordinationStore> LeadershipManager<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        keys: &KeySpace,
        instance_id: InstanceId,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            instance_id,
            lease_key: keys.leader(),
            lease_ttl,
            state: Mutex::new(LeaseState::default()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Whether this instance currently believes it holds the lease.
    pub fn is_leader(&self) -> bool {
        self.state.lock().unwrap().is_leader
    }

    /// Run one acquire-or-renew round and report whether we lead afterwards.
    pub fn try_acquire_or_renew(&self) -> bool {
        self.tick();
        self.is_leader()
    }

    /// Run one acquire-or-renew round, returning the transition if any.
    ///
    /// Store errors never demote on their own; only a lease held by someone
    /// else, or one that must have expired since our last confirmation, does.
    pub fn tick(&self) -> Option<Transition> {
        match self.round() {
            Ok(true) => self.confirm(),
            Ok(false) => self.demote("lease held by another instance"),
            Err(e) => {
                warn!(instance = %self.instance_id, error = %e, "leadership tick failed");
                self.expire_if_stale()
            }
        }
    }

    fn round(&self) -> StoreResult<bool> {
        let me = self.instance_id.as_str();
        if self.store.set_if_absent(&self.lease_key, me, self.lease_ttl)? {
            return Ok(true);
        }

        match self.store.get(&self.lease_key)? {
            Some(holder) if holder == me => {
                if !self.store.expire(&self.lease_key, self.lease_ttl)? {
                    // Expired between the read and the renewal.
                    return self.store.set_if_absent(&self.lease_key, me, self.lease_ttl);
                }
                Ok(true)
            }
            Some(holder) => {
                debug!(instance = %self.instance_id, leader = %holder, "lease held elsewhere");
                Ok(false)
            }
            None => {
                // The previous holder's key vanished between our acquire and
                // read. Clear anything still tagged with our id, retry once.
                self.store.delete_if_equals(&self.lease_key, me)?;
                self.store.set_if_absent(&self.lease_key, me, self.lease_ttl)
            }
        }
    }

    fn confirm(&self) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        state.confirmed_at = Some(self.clock.now());
        if state.is_leader {
            return None;
        }
        state.is_leader = true;
        info!(instance = %self.instance_id, "acquired leadership");
        Some(Transition::Promoted)
    }

    fn demote(&self, reason: &str) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        state.confirmed_at = None;
        if !state.is_leader {
            return None;
        }
        state.is_leader = false;
        info!(instance = %self.instance_id, reason, "lost leadership");
        Some(Transition::Demoted)
    }

    fn expire_if_stale(&self) -> Option<Transition> {
        let stale = {
            let state = self.state.lock().unwrap();
            state.is_leader
                && state.confirmed_at.is_none_or(|at| {
                    (self.clock.now() - at)
                        .to_std()
                        .is_ok_and(|elapsed| elapsed >= self.lease_ttl)
                })
        };
        if stale {
            self.demote("lease expired while the store was unreachable")
        } else {
            None
        }
    }

    /// The instance currently holding the lease, if any.
    pub fn current_leader(&self) -> StoreResult<Option<InstanceId>> {
        Ok(self.store.get(&self.lease_key)?.map(InstanceId::from))
    }

    /// Give up the lease if we hold it. Never deletes another holder's lease.
    pub fn release(&self) -> StoreResult<bool> {
        let released = self
            .store
            .delete_if_equals(&self.lease_key, self.instance_id.as_str())?;
        self.demote("lease released");
        if released {
            info!(instance = %self.instance_id, "released leadership lease");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stationhub_core::ManualClock;

    use crate::coordination::InMemoryCoordinationStore;

    struct Cluster {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryCoordinationStore>,
    }

    impl Cluster {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
            ));
            let store = InMemoryCoordinationStore::arc(clock.clone());
            Self { clock, store }
        }

        fn manager(&self, id: &str) -> LeadershipManager<Arc<InMemoryCoordinationStore>> {
            LeadershipManager::new(
                self.store.clone(),
                self.clock.clone(),
                &KeySpace::new("t"),
                InstanceId::from(id),
                Duration::from_secs(30),
            )
        }
    }

    #[test]
    fn first_instance_wins_and_renews() {
        let cluster = Cluster::new();
        let a = cluster.manager("a");
        let b = cluster.manager("b");

        assert_eq!(a.tick(), Some(Transition::Promoted));
        assert!(!b.try_acquire_or_renew());

        for _ in 0..30 {
            cluster.clock.advance(Duration::from_secs(2));
            assert_eq!(a.tick(), None);
            assert!(!b.try_acquire_or_renew());
        }
        assert_eq!(a.current_leader().unwrap(), Some(InstanceId::from("a")));
    }

    #[test]
    fn standby_takes_over_after_lease_expiry() {
        let cluster = Cluster::new();
        let a = cluster.manager("a");
        let b = cluster.manager("b");
        assert!(a.try_acquire_or_renew());

        // a stops ticking (crash).
        cluster.clock.advance(Duration::from_secs(31));
        assert_eq!(b.tick(), Some(Transition::Promoted));
        assert_eq!(b.current_leader().unwrap(), Some(InstanceId::from("b")));

        // a comes back and finds someone else holding the lease.
        assert_eq!(a.tick(), Some(Transition::Demoted));
        assert!(!a.is_leader());
    }

    #[test]
    fn transient_store_error_keeps_leadership_until_ttl() {
        let cluster = Cluster::new();
        let a = cluster.manager("a");
        assert!(a.try_acquire_or_renew());

        cluster.store.set_available(false);
        cluster.clock.advance(Duration::from_secs(10));
        assert_eq!(a.tick(), None);
        assert!(a.is_leader());

        cluster.clock.advance(Duration::from_secs(25));
        assert_eq!(a.tick(), Some(Transition::Demoted));
    }

    #[test]
    fn release_only_deletes_own_lease() {
        let cluster = Cluster::new();
        let a = cluster.manager("a");
        let b = cluster.manager("b");
        assert!(a.try_acquire_or_renew());

        assert!(!b.release().unwrap());
        assert_eq!(a.current_leader().unwrap(), Some(InstanceId::from("a")));

        assert!(a.release().unwrap());
        assert!(!a.is_leader());
        assert_eq!(a.current_leader().unwrap(), None);
        assert!(b.try_acquire_or_renew());
    }
}
