//! `EpumStore` — redb-backed persistence for domains and instances.
//!
//! Provides typed CRUD over domains and instances plus the reverse
//! instance→domain index used by the reactor and decider. All values are
//! JSON-serialized into redb's `&[u8]` value columns. Supports both
//! on-disk and in-memory backends (the latter for tests).

use std::path::Path;
use std::sync::Arc;

use epu_core::types::{ErrorRecord, InstanceHealthState, InstanceState, PropertyMap};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::{DomainConfig, DomainRecord, InstanceRecord, Subscriber};

macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct EpumStore {
    db: Arc<Database>,
}

impl EpumStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "epum store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory epum store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_DOMAIN_INDEX).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Domains ────────────────────────────────────────────────────

    /// Fails with `AlreadyExists` if `(owner, domain_id)` is already present.
    pub fn add_domain(
        &self,
        owner: &str,
        domain_id: &str,
        config: DomainConfig,
        subscriber: Option<Subscriber>,
    ) -> StoreResult<()> {
        let key = DomainRecord::key_for(owner, domain_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::AlreadyExists(key));
            }
            let record = DomainRecord {
                owner: owner.to_string(),
                domain_id: domain_id.to_string(),
                config,
                subscribers: subscriber.into_iter().collect(),
                version: 0,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "domain added");
        Ok(())
    }

    pub fn get_domain(&self, owner: &str, domain_id: &str) -> StoreResult<Option<DomainRecord>> {
        let key = DomainRecord::key_for(owner, domain_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DomainRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn remove_domain(&self, owner: &str, domain_id: &str) -> StoreResult<bool> {
        let key = DomainRecord::key_for(owner, domain_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    pub fn list_domains_by_owner(&self, owner: &str) -> StoreResult<Vec<DomainRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        let prefix = format!("{owner}/");
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: DomainRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Every domain across every owner, for callers (e.g. the decider's
    /// tick loop) that need to discover domains without already knowing
    /// their owner.
    pub fn list_all_domains(&self) -> StoreResult<Vec<DomainRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DomainRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    pub fn get_domain_for_instance_id(&self, instance_id: &str) -> StoreResult<Option<DomainRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(INSTANCE_DOMAIN_INDEX).map_err(map_err!(Table))?;
        let key = match index.get(instance_id).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let domains = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        match domains.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DomainRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write the domain row under one transaction, rejecting
    /// the write with `VersionConflict` if the stored `version` does not
    /// match `expected_version`. On success, bumps `version` by one.
    fn update_domain(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        f: impl FnOnce(&mut DomainRecord),
    ) -> StoreResult<DomainRecord> {
        let key = DomainRecord::key_for(owner, domain_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
            let mut record = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice::<DomainRecord>(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StoreError::NotFound(key)),
            };
            if record.version != expected_version {
                return Err(StoreError::VersionConflict(key, expected_version));
            }
            f(&mut record);
            record.version += 1;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = record;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    pub fn add_general_config(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        patch: PropertyMap,
    ) -> StoreResult<DomainRecord> {
        self.update_domain(owner, domain_id, expected_version, |r| r.config.merge_general(patch))
    }

    pub fn add_engine_config(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        patch: PropertyMap,
    ) -> StoreResult<DomainRecord> {
        self.update_domain(owner, domain_id, expected_version, |r| r.config.merge_engine(patch))
    }

    pub fn add_health_config(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        patch: PropertyMap,
    ) -> StoreResult<DomainRecord> {
        self.update_domain(owner, domain_id, expected_version, |r| r.config.merge_health(patch))
    }

    pub fn add_subscriber(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        name: &str,
        op: &str,
    ) -> StoreResult<DomainRecord> {
        let sub = (name.to_string(), op.to_string());
        self.update_domain(owner, domain_id, expected_version, |r| {
            if !r.subscribers.contains(&sub) {
                r.subscribers.push(sub);
            }
        })
    }

    pub fn remove_subscriber(
        &self,
        owner: &str,
        domain_id: &str,
        expected_version: u64,
        name: &str,
    ) -> StoreResult<DomainRecord> {
        self.update_domain(owner, domain_id, expected_version, |r| r.subscribers.retain(|(n, _)| n != name))
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Create a new instance row, typically right after a successful
    /// `Control.launch`. Also writes the reverse instance→domain index.
    pub fn create_instance(&self, record: InstanceRecord) -> StoreResult<()> {
        let domain_key = DomainRecord::key_for(&record.owner, &record.domain_id);
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            instances
                .insert(record.instance_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(INSTANCE_DOMAIN_INDEX).map_err(map_err!(Table))?;
            index
                .insert(record.instance_id.as_str(), domain_key.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_instance(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(instance_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn get_instances(&self, owner: &str, domain_id: &str) -> StoreResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.owner == owner && record.domain_id == domain_id {
                results.push(record);
            }
        }
        Ok(results)
    }

    pub fn get_unhealthy_instances(&self, owner: &str, domain_id: &str) -> StoreResult<Vec<InstanceRecord>> {
        Ok(self
            .get_instances(owner, domain_id)?
            .into_iter()
            .filter(InstanceRecord::is_unhealthy)
            .collect())
    }

    fn update_instance(
        &self,
        instance_id: &str,
        f: impl FnOnce(&mut InstanceRecord),
    ) -> StoreResult<InstanceRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut record = match table.get(instance_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice::<InstanceRecord>(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StoreError::NotFound(instance_id.to_string())),
            };
            f(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(instance_id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = record;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Record a new instance state. Preserves monotonicity (a backward
    /// move is a silent no-op) and returns the record as it stands after
    /// the attempted update.
    pub fn new_instance_state(&self, instance_id: &str, new_state: InstanceState) -> StoreResult<InstanceRecord> {
        self.update_instance(instance_id, |r| {
            r.advance_state(new_state);
        })
    }

    pub fn new_instance_health(
        &self,
        instance_id: &str,
        health: InstanceHealthState,
        error_time: Option<u64>,
        errors: Vec<ErrorRecord>,
    ) -> StoreResult<InstanceRecord> {
        self.update_instance(instance_id, |r| {
            r.health = health;
            if error_time.is_some() {
                r.error_time = error_time;
            }
            if !errors.is_empty() {
                r.errors.extend(errors);
            }
        })
    }

    /// Updates the last-heartbeat timestamp only. Callers must invoke
    /// this last, after the corresponding state/health write has
    /// committed — see spec §4.4 on re-queued heartbeats.
    pub fn set_instance_heartbeat_time(&self, instance_id: &str, timestamp: u64) -> StoreResult<()> {
        self.update_instance(instance_id, |r| {
            r.last_heartbeat_time = Some(timestamp);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceRecord;
    use epu_core::types::InstanceHealthState;

    fn store() -> EpumStore {
        EpumStore::open_in_memory().unwrap()
    }

    fn instance(id: &str, owner: &str, domain_id: &str) -> InstanceRecord {
        InstanceRecord {
            instance_id: id.to_string(),
            owner: owner.to_string(),
            domain_id: domain_id.to_string(),
            site: Some("site1".to_string()),
            allocation: Some("alloc1".to_string()),
            deployable_type: "dt1".to_string(),
            state: InstanceState::Requesting,
            health: InstanceHealthState::Unknown,
            extravars: Default::default(),
            launch_id: Some("launch-1".to_string()),
            last_heartbeat_time: None,
            error_time: None,
            errors: Vec::new(),
        }
    }

    #[test]
    fn add_domain_then_get() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        let d = s.get_domain("alice", "d1").unwrap().unwrap();
        assert_eq!(d.owner, "alice");
        assert_eq!(d.version, 0);
    }

    #[test]
    fn add_domain_twice_fails() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        let err = s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn list_domains_by_owner_filters_correctly() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.add_domain("alice", "d2", DomainConfig::default(), None).unwrap();
        s.add_domain("bob", "d1", DomainConfig::default(), None).unwrap();
        let alice_domains = s.list_domains_by_owner("alice").unwrap();
        assert_eq!(alice_domains.len(), 2);
    }

    #[test]
    fn remove_domain_nonexistent_returns_false() {
        let s = store();
        assert!(!s.remove_domain("alice", "missing").unwrap());
    }

    #[test]
    fn config_merge_is_additive() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.add_general_config(
            "alice",
            "d1",
            0,
            [("a".to_string(), serde_json::json!(1))].into_iter().collect(),
        )
        .unwrap();
        let d = s
            .add_general_config(
                "alice",
                "d1",
                1,
                [("b".to_string(), serde_json::json!(2))].into_iter().collect(),
            )
            .unwrap();
        assert_eq!(d.config.general.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(d.config.general.get("b"), Some(&serde_json::json!(2)));
        assert_eq!(d.version, 2);
    }

    #[test]
    fn subscriber_add_is_idempotent() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.add_subscriber("alice", "d1", 0, "sub1", "op1").unwrap();
        let d = s.add_subscriber("alice", "d1", 1, "sub1", "op1").unwrap();
        assert_eq!(d.subscribers.len(), 1);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.add_general_config(
            "alice",
            "d1",
            0,
            [("a".to_string(), serde_json::json!(1))].into_iter().collect(),
        )
        .unwrap();
        let err = s
            .add_general_config(
                "alice",
                "d1",
                0,
                [("b".to_string(), serde_json::json!(2))].into_iter().collect(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_, 0)));
    }

    #[test]
    fn create_instance_then_reverse_lookup() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.create_instance(instance("i1", "alice", "d1")).unwrap();
        let domain = s.get_domain_for_instance_id("i1").unwrap().unwrap();
        assert_eq!(domain.domain_id, "d1");
    }

    #[test]
    fn instance_state_is_monotone() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.create_instance(instance("i1", "alice", "d1")).unwrap();
        s.new_instance_state("i1", InstanceState::Running).unwrap();
        let rec = s.new_instance_state("i1", InstanceState::Requested).unwrap();
        assert_eq!(rec.state, InstanceState::Running, "backward move must be a no-op");
    }

    #[test]
    fn get_unhealthy_instances_filters() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.create_instance(instance("i1", "alice", "d1")).unwrap();
        s.create_instance(instance("i2", "alice", "d1")).unwrap();
        s.new_instance_health("i1", InstanceHealthState::Error, None, Vec::new())
            .unwrap();
        let unhealthy = s.get_unhealthy_instances("alice", "d1").unwrap();
        assert_eq!(unhealthy.len(), 1);
        assert_eq!(unhealthy[0].instance_id, "i1");
    }

    #[test]
    fn heartbeat_time_updates_independently() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.create_instance(instance("i1", "alice", "d1")).unwrap();
        s.set_instance_heartbeat_time("i1", 12345).unwrap();
        let rec = s.get_instance("i1").unwrap().unwrap();
        assert_eq!(rec.last_heartbeat_time, Some(12345));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epum.redb");
        {
            let s = EpumStore::open(&path).unwrap();
            s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        }
        let s = EpumStore::open(&path).unwrap();
        assert!(s.get_domain("alice", "d1").unwrap().is_some());
    }

    #[test]
    fn empty_store_list_is_empty() {
        let s = store();
        assert!(s.list_domains_by_owner("nobody").unwrap().is_empty());
    }

    #[test]
    fn list_all_domains_spans_owners() {
        let s = store();
        s.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        s.add_domain("bob", "d1", DomainConfig::default(), None).unwrap();
        assert_eq!(s.list_all_domains().unwrap().len(), 2);
    }
}
