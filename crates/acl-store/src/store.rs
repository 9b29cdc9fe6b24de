//! AclStore - ACL table, rule and counter lifecycle.
//!
//! The store is the only writer of the object indexes and of the per-table
//! rule ordering lists. It handles:
//! - Table creation and destruction (table ids from the allocator)
//! - Rule creation, update and destruction
//! - Counter creation and destruction, explicit and implicit
//! - Policer and sample session announcement
//! - First-match evaluation per table and per stage
//!
//! # Locking
//!
//! Every table has its own lock over its ordering list and counts. The
//! three indexes and the allocator have independent locks. Locks are always
//! taken table state first, then an index, and never held across a backend
//! call. Backend work happens before the in-memory commit, or after an
//! in-memory unlink that is reverted if the backend fails.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sonic_sai::{AclCounterOid, AclEntryOid, AclTableOid, NpuHandle, PolicerOid, SamplePacketOid};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocator::TableIdAllocator;
use crate::backend::AclBackend;
use crate::config::AclStoreConfig;
use crate::counter::{AclCounter, AclCounterSpec, CounterOwnership};
use crate::error::{AclError, AclResult};
use crate::eval::{self, AclMatch, PacketFields, TableMatch};
use crate::index::ObjectIndex;
use crate::ledger::{SharedResource, SharingLedger};
use crate::order::ListPosition;
use crate::rule::{AclRule, AclRuleUpdate};
use crate::table::{AclTable, AclTableSpec, TableEntry};
use crate::types::{AclPriority, AclStage, AclTableIndex, UdfField};

/// Statistics for AclStore operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AclStoreStats {
    pub tables_created: u64,
    pub tables_deleted: u64,
    pub rules_created: u64,
    pub rules_deleted: u64,
    pub rules_updated: u64,
    pub counters_created: u64,
    pub counters_deleted: u64,
    /// Operations rolled back after a backend failure.
    pub backend_errors: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    tables_created: AtomicU64,
    tables_deleted: AtomicU64,
    rules_created: AtomicU64,
    rules_deleted: AtomicU64,
    rules_updated: AtomicU64,
    counters_created: AtomicU64,
    counters_deleted: AtomicU64,
    backend_errors: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AclStoreStats {
        AclStoreStats {
            tables_created: self.tables_created.load(Ordering::Relaxed),
            tables_deleted: self.tables_deleted.load(Ordering::Relaxed),
            rules_created: self.rules_created.load(Ordering::Relaxed),
            rules_deleted: self.rules_deleted.load(Ordering::Relaxed),
            rules_updated: self.rules_updated.load(Ordering::Relaxed),
            counters_created: self.counters_created.load(Ordering::Relaxed),
            counters_deleted: self.counters_deleted.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}

/// Rounds of lookup-or-create before an implicit counter is given up on.
const COUNTER_ACQUIRE_ATTEMPTS: usize = 64;

/// A rule as indexed: its current snapshot and where it sits in its table.
#[derive(Debug, Clone)]
struct RuleSlot {
    rule: Arc<AclRule>,
    position: ListPosition,
}

/// ACL store.
///
/// All operations take `&self`; the store can be shared between threads.
pub struct AclStore {
    config: AclStoreConfig,
    backend: Arc<dyn AclBackend>,

    // ============ Identifiers ============
    allocator: Mutex<TableIdAllocator>,

    // ============ Indexes ============
    tables: RwLock<ObjectIndex<AclTableOid, Arc<TableEntry>>>,
    rules: RwLock<ObjectIndex<AclEntryOid, RuleSlot>>,
    counters: RwLock<ObjectIndex<AclCounterOid, AclCounter>>,

    // ============ Sharing ============
    ledger: SharingLedger,

    stats: StatsCounters,
}

impl fmt::Debug for AclStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclStore")
            .field("config", &self.config)
            .field("tables", &self.tables.read().len())
            .field("rules", &self.rules.read().len())
            .field("counters", &self.counters.read().len())
            .finish()
    }
}

impl AclStore {
    /// Creates an empty store.
    pub fn new(config: AclStoreConfig, backend: Arc<dyn AclBackend>) -> AclResult<Self> {
        config.validate()?;
        let allocator = TableIdAllocator::new(config.table_id_min, config.table_id_max)?;
        info!(
            "AclStore: Initialized (table ids {}..={}, priorities {}..={})",
            config.table_id_min, config.table_id_max, config.min_priority, config.max_priority
        );
        Ok(Self {
            config,
            backend,
            allocator: Mutex::new(allocator),
            tables: RwLock::new(ObjectIndex::new()),
            rules: RwLock::new(ObjectIndex::new()),
            counters: RwLock::new(ObjectIndex::new()),
            ledger: SharingLedger::new(),
            stats: StatsCounters::default(),
        })
    }

    pub fn config(&self) -> &AclStoreConfig {
        &self.config
    }

    // ============ Tables ============

    /// Creates a table, allocating its table index.
    pub fn create_table(&self, spec: AclTableSpec) -> AclResult<AclTable> {
        spec.validate().map_err(AclError::InvalidAttribute)?;
        if self.tables.read().contains(&spec.id) {
            return Err(AclError::DuplicateKey(spec.id.to_string()));
        }

        let index = self.allocator.lock().allocate()?;
        let mut table = AclTable::from_spec(spec, index);

        let handle = match self.backend.create_table(&table) {
            Ok(handle) => handle,
            Err(e) => {
                self.release_table_index(index);
                return Err(self.backend_failure(format!("create table {}", table.id), e));
            }
        };
        table.set_npu_handle(handle);

        let entry = Arc::new(TableEntry::new(table.clone()));
        let inserted = self.tables.write().insert(table.id, entry);
        if let Err(e) = inserted {
            warn!("AclStore: Table {} created concurrently, rolling back", table.id);
            self.remove_table_handle(table.id, handle);
            self.release_table_index(index);
            return Err(e.into_acl_error(AclError::TableNotFound));
        }

        StatsCounters::bump(&self.stats.tables_created);
        info!(
            "AclStore: Created table {} (index {}, stage {}, priority {})",
            table.id, table.index, table.stage, table.priority
        );
        Ok(table)
    }

    /// Destroys a table that has no rules and no counters left.
    pub fn destroy_table(&self, id: AclTableOid) -> AclResult<()> {
        let entry = self.table_entry(id)?;
        {
            let mut state = entry.state.write();
            if state.retired {
                return Err(AclError::TableNotFound(id));
            }
            if state.rule_count > 0 || state.counter_count > 0 {
                return Err(AclError::TableInUse {
                    table: id,
                    rules: state.rule_count,
                    counters: state.counter_count,
                });
            }
            state.retired = true;
        }

        if let Err(e) = self.backend.remove_table(entry.table.npu_handle()) {
            entry.state.write().retired = false;
            return Err(self.backend_failure(format!("remove table {}", id), e));
        }

        self.tables
            .write()
            .remove(&id)
            .map_err(|e| e.into_acl_error(AclError::TableNotFound))?;
        self.allocator.lock().release(entry.table.index)?;

        StatsCounters::bump(&self.stats.tables_deleted);
        info!("AclStore: Destroyed table {} (index {})", id, entry.table.index);
        Ok(())
    }

    // ============ Rules ============

    /// Creates a rule in its table.
    ///
    /// A counter the rule references but that does not exist yet is created
    /// implicitly and destroyed again with its last referencing rule.
    pub fn create_rule(&self, mut rule: AclRule) -> AclResult<Arc<AclRule>> {
        rule.validate(self.config.min_priority, self.config.max_priority)
            .map_err(AclError::InvalidAttribute)?;
        let entry = self.table_entry(rule.table)?;
        entry.table.check_rule(&rule)?;
        if self.rules.read().contains(&rule.id) {
            return Err(AclError::DuplicateKey(rule.id.to_string()));
        }
        {
            let state = entry.state.read();
            Self::check_table_accepts_rule(&entry, state.retired, state.rule_count)?;
        }

        let id = rule.id;
        let resources = self.acquire_resources(&entry, &rule)?;

        let handle = match self.backend.install_rule(&rule) {
            Ok(handle) => handle,
            Err(e) => {
                self.release_references(id, &resources);
                return Err(self.backend_failure(format!("install rule {}", id), e));
            }
        };
        rule.set_npu_handle(handle);

        let committed = {
            let mut state = entry.state.write();
            match Self::check_table_accepts_rule(&entry, state.retired, state.rule_count) {
                Err(e) => Err(e),
                Ok(()) => {
                    rule.set_sequence(state.take_sequence());
                    let rule = Arc::new(rule);
                    let position = state.rules.insert(Arc::clone(&rule));
                    let slot = RuleSlot {
                        rule: Arc::clone(&rule),
                        position,
                    };
                    match self.rules.write().insert(id, slot) {
                        Ok(()) => {
                            state.rule_count += 1;
                            Ok(rule)
                        }
                        Err(e) => {
                            state.rules.remove(position);
                            Err(e.into_acl_error(AclError::RuleNotFound))
                        }
                    }
                }
            }
        };

        match committed {
            Ok(rule) => {
                StatsCounters::bump(&self.stats.rules_created);
                debug!(
                    "AclStore: Created rule {} in table {} (priority {}, sequence {})",
                    id,
                    rule.table,
                    rule.priority,
                    rule.sequence()
                );
                Ok(rule)
            }
            Err(e) => {
                warn!("AclStore: Rolling back rule {}: {}", id, e);
                self.remove_rule_handle(id, handle);
                self.release_references(id, &resources);
                Err(e)
            }
        }
    }

    /// Updates a rule.
    ///
    /// The rule's position afterwards depends only on its priority and its
    /// original creation sequence. The new snapshot is installed before the
    /// old one is removed; if removing the old one fails the old rule is
    /// restored.
    pub fn update_rule(&self, id: AclEntryOid, update: AclRuleUpdate) -> AclResult<Arc<AclRule>> {
        let old = self.rule_snapshot(id)?;
        if update.is_empty() {
            return Ok(old);
        }

        let mut new = AclRule::clone(&old);
        update.apply(&mut new);
        new.validate(self.config.min_priority, self.config.max_priority)
            .map_err(AclError::InvalidAttribute)?;
        let entry = self.table_entry(new.table)?;
        entry.table.check_rule(&new)?;

        let new_resources = self.acquire_resources(&entry, &new)?;

        let handle = match self.backend.install_rule(&new) {
            Ok(handle) => handle,
            Err(e) => {
                self.release_references(id, &new_resources);
                return Err(self.backend_failure(format!("install rule {}", id), e));
            }
        };
        new.set_npu_handle(handle);

        let new = match self.replace_rule(&entry, &old, Arc::new(new)) {
            Ok(new) => new,
            Err(e) => {
                warn!("AclStore: Rolling back update of rule {}: {}", id, e);
                self.remove_rule_handle(id, handle);
                self.release_references(id, &new_resources);
                return Err(e);
            }
        };

        if let Err(e) = self.backend.remove_rule(old.npu_handle()) {
            match self.replace_rule(&entry, &new, Arc::clone(&old)) {
                Ok(_) => {
                    self.remove_rule_handle(id, handle);
                    self.release_references(id, &new_resources);
                }
                // The new snapshot was destroyed or replaced concurrently,
                // and its references went with it. Only the old ones are left.
                Err(AclError::RuleNotFound(_)) | Err(AclError::StaleRule(_)) => {
                    warn!("AclStore: Rule {} changed while its update failed", id);
                    self.release_references(id, &old.shared_resources());
                }
                Err(restore) => {
                    error!("AclStore: Failed to restore rule {}: {}", id, restore);
                }
            }
            return Err(self.backend_failure(format!("remove old snapshot of rule {}", id), e));
        }

        self.release_references(id, &old.shared_resources());
        StatsCounters::bump(&self.stats.rules_updated);
        debug!("AclStore: Updated rule {} (priority {})", id, new.priority);
        Ok(new)
    }

    /// Changes only a rule's priority.
    pub fn update_rule_priority(
        &self,
        id: AclEntryOid,
        priority: AclPriority,
    ) -> AclResult<Arc<AclRule>> {
        self.update_rule(id, AclRuleUpdate::new().priority(priority))
    }

    /// Destroys a rule and releases every shared resource it references.
    pub fn destroy_rule(&self, id: AclEntryOid) -> AclResult<()> {
        let table = self.rule_snapshot(id)?.table;
        let entry = self.table_entry(table)?;

        let slot = {
            let mut state = entry.state.write();
            let slot = self
                .rules
                .write()
                .remove(&id)
                .map_err(|e| e.into_acl_error(AclError::RuleNotFound))?;
            if state.rules.remove(slot.position).is_none() {
                error!("AclStore: Rule {} was indexed but not listed", id);
            }
            slot
        };

        if let Err(e) = self.backend.remove_rule(slot.rule.npu_handle()) {
            let mut state = entry.state.write();
            let position = state.rules.insert(Arc::clone(&slot.rule));
            let restored = RuleSlot {
                rule: Arc::clone(&slot.rule),
                position,
            };
            if let Err(relink) = self.rules.write().insert(id, restored) {
                state.rules.remove(position);
                state.rule_count -= 1;
                error!("AclStore: Failed to relink rule {}: {}", id, relink);
            }
            drop(state);
            return Err(self.backend_failure(format!("remove rule {}", id), e));
        }

        entry.state.write().rule_count -= 1;
        self.release_references(id, &slot.rule.shared_resources());

        StatsCounters::bump(&self.stats.rules_deleted);
        debug!("AclStore: Destroyed rule {} from table {}", id, table);
        Ok(())
    }

    // ============ Counters ============

    /// Creates a counter owned by the caller.
    pub fn create_counter(&self, spec: AclCounterSpec) -> AclResult<AclCounter> {
        self.create_counter_with(spec, CounterOwnership::Explicit, None)
    }

    /// Destroys a counter no rule references.
    pub fn destroy_counter(&self, id: AclCounterOid) -> AclResult<()> {
        let table = self
            .counters
            .read()
            .find(&id)
            .map(|counter| counter.table)
            .ok_or(AclError::CounterNotFound(id))?;
        let entry = self.table_entry(table)?;
        let resource = SharedResource::Counter(id);

        let counter = {
            let _state = entry.state.write();
            self.ledger.unregister(resource)?;
            let removed = self.counters.write().remove(&id);
            match removed {
                Ok(counter) => counter,
                Err(e) => {
                    if let Err(restore) = self.ledger.register(resource) {
                        error!("AclStore: Failed to restore {}: {}", resource, restore);
                    }
                    return Err(e.into_acl_error(AclError::CounterNotFound));
                }
            }
        };

        if let Err(e) = self.backend.remove_counter(counter.npu_handle()) {
            let _state = entry.state.write();
            let restored = self.counters.write().insert(id, counter);
            match restored {
                Ok(()) => {
                    if let Err(restore) = self.ledger.register(resource) {
                        error!("AclStore: Failed to restore {}: {}", resource, restore);
                    }
                }
                Err(restore) => {
                    error!("AclStore: Failed to restore counter {}: {}", id, restore)
                }
            }
            return Err(self.backend_failure(format!("remove counter {}", id), e));
        }

        entry.state.write().counter_count -= 1;
        StatsCounters::bump(&self.stats.counters_deleted);
        debug!(
            "AclStore: Destroyed {:?} counter {} from table {}",
            counter.ownership, id, table
        );
        Ok(())
    }

    // ============ Policers and sample sessions ============

    /// Announces a policer rules may reference.
    pub fn register_policer(&self, id: PolicerOid) -> AclResult<()> {
        if id.is_null() {
            return Err(AclError::InvalidAttribute("Policer id is null".to_string()));
        }
        self.ledger.register(SharedResource::Policer(id))
    }

    /// Forgets a policer no rule references.
    pub fn unregister_policer(&self, id: PolicerOid) -> AclResult<()> {
        self.ledger.unregister(SharedResource::Policer(id))
    }

    /// Announces a sample-packet session rules may reference.
    pub fn register_sample_session(&self, id: SamplePacketOid) -> AclResult<()> {
        if id.is_null() {
            return Err(AclError::InvalidAttribute(
                "Sample session id is null".to_string(),
            ));
        }
        self.ledger.register(SharedResource::SamplePacket(id))
    }

    /// Forgets a sample-packet session no rule references.
    pub fn unregister_sample_session(&self, id: SamplePacketOid) -> AclResult<()> {
        self.ledger.unregister(SharedResource::SamplePacket(id))
    }

    // ============ Evaluation ============

    /// Returns the first enabled rule of `table` that matches `packet`.
    pub fn evaluate(
        &self,
        table: AclTableOid,
        packet: &PacketFields,
    ) -> AclResult<Option<AclMatch>> {
        let entry = self.table_entry(table)?;
        Ok(self.evaluate_entry(&entry, packet))
    }

    /// Evaluates every table of a stage, highest table priority first (ties
    /// by table id), and returns the match of each matching table.
    pub fn evaluate_stage(&self, stage: AclStage, packet: &PacketFields) -> Vec<TableMatch> {
        let mut entries: Vec<Arc<TableEntry>> = self
            .tables
            .read()
            .values()
            .filter(|entry| entry.table.stage == stage)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.table
                .priority
                .cmp(&a.table.priority)
                .then(a.table.id.cmp(&b.table.id))
        });

        entries
            .iter()
            .filter_map(|entry| {
                self.evaluate_entry(entry, packet).map(|matched| TableMatch {
                    stage,
                    table_priority: entry.table.priority,
                    matched,
                })
            })
            .collect()
    }

    // ============ Queries ============

    pub fn get_table(&self, id: AclTableOid) -> Option<AclTable> {
        self.tables.read().find(&id).map(|entry| entry.table.clone())
    }

    /// All tables, in id order.
    pub fn tables(&self) -> Vec<AclTable> {
        self.tables
            .read()
            .values()
            .map(|entry| entry.table.clone())
            .collect()
    }

    pub fn get_rule(&self, id: AclEntryOid) -> Option<Arc<AclRule>> {
        self.rules.read().find(&id).map(|slot| Arc::clone(&slot.rule))
    }

    pub fn get_counter(&self, id: AclCounterOid) -> Option<AclCounter> {
        self.counters.read().find(&id).cloned()
    }

    /// Rules of a table in evaluation order, disabled rules included.
    pub fn table_rules(&self, table: AclTableOid) -> AclResult<Vec<Arc<AclRule>>> {
        let entry = self.table_entry(table)?;
        let rules = entry.state.read().rules.iter_all().cloned().collect();
        Ok(rules)
    }

    /// Number of rules in a table.
    pub fn rule_count(&self, table: AclTableOid) -> AclResult<usize> {
        Ok(self.table_entry(table)?.state.read().rule_count)
    }

    /// Number of counters belonging to a table.
    pub fn table_counter_count(&self, table: AclTableOid) -> AclResult<usize> {
        Ok(self.table_entry(table)?.state.read().counter_count)
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    pub fn total_rule_count(&self) -> usize {
        self.rules.read().len()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.read().len()
    }

    /// Number of rules referencing a counter.
    pub fn counter_ref_count(&self, id: AclCounterOid) -> Option<u32> {
        self.ledger.ref_count(SharedResource::Counter(id))
    }

    pub fn resource_ref_count(&self, resource: SharedResource) -> Option<u32> {
        self.ledger.ref_count(resource)
    }

    /// Rules referencing a resource, in id order.
    pub fn resource_holders(&self, resource: SharedResource) -> Vec<AclEntryOid> {
        self.ledger.holders(resource)
    }

    /// Number of table ids still available.
    pub fn available_table_ids(&self) -> u32 {
        self.allocator.lock().available()
    }

    pub fn stats(&self) -> AclStoreStats {
        self.stats.snapshot()
    }

    // ============ Internals ============

    fn table_entry(&self, id: AclTableOid) -> AclResult<Arc<TableEntry>> {
        self.tables
            .read()
            .find(&id)
            .cloned()
            .ok_or(AclError::TableNotFound(id))
    }

    fn rule_snapshot(&self, id: AclEntryOid) -> AclResult<Arc<AclRule>> {
        self.get_rule(id).ok_or(AclError::RuleNotFound(id))
    }

    fn check_table_accepts_rule(
        entry: &TableEntry,
        retired: bool,
        rule_count: usize,
    ) -> AclResult<()> {
        if retired {
            return Err(AclError::TableNotFound(entry.table.id));
        }
        if !entry.table.has_room(rule_count) {
            return Err(AclError::TableFull {
                table: entry.table.id,
                size: entry.table.size,
            });
        }
        Ok(())
    }

    fn evaluate_entry(&self, entry: &TableEntry, packet: &PacketFields) -> Option<AclMatch> {
        let rules: Vec<Arc<AclRule>> = {
            let state = entry.state.read();
            if state.retired {
                return None;
            }
            state.rules.iter().cloned().collect()
        };
        eval::evaluate(rules.iter().map(Arc::as_ref), packet, |udf| {
            self.resolve_udf(udf)
        })
    }

    fn resolve_udf(&self, udf: UdfField) -> Option<usize> {
        match self.backend.resolve_udf(udf.group, udf.index) {
            Ok(offset) => Some(offset),
            Err(e) => {
                debug!("AclStore: Cannot resolve {}: {}", udf, e);
                None
            }
        }
    }

    /// Swaps the indexed snapshot `current` for `replacement` and re-splices
    /// it into the table's list.
    fn replace_rule(
        &self,
        entry: &TableEntry,
        current: &Arc<AclRule>,
        replacement: Arc<AclRule>,
    ) -> AclResult<Arc<AclRule>> {
        let id = current.id;
        let mut state = entry.state.write();
        let mut rules = self.rules.write();
        let slot = rules.find_mut(&id).ok_or(AclError::RuleNotFound(id))?;
        if !Arc::ptr_eq(&slot.rule, current) {
            return Err(AclError::StaleRule(id));
        }
        if state.rules.remove(slot.position).is_none() {
            return Err(AclError::Inconsistent(format!(
                "Rule {} was indexed but not listed",
                id
            )));
        }
        slot.position = state.rules.insert(Arc::clone(&replacement));
        slot.rule = Arc::clone(&replacement);
        Ok(replacement)
    }

    /// Takes every reference `rule` holds. A counter that does not exist yet
    /// is created implicitly with the rule's reference already taken.
    fn acquire_resources(
        &self,
        entry: &TableEntry,
        rule: &AclRule,
    ) -> AclResult<Vec<SharedResource>> {
        let resources = rule.shared_resources();
        let Some(counter) = rule.counter else {
            self.attach_resources(entry, &resources, rule.id)?;
            return Ok(resources);
        };

        self.acquire_counter(entry, counter, rule.id)?;
        let others: Vec<SharedResource> = resources
            .iter()
            .copied()
            .filter(|resource| !matches!(resource, SharedResource::Counter(_)))
            .collect();
        if let Err(e) = self.attach_resources(entry, &others, rule.id) {
            self.release_references(rule.id, &[SharedResource::Counter(counter)]);
            return Err(e);
        }
        Ok(resources)
    }

    /// Attaches `rule` to a counter of the entry's table, creating the
    /// counter implicitly if needed.
    ///
    /// Lookup and attach happen under the table's read lock, and an implicit
    /// counter is registered and attached under its write lock, so a counter
    /// discarded by a concurrent rule removal is never attached to.
    fn acquire_counter(
        &self,
        entry: &TableEntry,
        id: AclCounterOid,
        rule: AclEntryOid,
    ) -> AclResult<()> {
        for _ in 0..COUNTER_ACQUIRE_ATTEMPTS {
            {
                let _state = entry.state.read();
                if self.check_counter_table(id, &entry.table)? {
                    self.ledger.attach(SharedResource::Counter(id), rule)?;
                    return Ok(());
                }
            }

            let spec = AclCounterSpec::new(id, entry.table.id);
            match self.create_counter_with(spec, CounterOwnership::Implicit, Some(rule)) {
                Ok(_) => return Ok(()),
                // Created concurrently by another rule; attach to that one.
                Err(AclError::DuplicateKey(_)) => {
                    debug!("AclStore: Counter {} created concurrently, retrying", id);
                }
                Err(e) => return Err(e),
            }
        }
        Err(AclError::Inconsistent(format!(
            "Counter {} neither attachable nor creatable after {} attempts",
            id, COUNTER_ACQUIRE_ATTEMPTS
        )))
    }

    /// Returns true if the counter exists; fails if it belongs to another
    /// table.
    fn check_counter_table(&self, id: AclCounterOid, table: &AclTable) -> AclResult<bool> {
        match self.counters.read().find(&id) {
            Some(counter) if counter.table != table.id => Err(AclError::InvalidAttribute(format!(
                "Counter {} belongs to table {}, not {}",
                id, counter.table, table.id
            ))),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Creates a counter, registering it with `holder`'s reference already
    /// taken when given.
    fn create_counter_with(
        &self,
        spec: AclCounterSpec,
        ownership: CounterOwnership,
        holder: Option<AclEntryOid>,
    ) -> AclResult<AclCounter> {
        if spec.id.is_null() {
            return Err(AclError::InvalidAttribute("Counter id is null".to_string()));
        }
        let entry = self.table_entry(spec.table)?;
        if self.counters.read().contains(&spec.id) {
            return Err(AclError::DuplicateKey(spec.id.to_string()));
        }

        let mut counter = AclCounter::new(spec, ownership);
        let handle = self
            .backend
            .create_counter(&counter)
            .map_err(|e| self.backend_failure(format!("create counter {}", counter.id), e))?;
        counter.set_npu_handle(handle);

        let committed = {
            let mut state = entry.state.write();
            if state.retired {
                Err(AclError::TableNotFound(counter.table))
            } else {
                let inserted = self.counters.write().insert(counter.id, counter.clone());
                match inserted {
                    Err(e) => Err(e.into_acl_error(AclError::CounterNotFound)),
                    Ok(()) => match self.register_counter(counter.id, holder) {
                        Ok(()) => {
                            state.counter_count += 1;
                            Ok(())
                        }
                        Err(e) => {
                            let _ = self.counters.write().remove(&counter.id);
                            Err(e)
                        }
                    },
                }
            }
        };

        if let Err(e) = committed {
            if let Err(remove) = self.backend.remove_counter(handle) {
                error!(
                    "AclStore: Failed to remove counter {} during rollback: {}",
                    counter.id, remove
                );
            }
            return Err(e);
        }

        StatsCounters::bump(&self.stats.counters_created);
        debug!(
            "AclStore: Created {:?} counter {} in table {}",
            ownership, counter.id, counter.table
        );
        Ok(counter)
    }

    fn register_counter(&self, id: AclCounterOid, holder: Option<AclEntryOid>) -> AclResult<()> {
        let resource = SharedResource::Counter(id);
        match holder {
            Some(rule) => self.ledger.register_held(resource, rule),
            None => self.ledger.register(resource),
        }
    }

    /// Attaches under the table's read lock so a counter committed by a
    /// concurrent create is fully registered before it is attached.
    fn attach_resources(
        &self,
        entry: &TableEntry,
        resources: &[SharedResource],
        rule: AclEntryOid,
    ) -> AclResult<()> {
        let _state = entry.state.read();
        self.ledger.attach_all(resources, rule)
    }

    /// Detaches a rule's references and destroys implicit counters left
    /// without rules.
    fn release_references(&self, rule: AclEntryOid, resources: &[SharedResource]) {
        for resource in resources {
            match self.ledger.detach(*resource, rule) {
                Ok(0) => {
                    if let SharedResource::Counter(counter) = resource {
                        self.discard_implicit_counter(*counter);
                    }
                }
                Ok(_) => {}
                Err(e) => error!(
                    "AclStore: Failed to release {} from rule {}: {}",
                    resource, rule, e
                ),
            }
        }
    }

    /// Destroys an implicit counter if no rule references it anymore.
    fn discard_implicit_counter(&self, id: AclCounterOid) {
        let implicit = self
            .counters
            .read()
            .find(&id)
            .map(AclCounter::is_implicit)
            .unwrap_or(false);
        if !implicit {
            return;
        }
        match self.destroy_counter(id) {
            Ok(()) | Err(AclError::CounterNotFound(_)) => {}
            // Picked up by another rule in the meantime.
            Err(AclError::CounterInUse { .. }) => {}
            Err(e) => error!("AclStore: Failed to destroy implicit counter {}: {}", id, e),
        }
    }

    fn remove_rule_handle(&self, id: AclEntryOid, handle: NpuHandle) {
        if let Err(e) = self.backend.remove_rule(handle) {
            error!("AclStore: Failed to remove rule {} handle {}: {}", id, handle, e);
        }
    }

    fn remove_table_handle(&self, id: AclTableOid, handle: NpuHandle) {
        if let Err(e) = self.backend.remove_table(handle) {
            error!("AclStore: Failed to remove table {} handle {}: {}", id, handle, e);
        }
    }

    fn release_table_index(&self, index: AclTableIndex) {
        if let Err(e) = self.allocator.lock().release(index) {
            error!("AclStore: Failed to release table index {}: {}", index, e);
        }
    }

    fn backend_failure(&self, operation: String, e: sonic_sai::SaiError) -> AclError {
        StatsCounters::bump(&self.stats.backend_errors);
        let err = AclError::BackendFailure(e);
        if err.is_retryable() {
            warn!("AclStore: Backend failed to {} (retryable): {}", operation, err);
        } else {
            error!("AclStore: Backend failed to {}: {}", operation, err);
        }
        err
    }
}
