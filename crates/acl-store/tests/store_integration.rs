//! Integration tests for the ACL store against a mock backend
//!
//! These tests drive the store through its public API and check the
//! bookkeeping it keeps in step with the backend: table ids, rule order,
//! shared references and rollback when the backend rejects a call.

use pretty_assertions::assert_eq;
use sonic_acl_store::{
    AclAction, AclBackend, AclCounter, AclCounterSpec, AclError, AclFilter, AclMatchField,
    AclPacketAction, AclRule, AclRuleUpdate, AclStage, AclStore, AclStoreConfig, AclTable,
    AclTableSpec, AdminState, CounterOwnership, PacketFields, SampleDirection, SharedResource,
    UdfField,
};
use sonic_sai::{
    AclCounterOid, AclEntryOid, AclTableOid, NpuHandle, PolicerOid, SaiError, SaiResult,
    SaiStatus, SamplePacketOid, UdfGroupOid,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

type RemovalHook = Box<dyn FnOnce(NpuHandle) -> SaiResult<()> + Send>;

/// Mock backend for testing
///
/// Records installed objects and fails selected calls on demand.
pub struct MockBackend {
    objects: Mutex<Vec<MockObject>>,
    next_handle: Mutex<u64>,
    failures: Mutex<HashSet<FailPoint>>,
    udf_offsets: Mutex<HashMap<(UdfGroupOid, u16), usize>>,
    /// Runs once, at the start of the next rule removal.
    rule_removal_hook: Mutex<Option<RemovalHook>>,
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub handle: NpuHandle,
    pub object_type: MockObjectType,
    /// Rule priority, for installed rules.
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockObjectType {
    Table,
    Rule,
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateTable,
    RemoveTable,
    InstallRule,
    RemoveRule,
    CreateCounter,
    RemoveCounter,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            next_handle: Mutex::new(1),
            failures: Mutex::new(HashSet::new()),
            udf_offsets: Mutex::new(HashMap::new()),
            rule_removal_hook: Mutex::new(None),
        }
    }

    /// Makes every call at `point` fail until cleared.
    pub fn fail(&self, point: FailPoint) {
        self.failures.lock().unwrap().insert(point);
    }

    /// Runs `hook` when the next rule is removed; an error from the hook
    /// fails that removal.
    pub fn on_next_rule_removal(
        &self,
        hook: impl FnOnce(NpuHandle) -> SaiResult<()> + Send + 'static,
    ) {
        *self.rule_removal_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn set_udf_offset(&self, group: UdfGroupOid, index: u16, offset: usize) {
        self.udf_offsets
            .lock()
            .unwrap()
            .insert((group, index), offset);
    }

    /// Count objects of a specific type
    pub fn count_objects(&self, object_type: MockObjectType) -> usize {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|obj| obj.object_type == object_type)
            .count()
    }

    pub fn get_object(&self, handle: NpuHandle) -> Option<MockObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|obj| obj.handle == handle)
            .cloned()
    }

    fn check(&self, point: FailPoint) -> SaiResult<()> {
        if self.failures.lock().unwrap().contains(&point) {
            Err(SaiError::from_status(SaiStatus::InsufficientResources))
        } else {
            Ok(())
        }
    }

    fn create(&self, object_type: MockObjectType, priority: Option<u32>) -> NpuHandle {
        let mut next = self.next_handle.lock().unwrap();
        let handle = NpuHandle::new(*next);
        *next += 1;
        self.objects.lock().unwrap().push(MockObject {
            handle,
            object_type,
            priority,
        });
        handle
    }

    fn remove(&self, handle: NpuHandle, object_type: MockObjectType) -> SaiResult<()> {
        let mut objects = self.objects.lock().unwrap();
        match objects
            .iter()
            .position(|obj| obj.handle == handle && obj.object_type == object_type)
        {
            Some(pos) => {
                objects.remove(pos);
                Ok(())
            }
            None => Err(SaiError::not_found(format!("{:?} {}", object_type, handle))),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AclBackend for MockBackend {
    fn create_table(&self, _table: &AclTable) -> SaiResult<NpuHandle> {
        self.check(FailPoint::CreateTable)?;
        Ok(self.create(MockObjectType::Table, None))
    }

    fn remove_table(&self, handle: NpuHandle) -> SaiResult<()> {
        self.check(FailPoint::RemoveTable)?;
        self.remove(handle, MockObjectType::Table)
    }

    fn install_rule(&self, rule: &AclRule) -> SaiResult<NpuHandle> {
        self.check(FailPoint::InstallRule)?;
        Ok(self.create(MockObjectType::Rule, Some(rule.priority)))
    }

    fn remove_rule(&self, handle: NpuHandle) -> SaiResult<()> {
        let hook = self.rule_removal_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(handle)?;
        }
        self.check(FailPoint::RemoveRule)?;
        self.remove(handle, MockObjectType::Rule)
    }

    fn create_counter(&self, _counter: &AclCounter) -> SaiResult<NpuHandle> {
        self.check(FailPoint::CreateCounter)?;
        Ok(self.create(MockObjectType::Counter, None))
    }

    fn remove_counter(&self, handle: NpuHandle) -> SaiResult<()> {
        self.check(FailPoint::RemoveCounter)?;
        self.remove(handle, MockObjectType::Counter)
    }

    fn resolve_udf(&self, group: UdfGroupOid, index: u16) -> SaiResult<usize> {
        self.udf_offsets
            .lock()
            .unwrap()
            .get(&(group, index))
            .copied()
            .ok_or_else(|| SaiError::not_found("udf"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn setup() -> (AclStore, Arc<MockBackend>) {
    setup_with(AclStoreConfig::default())
}

fn setup_with(config: AclStoreConfig) -> (AclStore, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new());
    let store = AclStore::new(config, backend.clone()).unwrap();
    (store, backend)
}

fn table_id(raw: u64) -> AclTableOid {
    AclTableOid::from_raw_unchecked(raw)
}

fn rule_id(raw: u64) -> AclEntryOid {
    AclEntryOid::from_raw_unchecked(raw)
}

fn counter_id(raw: u64) -> AclCounterOid {
    AclCounterOid::from_raw_unchecked(raw)
}

const T1: u64 = 0x7000_0000_0001;
const T2: u64 = 0x7000_0000_0002;

fn l3_table(raw: u64) -> AclTableSpec {
    AclTableSpec::new(table_id(raw), AclStage::Ingress).with_fields([
        AclMatchField::SrcIp,
        AclMatchField::DstIp,
        AclMatchField::L4DstPort,
    ])
}

fn rule(raw: u64, table: u64, priority: u32) -> AclRule {
    AclRule::new(rule_id(raw), table_id(table)).with_priority(priority)
}

fn dst_ip_24(network: Ipv4Addr) -> AclFilter {
    AclFilter::new(
        AclMatchField::DstIp,
        Ipv4Addr::new(255, 255, 255, 0).into(),
        network.into(),
    )
}

fn to(addr: Ipv4Addr) -> PacketFields {
    PacketFields::new().with(AclMatchField::DstIp, addr)
}

fn order(store: &AclStore, table: u64) -> Vec<u64> {
    store
        .table_rules(table_id(table))
        .unwrap()
        .iter()
        .map(|r| r.id.as_raw())
        .collect()
}

// ============================================================================
// Table ids
// ============================================================================

#[test]
fn test_table_ids_ascending_until_exhausted() {
    let (store, _) = setup();
    let indexes: Vec<u32> = (0..32)
        .map(|i| store.create_table(l3_table(0x100 + i)).unwrap().index)
        .collect();
    assert_eq!(indexes, (1..=32).collect::<Vec<u32>>());

    assert_eq!(
        store.create_table(l3_table(0x200)),
        Err(AclError::AllocatorExhausted { min: 1, max: 32 })
    );
    assert_eq!(store.table_count(), 32);
}

#[test]
fn test_destroyed_table_id_reused() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store.create_rule(rule(1, T1, 10)).unwrap();

    assert_eq!(
        store.destroy_table(table_id(T1)),
        Err(AclError::TableInUse {
            table: table_id(T1),
            rules: 1,
            counters: 0,
        })
    );

    store.destroy_rule(rule_id(1)).unwrap();
    store.destroy_table(table_id(T1)).unwrap();
    assert_eq!(backend.count_objects(MockObjectType::Table), 0);
    assert!(store.get_table(table_id(T1)).is_none());

    let again = store.create_table(l3_table(T2)).unwrap();
    assert_eq!(again.index, 1);
}

#[test]
fn test_table_with_counter_in_use() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_counter(AclCounterSpec::new(counter_id(1), table_id(T1)))
        .unwrap();
    assert!(matches!(
        store.destroy_table(table_id(T1)),
        Err(AclError::TableInUse { counters: 1, .. })
    ));
    store.destroy_counter(counter_id(1)).unwrap();
    store.destroy_table(table_id(T1)).unwrap();
}

// ============================================================================
// Index
// ============================================================================

#[test]
fn test_duplicate_rule_leaves_original() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_action(AclAction::drop()))
        .unwrap();

    let err = store
        .create_rule(rule(1, T1, 20).with_action(AclAction::forward()))
        .unwrap_err();
    assert!(matches!(err, AclError::DuplicateKey(_)));

    let kept = store.get_rule(rule_id(1)).unwrap();
    assert_eq!(kept.priority, 10);
    assert_eq!(kept.packet_action(), Some(AclPacketAction::Drop));
    assert_eq!(store.rule_count(table_id(T1)).unwrap(), 1);
    assert_eq!(backend.count_objects(MockObjectType::Rule), 1);
}

#[test]
fn test_unknown_objects() {
    let (store, _) = setup();
    assert_eq!(
        store.create_rule(rule(1, T1, 0)).unwrap_err(),
        AclError::TableNotFound(table_id(T1))
    );
    assert_eq!(
        store.destroy_rule(rule_id(9)),
        Err(AclError::RuleNotFound(rule_id(9)))
    );
    assert_eq!(
        store.destroy_counter(counter_id(9)),
        Err(AclError::CounterNotFound(counter_id(9)))
    );
    assert_eq!(
        store.evaluate(table_id(T1), &PacketFields::new()),
        Err(AclError::TableNotFound(table_id(T1)))
    );
}

// ============================================================================
// Ordering and matching
// ============================================================================

#[test]
fn test_priority_order() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store.create_rule(rule(1, T1, 10)).unwrap();
    store.create_rule(rule(2, T1, 30)).unwrap();
    store.create_rule(rule(3, T1, 20)).unwrap();
    assert_eq!(order(&store, T1), vec![2, 3, 1]);
}

#[test]
fn test_equal_priority_creation_order() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    for id in [5, 3, 9] {
        store.create_rule(rule(id, T1, 7)).unwrap();
    }
    assert_eq!(order(&store, T1), vec![5, 3, 9]);
}

#[test]
fn test_dst_ip_match() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(
            rule(1, T1, 10)
                .with_filter(dst_ip_24(Ipv4Addr::new(10, 0, 0, 0)))
                .with_action(AclAction::drop()),
        )
        .unwrap();

    let hit = store
        .evaluate(table_id(T1), &to(Ipv4Addr::new(10, 0, 0, 5)))
        .unwrap()
        .unwrap();
    assert_eq!(hit.rule, rule_id(1));
    assert_eq!(hit.packet_action(), Some(AclPacketAction::Drop));

    assert_eq!(
        store
            .evaluate(table_id(T1), &to(Ipv4Addr::new(10, 0, 1, 5)))
            .unwrap(),
        None
    );
}

#[test]
fn test_catch_all_and_first_match_wins() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 1).with_action(AclAction::forward()))
        .unwrap();
    store
        .create_rule(
            rule(2, T1, 100)
                .with_filter(dst_ip_24(Ipv4Addr::new(10, 0, 0, 0)))
                .with_action(AclAction::drop()),
        )
        .unwrap();

    let specific = store
        .evaluate(table_id(T1), &to(Ipv4Addr::new(10, 0, 0, 1)))
        .unwrap()
        .unwrap();
    assert_eq!(specific.rule, rule_id(2));
    assert_eq!(specific.packet_action(), Some(AclPacketAction::Drop));

    let other = store
        .evaluate(table_id(T1), &PacketFields::new())
        .unwrap()
        .unwrap();
    assert_eq!(other.rule, rule_id(1));
    assert_eq!(other.packet_action(), Some(AclPacketAction::Forward));
}

#[test]
fn test_disabled_rule_indexed_but_skipped() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_admin_state(AdminState::Disabled))
        .unwrap();

    assert!(store.get_rule(rule_id(1)).is_some());
    assert_eq!(order(&store, T1), vec![1]);
    assert_eq!(
        store.evaluate(table_id(T1), &PacketFields::new()).unwrap(),
        None
    );

    store
        .update_rule(rule_id(1), AclRuleUpdate::new().admin_state(AdminState::Enabled))
        .unwrap();
    assert!(store
        .evaluate(table_id(T1), &PacketFields::new())
        .unwrap()
        .is_some());
}

#[test]
fn test_filter_field_must_be_declared() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let err = store
        .create_rule(rule(1, T1, 0).with_filter(AclFilter::exact(AclMatchField::Dscp, 8u8.into())))
        .unwrap_err();
    assert_eq!(
        err,
        AclError::InvalidField {
            table: table_id(T1),
            field: AclMatchField::Dscp,
        }
    );
}

#[test]
fn test_priority_range() {
    let config = AclStoreConfig {
        max_priority: 100,
        ..Default::default()
    };
    let (store, _) = setup_with(config);
    store.create_table(l3_table(T1)).unwrap();
    assert!(matches!(
        store.create_rule(rule(1, T1, 101)),
        Err(AclError::InvalidAttribute(_))
    ));
    store.create_rule(rule(1, T1, 100)).unwrap();
    assert!(matches!(
        store.update_rule_priority(rule_id(1), 1000),
        Err(AclError::InvalidAttribute(_))
    ));
    assert_eq!(store.get_rule(rule_id(1)).unwrap().priority, 100);
}

// ============================================================================
// UDF
// ============================================================================

#[test]
fn test_udf_filter() {
    let (store, backend) = setup();
    let group = UdfGroupOid::from_raw_unchecked(0x9000);
    let udf = UdfField::new(group, 0);
    store
        .create_table(AclTableSpec::new(table_id(T1), AclStage::Ingress).with_udf_field(udf))
        .unwrap();
    store
        .create_rule(
            rule(1, T1, 10)
                .with_filter(AclFilter::user_defined(udf, vec![0xff, 0xff], vec![0x12, 0x34]))
                .with_action(AclAction::trap()),
        )
        .unwrap();

    let packet = PacketFields::new().with_payload(vec![0x00, 0x12, 0x34, 0x56]);

    // Not resolvable yet: the filter does not match, evaluation still succeeds.
    assert_eq!(store.evaluate(table_id(T1), &packet).unwrap(), None);

    backend.set_udf_offset(group, 0, 1);
    let hit = store.evaluate(table_id(T1), &packet).unwrap().unwrap();
    assert_eq!(hit.packet_action(), Some(AclPacketAction::Trap));

    backend.set_udf_offset(group, 0, 3);
    assert_eq!(store.evaluate(table_id(T1), &packet).unwrap(), None);
}

#[test]
fn test_udf_must_be_declared_by_table() {
    let (store, _) = setup();
    let declared = UdfField::new(UdfGroupOid::from_raw_unchecked(0x9000), 0);
    let other = UdfField::new(UdfGroupOid::from_raw_unchecked(0x9001), 0);
    store
        .create_table(AclTableSpec::new(table_id(T1), AclStage::Ingress).with_udf_field(declared))
        .unwrap();
    assert!(matches!(
        store.create_rule(
            rule(1, T1, 0).with_filter(AclFilter::user_defined(other, vec![0xff], vec![1]))
        ),
        Err(AclError::InvalidAttribute(_))
    ));
}

// ============================================================================
// Updates
// ============================================================================

#[test]
fn test_priority_update_uses_creation_sequence() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store.create_rule(rule(1, T1, 10)).unwrap();
    store.create_rule(rule(2, T1, 10)).unwrap();
    store.create_rule(rule(3, T1, 20)).unwrap();
    assert_eq!(order(&store, T1), vec![3, 1, 2]);

    // Rule 1 was created before rule 3, so it wins the tie at 20.
    store.update_rule_priority(rule_id(1), 20).unwrap();
    assert_eq!(order(&store, T1), vec![1, 3, 2]);

    // Back at 10 it is still ahead of rule 2.
    store.update_rule_priority(rule_id(1), 10).unwrap();
    assert_eq!(order(&store, T1), vec![3, 1, 2]);

    let installed = store.get_rule(rule_id(1)).unwrap().npu_handle();
    assert_eq!(backend.get_object(installed).unwrap().priority, Some(10));
    assert_eq!(backend.count_objects(MockObjectType::Rule), 3);
}

#[test]
fn test_update_replaces_filters_and_actions() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(
            rule(1, T1, 10)
                .with_filter(dst_ip_24(Ipv4Addr::new(10, 0, 0, 0)))
                .with_action(AclAction::drop()),
        )
        .unwrap();

    store
        .update_rule(
            rule_id(1),
            AclRuleUpdate::new()
                .filters(vec![dst_ip_24(Ipv4Addr::new(192, 168, 1, 0))])
                .actions(vec![AclAction::forward()]),
        )
        .unwrap();

    assert_eq!(
        store
            .evaluate(table_id(T1), &to(Ipv4Addr::new(10, 0, 0, 1)))
            .unwrap(),
        None
    );
    let hit = store
        .evaluate(table_id(T1), &to(Ipv4Addr::new(192, 168, 1, 1)))
        .unwrap()
        .unwrap();
    assert_eq!(hit.packet_action(), Some(AclPacketAction::Forward));
}

#[test]
fn test_update_clears_counter_reference() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap();
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(1));

    let updated = store
        .update_rule(rule_id(1), AclRuleUpdate::new().counter(None))
        .unwrap();
    assert_eq!(updated.counter, None);
    // The implicit counter lost its only rule.
    assert!(store.get_counter(counter_id(1)).is_none());
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
}

#[test]
fn test_update_install_failure_keeps_old_rule() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let original = store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap();

    backend.fail(FailPoint::InstallRule);
    let err = store
        .update_rule(
            rule_id(1),
            AclRuleUpdate::new().priority(50).counter(Some(counter_id(2))),
        )
        .unwrap_err();
    assert!(err.is_backend_failure());

    let current = store.get_rule(rule_id(1)).unwrap();
    assert!(Arc::ptr_eq(&current, &original));
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(1));
    // The implicit counter created for the update is gone again.
    assert!(store.get_counter(counter_id(2)).is_none());
    assert_eq!(store.stats().backend_errors, 1);
}

#[test]
fn test_update_remove_old_failure_restores() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let original = store.create_rule(rule(1, T1, 10)).unwrap();

    backend.fail(FailPoint::RemoveRule);
    let err = store.update_rule_priority(rule_id(1), 99).unwrap_err();
    assert!(err.is_backend_failure());
    backend.clear_failures();

    let current = store.get_rule(rule_id(1)).unwrap();
    assert_eq!(current.priority, 10);
    assert_eq!(current.npu_handle(), original.npu_handle());
    assert_eq!(order(&store, T1), vec![1]);
    // Removing the new snapshot failed as well, so it is left behind.
    assert_eq!(backend.count_objects(MockObjectType::Rule), 2);
}

#[test]
fn test_update_failure_after_concurrent_destroy() {
    let backend = Arc::new(MockBackend::new());
    let store = Arc::new(AclStore::new(AclStoreConfig::default(), backend.clone()).unwrap());
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap();

    // The rule is destroyed while the update removes its old snapshot, and
    // that removal then fails.
    let weak = Arc::downgrade(&store);
    backend.on_next_rule_removal(move |_| {
        if let Some(store) = weak.upgrade() {
            store.destroy_rule(rule_id(1)).unwrap();
        }
        Err(SaiError::from_status(SaiStatus::Failure))
    });

    let err = store
        .update_rule(rule_id(1), AclRuleUpdate::new().counter(Some(counter_id(2))))
        .unwrap_err();
    assert!(err.is_backend_failure());
    assert!(!err.is_retryable());

    assert!(store.get_rule(rule_id(1)).is_none());
    assert_eq!(store.rule_count(table_id(T1)).unwrap(), 0);
    // Both the old and the new implicit counter are released and gone.
    assert_eq!(store.counter_ref_count(counter_id(1)), None);
    assert_eq!(store.counter_ref_count(counter_id(2)), None);
    assert_eq!(store.table_counter_count(table_id(T1)).unwrap(), 0);
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
    // The old snapshot could not be removed and stays installed.
    assert_eq!(backend.count_objects(MockObjectType::Rule), 1);
    store.destroy_table(table_id(T1)).unwrap();
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn test_shared_explicit_counter() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let counter = store
        .create_counter(AclCounterSpec::new(counter_id(1), table_id(T1)))
        .unwrap();
    assert_eq!(counter.ownership, CounterOwnership::Explicit);

    store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap();
    store
        .create_rule(rule(2, T1, 20).with_counter(counter_id(1)))
        .unwrap();
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(2));
    assert_eq!(
        store.resource_holders(SharedResource::Counter(counter_id(1))),
        vec![rule_id(1), rule_id(2)]
    );

    assert_eq!(
        store.destroy_counter(counter_id(1)),
        Err(AclError::CounterInUse {
            counter: counter_id(1),
            refs: 2,
        })
    );

    store.destroy_rule(rule_id(1)).unwrap();
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(1));
    store.destroy_rule(rule_id(2)).unwrap();
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(0));

    // Explicit counters outlive their rules.
    assert!(store.get_counter(counter_id(1)).is_some());
    store.destroy_counter(counter_id(1)).unwrap();
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
}

#[test]
fn test_implicit_counter_lifecycle() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(7)))
        .unwrap();
    store
        .create_rule(rule(2, T1, 10).with_counter(counter_id(7)))
        .unwrap();

    let counter = store.get_counter(counter_id(7)).unwrap();
    assert_eq!(counter.ownership, CounterOwnership::Implicit);
    assert_eq!(counter.table, table_id(T1));
    assert_eq!(store.counter_ref_count(counter_id(7)), Some(2));
    assert_eq!(store.table_counter_count(table_id(T1)).unwrap(), 1);

    store.destroy_rule(rule_id(1)).unwrap();
    assert!(store.get_counter(counter_id(7)).is_some());
    store.destroy_rule(rule_id(2)).unwrap();
    assert!(store.get_counter(counter_id(7)).is_none());
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
    assert_eq!(store.table_counter_count(table_id(T1)).unwrap(), 0);

    store.destroy_table(table_id(T1)).unwrap();
}

#[test]
fn test_counter_from_other_table_rejected() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store.create_table(l3_table(T2)).unwrap();
    store
        .create_counter(AclCounterSpec::new(counter_id(1), table_id(T2)))
        .unwrap();
    assert!(matches!(
        store.create_rule(rule(1, T1, 0).with_counter(counter_id(1))),
        Err(AclError::InvalidAttribute(_))
    ));
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(0));
}

#[test]
fn test_policer_and_sample_session() {
    let (store, _) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let policer = PolicerOid::from_raw_unchecked(0x1200);
    let session = SamplePacketOid::from_raw_unchecked(0x1300);

    assert_eq!(
        store
            .create_rule(rule(1, T1, 0).with_policer(policer))
            .unwrap_err(),
        AclError::ResourceNotFound(SharedResource::Policer(policer))
    );

    store.register_policer(policer).unwrap();
    store.register_sample_session(session).unwrap();
    store
        .create_rule(
            rule(1, T1, 0)
                .with_policer(policer)
                .with_sample_session(SampleDirection::Ingress, session)
                .with_sample_session(SampleDirection::Egress, session),
        )
        .unwrap();
    assert_eq!(
        store.resource_ref_count(SharedResource::SamplePacket(session)),
        Some(2)
    );
    assert_eq!(
        store.unregister_policer(policer),
        Err(AclError::ResourceInUse {
            resource: SharedResource::Policer(policer),
            refs: 1,
        })
    );

    store.destroy_rule(rule_id(1)).unwrap();
    store.unregister_policer(policer).unwrap();
    store.unregister_sample_session(session).unwrap();
    assert_eq!(store.resource_ref_count(SharedResource::Policer(policer)), None);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn test_create_table_backend_failure() {
    let (store, backend) = setup();
    backend.fail(FailPoint::CreateTable);
    let err = store.create_table(l3_table(T1)).unwrap_err();
    assert!(err.is_backend_failure());
    assert_eq!(store.available_table_ids(), 32);
    assert_eq!(store.table_count(), 0);

    backend.clear_failures();
    assert_eq!(store.create_table(l3_table(T1)).unwrap().index, 1);
}

#[test]
fn test_create_rule_backend_failure_rolls_back() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let policer = PolicerOid::from_raw_unchecked(0x1200);
    store.register_policer(policer).unwrap();

    backend.fail(FailPoint::InstallRule);
    let err = store
        .create_rule(
            rule(1, T1, 10)
                .with_counter(counter_id(1))
                .with_policer(policer),
        )
        .unwrap_err();
    assert_eq!(
        err,
        AclError::BackendFailure(SaiError::from_status(SaiStatus::InsufficientResources))
    );
    assert!(err.is_retryable());

    assert!(store.get_rule(rule_id(1)).is_none());
    assert_eq!(store.rule_count(table_id(T1)).unwrap(), 0);
    assert!(store.get_counter(counter_id(1)).is_none());
    assert_eq!(store.resource_ref_count(SharedResource::Policer(policer)), Some(0));
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
    assert_eq!(
        store.evaluate(table_id(T1), &PacketFields::new()).unwrap(),
        None
    );
}

#[test]
fn test_implicit_counter_backend_failure() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    backend.fail(FailPoint::CreateCounter);
    assert!(store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap_err()
        .is_backend_failure());
    assert_eq!(store.rule_count(table_id(T1)).unwrap(), 0);
    assert_eq!(store.counter_count(), 0);
}

#[test]
fn test_destroy_rule_backend_failure_relinks() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 10).with_counter(counter_id(1)))
        .unwrap();
    store.create_rule(rule(2, T1, 5)).unwrap();

    backend.fail(FailPoint::RemoveRule);
    assert!(store.destroy_rule(rule_id(1)).unwrap_err().is_backend_failure());
    backend.clear_failures();

    assert_eq!(order(&store, T1), vec![1, 2]);
    assert_eq!(store.rule_count(table_id(T1)).unwrap(), 2);
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(1));
    let hit = store
        .evaluate(table_id(T1), &PacketFields::new())
        .unwrap()
        .unwrap();
    assert_eq!(hit.rule, rule_id(1));

    store.destroy_rule(rule_id(1)).unwrap();
    assert_eq!(order(&store, T1), vec![2]);
}

#[test]
fn test_destroy_table_backend_failure() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    backend.fail(FailPoint::RemoveTable);
    assert!(store.destroy_table(table_id(T1)).unwrap_err().is_backend_failure());
    backend.clear_failures();

    // Still usable.
    store.create_rule(rule(1, T1, 0)).unwrap();
    assert_eq!(store.available_table_ids(), 31);
}

#[test]
fn test_destroy_counter_backend_failure() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_counter(AclCounterSpec::new(counter_id(1), table_id(T1)))
        .unwrap();
    backend.fail(FailPoint::RemoveCounter);
    assert!(store.destroy_counter(counter_id(1)).unwrap_err().is_backend_failure());
    backend.clear_failures();

    store
        .create_rule(rule(1, T1, 0).with_counter(counter_id(1)))
        .unwrap();
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(1));
}

// ============================================================================
// Table size and stages
// ============================================================================

#[test]
fn test_table_full() {
    let (store, _) = setup();
    store.create_table(l3_table(T1).with_size(2)).unwrap();
    store.create_rule(rule(1, T1, 0)).unwrap();
    store.create_rule(rule(2, T1, 0)).unwrap();
    assert_eq!(
        store.create_rule(rule(3, T1, 0)).unwrap_err(),
        AclError::TableFull {
            table: table_id(T1),
            size: 2,
        }
    );
    store.destroy_rule(rule_id(1)).unwrap();
    store.create_rule(rule(3, T1, 0)).unwrap();
}

#[test]
fn test_stage_evaluation_precedence() {
    let (store, _) = setup();
    store.create_table(l3_table(T1).with_priority(5)).unwrap();
    store.create_table(l3_table(T2).with_priority(10)).unwrap();
    store
        .create_table(
            AclTableSpec::new(table_id(0x7000_0000_0003), AclStage::Egress)
                .with_field(AclMatchField::DstIp),
        )
        .unwrap();

    store
        .create_rule(rule(1, T1, 0).with_action(AclAction::forward()))
        .unwrap();
    store
        .create_rule(rule(2, T2, 0).with_action(AclAction::drop()))
        .unwrap();
    store
        .create_rule(rule(3, 0x7000_0000_0003, 0).with_action(AclAction::trap()))
        .unwrap();

    let matches = store.evaluate_stage(AclStage::Ingress, &PacketFields::new());
    let tables: Vec<AclTableOid> = matches.iter().map(|m| m.matched.table).collect();
    assert_eq!(tables, vec![table_id(T2), table_id(T1)]);
    assert_eq!(matches[0].table_priority, 10);

    let egress = store.evaluate_stage(AclStage::Egress, &PacketFields::new());
    assert_eq!(egress.len(), 1);
    assert_eq!(egress[0].matched.packet_action(), Some(AclPacketAction::Trap));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_evaluation_during_churn() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    store
        .create_rule(rule(1, T1, 1).with_action(AclAction::forward()))
        .unwrap();
    store
        .create_counter(AclCounterSpec::new(counter_id(1), table_id(T1)))
        .unwrap();

    std::thread::scope(|s| {
        for writer in 0..4u64 {
            let store = &store;
            s.spawn(move || {
                for i in 0..200u64 {
                    let id = 1000 + writer * 1000 + i;
                    store
                        .create_rule(
                            rule(id, T1, 100)
                                .with_filter(dst_ip_24(Ipv4Addr::new(10, 0, 0, 0)))
                                .with_counter(counter_id(1))
                                .with_action(AclAction::drop()),
                        )
                        .unwrap();
                    store.destroy_rule(rule_id(id)).unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = &store;
            s.spawn(move || {
                for _ in 0..500 {
                    let hit = store
                        .evaluate(table_id(T1), &to(Ipv4Addr::new(192, 168, 0, 1)))
                        .unwrap()
                        .unwrap();
                    assert_eq!(hit.rule, rule_id(1));
                    let any = store
                        .evaluate(table_id(T1), &to(Ipv4Addr::new(10, 0, 0, 1)))
                        .unwrap();
                    assert!(any.is_some());
                }
            });
        }
    });

    assert_eq!(order(&store, T1), vec![1]);
    assert_eq!(store.counter_ref_count(counter_id(1)), Some(0));
    assert_eq!(backend.count_objects(MockObjectType::Rule), 1);
    assert_eq!(store.stats().rules_created, 801);
    assert_eq!(store.stats().rules_deleted, 800);
}

#[test]
fn test_implicit_counter_shared_during_churn() {
    let (store, backend) = setup();
    store.create_table(l3_table(T1)).unwrap();
    let shared = counter_id(0x77);

    std::thread::scope(|s| {
        for worker in 0..8u64 {
            let store = &store;
            s.spawn(move || {
                for i in 0..2_000u64 {
                    let id = 10_000 * (worker + 1) + i;
                    store
                        .create_rule(rule(id, T1, 10).with_counter(shared))
                        .unwrap();
                    store.destroy_rule(rule_id(id)).unwrap();
                }
            });
        }
    });

    assert_eq!(store.total_rule_count(), 0);
    assert!(store.get_counter(shared).is_none());
    assert_eq!(store.counter_ref_count(shared), None);
    assert_eq!(store.table_counter_count(table_id(T1)).unwrap(), 0);
    assert_eq!(backend.count_objects(MockObjectType::Counter), 0);
    assert_eq!(store.stats().backend_errors, 0);
    store.destroy_table(table_id(T1)).unwrap();
}
