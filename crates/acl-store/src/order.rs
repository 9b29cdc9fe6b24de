//! Per-table rule ordering list.
//!
//! Rules are kept in evaluation order: descending priority, and for equal
//! priorities ascending creation sequence. The list is a slab of nodes linked
//! by slot index. A [`ListPosition`] names a node together with the
//! generation it was inserted under, so a position kept after its rule was
//! removed can never unlink whatever rule reuses the slot.

use std::cmp::{Ordering, Reverse};
use std::sync::Arc;

use crate::rule::AclRule;

/// Handle to a rule's node in a [`RuleOrderList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPosition {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node {
    rule: Option<Arc<AclRule>>,
    prev: Option<usize>,
    next: Option<usize>,
    generation: u64,
}

/// Priority-ordered sequence of a table's rules.
#[derive(Debug, Default)]
pub struct RuleOrderList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

fn order_key(rule: &AclRule) -> (Reverse<u32>, u64) {
    (Reverse(rule.priority), rule.sequence())
}

impl RuleOrderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splices a rule in at its ordered position.
    pub fn insert(&mut self, rule: Arc<AclRule>) -> ListPosition {
        let key = order_key(&rule);

        // First node that sorts after the new rule.
        let mut before = self.head;
        while let Some(slot) = before {
            let node = &self.nodes[slot];
            let sorts_after = node
                .rule
                .as_deref()
                .map(|existing| order_key(existing).cmp(&key) == Ordering::Greater)
                .unwrap_or(false);
            if sorts_after {
                break;
            }
            before = node.next;
        }

        let prev = match before {
            Some(slot) => self.nodes[slot].prev,
            None => self.tail,
        };
        let slot = self.alloc_node(rule, prev, before);

        match prev {
            Some(p) => self.nodes[p].next = Some(slot),
            None => self.head = Some(slot),
        }
        match before {
            Some(n) => self.nodes[n].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.len += 1;

        ListPosition {
            slot,
            generation: self.nodes[slot].generation,
        }
    }

    /// Unlinks the rule at `position` in O(1).
    ///
    /// Returns `None` if the position is stale.
    pub fn remove(&mut self, position: ListPosition) -> Option<Arc<AclRule>> {
        let node = self.nodes.get_mut(position.slot)?;
        if node.generation != position.generation {
            return None;
        }
        let rule = node.rule.take()?;
        let (prev, next) = (node.prev.take(), node.next.take());
        node.generation += 1;

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.free.push(position.slot);
        self.len -= 1;
        Some(rule)
    }

    /// Returns the rule at `position`, if the position is current.
    pub fn get(&self, position: ListPosition) -> Option<&Arc<AclRule>> {
        self.nodes
            .get(position.slot)
            .filter(|node| node.generation == position.generation)
            .and_then(|node| node.rule.as_ref())
    }

    /// Enabled rules in evaluation order.
    pub fn iter(&self) -> RuleIter<'_> {
        RuleIter {
            list: self,
            cursor: self.head,
            enabled_only: true,
        }
    }

    /// All rules, disabled ones included, in evaluation order.
    pub fn iter_all(&self) -> RuleIter<'_> {
        RuleIter {
            list: self,
            cursor: self.head,
            enabled_only: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn alloc_node(
        &mut self,
        rule: Arc<AclRule>,
        prev: Option<usize>,
        next: Option<usize>,
    ) -> usize {
        match self.free.pop() {
            Some(slot) => {
                let node = &mut self.nodes[slot];
                node.rule = Some(rule);
                node.prev = prev;
                node.next = next;
                slot
            }
            None => {
                self.nodes.push(Node {
                    rule: Some(rule),
                    prev,
                    next,
                    generation: 0,
                });
                self.nodes.len() - 1
            }
        }
    }
}

/// Forward traversal of a [`RuleOrderList`].
///
/// Cloning the iterator restarts from the clone's current node.
#[derive(Debug, Clone)]
pub struct RuleIter<'a> {
    list: &'a RuleOrderList,
    cursor: Option<usize>,
    enabled_only: bool,
}

impl<'a> Iterator for RuleIter<'a> {
    type Item = &'a Arc<AclRule>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.cursor {
            let node = &self.list.nodes[slot];
            self.cursor = node.next;
            if let Some(rule) = node.rule.as_ref() {
                if !self.enabled_only || rule.is_enabled() {
                    return Some(rule);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdminState;
    use pretty_assertions::assert_eq;
    use sonic_sai::{AclEntryOid, AclTableOid};

    fn rule(id: u64, priority: u32, sequence: u64) -> Arc<AclRule> {
        let mut rule = AclRule::new(
            AclEntryOid::from_raw_unchecked(id),
            AclTableOid::from_raw_unchecked(1),
        )
        .with_priority(priority);
        rule.set_sequence(sequence);
        Arc::new(rule)
    }

    fn ids(iter: RuleIter<'_>) -> Vec<u64> {
        iter.map(|r| r.id.as_raw()).collect()
    }

    #[test]
    fn test_priority_descending() {
        let mut list = RuleOrderList::new();
        list.insert(rule(1, 10, 0));
        list.insert(rule(2, 30, 1));
        list.insert(rule(3, 20, 2));
        assert_eq!(ids(list.iter()), vec![2, 3, 1]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut list = RuleOrderList::new();
        list.insert(rule(1, 10, 0));
        list.insert(rule(2, 10, 1));
        list.insert(rule(3, 10, 2));
        assert_eq!(ids(list.iter()), vec![1, 2, 3]);
    }

    #[test]
    fn test_reinsert_uses_sequence_not_arrival() {
        let mut list = RuleOrderList::new();
        let first = list.insert(rule(1, 10, 0));
        list.insert(rule(2, 10, 1));
        let removed = list.remove(first).unwrap();
        list.insert(removed);
        assert_eq!(ids(list.iter()), vec![1, 2]);
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut list = RuleOrderList::new();
        let a = list.insert(rule(1, 30, 0));
        let b = list.insert(rule(2, 20, 1));
        let c = list.insert(rule(3, 10, 2));
        assert_eq!(list.remove(b).unwrap().id.as_raw(), 2);
        assert_eq!(ids(list.iter()), vec![1, 3]);
        list.remove(a).unwrap();
        list.remove(c).unwrap();
        assert!(list.is_empty());
        assert_eq!(ids(list.iter()), Vec::<u64>::new());
    }

    #[test]
    fn test_stale_position_rejected() {
        let mut list = RuleOrderList::new();
        let stale = list.insert(rule(1, 10, 0));
        list.remove(stale).unwrap();
        // Reuses the freed slot under a new generation.
        let fresh = list.insert(rule(2, 10, 1));
        assert!(list.remove(stale).is_none());
        assert!(list.get(stale).is_none());
        assert_eq!(list.get(fresh).unwrap().id.as_raw(), 2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_iter_skips_disabled() {
        let mut list = RuleOrderList::new();
        list.insert(rule(1, 30, 0));
        let mut disabled = AclRule::new(
            AclEntryOid::from_raw_unchecked(2),
            AclTableOid::from_raw_unchecked(1),
        )
        .with_priority(20)
        .with_admin_state(AdminState::Disabled);
        disabled.set_sequence(1);
        list.insert(Arc::new(disabled));
        list.insert(rule(3, 10, 2));

        assert_eq!(ids(list.iter()), vec![1, 3]);
        assert_eq!(ids(list.iter_all()), vec![1, 2, 3]);
    }

    #[test]
    fn test_iter_is_restartable() {
        let mut list = RuleOrderList::new();
        list.insert(rule(1, 20, 0));
        list.insert(rule(2, 10, 1));
        let mut iter = list.iter();
        let restart = iter.clone();
        iter.next();
        assert_eq!(ids(iter), vec![2]);
        assert_eq!(ids(restart), vec![1, 2]);
    }
}
