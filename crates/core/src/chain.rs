//! Per-element version chains.
//!
//! Every transaction that touches an element, directly or through an
//! incident edge, records a chain entry: a small auxiliary entity with
//! `graph.chain/element = ref(element)` and
//! `graph.chain/previous-tx = <previous touching tx>`, asserted in the
//! touching transaction itself. Following `previous-tx` walks an element's
//! versions backwards; looking up entries whose `previous-tx` is a given
//! transaction walks them forwards.
//!
//! The first transaction that touches an element has no entry.
//!
//! Alongside the entries, two keyed tables answer the per-element
//! lookups directly: one by `(element, tx)` and one by
//! `(element, previous tx)`. Both are written in the same redb transaction
//! as the mutation.

use redb::{ReadableTable, Table, TableDefinition};

use crate::error::Result;
use crate::store::FactStore;
use crate::value::{Basis, EntityId, TxId};

/// `"{entity:020}|{tx:020}"` → the entity's previous touching transaction,
/// `0` for its first. One row per transaction touching the entity.
pub(crate) const TOUCHES: TableDefinition<&str, u64> = TableDefinition::new("chain_touches");
/// `"{entity:020}|{previous:020}"` → the touching transaction after
/// `previous`.
pub(crate) const SUCCESSORS: TableDefinition<&str, u64> = TableDefinition::new("chain_successors");

type ChainTable<'txn> = Table<'txn, &'static str, u64>;

/// One link of an element's chain: `tx` touched the element, and the
/// touch before it was `previous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChainEntry {
    pub tx: TxId,
    pub previous: TxId,
}

fn key(entity: EntityId, tx: u64) -> String {
    format!("{:020}|{:020}", entity.0, tx)
}

fn prefix(entity: EntityId) -> String {
    format!("{:020}|", entity.0)
}

fn tx_of_key(key: &str) -> Option<TxId> {
    key.rsplit('|').next()?.parse().ok().map(TxId)
}

fn as_previous(raw: u64) -> Option<TxId> {
    (raw != 0).then_some(TxId(raw))
}

/// Newest transaction at or before `basis` that touched `entity`.
pub(crate) fn latest_touch<T>(touches: &T, entity: EntityId, basis: Basis) -> Result<Option<TxId>>
where
    T: ReadableTable<&'static str, u64>,
{
    let lo = prefix(entity);
    let hi = key(entity, basis.map_or(u64::MAX, |b| b.0));
    match touches.range(lo.as_str()..=hi.as_str())?.next_back() {
        Some(entry) => {
            let (k, _previous) = entry?;
            Ok(tx_of_key(k.value()))
        }
        None => Ok(None),
    }
}

/// Record that `tx` touched `entity`, linking it to `previous`.
pub(crate) fn record(
    touches: &mut ChainTable<'_>,
    successors: &mut ChainTable<'_>,
    entity: EntityId,
    tx: TxId,
    previous: Option<TxId>,
) -> Result<()> {
    touches.insert(key(entity, tx.0).as_str(), previous.map_or(0, |p| p.0))?;
    if let Some(previous) = previous {
        successors.insert(key(entity, previous.0).as_str(), tx.0)?;
    }
    Ok(())
}

/// The transaction that produced the version of `entity` visible at
/// `basis` (`None` = latest).
pub fn resolve_current_time_id(
    store: &FactStore,
    entity: EntityId,
    basis: Basis,
) -> Result<Option<TxId>> {
    store.read_chain(|touches, _| latest_touch(touches, entity, basis))
}

/// The touch of `entity` that came before transaction `tx`.
pub fn resolve_previous_transaction(
    store: &FactStore,
    entity: EntityId,
    tx: TxId,
) -> Result<Option<TxId>> {
    store.read_chain(|touches, _| {
        let raw = touches.get(key(entity, tx.0).as_str())?.map(|g| g.value());
        match raw {
            Some(previous) => Ok(as_previous(previous)),
            // `tx` did not touch the entity.
            None if tx.0 == 0 => Ok(None),
            None => latest_touch(touches, entity, Some(TxId(tx.0 - 1))),
        }
    })
}

/// The touch of `entity` that came after transaction `tx`.
pub fn resolve_next_transaction(
    store: &FactStore,
    entity: EntityId,
    tx: TxId,
) -> Result<Option<TxId>> {
    store.read_chain(|touches, successors| {
        let raw = successors.get(key(entity, tx.0).as_str())?.map(|g| g.value());
        if let Some(next) = raw {
            return Ok(Some(TxId(next)));
        }
        let lo = key(entity, tx.0.saturating_add(1));
        let hi = key(entity, u64::MAX);
        match touches.range(lo.as_str()..=hi.as_str())?.next() {
            Some(entry) => {
                let (k, _previous) = entry?;
                Ok(tx_of_key(k.value()))
            }
            None => Ok(None),
        }
    })
}

/// All chain entries for `entity`, oldest first.
pub fn entries(store: &FactStore, entity: EntityId) -> Result<Vec<ChainEntry>> {
    store.read_chain(|touches, _| {
        let lo = prefix(entity);
        let hi = key(entity, u64::MAX);
        let mut out = Vec::new();
        for entry in touches.range(lo.as_str()..=hi.as_str())? {
            let (k, previous) = entry?;
            if let (Some(tx), Some(previous)) = (tx_of_key(k.value()), as_previous(previous.value())) {
                out.push(ChainEntry { tx, previous });
            }
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, SchemaManager, CHAIN_ELEMENT, ELEMENT_TYPE};
    use crate::store::Op;
    use crate::value::{ElementKind, Value, ValueType};

    fn store() -> FactStore {
        let store = FactStore::open_in_memory().unwrap();
        SchemaManager::new(&store).install_system_attributes().unwrap();
        store
            .install_attribute(&AttributeDef::new("name.string.vertex", ValueType::String))
            .unwrap();
        store
    }

    fn touch(store: &FactStore, e: EntityId, name: &str) -> TxId {
        store
            .transact(&[Op::add(e, "name.string.vertex", name)], &[e], None)
            .unwrap()
            .tx
    }

    #[test]
    fn first_touch_has_no_entry() {
        let store = store();
        let e = store.reserve_entity_id().unwrap();
        let t1 = store
            .transact(&[Op::add(e, ELEMENT_TYPE, ElementKind::Vertex.keyword())], &[e], None)
            .unwrap()
            .tx;
        assert!(entries(&store, e).unwrap().is_empty());
        assert_eq!(resolve_current_time_id(&store, e, None).unwrap(), Some(t1));
        assert_eq!(resolve_previous_transaction(&store, e, t1).unwrap(), None);
    }

    #[test]
    fn chain_links_every_touch() {
        let store = store();
        let e = store.reserve_entity_id().unwrap();
        let t1 = touch(&store, e, "a");
        let t2 = touch(&store, e, "b");
        let t3 = touch(&store, e, "c");

        assert_eq!(
            entries(&store, e).unwrap(),
            vec![
                ChainEntry { tx: t2, previous: t1 },
                ChainEntry { tx: t3, previous: t2 },
            ]
        );
        assert_eq!(resolve_previous_transaction(&store, e, t3).unwrap(), Some(t2));
        assert_eq!(resolve_next_transaction(&store, e, t1).unwrap(), Some(t2));
        assert_eq!(resolve_next_transaction(&store, e, t3).unwrap(), None);
        assert_eq!(resolve_current_time_id(&store, e, Some(t2)).unwrap(), Some(t2));
    }

    #[test]
    fn touch_without_own_facts_still_advances_chain() {
        let store = store();
        let ids = store.reserve_entity_ids(2).unwrap();
        let (a, b) = (ids[0], ids[1]);
        let t1 = touch(&store, a, "a");
        // A transaction that writes only b but names a as touched.
        let t2 = store
            .transact(&[Op::add(b, "name.string.vertex", "b")], &[a, b], None)
            .unwrap()
            .tx;

        assert_eq!(resolve_current_time_id(&store, a, None).unwrap(), Some(t2));
        assert_eq!(resolve_previous_transaction(&store, a, t2).unwrap(), Some(t1));
        // b was new in t2, so it has no link back.
        assert!(entries(&store, b).unwrap().is_empty());
    }

    #[test]
    fn next_lookup_is_scoped_to_the_element() {
        let store = store();
        let ids = store.reserve_entity_ids(2).unwrap();
        let (a, b) = (ids[0], ids[1]);
        let t1 = store
            .transact(
                &[
                    Op::add(a, "name.string.vertex", "a"),
                    Op::add(b, "name.string.vertex", "b"),
                ],
                &[a, b],
                None,
            )
            .unwrap()
            .tx;
        let t2 = touch(&store, b, "b2");
        let t3 = touch(&store, a, "a2");

        assert_eq!(resolve_next_transaction(&store, a, t1).unwrap(), Some(t3));
        assert_eq!(resolve_next_transaction(&store, b, t1).unwrap(), Some(t2));
        // t2 never touched a.
        assert_eq!(resolve_next_transaction(&store, a, t2).unwrap(), Some(t3));
        assert_eq!(resolve_previous_transaction(&store, a, t2).unwrap(), Some(t1));
        assert_eq!(resolve_next_transaction(&store, a, t3).unwrap(), None);
    }

    #[test]
    fn entries_are_also_kept_as_facts() {
        let store = store();
        let e = store.reserve_entity_id().unwrap();
        let t1 = touch(&store, e, "a");
        touch(&store, e, "b");
        touch(&store, e, "c");

        let links = store
            .entities_with(CHAIN_ELEMENT, &Value::Ref(e), None)
            .unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(resolve_current_time_id(&store, e, Some(TxId(0))).unwrap(), None);
        assert_eq!(resolve_current_time_id(&store, e, Some(t1)).unwrap(), Some(t1));
    }

    #[test]
    fn untouched_writes_still_count_as_versions() {
        let store = store();
        let e = store.reserve_entity_id().unwrap();
        let t1 = store
            .transact(&[Op::add(e, "name.string.vertex", "a")], &[], None)
            .unwrap()
            .tx;
        let t2 = store
            .transact(&[Op::add(e, "name.string.vertex", "b")], &[], None)
            .unwrap()
            .tx;
        assert_eq!(resolve_previous_transaction(&store, e, t2).unwrap(), Some(t1));
        assert_eq!(resolve_next_transaction(&store, e, t1).unwrap(), Some(t2));
    }
}
