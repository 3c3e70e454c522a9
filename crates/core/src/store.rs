//! Embedded fact store: append-only datoms over `redb`.
//!
//! Every assertion and retraction is kept forever. The state of an entity
//! "as of" a transaction is obtained by replaying its history up to that
//! transaction, so any past view can be materialised on demand.
//!
//! Write transactions are serialised by redb, which gives every commit a
//! place in one global order; [`TxId`]s are allocated inside the write
//! transaction and therefore follow that order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use redb::{Database, ReadOnlyTable, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain;
use crate::error::{EpochError, Result};
use crate::schema::{AttributeDef, Cardinality, CHAIN_ELEMENT, CHAIN_PREVIOUS_TX};
use crate::value::{instant_key, Basis, EntityId, TxId, Value};

/// Bumped whenever the on-disk layout changes incompatibly.
const FORMAT_VERSION: u64 = 2;

const FORMAT_KEY: &str = "format_version";
const NEXT_ENTITY: &str = "next_entity";
const NEXT_TX: &str = "next_tx";

/// Counters and format metadata.
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
/// Installed attribute definitions keyed by ident.
const ATTRIBUTES: TableDefinition<&str, &str> = TableDefinition::new("attributes");
/// Transaction id → [`TxRecord`].
const TRANSACTIONS: TableDefinition<u64, &str> = TableDefinition::new("transactions");
/// `"{instant}|{tx:020}"` → transaction id, for lookups by date.
const TX_BY_INSTANT: TableDefinition<&str, u64> = TableDefinition::new("tx_by_instant");
/// Composite key `"{entity:020}|{attribute}|{tx:020}|{seq:010}"`.
///
/// Zero-padded numbers keep one entity's history contiguous and, per
/// attribute, in commit order.
const EAVT: TableDefinition<&str, &str> = TableDefinition::new("eavt");
/// Composite key `"{attribute}|{value}|{entity:020}|{tx:020}|{seq:010}"`.
/// Only written for indexed attributes.
const AVET: TableDefinition<&str, &str> = TableDefinition::new("avet");

type IndexTable<'txn> = Table<'txn, &'static str, &'static str>;

// ---------------------------------------------------------------------------
// Datoms and operations
// ---------------------------------------------------------------------------

/// One assertion or retraction of `(entity, attribute, value)` in `tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datom {
    pub entity: EntityId,
    pub attribute: String,
    pub value: Value,
    pub tx: TxId,
    /// `true` for an assertion, `false` for a retraction.
    pub added: bool,
}

/// A pending write, applied in order by [`FactStore::transact`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Add {
        entity: EntityId,
        attribute: String,
        value: Value,
    },
    Retract {
        entity: EntityId,
        attribute: String,
        value: Value,
    },
    /// Retract every current fact whose subject is the entity.
    RetractEntity(EntityId),
}

impl Op {
    pub fn add(entity: EntityId, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Op::Add {
            entity,
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn retract(entity: EntityId, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Op::Retract {
            entity,
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// The entity whose facts this op changes.
    pub fn entity(&self) -> EntityId {
        match self {
            Op::Add { entity, .. } | Op::Retract { entity, .. } => *entity,
            Op::RetractEntity(entity) => *entity,
        }
    }
}

/// The instant a transaction was committed at (or backfilled to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx: TxId,
    pub instant: DateTime<Utc>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReport {
    pub tx: TxId,
    pub instant: DateTime<Utc>,
    /// Datoms written, chain entries included.
    pub datoms: usize,
    /// Version-chain entries written alongside the mutation.
    pub chain_entries: usize,
}

// ---------------------------------------------------------------------------
// Key layout and scanning
// ---------------------------------------------------------------------------

fn eavt_prefix(entity: EntityId) -> String {
    format!("{:020}|", entity.0)
}

fn eavt_attribute_prefix(entity: EntityId, attribute: &str) -> String {
    format!("{:020}|{}|", entity.0, attribute)
}

fn avet_prefix(attribute: &str, value: &Value) -> String {
    format!("{}|{}|", attribute, value.index_key())
}

fn eavt_key(datom: &Datom, seq: u32) -> String {
    format!(
        "{:020}|{}|{:020}|{:010}",
        datom.entity.0, datom.attribute, datom.tx.0, seq
    )
}

fn instant_prefix(at: &DateTime<Utc>) -> String {
    format!("{}|", instant_key(at))
}

fn instant_upper(at: &DateTime<Utc>) -> String {
    format!("{}|{:020}", instant_key(at), u64::MAX)
}

fn avet_key(datom: &Datom, seq: u32) -> String {
    format!(
        "{}|{}|{:020}|{:020}|{:010}",
        datom.attribute,
        datom.value.index_key(),
        datom.entity.0,
        datom.tx.0,
        seq
    )
}

pub(crate) fn visible(tx: TxId, basis: Basis) -> bool {
    basis.map_or(true, |b| tx <= b)
}

/// Datoms under `prefix` visible at `basis` that satisfy `keep`, in key order.
///
/// `keep` must re-check anything the prefix encodes: attribute names and
/// string values may themselves contain the `|` separator.
pub(crate) fn scan<T>(
    table: &T,
    prefix: &str,
    basis: Basis,
    keep: impl Fn(&Datom) -> bool,
) -> Result<Vec<Datom>>
where
    T: ReadableTable<&'static str, &'static str>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..)? {
        let (k, v) = entry?;
        if !k.value().starts_with(prefix) {
            break;
        }
        let datom: Datom = serde_json::from_str(v.value())?;
        if visible(datom.tx, basis) && keep(&datom) {
            results.push(datom);
        }
    }
    Ok(results)
}

/// Replay a history and keep the facts still asserted at its end.
///
/// The input must be chronological per `(entity, attribute, value)`, which
/// both index layouts guarantee.
pub(crate) fn replay(history: Vec<Datom>) -> Vec<Datom> {
    let mut state: BTreeMap<(EntityId, String, String), Datom> = BTreeMap::new();
    for datom in history {
        let key = (datom.entity, datom.attribute.clone(), datom.value.index_key());
        state.insert(key, datom);
    }
    state.into_values().filter(|d| d.added).collect()
}

fn next_counter(meta: &mut Table<'_, &'static str, u64>, key: &str, count: u64) -> Result<u64> {
    let current = meta.get(key)?.map(|guard| guard.value()).unwrap_or(1);
    meta.insert(key, current + count)?;
    Ok(current)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Append-only fact store. All writes are ACID (backed by `redb`).
pub struct FactStore {
    db: Database,
}

impl FactStore {
    /// Open or create a store at the given path.
    ///
    /// Re-opening an existing store is idempotent; a file written with a
    /// different storage format is rejected.
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        debug!(path, "opened fact store");
        Self::init(db)
    }

    /// Create an in-memory store (no file I/O). Data is lost on drop.
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            let existing = meta.get(FORMAT_KEY)?.map(|guard| guard.value());
            match existing {
                Some(version) if version != FORMAT_VERSION => {
                    return Err(EpochError::Storage(format!(
                        "incompatible storage format {version}, expected {FORMAT_VERSION}"
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert(FORMAT_KEY, FORMAT_VERSION)?;
                }
            }
            write_txn.open_table(ATTRIBUTES)?;
            write_txn.open_table(TRANSACTIONS)?;
            write_txn.open_table(TX_BY_INSTANT)?;
            write_txn.open_table(EAVT)?;
            write_txn.open_table(AVET)?;
            write_txn.open_table(chain::TOUCHES)?;
            write_txn.open_table(chain::SUCCESSORS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Allocate a fresh entity id. Ids are never handed out twice, even if
    /// the transaction that would have used them never commits.
    pub fn reserve_entity_id(&self) -> Result<EntityId> {
        let mut ids = self.reserve_entity_ids(1)?;
        ids.pop()
            .ok_or_else(|| EpochError::Storage("entity id allocation returned nothing".into()))
    }

    pub fn reserve_entity_ids(&self, count: u64) -> Result<Vec<EntityId>> {
        let write_txn = self.db.begin_write()?;
        let first = {
            let mut meta = write_txn.open_table(META)?;
            next_counter(&mut meta, NEXT_ENTITY, count)?
        };
        write_txn.commit()?;
        Ok((first..first + count).map(EntityId).collect())
    }

    /// Install an attribute definition. Returns `false` if an attribute with
    /// the same ident already exists (the existing definition is kept).
    pub fn install_attribute(&self, def: &AttributeDef) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ATTRIBUTES)?;
            if table.get(def.ident.as_str())?.is_some() {
                return Ok(false);
            }
            let value = serde_json::to_string(def)?;
            table.insert(def.ident.as_str(), value.as_str())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    pub fn attribute(&self, ident: &str) -> Result<Option<AttributeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTRIBUTES)?;
        let raw: Option<String> = table.get(ident)?.map(|guard| guard.value().to_string());
        raw.map(|json| serde_json::from_str(&json).map_err(EpochError::from))
            .transpose()
    }

    pub fn attributes(&self) -> Result<Vec<AttributeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTRIBUTES)?;
        let mut defs = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            defs.push(serde_json::from_str(v.value())?);
        }
        Ok(defs)
    }

    /// Apply `ops` as one atomic transaction.
    ///
    /// Every entity in `touched`, and every entity whose facts change, gets
    /// a version-chain entry linking this transaction to the entity's
    /// previous one, written in the same redb transaction. Entities with no
    /// earlier transaction get none.
    ///
    /// `instant` may backfill, but never to before the latest committed
    /// transaction: "as of" a date must not include later commits.
    ///
    /// Any failure aborts the whole transaction and is reported as
    /// [`EpochError::StoreCommit`]; none of its datoms become visible.
    pub fn transact(
        &self,
        ops: &[Op],
        touched: &[EntityId],
        instant: Option<DateTime<Utc>>,
    ) -> Result<TxReport> {
        self.transact_inner(ops, touched, instant).map_err(|e| {
            warn!(error = %e, ops = ops.len(), "transaction aborted");
            match e {
                EpochError::StoreCommit(_) => e,
                other => EpochError::StoreCommit(other.to_string()),
            }
        })
    }

    fn transact_inner(
        &self,
        ops: &[Op],
        touched: &[EntityId],
        instant: Option<DateTime<Utc>>,
    ) -> Result<TxReport> {
        let instant = instant.unwrap_or_else(Utc::now);
        let write_txn = self.db.begin_write()?;
        let report = {
            let mut meta = write_txn.open_table(META)?;
            let attributes = write_txn.open_table(ATTRIBUTES)?;
            let mut transactions = write_txn.open_table(TRANSACTIONS)?;
            let mut by_instant = write_txn.open_table(TX_BY_INSTANT)?;
            let mut eavt = write_txn.open_table(EAVT)?;
            let mut avet = write_txn.open_table(AVET)?;
            let mut touches = write_txn.open_table(chain::TOUCHES)?;
            let mut successors = write_txn.open_table(chain::SUCCESSORS)?;

            let latest: Option<TxRecord> = match transactions.last()? {
                Some((_k, v)) => Some(serde_json::from_str(v.value())?),
                None => None,
            };
            if let Some(latest) = latest {
                if instant < latest.instant {
                    return Err(EpochError::StoreCommit(format!(
                        "instant {instant} is before {} of {}",
                        latest.instant, latest.tx
                    )));
                }
            }

            let tx = TxId(next_counter(&mut meta, NEXT_TX, 1)?);

            let mut writer = DatomWriter {
                tx,
                seq: 0,
                eavt: &mut eavt,
                avet: &mut avet,
                attributes: &attributes,
                defs: HashMap::new(),
                written: BTreeSet::new(),
            };
            for op in ops {
                writer.apply(op)?;
            }

            let mut versioned = std::mem::take(&mut writer.written);
            versioned.extend(touched.iter().copied());
            let mut chain_entries = 0;
            for entity in versioned {
                // Read before this transaction's own row is recorded.
                let previous = chain::latest_touch(&touches, entity, None)?;
                chain::record(&mut touches, &mut successors, entity, tx, previous)?;
                if let Some(previous) = previous {
                    let entry = EntityId(next_counter(&mut meta, NEXT_ENTITY, 1)?);
                    writer.write(entry, CHAIN_ELEMENT, Value::Ref(entity), true)?;
                    writer.write(entry, CHAIN_PREVIOUS_TX, Value::Long(previous.0 as i64), true)?;
                    chain_entries += 1;
                }
            }

            let record = serde_json::to_string(&TxRecord { tx, instant })?;
            transactions.insert(tx.0, record.as_str())?;
            let instant_row = format!("{}|{:020}", instant_key(&instant), tx.0);
            by_instant.insert(instant_row.as_str(), tx.0)?;

            TxReport {
                tx,
                instant,
                datoms: writer.seq as usize,
                chain_entries,
            }
        };
        write_txn.commit()?;
        debug!(
            tx = %report.tx,
            datoms = report.datoms,
            chain_entries = report.chain_entries,
            "committed transaction"
        );
        Ok(report)
    }

    /// Facts currently asserted about `entity` at `basis`.
    pub fn entity(&self, entity: EntityId, basis: Basis) -> Result<Vec<Datom>> {
        Ok(replay(self.entity_history(entity, basis)?))
    }

    /// Every assertion and retraction about `entity` up to `basis`.
    pub fn entity_history(&self, entity: EntityId, basis: Basis) -> Result<Vec<Datom>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EAVT)?;
        scan(&table, &eavt_prefix(entity), basis, |d| d.entity == entity)
    }

    /// History of `(attribute, value)` up to `basis`, across all entities.
    /// Only available for indexed attributes.
    pub fn attribute_history(
        &self,
        attribute: &str,
        value: &Value,
        basis: Basis,
    ) -> Result<Vec<Datom>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AVET)?;
        scan(&table, &avet_prefix(attribute, value), basis, |d| {
            d.attribute == attribute && d.value == *value
        })
    }

    /// Entities holding `(attribute, value)` at `basis`, in id order.
    pub fn entities_with(
        &self,
        attribute: &str,
        value: &Value,
        basis: Basis,
    ) -> Result<Vec<EntityId>> {
        let current = replay(self.attribute_history(attribute, value, basis)?);
        let ids: BTreeSet<EntityId> = current.into_iter().map(|d| d.entity).collect();
        Ok(ids.into_iter().collect())
    }

    /// Run `f` against the chain tables (touches, successors) of one read
    /// snapshot.
    pub(crate) fn read_chain<R>(
        &self,
        f: impl FnOnce(&ReadOnlyTable<&'static str, u64>, &ReadOnlyTable<&'static str, u64>) -> Result<R>,
    ) -> Result<R> {
        let read_txn = self.db.begin_read()?;
        let touches = read_txn.open_table(chain::TOUCHES)?;
        let successors = read_txn.open_table(chain::SUCCESSORS)?;
        f(&touches, &successors)
    }

    pub fn transaction(&self, tx: TxId) -> Result<TxRecord> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let raw: Option<String> = table.get(tx.0)?.map(|guard| guard.value().to_string());
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(EpochError::NotFound(format!("transaction {tx}"))),
        }
    }

    pub fn latest_tx(&self) -> Result<Option<TxId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let latest = table.last()?.map(|(k, _v)| TxId(k.value()));
        Ok(latest)
    }

    /// The newest transaction whose instant is at or before `at`.
    pub fn tx_as_of(&self, at: DateTime<Utc>) -> Result<Option<TxId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TX_BY_INSTANT)?;
        let upper = instant_upper(&at);
        match table.range(..=upper.as_str())?.next_back() {
            Some(entry) => {
                let (_k, tx) = entry?;
                Ok(Some(TxId(tx.value())))
            }
            None => Ok(None),
        }
    }

    /// Transactions with an instant in `[from, to]`, in transaction order.
    pub fn transactions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TxRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        let read_txn = self.db.begin_read()?;
        let by_instant = read_txn.open_table(TX_BY_INSTANT)?;
        let transactions = read_txn.open_table(TRANSACTIONS)?;
        let lower = instant_prefix(&from);
        let upper = instant_upper(&to);
        let mut records = Vec::new();
        for entry in by_instant.range(lower.as_str()..=upper.as_str())? {
            let (_k, tx) = entry?;
            let raw: Option<String> = transactions
                .get(tx.value())?
                .map(|guard| guard.value().to_string());
            match raw {
                Some(json) => records.push(serde_json::from_str::<TxRecord>(&json)?),
                None => {
                    return Err(EpochError::NotFound(format!("transaction {}", tx.value())))
                }
            }
        }
        records.sort_by_key(|record| record.tx);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

struct DatomWriter<'a, 'txn> {
    tx: TxId,
    seq: u32,
    eavt: &'a mut IndexTable<'txn>,
    avet: &'a mut IndexTable<'txn>,
    attributes: &'a IndexTable<'txn>,
    defs: HashMap<String, AttributeDef>,
    /// Entities with at least one datom written.
    written: BTreeSet<EntityId>,
}

impl DatomWriter<'_, '_> {
    fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Add {
                entity,
                attribute,
                value,
            } => {
                let def = self.attribute(attribute)?;
                if def.value_type != value.value_type() {
                    return Err(EpochError::StoreCommit(format!(
                        "attribute {attribute} holds {} values, got {}",
                        def.value_type,
                        value.value_type()
                    )));
                }
                let current = self.current(*entity, attribute)?;
                if current.iter().any(|d| d.value == *value) {
                    return Ok(());
                }
                if def.cardinality == Cardinality::One {
                    for old in current {
                        self.write(*entity, attribute, old.value, false)?;
                    }
                }
                self.write(*entity, attribute, value.clone(), true)
            }
            Op::Retract {
                entity,
                attribute,
                value,
            } => {
                let current = self.current(*entity, attribute)?;
                if current.iter().any(|d| d.value == *value) {
                    self.write(*entity, attribute, value.clone(), false)?;
                }
                Ok(())
            }
            Op::RetractEntity(entity) => {
                let history = scan(&*self.eavt, &eavt_prefix(*entity), None, |_| true)?;
                for datom in replay(history) {
                    self.write(datom.entity, &datom.attribute, datom.value, false)?;
                }
                Ok(())
            }
        }
    }

    fn current(&self, entity: EntityId, attribute: &str) -> Result<Vec<Datom>> {
        let prefix = eavt_attribute_prefix(entity, attribute);
        let history = scan(&*self.eavt, &prefix, None, |d| d.attribute == attribute)?;
        Ok(replay(history))
    }

    fn attribute(&mut self, ident: &str) -> Result<AttributeDef> {
        if let Some(def) = self.defs.get(ident) {
            return Ok(def.clone());
        }
        let raw: Option<String> = self
            .attributes
            .get(ident)?
            .map(|guard| guard.value().to_string());
        let def: AttributeDef = match raw {
            Some(json) => serde_json::from_str(&json)?,
            None => return Err(EpochError::NotFound(format!("attribute {ident}"))),
        };
        self.defs.insert(ident.to_string(), def.clone());
        Ok(def)
    }

    fn write(&mut self, entity: EntityId, attribute: &str, value: Value, added: bool) -> Result<()> {
        let indexed = self.attribute(attribute)?.indexed;
        let datom = Datom {
            entity,
            attribute: attribute.to_string(),
            value,
            tx: self.tx,
            added,
        };
        let json = serde_json::to_string(&datom)?;
        self.eavt
            .insert(eavt_key(&datom, self.seq).as_str(), json.as_str())?;
        if indexed {
            self.avet
                .insert(avet_key(&datom, self.seq).as_str(), json.as_str())?;
        }
        self.seq += 1;
        self.written.insert(entity);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, SchemaManager};
    use crate::value::ValueType;
    use tempfile::NamedTempFile;

    fn store_with_name_attribute() -> FactStore {
        let store = FactStore::open_in_memory().unwrap();
        SchemaManager::new(&store).install_system_attributes().unwrap();
        store
            .install_attribute(&AttributeDef::new("name.string.vertex", ValueType::String))
            .unwrap();
        store
    }

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn entity_ids_are_never_reused() {
        let store = FactStore::open_in_memory().unwrap();
        let a = store.reserve_entity_id().unwrap();
        let batch = store.reserve_entity_ids(3).unwrap();
        let b = store.reserve_entity_id().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|id| *id > a && *id < b));
    }

    #[test]
    fn cardinality_one_replaces_previous_value() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let t1 = store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], None)
            .unwrap()
            .tx;
        let t2 = store
            .transact(&[Op::add(e, "name.string.vertex", "y")], &[], None)
            .unwrap()
            .tx;

        let now = store.entity(e, None).unwrap();
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].value, Value::from("y"));

        let then = store.entity(e, Some(t1)).unwrap();
        assert_eq!(then[0].value, Value::from("x"));

        // x asserted, then x retracted and y asserted.
        let history = store.entity_history(e, Some(t2)).unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn redundant_assertion_writes_nothing() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], None)
            .unwrap();
        let report = store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], None)
            .unwrap();
        assert_eq!(report.datoms, 0);
    }

    #[test]
    fn retract_entity_clears_every_fact() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        store
            .transact(
                &[
                    Op::add(e, crate::schema::ELEMENT_TYPE, crate::value::ElementKind::Vertex.keyword()),
                    Op::add(e, "name.string.vertex", "x"),
                ],
                &[],
                None,
            )
            .unwrap();
        store.transact(&[Op::RetractEntity(e)], &[], None).unwrap();
        assert!(store.entity(e, None).unwrap().is_empty());
        assert_eq!(store.entity_history(e, None).unwrap().len(), 4);
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let result = store.transact(
            &[
                Op::add(e, "name.string.vertex", "x"),
                Op::add(e, "missing.string.vertex", "y"),
            ],
            &[],
            None,
        );
        assert!(matches!(result, Err(EpochError::StoreCommit(_))));
        assert!(store.entity(e, None).unwrap().is_empty());
        assert_eq!(store.latest_tx().unwrap(), None);
    }

    #[test]
    fn value_type_must_match_attribute() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let result = store.transact(&[Op::add(e, "name.string.vertex", 42_i64)], &[], None);
        assert!(matches!(result, Err(EpochError::StoreCommit(_))));
    }

    #[test]
    fn indexed_lookup_by_attribute_value() {
        let store = store_with_name_attribute();
        let ids = store.reserve_entity_ids(2).unwrap();
        let vertex = crate::value::ElementKind::Vertex.keyword();
        let t1 = store
            .transact(&[Op::add(ids[0], crate::schema::ELEMENT_TYPE, vertex.clone())], &[], None)
            .unwrap()
            .tx;
        store
            .transact(&[Op::add(ids[1], crate::schema::ELEMENT_TYPE, vertex.clone())], &[], None)
            .unwrap();

        let type_attr = crate::schema::ELEMENT_TYPE;
        assert_eq!(store.entities_with(type_attr, &vertex, None).unwrap(), ids);
        assert_eq!(
            store.entities_with(type_attr, &vertex, Some(t1)).unwrap(),
            vec![ids[0]]
        );
    }

    #[test]
    fn tx_as_of_uses_transaction_instants() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let jan = dt("2024-01-01T00:00:00Z");
        let feb = dt("2024-02-01T00:00:00Z");
        let t1 = store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], Some(jan))
            .unwrap()
            .tx;
        let t2 = store
            .transact(&[Op::add(e, "name.string.vertex", "y")], &[], Some(feb))
            .unwrap()
            .tx;

        assert_eq!(store.tx_as_of(dt("2023-06-01T00:00:00Z")).unwrap(), None);
        assert_eq!(store.tx_as_of(dt("2024-01-15T00:00:00Z")).unwrap(), Some(t1));
        assert_eq!(store.tx_as_of(feb).unwrap(), Some(t2));
        assert_eq!(store.transaction(t1).unwrap().instant, jan);
        assert_eq!(
            store
                .transactions_between(jan, dt("2024-01-31T00:00:00Z"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn tx_as_of_sees_the_latest_of_equal_instants() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let jan = dt("2024-01-01T00:00:00Z");
        store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], Some(jan))
            .unwrap();
        let t2 = store
            .transact(&[Op::add(e, "name.string.vertex", "y")], &[], Some(jan))
            .unwrap()
            .tx;
        assert_eq!(store.tx_as_of(jan).unwrap(), Some(t2));
        assert_eq!(store.transactions_between(jan, jan).unwrap().len(), 2);
    }

    #[test]
    fn backfill_before_latest_instant_is_rejected() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        let t1 = store
            .transact(
                &[Op::add(e, "name.string.vertex", "x")],
                &[],
                Some(dt("2024-02-01T00:00:00Z")),
            )
            .unwrap()
            .tx;
        let result = store.transact(
            &[Op::add(e, "name.string.vertex", "y")],
            &[],
            Some(dt("2024-01-01T00:00:00Z")),
        );
        assert!(matches!(result, Err(EpochError::StoreCommit(_))));
        assert_eq!(store.latest_tx().unwrap(), Some(t1));
        assert_eq!(store.tx_as_of(dt("2024-01-15T00:00:00Z")).unwrap(), None);
    }

    #[test]
    fn written_entities_are_chained_without_being_touched() {
        let store = store_with_name_attribute();
        let e = store.reserve_entity_id().unwrap();
        store
            .transact(&[Op::add(e, "name.string.vertex", "x")], &[], None)
            .unwrap();
        let report = store
            .transact(&[Op::add(e, "name.string.vertex", "y")], &[], None)
            .unwrap();
        assert_eq!(report.chain_entries, 1);
    }

    #[test]
    fn reopening_a_file_keeps_its_facts() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let e = {
            let store = FactStore::open(&path).unwrap();
            SchemaManager::new(&store).install_system_attributes().unwrap();
            store
                .install_attribute(&AttributeDef::new("name.string.vertex", ValueType::String))
                .unwrap();
            let e = store.reserve_entity_id().unwrap();
            store
                .transact(&[Op::add(e, "name.string.vertex", "x")], &[], None)
                .unwrap();
            e
        };
        let store = FactStore::open(&path).unwrap();
        assert_eq!(store.entity(e, None).unwrap().len(), 1);
        assert!(store.reserve_entity_id().unwrap() > e);
    }
}
