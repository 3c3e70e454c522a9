//! Epochgraph: a versioned property graph over an append-only fact store.
//!
//! Vertices and edges carry typed properties. Every commit is kept, and
//! each element links its versions through a per-element chain, so any
//! element can be walked backwards and forwards in time or read "as of"
//! a past transaction.
//!
//! Two views of a working set can be diffed: the facts only the first view
//! holds are normalised, re-keyed to portable ids and loaded into a fresh,
//! immutable graph that records where each element came from.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use epochgraph::{Element, EpochGraph, WorkingSet};
//!
//! let graph = EpochGraph::open("my-graph.epochgraph").unwrap();
//! let mut session = graph.session();
//!
//! let alice = session.add_vertex().unwrap();
//! alice.set_property(&mut session, "name", "alice").unwrap();
//! let t1 = session.commit().unwrap().map(|r| r.tx);
//!
//! alice.set_property(&mut session, "name", "alicia").unwrap();
//! let t2 = session.commit().unwrap().map(|r| r.tx);
//!
//! // Walk back in time
//! let before = alice.previous_version().unwrap().unwrap();
//! assert_eq!(before.property("name").unwrap(), Some("alice".into()));
//!
//! // What did alice look like at t1 that she no longer does at t2?
//! let ws = WorkingSet::new().with_vertex(&alice);
//! let delta = graph.difference_at(&ws, t1, t2).unwrap();
//! for v in delta.vertices().unwrap() {
//!     println!("{:?} was {:?}", delta.original_id(&v).unwrap(), v.property("name").unwrap());
//! }
//! ```

pub mod chain;
pub mod config;
pub mod diff;
pub mod element;
pub mod error;
pub mod facts;
pub mod logging;
pub mod navigator;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub use config::{GraphConfig, StorageConfig};
pub use diff::WorkingSet;
pub use element::{Direction, Edge, Element, TimeInterval, Vertex};
pub use error::{EpochError, Result};
pub use facts::{EntityRef, Fact, FactSet, FactValue, PortableId};
pub use navigator::{TimeDirection, Versions};
pub use schema::{AttributeKey, SchemaManager};
pub use session::Session;
pub use store::{FactStore, TxReport};
pub use value::{Basis, ElementKind, EntityId, TxId, Value, ValueType};

use crate::schema::ELEMENT_TYPE;

/// Whether sessions may write to a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    /// Reads, navigation and diffs only. Delta graphs are opened this way.
    Immutable,
}

// ---------------------------------------------------------------------------
// EpochGraph
// ---------------------------------------------------------------------------

/// A versioned property graph. Reads go through the graph (live state)
/// or a [`Session`] (at its checkpoint); writes go through a session.
pub struct EpochGraph {
    store: FactStore,
    mutability: Mutability,
}

impl EpochGraph {
    /// Open or create a graph at the given file path.
    pub fn open(path: &str) -> Result<Self> {
        Self::init(FactStore::open(path)?, Mutability::Mutable)
    }

    /// Create an in-memory graph (no file I/O). Data is lost on drop.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(FactStore::open_in_memory()?, Mutability::Mutable)
    }

    /// Open the graph `config` describes. A relative file path is taken
    /// relative to `base_dir`, normally the directory holding the config.
    pub fn open_with_config(config: &GraphConfig, base_dir: &Path) -> Result<Self> {
        match config.resolved_path(base_dir) {
            Some(path) => {
                let path = path.to_str().ok_or_else(|| {
                    EpochError::Config(format!("database path {} is not UTF-8", path.display()))
                })?;
                Self::open(path)
            }
            None => Self::open_in_memory(),
        }
    }

    pub(crate) fn open_in_memory_immutable() -> Result<Self> {
        Self::init(FactStore::open_in_memory()?, Mutability::Immutable)
    }

    fn init(store: FactStore, mutability: Mutability) -> Result<Self> {
        SchemaManager::new(&store).install_system_attributes()?;
        debug!(?mutability, "graph ready");
        Ok(Self { store, mutability })
    }

    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(&self.store)
    }

    /// A new unit of work reading the live graph.
    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn vertex(&self, id: EntityId) -> Result<Vertex<'_>> {
        self.ensure_element(id, ElementKind::Vertex)?;
        Ok(Vertex::at(self, id, None))
    }

    pub fn edge(&self, id: EntityId) -> Result<Edge<'_>> {
        self.ensure_element(id, ElementKind::Edge)?;
        Ok(Edge::at(self, id, None))
    }

    /// Look up a vertex by its id in string form.
    pub fn find_vertex(&self, id: &str) -> Result<Vertex<'_>> {
        self.vertex(id.parse()?)
    }

    pub fn find_edge(&self, id: &str) -> Result<Edge<'_>> {
        self.edge(id.parse()?)
    }

    pub fn vertices(&self) -> Result<Vec<Vertex<'_>>> {
        let ids = self.element_ids(ElementKind::Vertex, None)?;
        Ok(ids.into_iter().map(|id| Vertex::at(self, id, None)).collect())
    }

    pub fn edges(&self) -> Result<Vec<Edge<'_>>> {
        let ids = self.element_ids(ElementKind::Edge, None)?;
        Ok(ids.into_iter().map(|id| Edge::at(self, id, None)).collect())
    }

    /// `NotFound` unless the store ever held `id` as an element of `kind`.
    pub(crate) fn ensure_element(&self, id: EntityId, kind: ElementKind) -> Result<()> {
        let keyword = kind.keyword();
        let seen = self
            .store
            .entity_history(id, None)?
            .iter()
            .any(|d| d.attribute == ELEMENT_TYPE && d.value == keyword);
        if seen {
            Ok(())
        } else {
            Err(EpochError::NotFound(format!("{kind} {id}")))
        }
    }

    pub(crate) fn element_ids(&self, kind: ElementKind, basis: Basis) -> Result<Vec<EntityId>> {
        self.store.entities_with(ELEMENT_TYPE, &kind.keyword(), basis)
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    pub fn latest_tx(&self) -> Result<Option<TxId>> {
        self.store.latest_tx()
    }

    pub fn tx_instant(&self, tx: TxId) -> Result<DateTime<Utc>> {
        Ok(self.store.transaction(tx)?.instant)
    }

    /// The newest transaction at or before `at`. Before the first
    /// transaction this is `TxId(0)`, under which nothing is visible.
    pub fn checkpoint_for(&self, at: DateTime<Utc>) -> Result<TxId> {
        Ok(self.store.tx_as_of(at)?.unwrap_or(TxId(0)))
    }

    // -----------------------------------------------------------------------
    // Diff
    // -----------------------------------------------------------------------

    /// What `working_set` held at `t1` and no longer holds at `t2`.
    pub fn difference(
        &self,
        working_set: &WorkingSet,
        t1: DateTime<Utc>,
        t2: DateTime<Utc>,
    ) -> Result<EpochGraph> {
        let first = self.checkpoint_for(t1)?;
        let second = self.checkpoint_for(t2)?;
        self.difference_at(working_set, Some(first), Some(second))
    }

    /// [`difference`](Self::difference) between two transaction bases.
    pub fn difference_at(
        &self,
        working_set: &WorkingSet,
        first: Basis,
        second: Basis,
    ) -> Result<EpochGraph> {
        info!(?first, ?second, "diffing working set");
        let s1 = diff::snapshot(self, working_set, first)?;
        let s2 = diff::snapshot(self, working_set, second)?;
        let delta = diff::delta_facts(&s1, &s2);
        diff::build_delta_graph(self, &delta)
    }

    /// Diff two versions of one element.
    pub fn difference_elements<'g, E: Element<'g>>(&self, first: &E, second: &E) -> Result<EpochGraph> {
        if first.id() != second.id() {
            return Err(EpochError::IncomparableElements {
                left: first.id(),
                right: second.id(),
            });
        }
        let delta = diff::delta_facts(&first.facts()?, &second.facts()?);
        diff::build_delta_graph(self, &delta)
    }

    /// The id an element of a delta graph had in the graph it was diffed from.
    pub fn original_id<'g, E: Element<'g>>(&self, element: &E) -> Result<Option<EntityId>> {
        let attribute = schema::original_id_attribute(E::KIND);
        Ok(self
            .store
            .entity(element.id(), element.view())?
            .iter()
            .find(|d| d.attribute == attribute)
            .and_then(|d| d.value.as_long())
            .map(|n| EntityId(n as u64)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
