//! Snapshot diffs.
//!
//! Two snapshots of a working set are compared fact by fact. What the
//! first snapshot holds and the second does not is normalised, re-keyed
//! to portable ids with provenance, and loaded into a fresh immutable
//! graph.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::element::{Edge, Element, Vertex};
use crate::error::{EpochError, Result};
use crate::facts::{EntityRef, Fact, FactSet, FactValue, PortableId};
use crate::schema::{self, SchemaManager};
use crate::store::Op;
use crate::value::{Basis, ElementKind, EntityId, Value};
use crate::EpochGraph;

/// The vertices and edges a diff is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    vertices: BTreeSet<EntityId>,
    edges: BTreeSet<EntityId>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertex(mut self, vertex: &Vertex<'_>) -> Self {
        self.add_vertex(vertex);
        self
    }

    pub fn with_edge(mut self, edge: &Edge<'_>) -> Self {
        self.add_edge(edge);
        self
    }

    pub fn add_vertex(&mut self, vertex: &Vertex<'_>) {
        self.vertices.insert(vertex.id());
    }

    pub fn add_edge(&mut self, edge: &Edge<'_>) {
        self.edges.insert(edge.id());
    }

    pub fn add_vertex_id(&mut self, id: EntityId) {
        self.vertices.insert(id);
    }

    pub fn add_edge_id(&mut self, id: EntityId) {
        self.edges.insert(id);
    }

    pub fn vertices(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.vertices.iter().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.edges.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty()
    }
}

/// Union of the facts of every working-set element at `basis`.
pub fn snapshot(graph: &EpochGraph, working_set: &WorkingSet, basis: Basis) -> Result<FactSet> {
    let mut facts = FactSet::new();
    for id in working_set.vertices() {
        facts.extend(Vertex::at(graph, id, basis).facts()?);
    }
    for id in working_set.edges() {
        facts.extend(Edge::at(graph, id, basis).facts()?);
    }
    Ok(facts)
}

/// Facts of `first` that `second` does not repeat. Kind facts and
/// schema-identity facts are always kept.
pub fn retain_first(first: &FactSet, second: &FactSet) -> FactSet {
    first
        .iter()
        .filter(|f| f.is_kind_fact() || f.is_identity_fact() || !second.contains(f))
        .cloned()
        .collect()
}

/// Drop kind facts of entities nothing else mentions, until none are left.
///
/// Only non-kind facts count as mentions and none of them are removed, so
/// the first pass already reaches the fixed point.
pub fn normalize(facts: &mut FactSet) {
    loop {
        let mentioned: BTreeSet<EntityRef> = facts
            .iter()
            .filter(|f| !f.is_kind_fact())
            .flat_map(|f| std::iter::once(&f.subject).chain(f.referenced_entity()))
            .cloned()
            .collect();
        let before = facts.len();
        facts.retain(|f| !f.is_kind_fact() || mentioned.contains(&f.subject));
        if facts.len() == before {
            break;
        }
    }
}

/// Replace every store id with a fresh [`PortableId`] and record the
/// original id under the provenance attribute for its kind.
///
/// Provenance already present (a delta of a delta) is replaced, so every
/// entity carries exactly one provenance fact.
pub fn rekey(facts: &FactSet) -> FactSet {
    let mut mapping: BTreeMap<EntityId, PortableId> = BTreeMap::new();
    let mut kinds: BTreeMap<EntityId, ElementKind> = BTreeMap::new();
    for fact in facts {
        if let EntityRef::Stored(id) = fact.subject {
            mapping.entry(id).or_default();
            if let Some(kind) = fact.kind_of() {
                kinds.insert(id, kind);
            }
        }
    }

    let swap = |entity: &EntityRef| match entity {
        EntityRef::Stored(id) => mapping
            .get(id)
            .map(|p| EntityRef::Portable(p.clone()))
            .unwrap_or_else(|| entity.clone()),
        EntityRef::Portable(_) => entity.clone(),
    };

    let mut rekeyed: FactSet = facts
        .iter()
        .filter(|fact| !schema::is_provenance_attribute(&fact.attribute))
        .map(|fact| {
            let value = match &fact.value {
                FactValue::Entity(entity) => FactValue::Entity(swap(entity)),
                scalar => scalar.clone(),
            };
            Fact::new(swap(&fact.subject), fact.attribute.clone(), value)
        })
        .collect();

    for (id, portable) in &mapping {
        let kind = match kinds.get(id) {
            Some(ElementKind::Vertex) => ElementKind::Vertex,
            _ => ElementKind::Edge,
        };
        rekeyed.insert(Fact::new(
            EntityRef::Portable(portable.clone()),
            schema::original_id_attribute(kind),
            FactValue::Scalar(Value::Long(id.0 as i64)),
        ));
    }
    rekeyed
}

/// Difference, normalisation and re-keying of two snapshots.
pub fn delta_facts(first: &FactSet, second: &FactSet) -> FactSet {
    let mut delta = retain_first(first, second);
    let retained = delta.len();
    normalize(&mut delta);
    debug!(
        first = first.len(),
        second = second.len(),
        retained,
        normalized = delta.len(),
        "computed snapshot difference"
    );
    rekey(&delta)
}

/// Load re-keyed facts into a new in-memory immutable graph, installing
/// the attributes they use as defined in `source`.
pub(crate) fn build_delta_graph(source: &EpochGraph, facts: &FactSet) -> Result<EpochGraph> {
    let delta = EpochGraph::open_in_memory_immutable()?;
    SchemaManager::new(delta.store()).install_provenance_attributes()?;

    let attributes: BTreeSet<&str> = facts.iter().map(|f| f.attribute.as_str()).collect();
    for ident in attributes {
        if delta.store().attribute(ident)?.is_some() {
            continue;
        }
        let def = source
            .store()
            .attribute(ident)?
            .ok_or_else(|| EpochError::NotFound(format!("attribute {ident}")))?;
        delta.store().install_attribute(&def)?;
    }

    let mut portable: BTreeSet<&PortableId> = BTreeSet::new();
    for fact in facts {
        if let EntityRef::Portable(p) = &fact.subject {
            portable.insert(p);
        }
        if let Some(EntityRef::Portable(p)) = fact.referenced_entity() {
            portable.insert(p);
        }
    }
    let ids = delta.store().reserve_entity_ids(portable.len() as u64)?;
    let resolved: BTreeMap<&PortableId, EntityId> = portable.into_iter().zip(ids).collect();

    let resolve = |entity: &EntityRef| match entity {
        EntityRef::Portable(p) => resolved
            .get(p)
            .copied()
            .ok_or_else(|| EpochError::NotFound(format!("portable id {p}"))),
        EntityRef::Stored(id) => Err(EpochError::NotFound(format!(
            "entity {id} has no portable id"
        ))),
    };

    let mut ops = Vec::with_capacity(facts.len());
    for fact in facts {
        let value = match &fact.value {
            FactValue::Scalar(value) => value.clone(),
            FactValue::Entity(entity) => Value::Ref(resolve(entity)?),
        };
        ops.push(Op::add(resolve(&fact.subject)?, fact.attribute.clone(), value));
    }
    if !ops.is_empty() {
        delta.store().transact(&ops, &[], None)?;
    }
    info!(
        facts = facts.len(),
        entities = resolved.len(),
        "built delta graph"
    );
    Ok(delta)
}
