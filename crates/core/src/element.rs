//! Vertices and edges.
//!
//! An element is an entity id bound to a view: `None` is the live graph,
//! `Some(tx)` the graph as of that transaction. Historical versions are
//! read-only; writes go through a [`Session`] and only to the live view.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::chain;
use crate::error::{EpochError, Result};
use crate::facts::{self, FactSet};
use crate::navigator::{TimeDirection, Versions};
use crate::schema::{self, AttributeKey, EDGE_IN, EDGE_LABEL, EDGE_OUT};
use crate::session::Session;
use crate::store::Op;
use crate::value::{Basis, ElementKind, EntityId, TxId, Value, ValueType};
use crate::EpochGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges leaving the vertex.
    Out,
    /// Edges arriving at the vertex.
    In,
    Both,
}

/// Validity of one version: from the transaction that produced it up to
/// (excluding) the next one. `end` is `None` for the newest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && self.end.map_or(true, |end| at < end)
    }
}

/// Behaviour shared by [`Vertex`] and [`Edge`].
pub trait Element<'g>: Clone + Sized {
    const KIND: ElementKind;

    fn graph(&self) -> &'g EpochGraph;
    fn id(&self) -> EntityId;
    /// The bound view; `None` is the live graph.
    fn view(&self) -> Basis;
    /// The same entity bound to another view.
    fn rebind(&self, view: Basis) -> Self;
    /// The facts describing this element at its view.
    fn facts(&self) -> Result<FactSet>;

    fn is_current_version(&self) -> bool {
        self.view().is_none()
    }

    /// True when nothing at all is asserted about the entity at its view.
    fn is_deleted(&self) -> Result<bool> {
        Ok(self
            .graph()
            .store()
            .entity(self.id(), self.view())?
            .is_empty())
    }

    /// The transaction that produced this version.
    fn time_id(&self) -> Result<Option<TxId>> {
        chain::resolve_current_time_id(self.graph().store(), self.id(), self.view())
    }

    fn time_interval(&self) -> Result<Option<TimeInterval>> {
        let store = self.graph().store();
        let Some(tx) = self.time_id()? else {
            return Ok(None);
        };
        let start = store.transaction(tx)?.instant;
        let end = match chain::resolve_next_transaction(store, self.id(), tx)? {
            Some(next) => Some(store.transaction(next)?.instant),
            None => None,
        };
        Ok(Some(TimeInterval { start, end }))
    }

    fn property(&self, key: &str) -> Result<Option<Value>> {
        Ok(typed_property(self, key)?.map(|(_, value)| value))
    }

    /// Names of the properties set at this view.
    fn property_keys(&self) -> Result<BTreeSet<String>> {
        let datoms = self.graph().store().entity(self.id(), self.view())?;
        Ok(datoms
            .iter()
            .filter_map(|d| AttributeKey::parse(&d.attribute))
            .filter(|key| key.kind == Self::KIND)
            .map(|key| key.name)
            .collect())
    }

    /// Queue a property write. A value of a different type than the
    /// current one replaces it; both are never present at once.
    fn set_property(
        &self,
        session: &mut Session<'g>,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        session.ensure_writable(self)?;
        schema::check_property_key(key)?;
        let value_type = value.value_type();
        if !value_type.is_property_type() {
            return Err(EpochError::UnsupportedValueType(value_type.to_string()));
        }
        let attribute = AttributeKey::new(key, value_type, Self::KIND);
        let ident = attribute.ident();
        self.graph()
            .schema()
            .create_attribute_definition(&attribute)?;

        session.drop_pending_property(self.id(), key, Self::KIND, Some(&ident));
        if let Some((old_ident, old)) = typed_property(self, key)? {
            if old_ident != ident {
                session.queue(Op::retract(self.id(), old_ident, old))?;
            }
        }
        session.queue(Op::add(self.id(), ident, value))?;
        session.touch(self.id());
        Ok(())
    }

    /// Queue removal of a property. Returns the removed value, if any.
    fn remove_property(&self, session: &mut Session<'g>, key: &str) -> Result<Option<Value>> {
        session.ensure_writable(self)?;
        schema::check_property_key(key)?;
        session.drop_pending_property(self.id(), key, Self::KIND, None);
        match typed_property(self, key)? {
            Some((ident, old)) => {
                session.queue(Op::retract(self.id(), ident, old.clone()))?;
                session.touch(self.id());
                Ok(Some(old))
            }
            None => Ok(None),
        }
    }

    fn previous_version(&self) -> Result<Option<Self>> {
        let Some(current) = self.time_id()? else {
            return Ok(None);
        };
        let previous =
            chain::resolve_previous_transaction(self.graph().store(), self.id(), current)?;
        Ok(previous.map(|tx| self.rebind(Some(tx))))
    }

    /// The version after this one. The version after the newest
    /// historical one is the live element.
    fn next_version(&self) -> Result<Option<Self>> {
        let store = self.graph().store();
        let Some(current) = self.time_id()? else {
            return Ok(None);
        };
        let Some(next) = chain::resolve_next_transaction(store, self.id(), current)? else {
            return Ok(None);
        };
        if chain::resolve_next_transaction(store, self.id(), next)?.is_none() {
            Ok(Some(self.rebind(None)))
        } else {
            Ok(Some(self.rebind(Some(next))))
        }
    }

    fn previous_versions(&self) -> Versions<'g, Self> {
        Versions::new(self.clone(), TimeDirection::Backward)
    }

    fn next_versions(&self) -> Versions<'g, Self> {
        Versions::new(self.clone(), TimeDirection::Forward)
    }

    /// Older versions accepted by `filter`; rejected ones are skipped.
    fn previous_versions_where<F>(&self, filter: F) -> Versions<'g, Self>
    where
        F: FnMut(&Self) -> bool + 'g,
    {
        Versions::filtered(self.clone(), TimeDirection::Backward, filter)
    }

    fn next_versions_where<F>(&self, filter: F) -> Versions<'g, Self>
    where
        F: FnMut(&Self) -> bool + 'g,
    {
        Versions::filtered(self.clone(), TimeDirection::Forward, filter)
    }
}

/// The property `key` at the element's view, with the ident it is stored
/// under. Types are tried in a fixed order; at most one is ever set.
fn typed_property<'g, E: Element<'g>>(element: &E, key: &str) -> Result<Option<(String, Value)>> {
    let datoms = element.graph().store().entity(element.id(), element.view())?;
    for value_type in ValueType::PROPERTY_TYPES {
        let ident = AttributeKey::new(key, value_type, E::KIND).ident();
        if let Some(datom) = datoms.iter().find(|d| d.attribute == ident) {
            return Ok(Some((ident, datom.value.clone())));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Vertex
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct Vertex<'g> {
    graph: &'g EpochGraph,
    id: EntityId,
    view: Basis,
}

impl<'g> Vertex<'g> {
    pub(crate) fn at(graph: &'g EpochGraph, id: EntityId, view: Basis) -> Self {
        Self { graph, id, view }
    }

    /// Incident edges, optionally restricted to `labels`.
    pub fn edges(&self, direction: Direction, labels: &[&str]) -> Result<Vec<Edge<'g>>> {
        let store = self.graph.store();
        let me = Value::Ref(self.id);
        let mut ids = BTreeSet::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            ids.extend(store.entities_with(EDGE_OUT, &me, self.view)?);
        }
        if matches!(direction, Direction::In | Direction::Both) {
            ids.extend(store.entities_with(EDGE_IN, &me, self.view)?);
        }
        let mut edges = Vec::with_capacity(ids.len());
        for id in ids {
            let edge = Edge::at(self.graph, id, self.view);
            if labels.is_empty() || labels.contains(&edge.label()?.as_str()) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    /// Adjacent vertices, optionally through edges with one of `labels`.
    pub fn vertices(&self, direction: Direction, labels: &[&str]) -> Result<Vec<Vertex<'g>>> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            for edge in self.edges(Direction::Out, labels)? {
                out.push(edge.vertex(Direction::In)?);
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            for edge in self.edges(Direction::In, labels)? {
                out.push(edge.vertex(Direction::Out)?);
            }
        }
        Ok(out)
    }

    /// Remove this vertex and its incident edges.
    pub fn remove(&self, session: &mut Session<'g>) -> Result<()> {
        session.remove_vertex(self)
    }
}

impl<'g> Element<'g> for Vertex<'g> {
    const KIND: ElementKind = ElementKind::Vertex;

    fn graph(&self) -> &'g EpochGraph {
        self.graph
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn view(&self) -> Basis {
        self.view
    }

    fn rebind(&self, view: Basis) -> Self {
        Self { view, ..*self }
    }

    fn facts(&self) -> Result<FactSet> {
        facts::vertex_facts(self)
    }
}

// Versions of one entity are the same element.
impl PartialEq for Vertex<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Vertex<'_> {}

impl fmt::Debug for Vertex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("view", &self.view)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct Edge<'g> {
    graph: &'g EpochGraph,
    id: EntityId,
    view: Basis,
}

impl<'g> Edge<'g> {
    pub(crate) fn at(graph: &'g EpochGraph, id: EntityId, view: Basis) -> Self {
        Self { graph, id, view }
    }

    /// The tail (`Out`) or head (`In`) vertex, bound to the edge's view.
    pub fn vertex(&self, direction: Direction) -> Result<Vertex<'g>> {
        let attribute = match direction {
            Direction::Out => EDGE_OUT,
            Direction::In => EDGE_IN,
            Direction::Both => {
                return Err(EpochError::InvalidState(
                    "an edge endpoint is either In or Out".to_string(),
                ))
            }
        };
        let id = self
            .structural(attribute)?
            .and_then(|v| v.as_ref_id())
            .ok_or_else(|| EpochError::NotFound(format!("{attribute} of edge {}", self.id)))?;
        Ok(Vertex::at(self.graph, id, self.view))
    }

    pub fn label(&self) -> Result<String> {
        self.structural(EDGE_LABEL)?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| EpochError::NotFound(format!("label of edge {}", self.id)))
    }

    /// Retract the edge. The edge and both endpoints get a new version.
    pub fn remove(&self, session: &mut Session<'g>) -> Result<()> {
        session.remove_edge(self)
    }

    fn structural(&self, attribute: &str) -> Result<Option<Value>> {
        let datoms = self.graph.store().entity(self.id, self.view)?;
        Ok(datoms
            .into_iter()
            .find(|d| d.attribute == attribute)
            .map(|d| d.value))
    }
}

impl<'g> Element<'g> for Edge<'g> {
    const KIND: ElementKind = ElementKind::Edge;

    fn graph(&self) -> &'g EpochGraph {
        self.graph
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn view(&self) -> Basis {
        self.view
    }

    fn rebind(&self, view: Basis) -> Self {
        Self { view, ..*self }
    }

    fn facts(&self) -> Result<FactSet> {
        facts::edge_facts(self)
    }
}

impl PartialEq for Edge<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge<'_> {}

impl fmt::Debug for Edge<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("view", &self.view)
            .finish()
    }
}
