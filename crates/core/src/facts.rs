//! Fact extraction: the facts that describe an element at its view.
//!
//! An edge snapshot carries its own facts plus the kind facts of both
//! endpoints. A vertex snapshot carries its own facts plus the structure
//! (kind, endpoints, label) of every incident edge, but not the edges'
//! properties.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::element::{Direction, Edge, Element, Vertex};
use crate::error::Result;
use crate::schema::{EDGE_IN, EDGE_LABEL, EDGE_OUT, ELEMENT_TYPE};
use crate::store::{Datom, FactStore};
use crate::value::{Basis, ElementKind, EntityId, Value};

/// An id minted for a delta, independent of any store's id space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortableId(pub String);

impl PortableId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for PortableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Stored(EntityId),
    Portable(PortableId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactValue {
    Scalar(Value),
    Entity(EntityRef),
}

/// A time-free fact: what a snapshot says, not when it was said.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fact {
    pub subject: EntityRef,
    pub attribute: String,
    pub value: FactValue,
}

pub type FactSet = BTreeSet<Fact>;

impl Fact {
    pub fn new(subject: EntityRef, attribute: impl Into<String>, value: FactValue) -> Self {
        Self {
            subject,
            attribute: attribute.into(),
            value,
        }
    }

    pub fn from_datom(datom: &Datom) -> Self {
        let value = match &datom.value {
            Value::Ref(id) => FactValue::Entity(EntityRef::Stored(*id)),
            other => FactValue::Scalar(other.clone()),
        };
        Self::new(EntityRef::Stored(datom.entity), datom.attribute.clone(), value)
    }

    /// "`subject` is a vertex/edge".
    pub fn kind(subject: EntityRef, kind: ElementKind) -> Self {
        Self::new(subject, ELEMENT_TYPE, FactValue::Scalar(kind.keyword()))
    }

    pub fn is_kind_fact(&self) -> bool {
        self.attribute == ELEMENT_TYPE
    }

    /// Facts about schema identity rather than graph data.
    pub fn is_identity_fact(&self) -> bool {
        self.attribute.starts_with("db/")
    }

    pub fn kind_of(&self) -> Option<ElementKind> {
        match &self.value {
            FactValue::Scalar(value) if self.is_kind_fact() => ElementKind::from_keyword(value),
            _ => None,
        }
    }

    /// The entity in value position, if any.
    pub fn referenced_entity(&self) -> Option<&EntityRef> {
        match &self.value {
            FactValue::Entity(entity) => Some(entity),
            FactValue::Scalar(_) => None,
        }
    }
}

fn own_facts(store: &FactStore, id: EntityId, view: Basis) -> Result<Vec<Datom>> {
    store.entity(id, view)
}

/// Own facts of an edge plus kind facts for its endpoints. Empty if the
/// edge does not exist at its view.
pub fn edge_facts(edge: &Edge<'_>) -> Result<FactSet> {
    let datoms = own_facts(edge.graph().store(), edge.id(), edge.view())?;
    let mut facts: FactSet = datoms.iter().map(Fact::from_datom).collect();
    for datom in datoms
        .iter()
        .filter(|d| d.attribute == EDGE_IN || d.attribute == EDGE_OUT)
    {
        if let Some(endpoint) = datom.value.as_ref_id() {
            facts.insert(Fact::kind(EntityRef::Stored(endpoint), ElementKind::Vertex));
        }
    }
    Ok(facts)
}

/// Own facts of a vertex plus the structure of every incident edge.
pub fn vertex_facts(vertex: &Vertex<'_>) -> Result<FactSet> {
    let store = vertex.graph().store();
    let mut facts: FactSet = own_facts(store, vertex.id(), vertex.view())?
        .iter()
        .map(Fact::from_datom)
        .collect();
    for edge in vertex.edges(Direction::Both, &[])? {
        facts.extend(edge_structure(store, &edge)?);
    }
    Ok(facts)
}

fn edge_structure(store: &FactStore, edge: &Edge<'_>) -> Result<FactSet> {
    let datoms = own_facts(store, edge.id(), edge.view())?;
    let mut facts = FactSet::new();
    for datom in &datoms {
        match datom.attribute.as_str() {
            ELEMENT_TYPE | EDGE_LABEL => {
                facts.insert(Fact::from_datom(datom));
            }
            EDGE_IN | EDGE_OUT => {
                facts.insert(Fact::from_datom(datom));
                if let Some(endpoint) = datom.value.as_ref_id() {
                    facts.insert(Fact::kind(EntityRef::Stored(endpoint), ElementKind::Vertex));
                }
            }
            _ => {}
        }
    }
    Ok(facts)
}
