//! Attribute schema.
//!
//! User properties are stored under idents of the form
//! `{name}.{type}.{kind}` (e.g. `name.string.vertex`), so one property name
//! may exist once per value type and element kind. Graph structure and
//! version chains live under a small set of `graph.*` system attributes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EpochError, Result};
use crate::store::FactStore;
use crate::value::{ElementKind, ValueType};

/// Element kind of an entity (`graph.element.type/vertex` or `/edge`).
pub const ELEMENT_TYPE: &str = "graph.element/type";
/// Head vertex of an edge.
pub const EDGE_IN: &str = "graph.edge/in";
/// Tail vertex of an edge.
pub const EDGE_OUT: &str = "graph.edge/out";
pub const EDGE_LABEL: &str = "graph.edge/label";
/// Element a chain entry belongs to.
pub const CHAIN_ELEMENT: &str = "graph.chain/element";
/// Transaction that touched the element before the entry's own.
pub const CHAIN_PREVIOUS_TX: &str = "graph.chain/previous-tx";

/// Source id of a delta vertex, in the graph the delta was taken from.
pub const ORIGINAL_VERTEX_ID: &str = "graph.original/vertex-id";
/// Source id of a delta edge.
pub const ORIGINAL_EDGE_ID: &str = "graph.original/edge-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// An installed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub ident: String,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    /// Maintain the attribute/value index for reverse lookups.
    pub indexed: bool,
    pub doc: Option<String>,
}

impl AttributeDef {
    /// A cardinality-one, unindexed attribute.
    pub fn new(ident: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            ident: ident.into(),
            value_type,
            cardinality: Cardinality::One,
            indexed: false,
            doc: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// A user property attribute: name, value type and element kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeKey {
    pub name: String,
    pub value_type: ValueType,
    pub kind: ElementKind,
}

impl AttributeKey {
    pub fn new(name: impl Into<String>, value_type: ValueType, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            value_type,
            kind,
        }
    }

    pub fn ident(&self) -> String {
        format!("{}.{}.{}", self.name, self.value_type, self.kind)
    }

    /// Split an ident back into its parts. The name itself may contain
    /// dots; only the last two segments are interpreted.
    pub fn parse(ident: &str) -> Option<Self> {
        let mut parts = ident.rsplitn(3, '.');
        let kind = ElementKind::parse(parts.next()?)?;
        let value_type = ValueType::parse(parts.next()?)?;
        let name = parts.next()?;
        if name.is_empty() || !value_type.is_property_type() {
            return None;
        }
        Some(Self::new(name, value_type, kind))
    }
}

/// Keys the graph keeps for itself.
pub fn is_reserved_key(key: &str) -> bool {
    key.is_empty()
        || key == "id"
        || key == "label"
        || key.starts_with("graph.")
        || key.starts_with("db/")
}

pub fn check_property_key(key: &str) -> Result<()> {
    if is_reserved_key(key) {
        return Err(EpochError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// `graph.*` structure and chain attributes.
pub fn is_system_attribute(ident: &str) -> bool {
    ident.starts_with("graph.") && AttributeKey::parse(ident).is_none()
}

pub(crate) fn system_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::new(ELEMENT_TYPE, ValueType::Keyword)
            .indexed()
            .with_doc("kind of graph element"),
        AttributeDef::new(EDGE_IN, ValueType::Ref)
            .indexed()
            .with_doc("head vertex of an edge"),
        AttributeDef::new(EDGE_OUT, ValueType::Ref)
            .indexed()
            .with_doc("tail vertex of an edge"),
        AttributeDef::new(EDGE_LABEL, ValueType::String)
            .indexed()
            .with_doc("edge label"),
        AttributeDef::new(CHAIN_ELEMENT, ValueType::Ref)
            .indexed()
            .with_doc("element whose version chain this entry extends"),
        AttributeDef::new(CHAIN_PREVIOUS_TX, ValueType::Long)
            .indexed()
            .with_doc("previous transaction touching the element"),
    ]
}

/// The provenance attribute for elements of `kind`.
pub fn original_id_attribute(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Vertex => ORIGINAL_VERTEX_ID,
        ElementKind::Edge => ORIGINAL_EDGE_ID,
    }
}

pub fn is_provenance_attribute(ident: &str) -> bool {
    ident == ORIGINAL_VERTEX_ID || ident == ORIGINAL_EDGE_ID
}

pub(crate) fn provenance_attributes() -> Vec<AttributeDef> {
    [ElementKind::Vertex, ElementKind::Edge]
        .into_iter()
        .map(|kind| {
            AttributeDef::new(original_id_attribute(kind), ValueType::Long)
                .with_doc("id of the element in the graph the delta was taken from")
        })
        .collect()
}

/// Reads and installs attribute definitions.
pub struct SchemaManager<'a> {
    store: &'a FactStore,
}

impl<'a> SchemaManager<'a> {
    pub fn new(store: &'a FactStore) -> Self {
        Self { store }
    }

    pub(crate) fn install_system_attributes(&self) -> Result<()> {
        for def in system_attributes() {
            self.store.install_attribute(&def)?;
        }
        Ok(())
    }

    pub(crate) fn install_provenance_attributes(&self) -> Result<()> {
        for def in provenance_attributes() {
            self.store.install_attribute(&def)?;
        }
        Ok(())
    }

    /// Install the attribute for `key` unless it already exists.
    /// Returns whether anything was installed.
    pub fn create_attribute_definition(&self, key: &AttributeKey) -> Result<bool> {
        if !key.value_type.is_property_type() {
            return Err(EpochError::UnsupportedValueType(key.value_type.to_string()));
        }
        check_property_key(&key.name)?;
        let installed = self
            .store
            .install_attribute(&AttributeDef::new(key.ident(), key.value_type))?;
        if installed {
            debug!(ident = %key.ident(), "installed attribute");
        }
        Ok(installed)
    }

    pub fn attribute_definition(&self, key: &AttributeKey) -> Result<Option<AttributeDef>> {
        self.store.attribute(&key.ident())
    }

    /// Every installed typed attribute for property `name` on `kind`.
    pub fn property_attributes(&self, name: &str, kind: ElementKind) -> Result<Vec<AttributeDef>> {
        let mut defs = Vec::new();
        for value_type in ValueType::PROPERTY_TYPES {
            let key = AttributeKey::new(name, value_type, kind);
            if let Some(def) = self.attribute_definition(&key)? {
                defs.push(def);
            }
        }
        Ok(defs)
    }

    /// All user property attributes, in key order.
    pub fn user_attributes(&self) -> Result<Vec<AttributeKey>> {
        let mut keys: Vec<AttributeKey> = self
            .store
            .attributes()?
            .iter()
            .filter_map(|def| AttributeKey::parse(&def.ident))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
