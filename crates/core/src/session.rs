//! Write sessions.
//!
//! A [`Session`] buffers mutations and commits them as one transaction.
//! It also carries the optional checkpoint that reads through the session
//! are bound to, and the optional backfilled transaction time.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::element::{Direction, Edge, Element, Vertex};
use crate::error::{EpochError, Result};
use crate::schema::{AttributeKey, EDGE_IN, EDGE_LABEL, EDGE_OUT, ELEMENT_TYPE};
use crate::store::{Op, TxReport};
use crate::value::{Basis, ElementKind, EntityId, TxId, Value};
use crate::EpochGraph;

pub struct Session<'g> {
    graph: &'g EpochGraph,
    pending: Vec<Op>,
    /// Entities whose version chain the next commit extends.
    touched: Vec<EntityId>,
    /// Entities first asserted by the pending operations.
    created: Vec<EntityId>,
    checkpoint: Basis,
    transaction_time: Option<DateTime<Utc>>,
}

impl<'g> Session<'g> {
    pub(crate) fn new(graph: &'g EpochGraph) -> Self {
        Self {
            graph,
            pending: Vec::new(),
            touched: Vec::new(),
            created: Vec::new(),
            checkpoint: None,
            transaction_time: None,
        }
    }

    pub fn graph(&self) -> &'g EpochGraph {
        self.graph
    }

    // -----------------------------------------------------------------------
    // Checkpoint and transaction time
    // -----------------------------------------------------------------------

    /// The transaction reads through this session are bound to; `None`
    /// reads the latest state.
    pub fn checkpoint(&self) -> Basis {
        self.checkpoint
    }

    /// Bind reads to the state as of `at`. A date before the first
    /// transaction binds to an empty view.
    pub fn set_checkpoint(&mut self, at: DateTime<Utc>) -> Result<TxId> {
        let tx = self.graph.checkpoint_for(at)?;
        self.checkpoint = Some(tx);
        Ok(tx)
    }

    pub fn set_checkpoint_tx(&mut self, tx: TxId) {
        self.checkpoint = Some(tx);
    }

    pub fn clear_checkpoint(&mut self) {
        self.checkpoint = None;
    }

    pub fn transaction_time(&self) -> Option<DateTime<Utc>> {
        self.transaction_time
    }

    /// Record the next commits at `at` instead of the wall clock.
    /// `None` goes back to the wall clock.
    pub fn set_transaction_time(&mut self, at: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure_mutable()?;
        self.transaction_time = at;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads at the checkpoint
    // -----------------------------------------------------------------------

    pub fn vertex(&self, id: EntityId) -> Result<Vertex<'g>> {
        self.graph.ensure_element(id, ElementKind::Vertex)?;
        Ok(Vertex::at(self.graph, id, self.checkpoint))
    }

    pub fn edge(&self, id: EntityId) -> Result<Edge<'g>> {
        self.graph.ensure_element(id, ElementKind::Edge)?;
        Ok(Edge::at(self.graph, id, self.checkpoint))
    }

    pub fn vertices(&self) -> Result<Vec<Vertex<'g>>> {
        let ids = self.graph.element_ids(ElementKind::Vertex, self.checkpoint)?;
        Ok(ids
            .into_iter()
            .map(|id| Vertex::at(self.graph, id, self.checkpoint))
            .collect())
    }

    pub fn edges(&self) -> Result<Vec<Edge<'g>>> {
        let ids = self.graph.element_ids(ElementKind::Edge, self.checkpoint)?;
        Ok(ids
            .into_iter()
            .map(|id| Edge::at(self.graph, id, self.checkpoint))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Structural writes
    // -----------------------------------------------------------------------

    pub fn add_vertex(&mut self) -> Result<Vertex<'g>> {
        self.ensure_mutable()?;
        let id = self.graph.store().reserve_entity_id()?;
        self.queue(Op::add(id, ELEMENT_TYPE, ElementKind::Vertex.keyword()))?;
        self.created.push(id);
        self.touch(id);
        Ok(Vertex::at(self.graph, id, None))
    }

    /// Add an edge `out --label--> inv`. Both endpoints join the commit's
    /// touched set, so their version chains advance too.
    pub fn add_edge(
        &mut self,
        out: &Vertex<'g>,
        inv: &Vertex<'g>,
        label: &str,
    ) -> Result<Edge<'g>> {
        self.ensure_writable(out)?;
        self.ensure_writable(inv)?;
        let id = self.graph.store().reserve_entity_id()?;
        self.queue(Op::add(id, ELEMENT_TYPE, ElementKind::Edge.keyword()))?;
        self.queue(Op::add(id, EDGE_OUT, Value::Ref(out.id())))?;
        self.queue(Op::add(id, EDGE_IN, Value::Ref(inv.id())))?;
        self.queue(Op::add(id, EDGE_LABEL, label))?;
        self.created.push(id);
        self.touch(id);
        self.touch(out.id());
        self.touch(inv.id());
        Ok(Edge::at(self.graph, id, None))
    }

    /// Remove an edge. The edge and both of its endpoints are touched.
    pub fn remove_edge(&mut self, edge: &Edge<'g>) -> Result<()> {
        self.ensure_writable(edge)?;
        // Endpoints of an edge added in this session are already touched.
        if !self.created.contains(&edge.id()) {
            let out = edge.vertex(Direction::Out)?;
            let inv = edge.vertex(Direction::In)?;
            self.touch(out.id());
            self.touch(inv.id());
        }
        self.queue(Op::RetractEntity(edge.id()))?;
        self.touch(edge.id());
        Ok(())
    }

    /// Remove a vertex and every edge incident to it, including edges
    /// added to it in this session and not yet committed.
    pub fn remove_vertex(&mut self, vertex: &Vertex<'g>) -> Result<()> {
        self.ensure_writable(vertex)?;
        for edge in vertex.edges(Direction::Both, &[])? {
            self.remove_edge(&edge)?;
        }
        for edge in self.pending_edges_of(vertex.id()) {
            self.pending.retain(|op| op.entity() != edge);
            self.created.retain(|id| *id != edge);
            self.touched.retain(|id| *id != edge);
        }
        self.queue(Op::RetractEntity(vertex.id()))?;
        self.touch(vertex.id());
        Ok(())
    }

    /// Remove every vertex (and with them every edge), then commit.
    pub fn clear(&mut self) -> Result<Option<TxReport>> {
        self.ensure_mutable()?;
        for vertex in self.graph.vertices()? {
            self.remove_vertex(&vertex)?;
        }
        self.commit()
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Operations queued since the last commit.
    pub fn pending_ops(&self) -> &[Op] {
        &self.pending
    }

    /// Commit the buffered operations as one transaction.
    ///
    /// The buffer is cleared whether or not the commit succeeds. Returns
    /// `None` when there was nothing to commit.
    pub fn commit(&mut self) -> Result<Option<TxReport>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let ops = std::mem::take(&mut self.pending);
        let touched = std::mem::take(&mut self.touched);
        self.created.clear();

        match self
            .graph
            .store()
            .transact(&ops, &touched, self.transaction_time)
        {
            Ok(report) => {
                debug!(tx = %report.tx, ops = ops.len(), touched = touched.len(), "session committed");
                Ok(Some(report))
            }
            Err(e) => {
                warn!(error = %e, ops = ops.len(), "session commit failed, pending writes dropped");
                Err(e)
            }
        }
    }

    /// Drop every buffered operation.
    pub fn discard(&mut self) {
        self.pending.clear();
        self.touched.clear();
        self.created.clear();
    }

    // -----------------------------------------------------------------------
    // Internals shared with element writes
    // -----------------------------------------------------------------------

    pub(crate) fn queue(&mut self, op: Op) -> Result<()> {
        self.ensure_mutable()?;
        self.pending.push(op);
        Ok(())
    }

    /// Forget queued assertions of property `name` on `entity`, except the
    /// one stored under `keep`.
    pub(crate) fn drop_pending_property(
        &mut self,
        entity: EntityId,
        name: &str,
        kind: ElementKind,
        keep: Option<&str>,
    ) {
        self.pending.retain(|op| match op {
            Op::Add {
                entity: e,
                attribute,
                ..
            } if *e == entity && keep != Some(attribute.as_str()) => {
                AttributeKey::parse(attribute)
                    .map_or(true, |key| key.name != name || key.kind != kind)
            }
            _ => true,
        });
    }

    /// Edges created in this session with `vertex` as an endpoint.
    fn pending_edges_of(&self, vertex: EntityId) -> BTreeSet<EntityId> {
        self.pending
            .iter()
            .filter_map(|op| match op {
                Op::Add {
                    entity,
                    attribute,
                    value: Value::Ref(target),
                } if *target == vertex
                    && (attribute == EDGE_OUT || attribute == EDGE_IN)
                    && self.created.contains(entity) =>
                {
                    Some(*entity)
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn touch(&mut self, id: EntityId) {
        if !self.touched.contains(&id) {
            self.touched.push(id);
        }
    }

    pub(crate) fn ensure_mutable(&self) -> Result<()> {
        if self.graph.is_immutable() {
            return Err(EpochError::InvalidState(
                "graph is immutable".to_string(),
            ));
        }
        Ok(())
    }

    /// Writes go to the current, live version of an element of this graph.
    /// Elements created in this session count as live before they commit.
    pub(crate) fn ensure_writable<E: Element<'g>>(&self, element: &E) -> Result<()> {
        self.ensure_mutable()?;
        if !std::ptr::eq(element.graph(), self.graph) {
            return Err(EpochError::InvalidState(format!(
                "{} {} belongs to another graph",
                E::KIND,
                element.id()
            )));
        }
        if !element.is_current_version() {
            return Err(EpochError::InvalidState(format!(
                "{} {} is a historical version",
                E::KIND,
                element.id()
            )));
        }
        if !self.created.contains(&element.id()) && element.is_deleted()? {
            return Err(EpochError::InvalidState(format!(
                "{} {} is deleted",
                E::KIND,
                element.id()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn nothing_is_visible_before_commit() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let v = session.add_vertex().unwrap();
        assert!(graph.vertices().unwrap().is_empty());
        assert_eq!(session.pending_ops().len(), 1);

        let report = session.commit().unwrap().unwrap();
        assert_eq!(graph.vertices().unwrap(), vec![v]);
        assert_eq!(report.chain_entries, 0);
        assert!(session.pending_ops().is_empty());
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        assert_eq!(session.commit().unwrap(), None);
        assert_eq!(graph.latest_tx().unwrap(), None);
    }

    #[test]
    fn discard_drops_pending_writes() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        session.add_vertex().unwrap();
        session.discard();
        assert_eq!(session.commit().unwrap(), None);
        assert!(graph.vertices().unwrap().is_empty());
    }

    #[test]
    fn failed_commit_clears_the_buffer() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let v = session.add_vertex().unwrap();
        session
            .queue(Op::add(v.id(), "unknown.string.vertex", "x"))
            .unwrap();

        let result = session.commit();
        assert!(matches!(result, Err(EpochError::StoreCommit(_))));
        assert!(session.pending_ops().is_empty());
        assert!(graph.vertices().unwrap().is_empty());

        // The session stays usable.
        session.add_vertex().unwrap();
        assert!(session.commit().unwrap().is_some());
        assert_eq!(graph.vertices().unwrap().len(), 1);
    }

    #[test]
    fn add_edge_touches_both_endpoints() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        let b = session.add_vertex().unwrap();
        let t1 = session.commit().unwrap().unwrap().tx;

        session.add_edge(&a, &b, "knows").unwrap();
        let report = session.commit().unwrap().unwrap();
        // a and b get entries; the new edge has no earlier version.
        assert_eq!(report.chain_entries, 2);
        assert_eq!(a.time_id().unwrap(), Some(report.tx));
        assert_eq!(
            a.previous_version().unwrap().unwrap().time_id().unwrap(),
            Some(t1)
        );
    }

    #[test]
    fn remove_vertex_takes_incident_edges_with_it() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        let b = session.add_vertex().unwrap();
        let c = session.add_vertex().unwrap();
        session.add_edge(&a, &b, "knows").unwrap();
        let bc = session.add_edge(&b, &c, "knows").unwrap();
        session.commit().unwrap();

        session.remove_vertex(&a).unwrap();
        session.commit().unwrap();

        assert!(a.is_deleted().unwrap());
        assert_eq!(graph.edges().unwrap(), vec![bc]);
        assert!(b.edges(Direction::In, &[]).unwrap().is_empty());
    }

    #[test]
    fn remove_vertex_drops_edges_added_in_the_same_session() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        let b = session.add_vertex().unwrap();
        session.add_edge(&a, &b, "knows").unwrap();
        session.remove_vertex(&a).unwrap();
        session.commit().unwrap();

        assert!(a.is_deleted().unwrap());
        assert!(graph.edges().unwrap().is_empty());
        assert!(b.edges(Direction::Both, &[]).unwrap().is_empty());
    }

    #[test]
    fn remove_vertex_drops_pending_edge_between_committed_vertices() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        let b = session.add_vertex().unwrap();
        session.commit().unwrap();

        let ab = session.add_edge(&a, &b, "knows").unwrap();
        session.remove_vertex(&b).unwrap();
        assert!(session.pending_ops().iter().all(|op| op.entity() != ab.id()));
        session.commit().unwrap();

        assert!(b.is_deleted().unwrap());
        assert!(graph.edges().unwrap().is_empty());
        assert!(a.edges(Direction::Out, &[]).unwrap().is_empty());
    }

    #[test]
    fn sessions_on_one_graph_buffer_independently() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut first = graph.session();
        let mut second = graph.session();
        let kept = first.add_vertex().unwrap();
        second.add_vertex().unwrap();

        first.commit().unwrap();
        assert_eq!(second.pending_ops().len(), 1);
        assert_eq!(graph.vertices().unwrap(), vec![kept]);

        second.discard();
        assert_eq!(second.commit().unwrap(), None);
        assert_eq!(graph.vertices().unwrap(), vec![kept]);
    }

    #[test]
    fn clear_removes_everything() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        let b = session.add_vertex().unwrap();
        session.add_edge(&a, &b, "knows").unwrap();
        session.add_edge(&b, &a, "knows").unwrap();
        session.commit().unwrap();

        session.clear().unwrap();
        assert!(graph.vertices().unwrap().is_empty());
        assert!(graph.edges().unwrap().is_empty());
    }

    #[test]
    fn deleted_elements_reject_writes() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let a = session.add_vertex().unwrap();
        session.commit().unwrap();
        session.remove_vertex(&a).unwrap();
        session.commit().unwrap();

        assert!(matches!(
            a.set_property(&mut session, "name", "x"),
            Err(EpochError::InvalidState(_))
        ));
        assert!(matches!(
            session.remove_vertex(&a),
            Err(EpochError::InvalidState(_))
        ));
    }

    #[test]
    fn elements_of_another_graph_are_rejected() {
        let g1 = EpochGraph::open_in_memory().unwrap();
        let g2 = EpochGraph::open_in_memory().unwrap();
        let mut s1 = g1.session();
        let foreign = s1.add_vertex().unwrap();
        s1.commit().unwrap();

        let mut s2 = g2.session();
        let local = s2.add_vertex().unwrap();
        assert!(matches!(
            s2.add_edge(&local, &foreign, "knows"),
            Err(EpochError::InvalidState(_))
        ));
    }

    #[test]
    fn checkpoint_binds_reads() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        session
            .set_transaction_time(Some(dt("2024-01-01T00:00:00Z")))
            .unwrap();
        let a = session.add_vertex().unwrap();
        session.commit().unwrap();
        session
            .set_transaction_time(Some(dt("2024-02-01T00:00:00Z")))
            .unwrap();
        session.add_vertex().unwrap();
        session.commit().unwrap();

        session.set_checkpoint(dt("2024-01-15T00:00:00Z")).unwrap();
        assert_eq!(session.vertices().unwrap(), vec![a]);
        assert!(!session.vertex(a.id()).unwrap().is_current_version());

        session.set_checkpoint(dt("2023-01-01T00:00:00Z")).unwrap();
        assert!(session.vertices().unwrap().is_empty());

        session.clear_checkpoint();
        assert_eq!(session.vertices().unwrap().len(), 2);
    }

    #[test]
    fn backfill_before_a_later_commit_is_rejected() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        session
            .set_transaction_time(Some(dt("2024-02-01T00:00:00Z")))
            .unwrap();
        let feb = session.add_vertex().unwrap();
        session.commit().unwrap();

        session
            .set_transaction_time(Some(dt("2024-01-01T00:00:00Z")))
            .unwrap();
        session.add_vertex().unwrap();
        assert!(matches!(session.commit(), Err(EpochError::StoreCommit(_))));

        session.set_checkpoint(dt("2024-01-15T00:00:00Z")).unwrap();
        assert!(session.vertices().unwrap().is_empty());
        session.clear_checkpoint();
        assert_eq!(session.vertices().unwrap(), vec![feb]);
    }

    #[test]
    fn backfilled_time_is_recorded() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let mut session = graph.session();
        let at = dt("2020-05-01T12:00:00Z");
        session.set_transaction_time(Some(at)).unwrap();
        session.add_vertex().unwrap();
        let report = session.commit().unwrap().unwrap();
        assert_eq!(report.instant, at);
        assert_eq!(graph.tx_instant(report.tx).unwrap(), at);
    }
}
