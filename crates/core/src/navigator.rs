//! Lazy iteration over an element's versions.

use std::iter::FusedIterator;

use crate::element::Element;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDirection {
    /// Towards newer versions, ending with the live element.
    Forward,
    /// Towards older versions, ending with the first one.
    Backward,
}

/// Versions of one element, starting just after (or before) the element
/// it was created from. Each step is one chain lookup; nothing is read
/// ahead.
///
/// Stops at the end of the chain or after yielding an error.
pub struct Versions<'g, E> {
    cursor: Option<E>,
    direction: TimeDirection,
    filter: Option<Box<dyn FnMut(&E) -> bool + 'g>>,
}

impl<'g, E: Element<'g>> Versions<'g, E> {
    pub(crate) fn new(start: E, direction: TimeDirection) -> Self {
        Self {
            cursor: Some(start),
            direction,
            filter: None,
        }
    }

    pub(crate) fn filtered<F>(start: E, direction: TimeDirection, filter: F) -> Self
    where
        F: FnMut(&E) -> bool + 'g,
    {
        Self {
            cursor: Some(start),
            direction,
            filter: Some(Box::new(filter)),
        }
    }

    pub fn direction(&self) -> TimeDirection {
        self.direction
    }

    fn step(&self, from: &E) -> Result<Option<E>> {
        match self.direction {
            TimeDirection::Forward => from.next_version(),
            TimeDirection::Backward => from.previous_version(),
        }
    }
}

impl<'g, E: Element<'g>> Iterator for Versions<'g, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        // Bounded by the chain length: every step moves strictly in time.
        loop {
            let current = self.cursor.take()?;
            let candidate = match self.step(&current) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            self.cursor = Some(candidate.clone());
            let accepted = match self.filter.as_mut() {
                Some(filter) => filter(&candidate),
                None => true,
            };
            if accepted {
                return Some(Ok(candidate));
            }
        }
    }
}

impl<'g, E: Element<'g>> FusedIterator for Versions<'g, E> {}

#[cfg(test)]
mod tests {
    use crate::element::{Element, Vertex};
    use crate::value::{TxId, Value};
    use crate::EpochGraph;

    /// A vertex with `n` = 0..count, one commit each. Returns the live
    /// vertex and the commit transactions.
    fn versioned<'g>(graph: &'g EpochGraph, count: i64) -> (Vertex<'g>, Vec<TxId>) {
        let mut session = graph.session();
        let v = session.add_vertex().unwrap();
        let mut txs = Vec::new();
        for n in 0..count {
            v.set_property(&mut session, "n", n).unwrap();
            txs.push(session.commit().unwrap().unwrap().tx);
        }
        (v, txs)
    }

    fn n_of(v: &Vertex<'_>) -> i64 {
        v.property("n").unwrap().and_then(|p| p.as_long()).unwrap()
    }

    #[test]
    fn backward_walks_to_the_first_version() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let (v, _) = versioned(&graph, 4);
        let ns: Vec<i64> = v
            .previous_versions()
            .map(|r| n_of(&r.unwrap()))
            .collect();
        assert_eq!(ns, vec![2, 1, 0]);
    }

    #[test]
    fn forward_ends_at_live() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let (v, txs) = versioned(&graph, 4);
        let first = v.rebind(Some(txs[0]));
        let versions: Vec<Vertex<'_>> = first.next_versions().map(|r| r.unwrap()).collect();
        assert_eq!(versions.len(), 3);
        assert!(versions.last().unwrap().is_current_version());
        assert!(versions[..2].iter().all(|v| !v.is_current_version()));
        let ns: Vec<i64> = versions.iter().map(n_of).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn filter_skips_rejected_versions() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let (v, _) = versioned(&graph, 6);
        let even: Vec<i64> = v
            .previous_versions_where(|v| n_of(v) % 2 == 0)
            .map(|r| n_of(&r.unwrap()))
            .collect();
        assert_eq!(even, vec![4, 2, 0]);
    }

    #[test]
    fn filter_rejecting_everything_exhausts() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let (v, _) = versioned(&graph, 3);
        let mut none = v.previous_versions_where(|_| false);
        assert!(none.next().is_none());
        assert!(none.next().is_none());
    }

    #[test]
    fn unversioned_element_has_no_neighbours() {
        let graph = EpochGraph::open_in_memory().unwrap();
        let (v, _) = versioned(&graph, 1);
        assert_eq!(v.previous_versions().count(), 0);
        assert_eq!(v.next_versions().count(), 0);
        assert_eq!(v.property("n").unwrap(), Some(Value::from(0_i64)));
    }
}
