//! Nearest-node lookup for hand editing of a network graph.

use std::collections::HashMap;

use bacnet_core::{EdgeKind, ObjectId};
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::graph::{CellSubtype, GraphEdge, GraphNode, NetworkGraph, NodeKind};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    /// Clicks farther than this from every node select nothing (pixels).
    pub release_threshold: f32,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            release_threshold: 50.0,
        }
    }
}

/// A graph plus a k-d tree over its node positions.
///
/// The tree is static and rebuilt after every edit, so queries never see a
/// stale index. Nodes sharing a position share one tree item; a query answers
/// with the lowest id at that position.
pub struct InteractiveGraphStore {
    graph: NetworkGraph,
    params: StoreParams,
    tree: KdTree<f32, 2>,
    /// Tree item -> ids of the nodes at that position, ascending.
    ids: Vec<Vec<ObjectId>>,
}

impl InteractiveGraphStore {
    pub fn new(graph: NetworkGraph, params: StoreParams) -> Self {
        let mut store = Self {
            graph,
            params,
            tree: KdTree::new(),
            ids: Vec::new(),
        };
        store.rebuild();
        store
    }

    fn rebuild(&mut self) {
        let mut slots: HashMap<[u32; 2], usize> = HashMap::new();
        let mut coords: Vec<[f32; 2]> = Vec::new();
        let mut ids: Vec<Vec<ObjectId>> = Vec::new();
        // Nodes iterate in id order, so each slot stays sorted.
        for n in self.graph.nodes() {
            // `+ 0.0` folds -0.0 into 0.0.
            let p = [n.position.x + 0.0, n.position.y + 0.0];
            let slot = *slots.entry(p.map(f32::to_bits)).or_insert_with(|| {
                coords.push(p);
                ids.push(Vec::new());
                coords.len() - 1
            });
            ids[slot].push(n.id);
        }
        self.tree = (&coords).into();
        debug!(
            "rebuilt node index over {} nodes at {} positions",
            self.graph.node_count(),
            coords.len()
        );
        self.ids = ids;
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    pub fn into_graph(self) -> NetworkGraph {
        self.graph
    }

    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Closest node to `(x, y)` and its distance, if within the release
    /// threshold.
    pub fn nearest(&self, x: f32, y: f32) -> Option<(ObjectId, f32)> {
        if self.ids.is_empty() {
            return None;
        }
        let nn = self.tree.nearest_one::<SquaredEuclidean>(&[x, y]);
        let dist = nn.distance.sqrt();
        if dist > self.params.release_threshold {
            return None;
        }
        self.ids
            .get(nn.item as usize)
            .and_then(|slot| slot.first())
            .map(|&id| (id, dist))
    }

    /// Add a cell at `(x, y)` and return its id.
    pub fn add_cell(&mut self, x: f32, y: f32) -> ObjectId {
        let id = self.graph.add_cell(Point2::new(x, y));
        self.rebuild();
        id
    }

    /// Remove the cell nearest to `(x, y)` with its edges. The surface is
    /// never removed.
    pub fn remove_node_near(&mut self, x: f32, y: f32) -> Option<GraphNode> {
        let (id, _) = self.nearest(x, y)?;
        if self.graph.node(id)?.kind == NodeKind::Surface {
            return None;
        }
        let node = self.graph.remove_node(id);
        self.rebuild();
        node
    }

    /// Connect the nodes nearest to `from` and `to`. Returns the edge key.
    pub fn add_edge_near(
        &mut self,
        from: (f32, f32),
        to: (f32, f32),
        kind: EdgeKind,
    ) -> Option<u32> {
        let (a, _) = self.nearest(from.0, from.1)?;
        let (b, _) = self.nearest(to.0, to.1)?;
        if a == b {
            return None;
        }
        let key = self.graph.add_edge(a, b, kind, None, None).ok();
        self.rebuild();
        key
    }

    /// Remove the latest edge between the nodes nearest to `from` and `to`.
    pub fn remove_edge_near(&mut self, from: (f32, f32), to: (f32, f32)) -> Option<GraphEdge> {
        let (a, _) = self.nearest(from.0, from.1)?;
        let (b, _) = self.nearest(to.0, to.1)?;
        let edge = self.graph.remove_edge(a, b);
        self.rebuild();
        edge
    }

    /// Relabel the cell nearest to `(x, y)`.
    pub fn set_subtype_near(&mut self, x: f32, y: f32, subtype: CellSubtype) -> Option<ObjectId> {
        let (id, _) = self.nearest(x, y)?;
        if self.graph.node(id)?.kind != NodeKind::Cell {
            return None;
        }
        self.graph.set_subtype(id, subtype).ok()?;
        self.rebuild();
        Some(id)
    }
}
