use std::collections::BTreeMap;

use bacnet_core::{EdgeKind, ObjectClass, ObjectId, ObjectSet, SURFACE_ID};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    UnknownNode(ObjectId),
    #[error("node {0} already exists")]
    DuplicateNode(ObjectId),
    #[error("edge {a}-{b} already has key {key}")]
    DuplicateEdgeKey { a: ObjectId, b: ObjectId, key: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Cell,
    Surface,
}

/// Morphological cell type, assigned by hand during review.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSubtype {
    #[default]
    Normal,
    Filament,
    Curved,
    Spheroplast,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GraphNode {
    pub id: ObjectId,
    pub position: Point2<f32>,
    pub kind: NodeKind,
    /// `None` for the surface.
    pub subtype: Option<CellSubtype>,
}

impl GraphNode {
    pub fn cell(id: ObjectId, position: Point2<f32>) -> Self {
        Self {
            id,
            position,
            kind: NodeKind::Cell,
            subtype: Some(CellSubtype::Normal),
        }
    }

    pub fn surface(position: Point2<f32>) -> Self {
        Self {
            id: SURFACE_ID,
            position,
            kind: NodeKind::Surface,
            subtype: None,
        }
    }
}

/// Undirected multigraph edge. `source <= target`; `key` tells parallel
/// edges between the same pair apart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GraphEdge {
    pub source: ObjectId,
    pub target: ObjectId,
    pub key: u32,
    pub kind: EdgeKind,
    pub nanowire: Option<ObjectId>,
    /// Where the bridging nanowire meets the surface (CellToSurface only).
    pub surface_point: Option<Point2<i32>>,
}

impl GraphEdge {
    fn same_relation(&self, other: &GraphEdge) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.kind == other.kind
            && self.nanowire == other.nanowire
            && self.surface_point == other.surface_point
    }

    #[inline]
    pub fn connects(&self, a: ObjectId, b: ObjectId) -> bool {
        (self.source, self.target) == ordered(a, b)
    }
}

#[inline]
fn ordered(a: ObjectId, b: ObjectId) -> (ObjectId, ObjectId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Cell network of one image: cells and the surface as nodes, typed
/// relationships as multigraph edges.
///
/// Built once from an [`ObjectSet`], then edited independently of it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkGraph {
    nodes: BTreeMap<ObjectId, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node per cell and the surface, one edge per recorded relation.
    ///
    /// Cells whose segmentation failed sit at their box center.
    pub fn from_objects(objects: &ObjectSet) -> Self {
        let mut graph = Self::new();
        for obj in objects.iter() {
            let node = match obj.class {
                ObjectClass::Nanowire => continue,
                ObjectClass::Surface => GraphNode::surface(
                    obj.centroid
                        .map(|c| c.cast::<f32>())
                        .unwrap_or_else(Point2::origin),
                ),
                ObjectClass::Cell => GraphNode::cell(
                    obj.id,
                    obj.centroid
                        .map(|c| c.cast::<f32>())
                        .unwrap_or_else(|| obj.bbox.center()),
                ),
            };
            graph.nodes.insert(node.id, node);
        }

        for edge in objects.edges() {
            let surface_point = match (edge.kind, edge.nanowire) {
                (EdgeKind::CellToSurface, Some(wire)) => {
                    objects.get(wire).map(|w| w.bbox.center_floor())
                }
                _ => None,
            };
            // Endpoints come from the same set, so they are always present.
            let _ = graph.add_edge(edge.tail, edge.head, edge.kind, edge.nanowire, surface_point);
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of nodes that are not the surface.
    pub fn cell_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.kind == NodeKind::Cell)
            .count()
    }

    pub fn subtype_count(&self, subtype: CellSubtype) -> usize {
        self.nodes
            .values()
            .filter(|n| n.subtype == Some(subtype))
            .count()
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, id: ObjectId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn contains_node(&self, id: ObjectId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn edges_between(&self, a: ObjectId, b: ObjectId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.connects(a, b))
    }

    pub fn degree(&self, id: ObjectId) -> usize {
        self.edges
            .iter()
            .map(|e| usize::from(e.source == id) + usize::from(e.target == id))
            .sum()
    }

    /// Add a cell node with the next free id.
    pub fn add_cell(&mut self, position: Point2<f32>) -> ObjectId {
        let id = self
            .nodes
            .keys()
            .next_back()
            .map(|last| ObjectId(last.0 + 1))
            .unwrap_or(ObjectId(1));
        self.nodes.insert(id, GraphNode::cell(id, position));
        id
    }

    pub fn insert_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Remove a node together with its incident edges.
    pub fn remove_node(&mut self, id: ObjectId) -> Option<GraphNode> {
        let node = self.nodes.remove(&id)?;
        self.edges.retain(|e| e.source != id && e.target != id);
        Some(node)
    }

    pub fn set_subtype(&mut self, id: ObjectId, subtype: CellSubtype) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::UnknownNode(id))?;
        if node.kind == NodeKind::Cell {
            node.subtype = Some(subtype);
        }
        Ok(())
    }

    /// Add an edge and return its key.
    ///
    /// Parallel edges are kept only when they differ in type or bridge; an
    /// identical relation returns the existing key.
    pub fn add_edge(
        &mut self,
        a: ObjectId,
        b: ObjectId,
        kind: EdgeKind,
        nanowire: Option<ObjectId>,
        surface_point: Option<Point2<i32>>,
    ) -> Result<u32, GraphError> {
        for id in [a, b] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::UnknownNode(id));
            }
        }
        let (source, target) = ordered(a, b);
        let mut edge = GraphEdge {
            source,
            target,
            key: 0,
            kind,
            nanowire,
            surface_point,
        };
        if let Some(existing) = self.edges.iter().find(|e| e.same_relation(&edge)) {
            return Ok(existing.key);
        }
        // Smallest key not used by this pair.
        let used: Vec<u32> = self.edges_between(a, b).map(|e| e.key).collect();
        while used.contains(&edge.key) {
            edge.key += 1;
        }
        self.edges.push(edge);
        Ok(edge.key)
    }

    /// Insert an edge with its key as given.
    pub fn insert_edge(&mut self, edge: GraphEdge) -> Result<(), GraphError> {
        for id in [edge.source, edge.target] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::UnknownNode(id));
            }
        }
        let (source, target) = ordered(edge.source, edge.target);
        if self
            .edges_between(source, target)
            .any(|e| e.key == edge.key)
        {
            return Err(GraphError::DuplicateEdgeKey {
                a: source,
                b: target,
                key: edge.key,
            });
        }
        self.edges.push(GraphEdge {
            source,
            target,
            ..edge
        });
        Ok(())
    }

    /// Remove the most recently added edge between `a` and `b`.
    pub fn remove_edge(&mut self, a: ObjectId, b: ObjectId) -> Option<GraphEdge> {
        let idx = self.edges.iter().rposition(|e| e.connects(a, b))?;
        Some(self.edges.remove(idx))
    }
}
