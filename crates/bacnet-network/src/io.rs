//! JSON node-link export and import of [`NetworkGraph`].
//!
//! The document mirrors the usual multigraph node-link layout:
//! `{"multigraph": true, "nodes": [...], "edges": [...]}`. The surface anchor
//! of CellToSurface edges is stored as a JSON object encoded in a string
//! attribute, for graph tools that only accept scalar attributes.

use std::{fs, path::Path};

use bacnet_core::{EdgeKind, ObjectId};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::graph::{CellSubtype, GraphEdge, GraphError, GraphNode, NetworkGraph, NodeKind};

#[derive(thiserror::Error, Debug)]
pub enum GraphIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("edge {a}-{b}: bad surface_point {value:?}: {reason}")]
    SurfacePoint {
        a: ObjectId,
        b: ObjectId,
        value: String,
        reason: serde_json::Error,
    },
    #[error("document is not a multigraph")]
    NotMultigraph,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SurfacePoint {
    x: i32,
    y: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: ObjectId,
    x: f32,
    y: f32,
    kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtype: Option<CellSubtype>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EdgeRecord {
    source: ObjectId,
    target: ObjectId,
    key: u32,
    #[serde(rename = "type")]
    kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nanowire: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    surface_point: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GraphDocument {
    multigraph: bool,
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

impl GraphDocument {
    fn from_graph(graph: &NetworkGraph) -> Result<Self, GraphIoError> {
        let nodes = graph
            .nodes()
            .map(|n| NodeRecord {
                id: n.id,
                x: n.position.x,
                y: n.position.y,
                kind: n.kind,
                subtype: n.subtype,
            })
            .collect();
        let edges = graph
            .edges()
            .iter()
            .map(|e| -> Result<EdgeRecord, GraphIoError> {
                let surface_point = e
                    .surface_point
                    .map(|p| serde_json::to_string(&SurfacePoint { x: p.x, y: p.y }))
                    .transpose()?;
                Ok(EdgeRecord {
                    source: e.source,
                    target: e.target,
                    key: e.key,
                    kind: e.kind,
                    nanowire: e.nanowire,
                    surface_point,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            multigraph: true,
            nodes,
            edges,
        })
    }

    fn into_graph(self) -> Result<NetworkGraph, GraphIoError> {
        if !self.multigraph {
            return Err(GraphIoError::NotMultigraph);
        }
        let mut graph = NetworkGraph::new();
        for n in self.nodes {
            graph.insert_node(GraphNode {
                id: n.id,
                position: Point2::new(n.x, n.y),
                kind: n.kind,
                subtype: n.subtype,
            })?;
        }
        for e in self.edges {
            let surface_point = match e.surface_point {
                Some(raw) => {
                    let p: SurfacePoint =
                        serde_json::from_str(&raw).map_err(|reason| GraphIoError::SurfacePoint {
                            a: e.source,
                            b: e.target,
                            value: raw.clone(),
                            reason,
                        })?;
                    Some(Point2::new(p.x, p.y))
                }
                None => None,
            };
            graph.insert_edge(GraphEdge {
                source: e.source,
                target: e.target,
                key: e.key,
                kind: e.kind,
                nanowire: e.nanowire,
                surface_point,
            })?;
        }
        Ok(graph)
    }
}

impl NetworkGraph {
    pub fn to_json_string(&self) -> Result<String, GraphIoError> {
        Ok(serde_json::to_string_pretty(&GraphDocument::from_graph(self)?)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, GraphIoError> {
        serde_json::from_str::<GraphDocument>(raw)?.into_graph()
    }

    /// Load a graph written by [`write_json`](Self::write_json).
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GraphIoError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Write the graph as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GraphIoError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
