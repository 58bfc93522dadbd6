//! Cell network inference and editing.
//!
//! [`NetworkBuilder`] turns segmented objects into typed relations
//! (cell contact, nanowire bridge between cells, nanowire anchoring a cell to
//! the surface). [`NetworkGraph`] is the exported multigraph, and
//! [`InteractiveGraphStore`] answers nearest-node queries for hand edits.

mod builder;
mod graph;
mod io;
mod store;

pub use builder::{masks_touch, BuildError, BuildReport, NetworkBuilder};
pub use graph::{CellSubtype, GraphEdge, GraphError, GraphNode, NetworkGraph, NodeKind};
pub use io::GraphIoError;
pub use store::{InteractiveGraphStore, StoreParams};
