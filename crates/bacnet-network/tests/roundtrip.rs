use bacnet_core::{BoundingBox, EdgeKind, ObjectClass, ObjectId, ObjectSet, SURFACE_ID};
use bacnet_network::{CellSubtype, InteractiveGraphStore, NetworkGraph, StoreParams};
use nalgebra::Point2;

fn bb(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
    BoundingBox::new(x1, y1, x2, y2).unwrap()
}

fn network() -> NetworkGraph {
    let mut objects = ObjectSet::new(640, 480);
    let a = objects.push(ObjectClass::Cell, bb(10, 10, 60, 40)).unwrap();
    let b = objects.push(ObjectClass::Cell, bb(55, 12, 110, 44)).unwrap();
    let c = objects.push(ObjectClass::Cell, bb(300, 300, 340, 330)).unwrap();
    let w1 = objects.push(ObjectClass::Nanowire, bb(100, 20, 301, 305)).unwrap();
    let w2 = objects.push(ObjectClass::Nanowire, bb(335, 320, 500, 333)).unwrap();
    let w3 = objects.push(ObjectClass::Nanowire, bb(20, 35, 60, 90)).unwrap();
    objects.get_mut(a).unwrap().centroid = Some(Point2::new(35, 25));
    objects.get_mut(b).unwrap().centroid = Some(Point2::new(83, 28));
    objects.get_mut(c).unwrap().centroid = Some(Point2::new(320, 315));

    objects.add_edge(a, b, EdgeKind::CellContact, None).unwrap();
    objects.add_edge(b, c, EdgeKind::CellToCell, Some(w1)).unwrap();
    objects
        .add_edge(c, SURFACE_ID, EdgeKind::CellToSurface, Some(w2))
        .unwrap();
    objects
        .add_edge(a, SURFACE_ID, EdgeKind::CellToSurface, Some(w3))
        .unwrap();
    NetworkGraph::from_objects(&objects)
}

#[test]
fn export_then_import_reproduces_the_graph() {
    let graph = network();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 4);
    assert_eq!(graph.cell_count(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("network.json");
    graph.write_json(&path).unwrap();
    let loaded = NetworkGraph::load_json(&path).unwrap();

    assert_eq!(loaded, graph);
    let anchors: Vec<_> = loaded
        .edges()
        .iter()
        .filter_map(|e| e.surface_point)
        .collect();
    assert_eq!(anchors, vec![Point2::new(417, 326), Point2::new(40, 62)]);
}

#[test]
fn hand_edits_survive_a_round_trip() {
    let mut store = InteractiveGraphStore::new(network(), StoreParams::default());
    let added = store.add_cell(600.0, 50.0);
    store
        .add_edge_near((598.0, 52.0), (321.0, 316.0), EdgeKind::CellContact)
        .unwrap_or_else(|| panic!("both endpoints are within reach"));
    store
        .set_subtype_near(36.0, 24.0, CellSubtype::Spheroplast)
        .unwrap();
    let graph = store.into_graph();

    let loaded = NetworkGraph::from_json_str(&graph.to_json_string().unwrap()).unwrap();
    assert_eq!(loaded, graph);
    assert_eq!(added, ObjectId(4));
    assert_eq!(loaded.subtype_count(CellSubtype::Spheroplast), 1);
    assert_eq!(loaded.degree(added), 1);
}
