use bacnet::network::StoreParams;
use bacnet::{CellSubtype, EdgeKind, InteractiveGraphStore, NetworkGraph};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: edit_graph <graph.json>");
        return Ok(());
    };

    let graph = NetworkGraph::load_json(&path)?;
    let mut store = InteractiveGraphStore::new(graph, StoreParams::default());
    match store.nearest(100.0, 100.0) {
        Some((id, dist)) => println!("closest node to (100, 100): {id} at {dist:.1}px"),
        None => println!("no node within the release threshold of (100, 100)"),
    }

    let id = store.add_cell(100.0, 100.0);
    store.set_subtype_near(100.0, 100.0, CellSubtype::Spheroplast);
    if let Some(key) = store.add_edge_near((100.0, 100.0), (0.0, 0.0), EdgeKind::CellToSurface) {
        println!("wired {id} to the surface (key {key})");
    }
    let graph = store.into_graph();
    println!(
        "{} cells ({} spheroplasts), {} edges",
        graph.cell_count(),
        graph.subtype_count(CellSubtype::Spheroplast),
        graph.edge_count()
    );
    Ok(())
}
