use bacnet::{process_with_labels, CancelToken, PipelineConfig, Progress};

#[cfg(feature = "tracing")]
use bacnet::core::init_tracing;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "tracing")]
    init_tracing(false);

    let mut args = std::env::args().skip(1);
    let (Some(image), Some(labels)) = (args.next(), args.next()) else {
        eprintln!("Usage: labels_to_graph <image_path> <labels_path> [classes_path]");
        return Ok(());
    };
    let classes = args.next().map(std::path::PathBuf::from);

    let result = process_with_labels(
        &image,
        &labels,
        classes.as_deref(),
        &PipelineConfig::default(),
        &mut Progress::none(),
        &CancelToken::new(),
    )?;
    let r = &result.report;
    println!(
        "{} cells: {} contacts, {} cell-cell wires, {} cell-surface wires",
        result.graph.cell_count(),
        r.contact_edges,
        r.cell_to_cell_edges,
        r.cell_to_surface_edges
    );
    println!("{}", result.graph.to_json_string()?);
    Ok(())
}
