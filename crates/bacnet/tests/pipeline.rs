use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use bacnet::tiling::Tile;
use bacnet::{
    process_with_labels, BoundingBox, CancelToken, Detector, DetectorError, EdgeKind,
    ImagePipeline, NetworkGraph, ObjectId, PipelineConfig, PipelineError, Progress, RawDetection,
    Stage,
};
use image::{GrayImage, Luma};

fn bb(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
    BoundingBox::new(x1, y1, x2, y2).unwrap()
}

fn fill(img: &mut GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) {
    for y in y1..=y2 {
        for x in x1..=x2 {
            img.put_pixel(x, y, Luma([220]));
        }
    }
}

/// Two touching cells plus two cells joined by a nanowire, all inside the
/// first tile's confidence region of the default grid.
fn scene() -> (GrayImage, Vec<(&'static str, BoundingBox)>) {
    let mut img = GrayImage::new(600, 500);
    fill(&mut img, 100, 100, 139, 140);
    fill(&mut img, 140, 100, 179, 140);
    fill(&mut img, 90, 200, 130, 240);
    fill(&mut img, 230, 200, 270, 240);
    fill(&mut img, 131, 220, 229, 221);
    let objects = vec![
        ("cell", bb(95, 95, 142, 145)),
        ("cell", bb(137, 95, 184, 145)),
        ("cell", bb(85, 195, 135, 245)),
        ("cell", bb(225, 195, 275, 245)),
        ("nanowire", bb(128, 215, 232, 226)),
    ];
    (img, objects)
}

/// Answers from known image-space boxes, clipped to each crop's window.
struct ScriptedDetector {
    tile_size: i32,
    objects: Vec<(&'static str, BoundingBox)>,
    seen: RefCell<Vec<PathBuf>>,
}

impl ScriptedDetector {
    fn new(objects: Vec<(&'static str, BoundingBox)>) -> Self {
        Self {
            tile_size: 416,
            objects,
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(
        &self,
        images: &[PathBuf],
        progress: &mut Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<RawDetection>>, DetectorError> {
        let mut blocks = Vec::new();
        for (i, path) in images.iter().enumerate() {
            cancel.check()?;
            assert!(path.exists(), "crop {} was not written", path.display());
            self.seen.borrow_mut().push(path.clone());
            let stem = path.file_stem().unwrap().to_str().unwrap();
            let (ox, oy) = Tile::origin_from_stem(stem).unwrap();
            let t = self.tile_size;
            let block = self
                .objects
                .iter()
                .filter_map(|(label, b)| {
                    let x1 = (b.x1 - ox).max(0);
                    let y1 = (b.y1 - oy).max(0);
                    let x2 = (b.x2 - ox).min(t);
                    let y2 = (b.y2 - oy).min(t);
                    (x1 < x2 && y1 < y2)
                        .then(|| RawDetection::new(*label, 0.9, x1, y1, x2 - x1, y2 - y1))
                })
                .collect();
            blocks.push(block);
            progress.fraction(i + 1, images.len());
        }
        progress.finish();
        Ok(blocks)
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        strip_info_bar: false,
        ..PipelineConfig::default()
    }
}

fn edge_kinds(graph: &NetworkGraph) -> Vec<EdgeKind> {
    graph.edges().iter().map(|e| e.kind).collect()
}

#[test]
fn tiled_image_yields_contact_and_bridge_edges() {
    let dir = tempfile::tempdir().unwrap();
    let (img, objects) = scene();
    let path = dir.path().join("biofilm.png");
    img.save(&path).unwrap();

    let detector = ScriptedDetector::new(objects);
    let pipeline = ImagePipeline::new(detector, config()).unwrap();
    let mut stages: Vec<(Stage, u8)> = Vec::new();
    let result = pipeline
        .process_image(&path, &mut |s, p| stages.push((s, p)), &CancelToken::new())
        .unwrap();

    // 600x500 with stride 277 -> origins x in {0, 277, 554}, y in {0, 277}.
    let seen = pipeline.detector().seen.borrow();
    assert_eq!(seen.len(), 6);
    assert!(seen
        .iter()
        .any(|p| p.file_name().unwrap() == "biofilm_277_277.png"));

    assert_eq!(result.objects.cell_count(), 4);
    assert_eq!(result.graph.cell_count(), 4);
    let mut kinds = edge_kinds(&result.graph);
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![EdgeKind::CellContact, EdgeKind::CellToCell]);

    let contact = result
        .graph
        .edges()
        .iter()
        .find(|e| e.kind == EdgeKind::CellContact)
        .unwrap();
    assert_eq!((contact.source, contact.target), (ObjectId(1), ObjectId(2)));
    let bridge = result
        .graph
        .edges()
        .iter()
        .find(|e| e.kind == EdgeKind::CellToCell)
        .unwrap();
    assert_eq!((bridge.source, bridge.target), (ObjectId(3), ObjectId(4)));
    assert_eq!(bridge.nanowire, Some(ObjectId(5)));

    assert!(stages.contains(&(Stage::Detection, 100)));
    assert_eq!(stages.last(), Some(&(Stage::EdgeBuilding, 100)));
}

#[test]
fn small_images_go_to_the_detector_whole() {
    let dir = tempfile::tempdir().unwrap();
    let mut img = GrayImage::new(300, 100);
    fill(&mut img, 10, 30, 50, 70);
    fill(&mut img, 51, 50, 199, 51);
    let path = dir.path().join("small.png");
    img.save(&path).unwrap();

    let crops = dir.path().join("crops");
    let detector = ScriptedDetector::new(vec![
        ("cell", bb(5, 25, 55, 75)),
        ("nanowire", bb(48, 45, 202, 56)),
        ("debris", bb(250, 10, 260, 20)),
    ]);
    let cfg = PipelineConfig {
        crop_dir: Some(crops.clone()),
        ..config()
    };
    let pipeline = ImagePipeline::new(detector, cfg).unwrap();
    let result = pipeline
        .process_image(&path, &mut |_, _| {}, &CancelToken::new())
        .unwrap();

    assert!(crops.join("small_0_0.png").exists());
    assert_eq!(pipeline.detector().seen.borrow().len(), 1);
    // The unknown label is skipped.
    assert_eq!(result.objects.len(), 3);
    assert_eq!(edge_kinds(&result.graph), vec![EdgeKind::CellToSurface]);
    let e = result.graph.edges()[0];
    assert_eq!(e.surface_point, Some(nalgebra::Point2::new(125, 50)));
}

#[test]
fn label_files_drive_the_same_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut img = GrayImage::new(300, 100);
    fill(&mut img, 10, 30, 50, 70);
    fill(&mut img, 200, 30, 240, 70);
    fill(&mut img, 51, 50, 199, 51);
    let image_path = dir.path().join("pair.png");
    img.save(&image_path).unwrap();

    // Boxes (5,25)-(55,75), (195,25)-(245,75) and (48,45)-(202,56).
    let labels = "\
# class xc yc w h
0 0.1 0.5 0.16666667 0.5
0 0.73333333 0.5 0.16666667 0.5
1 0.41666667 0.505 0.51333333 0.11
";
    let labels_path = dir.path().join("pair.txt");
    fs::write(&labels_path, labels).unwrap();
    let classes_path = dir.path().join("classes.txt");
    fs::write(&classes_path, "cell\nnanowire\n").unwrap();

    let result = process_with_labels(
        &image_path,
        &labels_path,
        Some(classes_path.as_path()),
        &config(),
        &mut Progress::none(),
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(result.graph.cell_count(), 2);
    assert_eq!(edge_kinds(&result.graph), vec![EdgeKind::CellToCell]);
    assert_eq!(result.report.dangling_nanowires, 0);

    let out = dir.path().join("pair.json");
    result.graph.write_json(&out).unwrap();
    assert_eq!(NetworkGraph::load_json(&out).unwrap(), result.graph);
}

fn write_scene(dir: &Path, name: &str) {
    let (img, _) = scene();
    img.save(dir.join(name)).unwrap();
}

#[test]
fn batch_isolates_failing_images() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), "a.png");
    fs::write(dir.path().join("b.png"), b"not a png").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let (_, objects) = scene();
    let pipeline = ImagePipeline::new(ScriptedDetector::new(objects), config()).unwrap();
    let results = pipeline
        .process_directory(dir.path(), &mut |_, _, _| {}, &CancelToken::new())
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].0.ends_with("a.png"));
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(PipelineError::Image { .. })));
}

#[test]
fn cancelled_runs_stop_with_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path(), "a.png");
    let (_, objects) = scene();
    let pipeline = ImagePipeline::new(ScriptedDetector::new(objects), config()).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = pipeline
        .process_image(dir.path().join("a.png"), &mut |_, _| {}, &token)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(pipeline.detector().seen.borrow().is_empty());

    assert!(matches!(
        pipeline.process_directory(dir.path(), &mut |_, _, _| {}, &token),
        Err(PipelineError::Cancelled(_))
    ));
}

#[test]
fn info_bar_is_removed_before_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut img = GrayImage::from_pixel(200, 120, Luma([60]));
    for y in 100..120 {
        for x in 0..200 {
            img.put_pixel(x, y, Luma([if x % 7 == 0 { 255 } else { 0 }]));
        }
    }
    let path = dir.path().join("bar.png");
    img.save(&path).unwrap();

    let pipeline = ImagePipeline::new(
        ScriptedDetector::new(Vec::new()),
        PipelineConfig::default(),
    )
    .unwrap();
    assert_eq!(pipeline.load_image(&path).unwrap().dimensions(), (200, 100));
    let result = pipeline
        .process_image(&path, &mut |_, _| {}, &CancelToken::new())
        .unwrap();
    assert_eq!(result.objects.image_size(), (200, 100));
    assert_eq!(result.graph.node_count(), 1);
}
