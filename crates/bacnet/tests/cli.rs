use std::fs;
use std::path::Path;

use assert_cmd::Command;
use image::{GrayImage, Luma};
use predicates::prelude::*;

fn bacnet() -> Command {
    Command::cargo_bin("bacnet").unwrap()
}

fn write_pair(dir: &Path) {
    let mut img = GrayImage::new(300, 100);
    for (x1, y1, x2, y2) in [(10, 30, 50, 70), (200, 30, 240, 70), (51, 50, 199, 51)] {
        for y in y1..=y2 {
            for x in x1..=x2 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
    }
    img.save(dir.join("pair.png")).unwrap();
    fs::write(
        dir.join("pair.txt"),
        "0 0.1 0.5 0.16666667 0.5\n0 0.73333333 0.5 0.16666667 0.5\n1 0.41666667 0.505 0.51333333 0.11\n",
    )
    .unwrap();
    fs::write(dir.join("classes.txt"), "cell\nnanowire\n").unwrap();
    fs::write(dir.join("config.json"), r#"{"strip_info_bar": false}"#).unwrap();
}

#[test]
fn help_lists_subcommands() {
    bacnet()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("labels"))
        .stdout(predicate::str::contains("batch"));
}

#[test]
fn labels_then_edit() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path());
    let graph = dir.path().join("pair.json");

    bacnet()
        .current_dir(dir.path())
        .args([
            "labels",
            "--config",
            "config.json",
            "--image",
            "pair.png",
            "--labels",
            "pair.txt",
            "--classes",
            "classes.txt",
            "-o",
            "pair.json",
        ])
        .assert()
        .success();
    let json = fs::read_to_string(&graph).unwrap();
    assert!(json.contains("cell_to_cell"));

    bacnet()
        .current_dir(dir.path())
        .args([
            "edit",
            "--graph",
            "pair.json",
            "--add-cell",
            "150,90",
            "--subtype",
            "150,90=filament",
        ])
        .assert()
        .success();
    let edited = bacnet::NetworkGraph::load_json(&graph).unwrap();
    assert_eq!(edited.cell_count(), 3);
    assert_eq!(edited.subtype_count(bacnet::CellSubtype::Filament), 1);
}

#[test]
fn detect_without_model_files_fails_early() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path());
    bacnet()
        .current_dir(dir.path())
        .args(["detect", "--image", "pair.png", "-o", "out.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MissingArtifact"));
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn init_config_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("bacnet.json");
    bacnet()
        .args(["init-config", "-o"])
        .arg(&out)
        .assert()
        .success();
    let cfg = bacnet::PipelineConfig::load_json(&out).unwrap();
    assert_eq!(cfg, bacnet::PipelineConfig::default());
}

#[test]
fn malformed_subtype_is_a_usage_error() {
    bacnet()
        .args(["edit", "--graph", "g.json", "--subtype", "1,2=round"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown subtype"));
}
