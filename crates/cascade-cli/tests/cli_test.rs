//! End-to-end runs of the `cascade` binary on the CPU backend.

use cascade_compute::ColorSpace;
use cascade_compute::io::{self, HostImage};
use cascade_core::ImageSize;
use std::path::Path;
use std::process::{Command, Output};

fn cascade(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cascade"))
        .arg("-b")
        .arg("cpu")
        .args(args)
        .output()
        .expect("failed to run cascade")
}

fn write_plate(path: &Path, size: ImageSize) {
    let pixels = [0.5, 0.25, 0.75, 1.0].repeat(size.pixel_count());
    io::write_image(path, &HostImage::new(size, pixels).unwrap(), ColorSpace::Srgb).unwrap();
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_kinds_lists_builtins() {
    let out = cascade(&["kinds"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("blur"));
    assert!(stdout.contains("write"));
}

#[test]
fn test_new_then_render() {
    let dir = tempfile::tempdir().unwrap();
    let plate = dir.path().join("plate.png");
    let project = dir.path().join("comp.json");
    let output = dir.path().join("blurred.png");
    write_plate(&plate, ImageSize::new(5, 3));

    let out = cascade(&["new", arg(&project), "-i", arg(&plate), "-r", "1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = cascade(&["render", arg(&project), "-n", "blur", "-o", arg(&output)]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let image = io::read_image(&output, ColorSpace::Srgb).unwrap();
    assert_eq!(image.size(), ImageSize::new(5, 3));
}

#[test]
fn test_new_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("comp.json");
    std::fs::write(&project, "{}").unwrap();

    let out = cascade(&["new", arg(&project)]);
    assert!(!out.status.success());
    assert_eq!(std::fs::read_to_string(&project).unwrap(), "{}");

    let out = cascade(&["new", arg(&project), "--force"]);
    assert!(out.status.success());
}

#[test]
fn test_export_write_node() {
    let dir = tempfile::tempdir().unwrap();
    let plate = dir.path().join("plate.png");
    let project = dir.path().join("shot.json");
    write_plate(&plate, ImageSize::new(4, 4));

    assert!(cascade(&["new", arg(&project), "-i", arg(&plate)]).status.success());
    let out = cascade(&["export", arg(&project), "-n", "write"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    assert!(dir.path().join("shot_out.png").exists());
}

#[test]
fn test_render_unknown_node_fails() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("comp.json");
    assert!(cascade(&["new", arg(&project)]).status.success());

    let out = cascade(&["render", arg(&project), "-n", "nope", "-o", arg(&dir.path().join("x.png"))]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nope"));
}

#[test]
fn test_info_reports_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("comp.json");
    assert!(cascade(&["new", arg(&project)]).status.success());

    let out = cascade(&["info", arg(&project)]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Nodes:       3"));
    // Read has no files yet.
    assert!(stdout.contains("ready:  no"));
}
