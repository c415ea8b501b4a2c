//! Scheduler, export and facade tests on the CPU reference device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_abs_diff_eq;
use cascade_compute::io::{self, HostImage};
use cascade_compute::{
    Backend, BufferHandle, ColorSpace, CommandList, ComputeError, ComputeResult, CpuDevice, DeviceContext,
    DeviceLimits, DeviceStats,
};
use cascade_core::builtin::{read_props, write_props};
use cascade_core::{GpuImage, GraphError, ImageHandle, ImageSize, InputSlot, NodeId, NodeKindRegistry, PropertyValue};
use cascade_engine::{CancelToken, Engine, EngineConfig, EngineEvent, EvalError, ExportRequest};

// ============================================================================
// Helpers
// ============================================================================

/// CPU device that reports a lost device once its submission budget is spent.
struct FailingDevice {
    inner: CpuDevice,
    remaining: AtomicUsize,
}

impl FailingDevice {
    fn new(submissions: usize) -> Self {
        Self { inner: CpuDevice::new(), remaining: AtomicUsize::new(submissions) }
    }

    fn allow(&self, submissions: usize) {
        self.remaining.store(submissions, Ordering::SeqCst);
    }
}

impl DeviceContext for FailingDevice {
    fn name(&self) -> &str {
        "failing"
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn limits(&self) -> &DeviceLimits {
        self.inner.limits()
    }

    fn allocate_image(&self, size: ImageSize) -> ComputeResult<ImageHandle> {
        self.inner.allocate_image(size)
    }

    fn allocate_param_buffer(&self, len: usize) -> ComputeResult<BufferHandle> {
        self.inner.allocate_param_buffer(len)
    }

    fn submit_and_wait(&self, commands: CommandList<'_>) -> ComputeResult<()> {
        if self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_err() {
            return Err(ComputeError::DeviceLost("simulated reset".into()));
        }
        self.inner.submit_and_wait(commands)
    }

    fn upload(&self, image: &dyn GpuImage, pixels: &[f32]) -> ComputeResult<()> {
        self.inner.upload(image, pixels)
    }

    fn download(&self, image: &dyn GpuImage) -> ComputeResult<Vec<f32>> {
        self.inner.download(image)
    }

    fn stats(&self) -> DeviceStats {
        self.inner.stats()
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        default_size: ImageSize::new(6, 4),
        read_color_space: ColorSpace::Linear,
        write_color_space: ColorSpace::Linear,
        image_pool_mb: 16,
        ..Default::default()
    }
}

fn engine_on(device: Arc<dyn DeviceContext>) -> Engine {
    Engine::with_device(config(), Arc::new(NodeKindRegistry::builtin()), device)
}

fn engine() -> Engine {
    engine_on(Arc::new(CpuDevice::new()))
}

/// Writes a constant-color linear PNG. Channels are in 1/255 steps so they
/// survive 8-bit quantization.
fn write_png(path: &Path, size: ImageSize, level: u8) {
    let v = level as f32 / 255.0;
    let pixels = [v, v, v, 1.0].repeat(size.pixel_count());
    io::write_image(path, &HostImage::new(size, pixels).unwrap(), ColorSpace::Linear).unwrap();
}

fn read_png(path: &Path) -> HostImage {
    io::read_image(path, ColorSpace::Linear).unwrap()
}

fn set_files(engine: &mut Engine, read: NodeId, files: &[PathBuf]) {
    let files = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    engine.set_property(read, read_props::FILES, PropertyValue::Files(files)).unwrap();
}

fn first_pixel(engine: &Engine, node: NodeId) -> [f32; 4] {
    let image = engine.image(node).unwrap();
    let data = engine.device().download(image).unwrap();
    [data[0], data[1], data[2], data[3]]
}

// ============================================================================
// Scenarios
// ============================================================================

/// Read -> Blur -> Write: the Write shows the Blur, two nodes are evaluated.
#[test]
fn test_read_blur_write() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("plate.png");
    write_png(&src, ImageSize::new(5, 3), 128);

    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    let blur = engine.add_node("blur", None).unwrap();
    let write = engine.add_node("write", None).unwrap();
    engine.connect(read, blur, InputSlot::Back.index()).unwrap();
    engine.connect(blur, write, InputSlot::Back.index()).unwrap();
    set_files(&mut engine, read, &[src]);

    let rendered = engine.evaluate(write).unwrap();
    assert_eq!(rendered.requested, write);
    assert_eq!(rendered.node, blur);
    assert_eq!(rendered.evaluated, 2);
    assert_eq!(rendered.size, ImageSize::new(5, 3));
    // One command list for the blur; the read is a load.
    assert_eq!(engine.device().stats().submissions, 1);

    let graph = engine.graph();
    assert!(!graph.is_dirty(read));
    assert!(!graph.is_dirty(blur));
    assert!(graph.is_dirty(write));

    // Blurring a flat image leaves it flat.
    let px = first_pixel(&engine, blur);
    assert_abs_diff_eq!(px[0], 128.0 / 255.0, epsilon = 1e-4);
    assert_abs_diff_eq!(px[3], 1.0, epsilon = 1e-6);
}

/// Merge with nothing on Front shows its Back upstream and is not dispatched.
#[test]
fn test_merge_without_front_shows_back() {
    let mut engine = engine();
    let solid = engine.add_node("solid", None).unwrap();
    let merge = engine.add_node("merge", None).unwrap();
    engine.connect(solid, merge, InputSlot::Back.index()).unwrap();

    let rendered = engine.evaluate(merge).unwrap();
    assert_eq!(rendered.node, solid);
    assert_eq!(rendered.evaluated, 1);
    assert_eq!(engine.device().stats().dispatches, 1);
    assert!(engine.graph().is_dirty(merge));
}

/// Mid-chain, an unmerged node hands its Back image downstream unchanged.
#[test]
fn test_front_disconnected_passes_back_downstream() {
    const SOURCE: [f32; 4] = [0.2, 0.4, 0.6, 1.0];
    for kind in ["merge", "difference", "channel-copy"] {
        let mut engine = engine();
        let solid = engine.add_node("solid", None).unwrap();
        engine.set_property(solid, 0, PropertyValue::Color(SOURCE)).unwrap();
        let middle = engine.add_node(kind, None).unwrap();
        let exposure = engine.add_node("exposure", None).unwrap();
        engine.set_property(exposure, 0, PropertyValue::Float(0.0)).unwrap();
        engine.connect(solid, middle, InputSlot::Back.index()).unwrap();
        engine.connect(middle, exposure, InputSlot::Back.index()).unwrap();

        assert_eq!(engine.evaluate(middle).unwrap().node, solid, "{kind}");
        let rendered = engine.evaluate(exposure).unwrap();
        assert_eq!(rendered.node, exposure);
        assert!(!engine.graph().is_dirty(middle), "{kind}");

        let shown = first_pixel(&engine, middle);
        let downstream = first_pixel(&engine, exposure);
        for ch in 0..4 {
            assert_abs_diff_eq!(shown[ch], SOURCE[ch], epsilon = 1e-6);
            assert_abs_diff_eq!(downstream[ch], SOURCE[ch], epsilon = 1e-6);
        }
    }
}

/// Connecting Front afterwards runs the kind's own program again.
#[test]
fn test_front_connected_after_passthrough_reevaluates() {
    let mut engine = engine();
    let back = engine.add_node("solid", None).unwrap();
    engine.set_property(back, 0, PropertyValue::Color([0.75, 0.5, 0.25, 1.0])).unwrap();
    let front = engine.add_node("solid", None).unwrap();
    engine.set_property(front, 0, PropertyValue::Color([0.25, 0.5, 0.25, 1.0])).unwrap();
    let diff = engine.add_node("difference", None).unwrap();
    engine.connect(back, diff, InputSlot::Back.index()).unwrap();
    let invert = engine.add_node("invert", None).unwrap();
    engine.connect(diff, invert, InputSlot::Back.index()).unwrap();
    engine.evaluate(invert).unwrap();

    engine.connect(front, diff, InputSlot::Front.index()).unwrap();
    engine.evaluate(invert).unwrap();
    let px = first_pixel(&engine, diff);
    assert_abs_diff_eq!(px[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(px[1], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(px[2], 0.0, epsilon = 1e-6);
}

/// Editing the middle of a chain re-evaluates it and everything downstream.
#[test]
fn test_property_edit_reevaluates_downstream_only() {
    let mut engine = engine();
    let a = engine.add_node("solid", None).unwrap();
    let b = engine.add_node("blur", None).unwrap();
    let c = engine.add_node("invert", None).unwrap();
    engine.connect(a, b, 0).unwrap();
    engine.connect(b, c, 0).unwrap();
    assert_eq!(engine.evaluate(c).unwrap().evaluated, 3);
    let image_a = engine.image(a).unwrap().id();
    engine.take_events();

    engine.set_property(b, 0, PropertyValue::Int(2)).unwrap();
    let events = engine.take_events();
    assert!(events.contains(&EngineEvent::NodeDirty(b)));
    assert!(events.contains(&EngineEvent::NodeDirty(c)));
    assert!(!events.contains(&EngineEvent::NodeDirty(a)));
    assert!(engine.image(b).is_none());
    assert!(engine.image(c).is_none());

    let dispatches = engine.device().stats().dispatches;
    let rendered = engine.evaluate(c).unwrap();
    assert_eq!(rendered.evaluated, 2);
    // blur (2 passes) + invert
    assert_eq!(engine.device().stats().dispatches - dispatches, 3);
    assert_eq!(engine.image(a).unwrap().id(), image_a);
}

/// A second evaluation without edits does no device work.
#[test]
fn test_evaluate_is_idempotent() {
    let mut engine = engine();
    let a = engine.add_node("solid", None).unwrap();
    let b = engine.add_node("exposure", None).unwrap();
    engine.connect(a, b, 0).unwrap();

    let first = engine.evaluate(b).unwrap();
    let stats = engine.device().stats();
    let second = engine.evaluate(b).unwrap();
    assert_eq!(second.evaluated, 0);
    assert_eq!(second.image, first.image);
    assert_eq!(engine.device().stats(), stats);
}

#[test]
fn test_unconnected_filter_clears_display() {
    let mut engine = engine();
    let blur = engine.add_node("blur", None).unwrap();
    let err = engine.request_display(blur).unwrap_err();
    assert!(err.is_not_renderable());
    assert!(engine.take_events().contains(&EngineEvent::DisplayCleared(blur)));
    assert_eq!(engine.device().stats().submissions, 0);
}

/// A lost device aborts the pass; finished nodes stay clean and a retry
/// resumes where it stopped.
#[test]
fn test_device_failure_keeps_partial_progress() {
    let device = Arc::new(FailingDevice::new(1));
    let mut engine = engine_on(device.clone());
    let a = engine.add_node("solid", None).unwrap();
    let b = engine.add_node("invert", None).unwrap();
    let c = engine.add_node("exposure", None).unwrap();
    engine.connect(a, b, 0).unwrap();
    engine.connect(b, c, 0).unwrap();

    let err = engine.request_display(c).unwrap_err();
    assert!(matches!(err, EvalError::DeviceFailure(ComputeError::DeviceLost(_))));
    assert!(err.is_fatal());
    assert!(!engine.graph().is_dirty(a));
    assert!(engine.graph().is_dirty(b));
    assert!(engine.graph().is_dirty(c));
    assert!(
        engine
            .take_events()
            .iter()
            .any(|e| matches!(e, EngineEvent::EvaluationFailed { node, fatal: true, .. } if *node == c))
    );

    device.allow(usize::MAX);
    let rendered = engine.request_display(c).unwrap();
    assert_eq!(rendered.evaluated, 2);
}

#[test]
fn test_missing_source_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    set_files(&mut engine, read, &[dir.path().join("missing.png")]);

    let err = engine.evaluate(read).unwrap_err();
    assert!(matches!(err, EvalError::Io { node, .. } if node == read));
    assert!(!err.is_fatal());
}

#[test]
fn test_cycle_rejected() {
    let mut engine = engine();
    let a = engine.add_node("invert", None).unwrap();
    let b = engine.add_node("invert", None).unwrap();
    engine.connect(a, b, 0).unwrap();
    let err = engine.connect(b, a, 0).unwrap_err();
    assert!(matches!(err, EvalError::Graph(GraphError::CycleDetected { .. })));
}

#[test]
fn test_document_round_trip_through_engine() {
    let mut engine = engine();
    let a = engine.add_node("solid", Some("bg")).unwrap();
    let b = engine.add_node("blur", None).unwrap();
    engine.connect(a, b, 0).unwrap();
    engine.set_property(b, 0, PropertyValue::Int(3)).unwrap();
    let json = engine.to_json().unwrap();

    let mut other = engine_on(Arc::new(CpuDevice::new()));
    other.load_json(&json).unwrap();
    assert_eq!(other.graph().len(), 2);
    assert_eq!(other.graph().find_by_name("bg"), Some(a));
    assert_eq!(other.graph().node(b).unwrap().property(0), Some(&PropertyValue::Int(3)));
    assert_eq!(other.evaluate(b).unwrap().evaluated, 2);
}

// ============================================================================
// Export
// ============================================================================

fn write_node(engine: &mut Engine, upstream: NodeId, folder: &Path, filename: &str) -> NodeId {
    let write = engine.add_node("write", None).unwrap();
    engine.connect(upstream, write, 0).unwrap();
    let folder = folder.to_string_lossy().into_owned();
    engine.set_property(write, write_props::FOLDER, PropertyValue::Text(folder)).unwrap();
    engine.set_property(write, write_props::FILENAME, PropertyValue::Text(filename.into())).unwrap();
    write
}

#[test]
fn test_export_write_node() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine();
    let solid = engine.add_node("solid", None).unwrap();
    engine.set_property(solid, 0, PropertyValue::Color([0.2, 0.4, 0.6, 1.0])).unwrap();
    let write = write_node(&mut engine, solid, dir.path(), "comp");

    let report = engine.export(&ExportRequest::new(write), &CancelToken::new()).unwrap();
    assert!(report.is_complete());
    let path = dir.path().join("comp.png");
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.written[0].path, path);

    let saved = read_png(&path);
    assert_eq!(saved.size(), ImageSize::new(6, 4));
    assert_abs_diff_eq!(saved.pixels()[1], 0.4, epsilon = 1.0 / 255.0);
    assert!(engine.take_events().iter().any(|e| matches!(e, EngineEvent::FrameExported { .. })));
}

#[test]
fn test_export_needs_path_for_plain_node() {
    let mut engine = engine();
    let solid = engine.add_node("solid", None).unwrap();
    let err = engine.export(&ExportRequest::new(solid), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EvalError::Export { .. }));
}

#[test]
fn test_batch_export_over_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("src_{i}.png"));
            write_png(&path, ImageSize::new(4, 4), 50 * (i as u8 + 1));
            path
        })
        .collect();

    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    let invert = engine.add_node("invert", None).unwrap();
    engine.connect(read, invert, 0).unwrap();
    set_files(&mut engine, read, &frames);
    let out = dir.path().join("out");
    let write = write_node(&mut engine, invert, &out, "shot");

    let report = engine.export(&ExportRequest::new(write), &CancelToken::new()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.written.len(), 3);
    for (i, frame) in report.written.iter().enumerate() {
        assert_eq!(frame.frame, i);
        assert_eq!(frame.path, out.join(format!("shot_{i:04}.png")));
        let expected = 1.0 - (50.0 * (i as f32 + 1.0)) / 255.0;
        assert_abs_diff_eq!(read_png(&frame.path).pixels()[0], expected, epsilon = 1.0 / 255.0);
    }
    let exported = engine.take_events().iter().filter(|e| matches!(e, EngineEvent::FrameExported { .. })).count();
    assert_eq!(exported, 3);
}

#[test]
fn test_batch_export_continues_after_bad_frame() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.png");
    write_png(&good, ImageSize::new(2, 2), 10);
    let files = vec![good.clone(), dir.path().join("gone.png"), good];

    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    set_files(&mut engine, read, &files);
    let request = ExportRequest::new(read).with_path(dir.path().join("seq.png"));

    let report = engine.export(&request, &CancelToken::new()).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.written.iter().map(|f| f.frame).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].frame, 1);
    assert!(matches!(report.failures[0].error, EvalError::Io { .. }));
}

#[test]
fn test_cancelled_export_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.png");
    write_png(&src, ImageSize::new(2, 2), 100);

    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    set_files(&mut engine, read, &[src.clone(), src]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let request = ExportRequest::new(read).with_path(dir.path().join("out.png"));
    let report = engine.export(&request, &cancel).unwrap();
    assert!(report.cancelled);
    assert!(report.written.is_empty());
    assert!(!dir.path().join("out_0000.png").exists());
}

#[test]
fn test_export_frame_range() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<PathBuf> = (0..4)
        .map(|i| {
            let path = dir.path().join(format!("f{i}.png"));
            write_png(&path, ImageSize::new(2, 2), 20 * i as u8);
            path
        })
        .collect();

    let mut engine = engine();
    let read = engine.add_node("read", None).unwrap();
    set_files(&mut engine, read, &files);
    let request = ExportRequest::new(read).with_path(dir.path().join("r.png")).with_frames(1..3);
    let report = engine.export(&request, &CancelToken::new()).unwrap();
    assert_eq!(report.written.iter().map(|f| f.frame).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(engine.graph().node(read).unwrap().frame(), 2);
}

#[test]
fn test_device_failure_aborts_export() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(FailingDevice::new(0));
    let mut engine = engine_on(device);
    let solid = engine.add_node("solid", None).unwrap();
    let request = ExportRequest::new(solid).with_path(dir.path().join("x.png"));
    let err = engine.export(&request, &CancelToken::new()).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_render_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine();
    let solid = engine.add_node("solid", None).unwrap();
    engine.set_property(solid, 0, PropertyValue::Color([1.0, 0.0, 0.0, 1.0])).unwrap();
    let flip = engine.add_node("flip", None).unwrap();
    engine.connect(solid, flip, 0).unwrap();

    let path = dir.path().join("still.png");
    let rendered = engine.render_to(flip, &path, None).unwrap();
    assert_eq!(rendered.node, flip);
    let saved = read_png(&path);
    assert_eq!(saved.size(), ImageSize::new(6, 4));
    assert_abs_diff_eq!(saved.pixels()[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(saved.pixels()[1], 0.0, epsilon = 1e-6);
}
