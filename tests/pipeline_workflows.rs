//! End-to-end workflows over the extraction and batch pipelines

mod common;

use common::{frame_image, mask_png, write_frames, ScriptedBackend};
use image::Rgba;
use rembg_dispatch::{
    AlphaMaskCompositor, BackendTransform, BatchConfig, BatchInferencePipeline,
    BatchProgressUpdate, CompositeOptions, Compositor, DispatchError, ExtractionConfig,
    FrameExtractionPipeline, InferenceContext, PooledBackend, ProgressReporter, VecSource,
    VideoFrame,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn frames(count: u8) -> Vec<VideoFrame> {
    (0..count)
        .map(|i| {
            let timestamp = Duration::from_millis(u64::from(i) * 40);
            VideoFrame::new(frame_image(i), u64::from(i), timestamp)
        })
        .collect()
}

#[derive(Default)]
struct CollectingReporter {
    updates: Mutex<Vec<BatchProgressUpdate>>,
}

impl ProgressReporter for CollectingReporter {
    fn report_batch_progress(&self, update: BatchProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_extraction_writes_each_index_once() {
    let out = tempfile::tempdir().unwrap();
    let pipeline = FrameExtractionPipeline::new(
        out.path(),
        ExtractionConfig {
            writers: 4,
            ..ExtractionConfig::default()
        },
    );

    let summary = pipeline
        .run(&InferenceContext::background(), VecSource::new(frames(40)))
        .await
        .unwrap();
    assert_eq!(summary.frames_written, 40);

    let names: BTreeSet<String> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let expected: BTreeSet<String> = (0..40).map(|i| format!("frame_{:04}.png", i)).collect();
    assert_eq!(names, expected);

    let frame = image::open(out.path().join("frame_0017.png")).unwrap().to_rgba8();
    assert_eq!(frame.get_pixel(0, 0), &Rgba([17, 10, 20, 255]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_extract_then_batch_over_pool() {
    let frames_dir = tempfile::tempdir().unwrap();
    let cutouts_dir = tempfile::tempdir().unwrap();

    FrameExtractionPipeline::new(frames_dir.path(), ExtractionConfig::default())
        .run(&InferenceContext::background(), VecSource::new(frames(12)))
        .await
        .unwrap();

    let backend = ScriptedBackend::new(mask_png(255)).with_delay(Duration::from_millis(5));
    let pool = Arc::new(PooledBackend::new(backend.clone(), 2).unwrap());
    let reporter = Arc::new(CollectingReporter::default());
    let pipeline = BatchInferencePipeline::new(
        Arc::clone(&pool),
        Arc::new(AlphaMaskCompositor::default()),
        BatchConfig {
            workers: 4,
            ..BatchConfig::default()
        },
    );

    let report = pipeline
        .run_with_progress(
            &InferenceContext::background(),
            frames_dir.path(),
            cutouts_dir.path(),
            Some(reporter.clone()),
        )
        .await
        .unwrap();
    pool.shutdown().await;

    assert_eq!(report.processed.len(), 12);
    assert!(report.is_complete());
    assert_eq!(backend.calls(), 12);
    assert!(backend.peak_concurrency() <= 2);

    let updates = reporter.updates.lock().unwrap();
    assert_eq!(updates.len(), 12);
    assert!(updates.iter().all(|u| u.items_total == 12));
    assert_eq!(updates.iter().map(BatchProgressUpdate::items_done).max(), Some(12));
    assert!(cutouts_dir.path().join("frame_0011.png").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_isolates_failures() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources = write_frames(input.path(), 8);
    std::fs::write(input.path().join("frame_0100.png"), b"not an image").unwrap();

    let backend = ScriptedBackend::new(mask_png(0)).poison(&sources[5]);
    let pipeline = BatchInferencePipeline::new(
        Arc::new(backend.clone()),
        Arc::new(AlphaMaskCompositor::default()),
        BatchConfig {
            workers: 3,
            ..BatchConfig::default()
        },
    );
    let report = pipeline
        .run(&InferenceContext::background(), input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(report.total(), 9);
    assert_eq!(report.processed.len(), 7);
    let failed: BTreeSet<String> = report
        .failures
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let expected: BTreeSet<String> = ["frame_0005.png", "frame_0100.png"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    assert_eq!(failed, expected);
    // The unreadable file never costs an inference call.
    assert_eq!(backend.calls(), 8);

    let cutout = image::open(output.path().join("frame_0003.png")).unwrap().to_rgba8();
    assert_eq!(cutout.get_pixel(0, 0)[3], 0);
}

#[tokio::test]
async fn test_batch_requires_matching_inputs() {
    let input = tempfile::tempdir().unwrap();
    std::fs::write(input.path().join("clip.mp4"), b"x").unwrap();

    let pipeline = BatchInferencePipeline::new(
        Arc::new(ScriptedBackend::new(mask_png(255))),
        Arc::new(AlphaMaskCompositor::default()),
        BatchConfig::default(),
    );
    let err = pipeline
        .run(&InferenceContext::background(), input.path(), input.path())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoInputs(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_extraction_with_background_removal() {
    let out = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(mask_png(255));
    let compositor: Arc<dyn Compositor> = Arc::new(AlphaMaskCompositor::new(CompositeOptions {
        only_mask: true,
        background_color: None,
    }));
    let transform = BackendTransform::new(Arc::new(backend.clone()), compositor).unwrap();

    let summary = FrameExtractionPipeline::new(out.path(), ExtractionConfig::default())
        .with_transform(Arc::new(transform))
        .run(&InferenceContext::background(), VecSource::new(frames(5)))
        .await
        .unwrap();

    assert_eq!(summary.frames_written, 5);
    assert_eq!(backend.calls(), 5);
    let mask = image::open(out.path().join("frame_0004.png")).unwrap().to_rgba8();
    assert_eq!(mask.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_transform_aborts_extraction() {
    let out = tempfile::tempdir().unwrap();
    let poisoned = common::png_bytes(&image::DynamicImage::ImageRgba8(frame_image(3)));
    let backend = ScriptedBackend::new(mask_png(255)).poison(&poisoned);
    let transform =
        BackendTransform::new(Arc::new(backend), Arc::new(AlphaMaskCompositor::default())).unwrap();

    let err = FrameExtractionPipeline::new(out.path(), ExtractionConfig::default())
        .with_transform(Arc::new(transform))
        .run(&InferenceContext::background(), VecSource::new(frames(10)))
        .await
        .unwrap_err();

    match err {
        DispatchError::Stream { index, source } => {
            assert_eq!(index, 3);
            assert!(matches!(*source, DispatchError::Backend(_)));
        },
        other => panic!("unexpected error: {}", other),
    }
}
