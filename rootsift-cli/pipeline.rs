//! Batch orchestration: skip check, keypoint preload, and the parallel per-image pipeline.

use std::time::Instant;

use rayon::prelude::*;
use rootsift_core::{
    BatchConfig, CancelToken, DegeneratePolicy, DescriptorExtractor, DescriptorSet, DescriptorWriter,
    ImageSource, ImageTask, Keypoint, KeypointStore, TaskError, TaskResult, build_worker_pool,
};
use rootsift_io::{FsImageSource, MatrixDescriptorWriter, MatrixKeypointStore};
use rootsift_normalize::{describe, to_grayscale};
use tracing::{debug, info, warn};

use crate::PipelineError;
use crate::report::{BatchReport, TaskOutcome, TaskReport};

/// Computes and persists rootSIFT descriptors for a batch of images.
///
/// Owns its worker pool; tasks share nothing but the read-only keypoint table.
pub struct DescriptorPipeline {
    pool: rayon::ThreadPool,
    extractor: Box<dyn DescriptorExtractor>,
    images: Box<dyn ImageSource>,
    keypoints: Box<dyn KeypointStore>,
    writer: Box<dyn DescriptorWriter>,
    config: BatchConfig,
    cancel: CancelToken,
}

impl DescriptorPipeline {
    pub fn builder<E: DescriptorExtractor + 'static>(extractor: E) -> PipelineBuilder {
        PipelineBuilder::new(extractor)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Token that cancels tasks of this pipeline that have not written yet
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every task; per-image failures are recorded, never propagated
    pub fn run(&self, tasks: &[ImageTask]) -> BatchReport {
        let total = tasks.len();
        let started = Instant::now();
        info!(
            "Starting descriptor batch: {} images, {} threads, extractor={}",
            total,
            self.threads(),
            self.extractor.name()
        );

        let mut reports = Vec::with_capacity(total);
        let mut pending = Vec::with_capacity(total);
        for (index, task) in tasks.iter().enumerate() {
            if self.config.skip_existing && task.is_done() {
                info!("[{}/{}] {} skipped, descriptors exist", index + 1, total, task.name);
                reports.push(TaskReport {
                    index,
                    image: task.name.clone(),
                    outcome: TaskOutcome::Skipped,
                    elapsed: Default::default(),
                });
            } else {
                pending.push(index);
            }
        }

        let (table, load_failures) = self.preload_keypoints(tasks, &pending);
        for (index, err) in load_failures {
            reports.push(self.finish(index, total, &tasks[index], Instant::now(), Err(err)));
        }

        let processed: Vec<TaskReport> = self.pool.install(|| {
            table
                .par_iter()
                .map(|(index, keypoints)| self.run_task(*index, total, &tasks[*index], keypoints))
                .collect()
        });
        reports.extend(processed);
        reports.sort_by_key(|r| r.index);

        let report = BatchReport { tasks: reports, elapsed: started.elapsed() };
        if report.is_success() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        report
    }

    /// Load keypoints of every pending task up front. Returns the table of loaded
    /// sequences and the tasks whose keypoints could not be read.
    fn preload_keypoints(
        &self,
        tasks: &[ImageTask],
        pending: &[usize],
    ) -> (Vec<(usize, Vec<Keypoint>)>, Vec<(usize, TaskError)>) {
        let loaded: Vec<(usize, TaskResult<Vec<Keypoint>>)> = self.pool.install(|| {
            pending
                .par_iter()
                .map(|&index| (index, self.keypoints.load(&tasks[index].keypoint_path)))
                .collect()
        });

        let mut table = Vec::with_capacity(loaded.len());
        let mut failures = Vec::new();
        for (index, result) in loaded {
            match result {
                Ok(keypoints) => table.push((index, keypoints)),
                Err(err) => failures.push((index, err)),
            }
        }
        debug!("Preloaded keypoints for {} images", table.len());
        (table, failures)
    }

    fn run_task(&self, index: usize, total: usize, task: &ImageTask, keypoints: &[Keypoint]) -> TaskReport {
        let start = Instant::now();
        let result = if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            info!("[{}/{}] {} started, {} keypoints", index + 1, total, task.name, keypoints.len());
            self.process(task, keypoints)
        };
        self.finish(index, total, task, start, result)
    }

    /// decode → grayscale → extract → normalize → validate → write
    fn process(&self, task: &ImageTask, keypoints: &[Keypoint]) -> TaskResult<usize> {
        let set = if keypoints.is_empty() {
            DescriptorSet::empty()
        } else {
            let gray = {
                let image = self.images.load(&task.image_path)?;
                to_grayscale(&image).map_err(|e| TaskError::Decode {
                    path: task.image_path.clone(),
                    source: Box::new(e),
                })?
            };
            describe(&gray, keypoints, self.extractor.as_ref(), self.config.degenerate)?
        };

        if self.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        self.writer.write(&task.descriptor_path, &set)?;
        Ok(set.len())
    }

    fn finish(
        &self,
        index: usize,
        total: usize,
        task: &ImageTask,
        start: Instant,
        result: TaskResult<usize>,
    ) -> TaskReport {
        let elapsed = start.elapsed();
        let outcome = TaskOutcome::from(result);
        match &outcome {
            TaskOutcome::Completed { descriptors } => info!(
                "[{}/{}] {} completed in {:.2?}, {} descriptors",
                index + 1,
                total,
                task.name,
                elapsed,
                descriptors
            ),
            TaskOutcome::Failed(err) => warn!(
                "[{}/{}] {} failed after {:.2?}: {}",
                index + 1,
                total,
                task.name,
                elapsed,
                err.chain()
            ),
            TaskOutcome::Cancelled => info!("[{}/{}] {} cancelled", index + 1, total, task.name),
            TaskOutcome::Skipped => {}
        }
        TaskReport { index, image: task.name.clone(), outcome, elapsed }
    }
}

/// Fluent API builder for [`DescriptorPipeline`]
pub struct PipelineBuilder {
    extractor: Box<dyn DescriptorExtractor>,
    images: Box<dyn ImageSource>,
    keypoints: Box<dyn KeypointStore>,
    writer: Box<dyn DescriptorWriter>,
    config: BatchConfig,
    cancel: CancelToken,
}

impl PipelineBuilder {
    /// Create a builder with on-disk collaborators and default settings
    pub fn new<E: DescriptorExtractor + 'static>(extractor: E) -> Self {
        Self {
            extractor: Box::new(extractor),
            images: Box::new(FsImageSource),
            keypoints: Box::new(MatrixKeypointStore),
            writer: Box::new(MatrixDescriptorWriter),
            config: BatchConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Create a builder from an existing `BatchConfig`
    pub fn from_config<E: DescriptorExtractor + 'static>(extractor: E, config: BatchConfig) -> Self {
        Self { config, ..Self::new(extractor) }
    }

    pub fn image_source<S: ImageSource + 'static>(mut self, source: S) -> Self {
        self.images = Box::new(source);
        self
    }

    pub fn keypoint_store<S: KeypointStore + 'static>(mut self, store: S) -> Self {
        self.keypoints = Box::new(store);
        self
    }

    pub fn writer<W: DescriptorWriter + 'static>(mut self, writer: W) -> Self {
        self.writer = Box::new(writer);
        self
    }

    /// Set number of worker threads, `0` for one per logical CPU
    pub fn threads(mut self, n_threads: usize) -> Self {
        self.config.n_threads = n_threads;
        self
    }

    pub fn degenerate(mut self, policy: DegeneratePolicy) -> Self {
        self.config.degenerate = policy;
        self
    }

    /// Enable/disable skipping images whose artifacts already exist
    pub fn skip_existing(mut self, enable: bool) -> Self {
        self.config.skip_existing = enable;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn summary(&self) -> String {
        format!("{}, extractor={}", self.config.summary(), self.extractor.name())
    }

    /// Validate the configuration and build the worker pool
    pub fn build(self) -> Result<DescriptorPipeline, PipelineError> {
        self.config.validate()?;
        let pool = build_worker_pool(self.config.n_threads)?;
        Ok(DescriptorPipeline {
            pool,
            extractor: self.extractor,
            images: self.images,
            keypoints: self.keypoints,
            writer: self.writer,
            config: self.config,
            cancel: self.cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use rootsift_core::{DESCRIPTOR_DIM, ExtractorError, FloatImage, RawDescriptor, Samples, SourceImage};
    use rootsift_io::{DatasetLayout, keypoints_to_matrix, read_matrix, write_matrix_atomic};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn spike(entries: &[(usize, f32)]) -> RawDescriptor {
        let mut d = [0.0f32; DESCRIPTOR_DIM];
        for &(i, v) in entries {
            d[i] = v;
        }
        d
    }

    /// Returns fixed descriptors and counts its invocations
    #[derive(Clone)]
    struct StubExtractor {
        output: Vec<RawDescriptor>,
        calls: Arc<AtomicUsize>,
    }

    impl StubExtractor {
        fn new(output: Vec<RawDescriptor>) -> Self {
            Self { output, calls: Arc::new(AtomicUsize::new(0)) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DescriptorExtractor for StubExtractor {
        fn extract(&self, _image: &FloatImage, _keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    /// One spike per keypoint at `round(x)`, so output order is observable
    struct PositionExtractor;

    impl DescriptorExtractor for PositionExtractor {
        fn extract(&self, _image: &FloatImage, keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
            Ok(keypoints.iter().map(|kp| spike(&[(kp.x.round() as usize, 1.0)])).collect())
        }
    }

    /// Records the image size handed to the extractor
    struct ShapeProbe(Arc<Mutex<Vec<(usize, usize)>>>);

    impl DescriptorExtractor for ShapeProbe {
        fn extract(&self, image: &FloatImage, keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
            self.0.lock().unwrap().push((image.width, image.height));
            Ok(vec![spike(&[(0, 1.0)]); keypoints.len()])
        }
    }

    struct FailingExtractor;

    impl DescriptorExtractor for FailingExtractor {
        fn extract(&self, _image: &FloatImage, _keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
            Err(ExtractorError::failed("kernel crashed"))
        }
    }

    struct Dataset {
        _dir: tempfile::TempDir,
        layout: DatasetLayout,
    }

    impl Dataset {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = DatasetLayout::new(dir.path());
            std::fs::create_dir_all(layout.images_path()).unwrap();
            Self { _dir: dir, layout }
        }

        fn add_image(&self, name: &str, keypoints: &[Keypoint]) -> ImageTask {
            GrayImage::from_pixel(16, 12, Luma([128]))
                .save(self.layout.images_path().join(name))
                .unwrap();
            write_matrix_atomic(self.layout.keypoint_path(name), &keypoints_to_matrix(keypoints).unwrap()).unwrap();
            self.layout.task(name)
        }
    }

    fn keypoints_at(xs: &[f32]) -> Vec<Keypoint> {
        xs.iter().map(|&x| Keypoint::new(x, 2.0, 1.6, 0.0)).collect()
    }

    fn pipeline<E: DescriptorExtractor + 'static>(extractor: E) -> DescriptorPipeline {
        PipelineBuilder::new(extractor).threads(2).build().unwrap()
    }

    fn squared_norm(row: &[f32]) -> f64 {
        row.iter().map(|&x| (x as f64) * (x as f64)).sum()
    }

    #[test]
    fn test_three_keypoint_scenario() {
        let data = Dataset::new();
        let task = data.add_image("scene.png", &keypoints_at(&[1.0, 2.0, 3.0]));
        let stub = StubExtractor::new(vec![
            spike(&[(0, 1.0)]),
            spike(&[(1, 2.0)]),
            spike(&[(0, 1.0), (1, 1.0)]),
        ]);

        let report = pipeline(stub.clone()).run(std::slice::from_ref(&task));
        assert_eq!(report.completed(), 1);
        assert_eq!(stub.calls(), 1);

        let m = read_matrix(&task.descriptor_path).unwrap();
        assert_eq!(m.shape(), (3, DESCRIPTOR_DIM));
        for row in m.iter_rows() {
            assert!((squared_norm(row) - 1.0).abs() < 1e-6);
        }
        assert_eq!(m.row(0)[0], 1.0);
        assert_eq!(m.row(1)[1], 1.0);
        assert!((m.row(2)[0] - 0.5f32.sqrt()).abs() < 1e-6);
        assert!((m.row(2)[1] - 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let data = Dataset::new();
        let tasks: Vec<ImageTask> = (0..4)
            .map(|i| data.add_image(&format!("{i}.png"), &keypoints_at(&[i as f32, 10.0 + i as f32])))
            .collect();
        let pipeline = pipeline(PositionExtractor);

        let first = pipeline.run(&tasks);
        assert_eq!(first.completed(), 4);
        let bytes: Vec<Vec<u8>> = tasks.iter().map(|t| std::fs::read(&t.descriptor_path).unwrap()).collect();

        let stub = StubExtractor::new(Vec::new());
        let second = PipelineBuilder::new(stub.clone()).threads(2).build().unwrap().run(&tasks);
        assert_eq!(second.skipped(), 4);
        assert_eq!(stub.calls(), 0);
        for (task, before) in tasks.iter().zip(bytes) {
            assert_eq!(std::fs::read(&task.descriptor_path).unwrap(), before);
        }
    }

    #[test]
    fn test_force_recomputes_existing() {
        let data = Dataset::new();
        let task = data.add_image("a.png", &keypoints_at(&[4.0]));
        pipeline(PositionExtractor).run(std::slice::from_ref(&task));

        let stub = StubExtractor::new(vec![spike(&[(9, 3.0)])]);
        let report = PipelineBuilder::new(stub.clone())
            .skip_existing(false)
            .threads(1)
            .build()
            .unwrap()
            .run(std::slice::from_ref(&task));
        assert_eq!(report.completed(), 1);
        assert_eq!(stub.calls(), 1);
        assert_eq!(read_matrix(&task.descriptor_path).unwrap().row(0)[9], 1.0);
    }

    #[test]
    fn test_order_preserved() {
        let data = Dataset::new();
        let xs = [7.0, 3.0, 100.0, 0.0, 42.0];
        let task = data.add_image("order.png", &keypoints_at(&xs));
        pipeline(PositionExtractor).run(std::slice::from_ref(&task));

        let m = read_matrix(&task.descriptor_path).unwrap();
        assert_eq!(m.rows(), xs.len());
        for (row, x) in m.iter_rows().zip(xs) {
            assert_eq!(row[x as usize], 1.0);
        }
    }

    #[test]
    fn test_empty_keypoints_never_call_extractor() {
        let data = Dataset::new();
        let task = data.add_image("blank.png", &[]);
        std::fs::write(&task.image_path, b"not decodable").unwrap();
        let stub = StubExtractor::new(vec![spike(&[(0, 1.0)])]);

        let report = pipeline(stub.clone()).run(std::slice::from_ref(&task));
        assert_eq!(report.completed(), 1);
        assert_eq!(stub.calls(), 0);
        assert_eq!(read_matrix(&task.descriptor_path).unwrap().shape(), (0, DESCRIPTOR_DIM));
    }

    #[test]
    fn test_count_mismatch_writes_nothing() {
        let data = Dataset::new();
        let task = data.add_image("short.png", &keypoints_at(&[1.0, 2.0, 3.0]));
        let stub = StubExtractor::new(vec![spike(&[(0, 1.0)]); 2]);

        let report = pipeline(stub).run(std::slice::from_ref(&task));
        assert_eq!(report.failed(), 1);
        let (_, err) = report.failures().next().unwrap();
        assert!(matches!(err, TaskError::CountMismatch { keypoints: 3, descriptors: 2 }));
        assert!(!task.descriptor_path.exists());
    }

    #[test]
    fn test_degenerate_descriptor_policies() {
        let data = Dataset::new();
        let task = data.add_image("flat.png", &keypoints_at(&[1.0, 2.0]));
        let raw = vec![spike(&[(3, 2.0)]), [0.0; DESCRIPTOR_DIM]];

        let rejected = PipelineBuilder::new(StubExtractor::new(raw.clone()))
            .degenerate(DegeneratePolicy::Reject)
            .build()
            .unwrap()
            .run(std::slice::from_ref(&task));
        assert!(matches!(
            rejected.failures().next().map(|(_, e)| e),
            Some(TaskError::DegenerateDescriptor { index: 1 })
        ));
        assert!(!task.descriptor_path.exists());

        let filled = pipeline(StubExtractor::new(raw)).run(std::slice::from_ref(&task));
        assert_eq!(filled.completed(), 1);
        let m = read_matrix(&task.descriptor_path).unwrap();
        assert!(m.as_slice().iter().all(|v| v.is_finite()));
        assert!(m.row(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_failures_do_not_stop_siblings() {
        let data = Dataset::new();
        let good = data.add_image("good.png", &keypoints_at(&[1.0]));
        let broken = data.add_image("broken.png", &keypoints_at(&[1.0]));
        std::fs::write(&broken.image_path, b"garbage").unwrap();
        let missing = data.layout.task("missing.png");

        let report = pipeline(PositionExtractor).run(&[good.clone(), broken.clone(), missing]);
        let outcomes: Vec<_> = report.tasks.iter().map(|t| (t.index, t.outcome.label())).collect();
        assert_eq!(outcomes, vec![(0, "completed"), (1, "failed"), (2, "failed")]);

        let kinds: Vec<_> = report.failures().map(|(_, e)| e.kind()).collect();
        assert_eq!(kinds, vec!["decode", "io"]);
        assert!(good.descriptor_path.exists());
        assert!(!broken.descriptor_path.exists());
    }

    #[test]
    fn test_extractor_error_is_reported() {
        let data = Dataset::new();
        let task = data.add_image("a.png", &keypoints_at(&[1.0]));
        let report = pipeline(FailingExtractor).run(std::slice::from_ref(&task));
        let (_, err) = report.failures().next().unwrap();
        assert_eq!(err.chain(), "descriptor extraction: extractor failed: kernel crashed");
    }

    #[test]
    fn test_color_image_reaches_extractor_as_gray() {
        let data = Dataset::new();
        let task = data.add_image("color.png", &keypoints_at(&[1.0]));
        RgbImage::from_pixel(9, 5, Rgb([10, 200, 30])).save(&task.image_path).unwrap();
        let sizes = Arc::new(Mutex::new(Vec::new()));

        let report = pipeline(ShapeProbe(sizes.clone())).run(std::slice::from_ref(&task));
        assert_eq!(report.completed(), 1);
        assert_eq!(*sizes.lock().unwrap(), vec![(9, 5)]);
    }

    #[test]
    fn test_cancelled_batch_writes_nothing() {
        let data = Dataset::new();
        let tasks: Vec<ImageTask> = (0..3)
            .map(|i| data.add_image(&format!("{i}.png"), &keypoints_at(&[1.0])))
            .collect();
        let token = CancelToken::new();
        let pipeline = PipelineBuilder::new(PositionExtractor)
            .cancel_token(token.clone())
            .build()
            .unwrap();
        token.cancel();

        let report = pipeline.run(&tasks);
        assert_eq!(report.cancelled(), 3);
        assert!(!report.is_success());
        assert!(tasks.iter().all(|t| !Path::new(&t.descriptor_path).exists()));
    }

    fn header(rows: i32, cols: i32) -> Vec<u8> {
        let mut bytes = rows.to_le_bytes().to_vec();
        bytes.extend_from_slice(&cols.to_le_bytes());
        bytes
    }

    #[test]
    fn test_corrupt_keypoint_artifacts_fail_alone() {
        let data = Dataset::new();
        let good = data.add_image("good.png", &keypoints_at(&[3.0]));
        let huge = data.add_image("huge.png", &keypoints_at(&[3.0]));
        std::fs::write(&huge.keypoint_path, header(i32::MAX, i32::MAX)).unwrap();
        let short = data.add_image("short.png", &keypoints_at(&[3.0]));
        let mut bytes = header(2, 4);
        bytes.extend_from_slice(&[0u8; 4]);
        std::fs::write(&short.keypoint_path, bytes).unwrap();

        let report = pipeline(PositionExtractor).run(&[good.clone(), huge.clone(), short.clone()]);
        let outcomes: Vec<_> = report.tasks.iter().map(|t| (t.index, t.outcome.label())).collect();
        assert_eq!(outcomes, vec![(0, "completed"), (1, "failed"), (2, "failed")]);
        let kinds: Vec<_> = report.failures().map(|(_, e)| e.kind()).collect();
        assert_eq!(kinds, vec!["malformed", "malformed"]);
        assert_eq!(read_matrix(&good.descriptor_path).unwrap().shape(), (1, DESCRIPTOR_DIM));
        assert!(!huge.descriptor_path.exists());
        assert!(!short.descriptor_path.exists());
    }

    /// Serves a two-channel color buffer for `bad.png`, decodes everything else from disk
    struct TwoChannelSource;

    impl ImageSource for TwoChannelSource {
        fn load(&self, path: &Path) -> TaskResult<SourceImage> {
            if path.ends_with("bad.png") {
                return Ok(SourceImage::Color {
                    width: 1,
                    height: 1,
                    channels: 2,
                    samples: Samples::U8(vec![1, 2]),
                });
            }
            FsImageSource.load(path)
        }
    }

    #[test]
    fn test_inconsistent_image_layout_fails_alone() {
        let data = Dataset::new();
        let bad = data.add_image("bad.png", &keypoints_at(&[1.0]));
        let good = data.add_image("good.png", &keypoints_at(&[1.0]));

        let report = PipelineBuilder::new(PositionExtractor)
            .image_source(TwoChannelSource)
            .threads(2)
            .build()
            .unwrap()
            .run(&[bad.clone(), good.clone()]);
        assert_eq!(report.completed(), 1);
        let (task, err) = report.failures().next().unwrap();
        assert_eq!(task.image, "bad.png");
        assert_eq!(err.kind(), "decode");
        assert!(!bad.descriptor_path.exists());
        assert!(good.descriptor_path.exists());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = PipelineBuilder::new(PositionExtractor).threads(1_000_000).build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
