use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cache::encoding_cache::{CacheError, CacheStats, EncodingCache, ExtractionResult};
use crate::detection::domain::embedding_extractor::{EmbeddingExtractor, ExtractionError};
use crate::media::domain::image_decoder::{ImageDecodeError, ImageDecoder};
use crate::media::domain::image_source::ImageSource;
use crate::media::infrastructure::area_scanner::{scan_dataset, scan_known_people};
use crate::media::infrastructure::image_file_decoder::ImageFileDecoder;
use crate::output::classification_result::ClassificationResult;
use crate::output::output_organizer::{OutputError, OutputOrganizer};
use crate::recognition::dataset_record::DatasetRecord;
use crate::recognition::identity_registry::{EmptyIdentity, IdentityRegistry, ReferenceEmbeddings};
use crate::recognition::matcher::Matcher;
use crate::shared::fingerprint::Fingerprint;
use crate::shared::image_id::ImageId;

use super::batch_executor::BatchExecutor;
use super::engine_config::EngineConfig;
use super::infrastructure::threaded_batch_executor::ThreadedBatchExecutor;
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a classification run or reset is already in progress")]
    ConcurrentRunRejected,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("face extractor unavailable: {0}")]
    ExtractorUnavailable(String),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("classification job ended without reporting a result")]
    JobLost,
}

/// Where a run currently is. Returns to `Idle` after every run, successful
/// or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStage {
    Idle,
    BuildingRegistry,
    ExtractingDataset,
    Matching,
    WritingOutput,
}

impl EngineStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BuildingRegistry => "registry",
            Self::ExtractingDataset => "dataset",
            Self::Matching => "matching",
            Self::WritingOutput => "output",
        }
    }
}

/// Outcome of the most recent job.
#[derive(Clone, Debug)]
pub enum JobState {
    Idle,
    Running,
    Completed(Arc<ClassificationReport>),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputArea {
    KnownPeople,
    Dataset,
}

/// An image excluded from a run, with the reason.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedImage {
    pub area: InputArea,
    pub image: ImageId,
    pub reason: String,
}

/// Everything a run produced: the grouping plus what was left out of it.
#[derive(Clone, Debug)]
pub struct ClassificationReport {
    pub result: ClassificationResult,
    pub identities: Vec<String>,
    pub empty_identities: Vec<EmptyIdentity>,
    pub dataset_images: usize,
    /// Dataset images in which no face was detected.
    pub undetected: Vec<ImageId>,
    pub skipped: Vec<SkippedImage>,
    /// Extractions actually run this time.
    pub embeddings_computed: usize,
    /// Extractions served from the cache or a concurrent identical request.
    pub cache_hits: usize,
    pub elapsed: Duration,
}

/// Completion signal for a classification started with
/// [`ClassificationEngine::spawn_classify`].
pub struct JobHandle {
    done: crossbeam_channel::Receiver<Result<Arc<ClassificationReport>, EngineError>>,
}

impl JobHandle {
    /// Blocks until the job finishes.
    pub fn wait(self) -> Result<Arc<ClassificationReport>, EngineError> {
        self.done.recv().unwrap_or(Err(EngineError::JobLost))
    }
}

/// Batch job that sorts dataset images into per-identity groups.
///
/// Stages: `Idle → BuildingRegistry → ExtractingDataset → Matching →
/// WritingOutput → Idle`. A single run slot makes classification and reset
/// mutually exclusive and non-reentrant; a busy slot is rejected, never
/// queued.
pub struct ClassificationEngine {
    config: EngineConfig,
    extractor: Arc<dyn EmbeddingExtractor>,
    decoder: Arc<dyn ImageDecoder>,
    executor: Box<dyn BatchExecutor>,
    cache: Arc<EncodingCache>,
    output: OutputOrganizer,
    matcher: Matcher,
    running: AtomicBool,
    stage: Mutex<EngineStage>,
    job: Mutex<JobState>,
    registry: Mutex<Option<Arc<IdentityRegistry>>>,
    logger: Mutex<Box<dyn PipelineLogger>>,
}

impl ClassificationEngine {
    pub fn new(
        config: EngineConfig,
        extractor: Arc<dyn EmbeddingExtractor>,
        cache: Arc<EncodingCache>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self {
            executor: Box::new(ThreadedBatchExecutor::new(config.worker_count())),
            output: OutputOrganizer::new(config.output_dir.clone()),
            matcher: Matcher::new(config.threshold),
            config,
            extractor,
            decoder: Arc::new(ImageFileDecoder::new()),
            cache,
            running: AtomicBool::new(false),
            stage: Mutex::new(EngineStage::Idle),
            job: Mutex::new(JobState::Idle),
            registry: Mutex::new(None),
            logger: Mutex::new(Box::new(NullPipelineLogger)),
        })
    }

    pub fn with_executor(mut self, executor: Box<dyn BatchExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = Mutex::new(logger);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stage(&self) -> EngineStage {
        *lock(&self.stage)
    }

    pub fn job_state(&self) -> JobState {
        lock(&self.job).clone()
    }

    /// Registry built by the most recent run, if any.
    pub fn registry(&self) -> Option<Arc<IdentityRegistry>> {
        lock(&self.registry).clone()
    }

    /// Runs a full classification on the calling thread.
    pub fn classify(&self) -> Result<Arc<ClassificationReport>, EngineError> {
        let _slot = self.acquire_run_slot()?;
        self.run_acquired()
    }

    /// Starts a classification on a background thread.
    ///
    /// A busy engine is rejected here, before any thread is spawned.
    pub fn spawn_classify(self: &Arc<Self>) -> Result<JobHandle, EngineError> {
        self.try_claim()?;
        *lock(&self.job) = JobState::Running;

        let engine = Arc::clone(self);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let _slot = RunSlot(&engine.running);
            let result = engine.run_acquired();
            let _ = done_tx.send(result);
        });
        Ok(JobHandle { done: done_rx })
    }

    /// Grouping currently materialized on disk.
    pub fn get_results(&self) -> Result<ClassificationResult, EngineError> {
        Ok(self.output.read()?)
    }

    /// Clears the registry, the encoding cache and the output grouping.
    ///
    /// Only valid while idle; staged inputs are left alone.
    pub fn reset(&self) -> Result<(), EngineError> {
        let _slot = self.acquire_run_slot()?;
        *lock(&self.registry) = None;
        self.cache.invalidate_all()?;
        self.output.clear()?;
        *lock(&self.job) = JobState::Idle;
        self.logger().info("Reset: cleared registry, encoding cache and output");
        Ok(())
    }

    fn try_claim(&self) -> Result<(), EngineError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| EngineError::ConcurrentRunRejected)
    }

    fn acquire_run_slot(&self) -> Result<RunSlot<'_>, EngineError> {
        self.try_claim()?;
        Ok(RunSlot(&self.running))
    }

    fn run_acquired(&self) -> Result<Arc<ClassificationReport>, EngineError> {
        *lock(&self.job) = JobState::Running;
        let result = self.run_stages();
        self.set_stage(EngineStage::Idle);

        let mut logger = self.logger();
        *lock(&self.job) = match &result {
            Ok(report) => {
                logger.summary();
                JobState::Completed(Arc::clone(report))
            }
            Err(e) => {
                logger.warn(&format!("Classification failed: {e}"));
                JobState::Failed(e.to_string())
            }
        };
        result
    }

    fn run_stages(&self) -> Result<Arc<ClassificationReport>, EngineError> {
        let started = Instant::now();
        let stats_before = self.cache.stats();
        let mut skipped = Vec::new();

        // Registry
        let stage_start = self.set_stage(EngineStage::BuildingRegistry);
        let people_dir = &self.config.people_dir;
        let references = scan_known_people(people_dir).map_err(|source| EngineError::Scan {
            path: people_dir.clone(),
            source,
        })?;
        let sources: Vec<ImageSource> = references.iter().map(|r| r.source.clone()).collect();
        let outcomes = self.extract_batch(EngineStage::BuildingRegistry, &sources);
        ensure_extractor_available(&outcomes)?;

        let mut reference_embeddings = Vec::with_capacity(references.len());
        for (reference, outcome) in references.into_iter().zip(outcomes) {
            let embeddings = match outcome {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    skipped.push(self.skip(InputArea::KnownPeople, &reference.source.id, &e));
                    Vec::new()
                }
            };
            reference_embeddings.push(ReferenceEmbeddings {
                label: reference.label,
                embeddings,
            });
        }
        let (registry, empty_identities) = IdentityRegistry::build(reference_embeddings);
        let registry = Arc::new(registry);
        *lock(&self.registry) = Some(Arc::clone(&registry));
        {
            let mut logger = self.logger();
            for empty in &empty_identities {
                logger.warn(&format!("Excluded identity: {empty}"));
            }
            logger.metric("identities", registry.len() as f64);
            logger.metric("reference_embeddings", registry.embedding_count() as f64);
            logger.timing(EngineStage::BuildingRegistry.name(), elapsed_ms(stage_start));
        }

        // Dataset
        let stage_start = self.set_stage(EngineStage::ExtractingDataset);
        let dataset_dir = &self.config.dataset_dir;
        let dataset = scan_dataset(dataset_dir).map_err(|source| EngineError::Scan {
            path: dataset_dir.clone(),
            source,
        })?;
        let outcomes = self.extract_batch(EngineStage::ExtractingDataset, &dataset);
        ensure_extractor_available(&outcomes)?;
        self.logger()
            .timing(EngineStage::ExtractingDataset.name(), elapsed_ms(stage_start));

        // Matching
        let stage_start = self.set_stage(EngineStage::Matching);
        let mut records = Vec::with_capacity(dataset.len());
        let mut undetected = Vec::new();
        for (source, outcome) in dataset.iter().zip(outcomes) {
            match outcome {
                Ok(embeddings) if embeddings.is_empty() => undetected.push(source.id.clone()),
                Ok(embeddings) => {
                    let matches = self.matcher.match_all(&embeddings, &registry);
                    records.push(DatasetRecord::new(source.id.clone(), embeddings, matches));
                }
                Err(e) => skipped.push(self.skip(InputArea::Dataset, &source.id, &e)),
            }
        }
        let result = ClassificationResult::organize(&records);
        self.logger()
            .timing(EngineStage::Matching.name(), elapsed_ms(stage_start));

        // Output
        let stage_start = self.set_stage(EngineStage::WritingOutput);
        let paths: HashMap<ImageId, PathBuf> = dataset
            .iter()
            .map(|s| (s.id.clone(), s.path.clone()))
            .collect();
        self.output.materialize(&result, &paths)?;
        let staged: HashSet<String> = sources
            .iter()
            .chain(&dataset)
            .map(|s| cache_key(&s.path))
            .collect();
        let pruned = self.cache.retain(&staged);
        if pruned > 0 {
            log::debug!("Pruned {pruned} cached encodings for images no longer staged");
        }
        if let Err(e) = self.cache.persist() {
            self.logger()
                .warn(&format!("Could not persist encoding cache: {e}"));
        }
        self.logger()
            .timing(EngineStage::WritingOutput.name(), elapsed_ms(stage_start));

        let stats = cache_delta(stats_before, self.cache.stats());
        let report = ClassificationReport {
            identities: registry.labels().map(str::to_string).collect(),
            empty_identities,
            dataset_images: dataset.len(),
            undetected,
            skipped,
            embeddings_computed: stats.computations,
            cache_hits: stats.hits,
            elapsed: started.elapsed(),
            result,
        };

        let mut logger = self.logger();
        logger.metric("dataset_images", report.dataset_images as f64);
        logger.metric("undetected", report.undetected.len() as f64);
        logger.metric("skipped", report.skipped.len() as f64);
        logger.metric("embeddings_computed", report.embeddings_computed as f64);
        logger.metric("cache_hits", report.cache_hits as f64);
        logger.info(&format!(
            "Classified {} images into {} groups",
            report.dataset_images,
            report.result.groups().len()
        ));
        Ok(Arc::new(report))
    }

    fn extract_batch(&self, stage: EngineStage, sources: &[ImageSource]) -> Vec<ExtractionResult> {
        let task = |source: &ImageSource| self.extract_one(source);
        self.executor.execute(sources, &task, &mut |current, total| {
            self.logger().progress(stage.name(), current, total);
        })
    }

    /// Reads, fingerprints and, on a cache miss, decodes and extracts one image.
    fn extract_one(&self, source: &ImageSource) -> ExtractionResult {
        let bytes = fs::read(&source.path).map_err(|e| ImageDecodeError::Unreadable {
            image: source.id.clone(),
            reason: e.to_string(),
        })?;
        let fingerprint = Fingerprint::of_bytes(&bytes);
        self.cache.get_or_compute(&cache_key(&source.path), &fingerprint, || {
            let frame = self.decoder.decode(&source.id, &bytes)?;
            self.extractor.extract(&frame)
        })
    }

    fn skip(&self, area: InputArea, image: &ImageId, error: &ExtractionError) -> SkippedImage {
        self.logger().warn(&format!("Skipping {image}: {error}"));
        SkippedImage {
            area,
            image: image.clone(),
            reason: error.to_string(),
        }
    }

    fn set_stage(&self, stage: EngineStage) -> Instant {
        *lock(&self.stage) = stage;
        log::debug!("Engine stage: {stage:?}");
        Instant::now()
    }

    fn logger(&self) -> MutexGuard<'_, Box<dyn PipelineLogger>> {
        lock(&self.logger)
    }
}

/// Releases the run slot when dropped.
struct RunSlot<'a>(&'a AtomicBool);

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An unavailable extractor fails every image the same way, so the run is
/// aborted before anything is written.
fn ensure_extractor_available(outcomes: &[ExtractionResult]) -> Result<(), EngineError> {
    match outcomes.iter().find_map(|o| match o {
        Err(ExtractionError::Unavailable(reason)) => Some(reason),
        _ => None,
    }) {
        Some(reason) => Err(EngineError::ExtractorUnavailable(reason.clone())),
        None => Ok(()),
    }
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn cache_delta(before: CacheStats, after: CacheStats) -> CacheStats {
    CacheStats {
        hits: after.hits.saturating_sub(before.hits),
        computations: after.computations.saturating_sub(before.computations),
    }
}
