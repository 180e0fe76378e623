use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, OnceLock};

use clap::{Parser, Subcommand};

use facesort_core::cache::encoding_cache::EncodingCache;
use facesort_core::detection::domain::embedding_extractor::{EmbeddingExtractor, ExtractionError};
use facesort_core::detection::infrastructure::arcface_embedder::ArcFaceEmbedder;
use facesort_core::detection::infrastructure::detect_embed_extractor::DetectEmbedExtractor;
use facesort_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use facesort_core::output::classification_result::ClassificationResult;
use facesort_core::pipeline::batch_executor::SequentialBatchExecutor;
use facesort_core::pipeline::classification_engine::{ClassificationEngine, ClassificationReport};
use facesort_core::pipeline::engine_config::EngineConfig;
use facesort_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facesort_core::shared::face_embedding::FaceEmbedding;
use facesort_core::shared::frame::Frame;
use facesort_core::shared::model_resolver::{self, ModelSpec, DETECTOR_MODEL, EMBEDDING_MODEL};
use facesort_core::staging::staging_area::StagingArea;

/// Sort images into folders by the known people whose faces they contain.
#[derive(Parser)]
#[command(name = "facesort")]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Known-people area.
    #[arg(long, global = true)]
    people: Option<PathBuf>,

    /// Dataset area.
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Output directory (one subdirectory per label).
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Encoding cache file.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy reference images of one person into the known-people area.
    StagePerson {
        label: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Copy images into the dataset area.
    StageDataset {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List staged known people and dataset images.
    List,
    /// Match every dataset image against the known people.
    Classify {
        /// Maximum embedding distance for a match.
        #[arg(long)]
        threshold: Option<f64>,

        /// Face detection confidence threshold (0.0-1.0).
        #[arg(long)]
        confidence: Option<f64>,

        /// Extraction worker threads (default: all cores).
        #[arg(long)]
        workers: Option<usize>,

        /// Look for model files here before downloading.
        #[arg(long)]
        models_dir: Option<PathBuf>,

        /// Print the grouping as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the grouping currently on disk.
    Results {
        #[arg(long)]
        json: bool,
    },
    /// Clear the encoding cache and the output grouping.
    Reset {
        /// Also delete everything staged in both input areas.
        #[arg(long)]
        purge_inputs: bool,
    },
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    let staging = StagingArea::new(config.people_dir.clone(), config.dataset_dir.clone());

    match cli.command {
        Command::StagePerson { label, files } => {
            for file in &files {
                let path = staging.stage_person(&label, file_name(file)?, &fs::read(file)?)?;
                println!("{}", path.display());
            }
        }
        Command::StageDataset { files } => {
            for file in &files {
                let path = staging.stage_dataset(file_name(file)?, &fs::read(file)?)?;
                println!("{}", path.display());
            }
        }
        Command::List => {
            println!("Known people ({}):", config.people_dir.display());
            for reference in staging.list_people()? {
                println!("  {:16} {}", reference.label, reference.source.id);
            }
            println!("Dataset ({}):", config.dataset_dir.display());
            for image in staging.list_dataset()? {
                println!("  {}", image.id);
            }
        }
        Command::Classify {
            threshold,
            confidence,
            workers,
            models_dir,
            json,
        } => {
            if let Some(t) = threshold {
                config.threshold = t;
            }
            if let Some(c) = confidence {
                config.detection_confidence = c;
            }
            if workers.is_some() {
                config.workers = workers;
            }
            let engine = build_engine(&config, models_dir)?;
            let report = engine.classify()?;
            print_report(&report);
            print_result(&report.result, json)?;
        }
        Command::Results { json } => {
            let engine = build_engine(&config, None)?;
            print_result(&engine.get_results()?, json)?;
        }
        Command::Reset { purge_inputs } => {
            let engine = build_engine(&config, None)?;
            engine.reset()?;
            if purge_inputs {
                staging.clear()?;
            }
            println!("Reset complete");
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(p) = &cli.people {
        config.people_dir = p.clone();
    }
    if let Some(p) = &cli.dataset {
        config.dataset_dir = p.clone();
    }
    if let Some(p) = &cli.output {
        config.output_dir = p.clone();
    }
    if let Some(p) = &cli.cache {
        config.cache_path = p.clone();
    }
    Ok(config)
}

fn build_engine(
    config: &EngineConfig,
    models_dir: Option<PathBuf>,
) -> Result<ClassificationEngine, Box<dyn std::error::Error>> {
    let cache = Arc::new(EncodingCache::open(&config.cache_path));
    if cache.was_recovered() {
        log::warn!("Encoding cache was unreadable and has been reset");
    }
    let extractor = Arc::new(LazyOnnxExtractor::new(config.detection_confidence, models_dir));
    let mut engine = ClassificationEngine::new(config.clone(), extractor, cache)?
        .with_logger(Box::new(StdoutPipelineLogger::default()));
    if config.workers == Some(1) {
        engine = engine.with_executor(Box::new(SequentialBatchExecutor));
    }
    Ok(engine)
}

/// Loads the ONNX models on first extraction, so runs fully served from the
/// cache (and commands that never extract) skip model resolution.
struct LazyOnnxExtractor {
    confidence: f64,
    models_dir: Option<PathBuf>,
    inner: OnceLock<Result<DetectEmbedExtractor, String>>,
}

impl LazyOnnxExtractor {
    fn new(confidence: f64, models_dir: Option<PathBuf>) -> Self {
        Self {
            confidence,
            models_dir,
            inner: OnceLock::new(),
        }
    }

    fn load(&self) -> Result<DetectEmbedExtractor, Box<dyn std::error::Error>> {
        let detector_path = resolve_model(DETECTOR_MODEL, self.models_dir.as_deref())?;
        let embedder_path = resolve_model(EMBEDDING_MODEL, self.models_dir.as_deref())?;
        let detector = OnnxYoloDetector::new(&detector_path, self.confidence)?;
        let embedder = ArcFaceEmbedder::new(&embedder_path)?;
        Ok(DetectEmbedExtractor::new(Box::new(detector), Box::new(embedder)))
    }
}

impl EmbeddingExtractor for LazyOnnxExtractor {
    fn extract(&self, frame: &Frame) -> Result<Vec<FaceEmbedding>, ExtractionError> {
        let inner = self
            .inner
            .get_or_init(|| self.load().map_err(|e| format!("cannot load face models: {e}")));
        match inner {
            Ok(extractor) => extractor.extract(frame),
            Err(reason) => Err(ExtractionError::Unavailable(reason.clone())),
        }
    }
}

fn resolve_model(spec: ModelSpec, models_dir: Option<&Path>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {}", spec.name);
    let name = spec.name;
    let path = model_resolver::resolve(
        spec,
        models_dir,
        Some(Box::new(move |downloaded, total| download_progress(name, downloaded, total))),
    )?;
    Ok(path)
}

fn file_name(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("Not a file path: {}", path.display()).into())
}

fn print_report(report: &ClassificationReport) {
    println!(
        "Classified {} images against {} identities in {:.1}s ({} computed, {} cached)",
        report.dataset_images,
        report.identities.len(),
        report.elapsed.as_secs_f64(),
        report.embeddings_computed,
        report.cache_hits
    );
    for empty in &report.empty_identities {
        println!("  excluded: {empty}");
    }
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.image, skipped.reason);
    }
    if !report.undetected.is_empty() {
        let names: Vec<&str> = report.undetected.iter().map(|i| i.as_str()).collect();
        println!("  no face found: {}", names.join(", "));
    }
}

fn print_result(result: &ClassificationResult, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if result.is_empty() {
        println!("No results");
    }
    for (label, images) in result.groups() {
        println!("{label} ({}):", images.len());
        for image in images {
            println!("  {image}");
        }
    }
    Ok(())
}

fn download_progress(name: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {name}... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading {name}... {downloaded} bytes");
    }
}
