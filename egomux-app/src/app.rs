//! Application setup and command dispatch with builder pattern.

use crate::summary::{BatchSummary, LengthSummary, SampleSummary};
use egomux_data::{ArchiveStore, ConfigError, DataConfig, Manifest, ManifestError};
use egomux_train::{AssembleError, Collaborators, Collator, SampleAssembler};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Assembly error: {0}")]
    Assemble(#[from] AssembleError),

    #[error("Failed to load tokenizer {path}: {reason}")]
    Tokenizer { path: PathBuf, reason: String },

    #[error("Archive not found: {0}")]
    MissingArchive(PathBuf),

    #[error("Cannot open {0}: built without the `hdf5` feature")]
    Hdf5Unavailable(PathBuf),
}

/// What the application should do.
#[derive(Debug, Clone)]
pub enum Command {
    Inspect {
        manifest: PathBuf,
        archive: PathBuf,
        tokenizer: PathBuf,
        config: Option<PathBuf>,
        limit: usize,
        seed: Option<u64>,
    },
    Lengths {
        manifest: PathBuf,
    },
}

/// Logging configuration.
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Builder for configuring and running the application.
pub struct AppBuilder {
    logging: LoggingConfig,
    command: Option<Command>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            logging: LoggingConfig::default(),
            command: None,
        }
    }

    /// Level used when `RUST_LOG` is not set.
    pub fn with_log_level(mut self, level: &str) -> Self {
        self.logging.level = level.to_string();
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    pub fn run(self) -> Result<(), Box<dyn Error>> {
        self.init_logging();

        match self.command {
            Some(Command::Inspect {
                manifest,
                archive,
                tokenizer,
                config,
                limit,
                seed,
            }) => {
                let store = open_store(&archive)?;
                inspect(&manifest, store, &tokenizer, config.as_deref(), limit, seed)?;
                Ok(())
            }
            Some(Command::Lengths { manifest }) => {
                let manifest = Manifest::from_json_file(&manifest).map_err(AppError::from)?;
                println!("{}", LengthSummary::from_manifest(&manifest));
                Ok(())
            }
            None => Err("No command configured. Use with_command".into()),
        }
    }

    fn init_logging(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.logging.level)),
            )
            .with_target(false)
            .init();
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "hdf5")]
fn open_store(path: &Path) -> Result<Arc<dyn ArchiveStore>, AppError> {
    if !path.exists() {
        return Err(AppError::MissingArchive(path.to_path_buf()));
    }
    Ok(Arc::new(egomux_data::Hdf5Store::new(path)))
}

#[cfg(not(feature = "hdf5"))]
fn open_store(path: &Path) -> Result<Arc<dyn ArchiveStore>, AppError> {
    if !path.exists() {
        return Err(AppError::MissingArchive(path.to_path_buf()));
    }
    Err(AppError::Hdf5Unavailable(path.to_path_buf()))
}

fn load_tokenizer(path: &Path) -> Result<tokenizers::Tokenizer, AppError> {
    tokenizers::Tokenizer::from_file(path).map_err(|e| AppError::Tokenizer {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Assemble the first `limit` samples against `store` and collate them.
pub fn inspect(
    manifest_path: &Path,
    store: Arc<dyn ArchiveStore>,
    tokenizer_path: &Path,
    config_path: Option<&Path>,
    limit: usize,
    seed: Option<u64>,
) -> Result<(), AppError> {
    let manifest = Manifest::from_json_file(manifest_path)?;
    let config = match config_path {
        Some(path) => DataConfig::from_json_file(path)?,
        None => DataConfig::default(),
    };
    let tokenizer = load_tokenizer(tokenizer_path)?;

    let collator = Collator::new(&config)?;
    let collaborators = Collaborators::reference(config.crop_size, Arc::new(tokenizer));
    let assembler = SampleAssembler::new(store, config, collaborators)?;

    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let count = limit.min(manifest.len());
    info!(
        "Inspecting {} of {} samples (seed {})",
        count,
        manifest.len(),
        seed
    );

    let mut records = Vec::with_capacity(count);
    for index in 0..count {
        let descriptor = manifest.descriptor(index)?;
        let record = assembler.assemble_with_rng(&descriptor, &mut rng)?;
        println!("{}", SampleSummary::new(index, &record));
        records.push(record);
    }

    let batch = collator.collate(&records);
    println!("{}", BatchSummary::new(&batch));
    Ok(())
}
