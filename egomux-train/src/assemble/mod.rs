//! Multimodal sample assembly.
//!
//! [`SampleAssembler`] turns one [`SampleDescriptor`] into a [`SampleRecord`]:
//! it opens the archive, classifies the take's cameras, extracts and
//! transforms frames, extracts sensor payloads aligned to the ego frame
//! order, tokenizes the conversation and applies the dataset profile's
//! branch policy.

mod frames;
pub mod sensors;

pub use sensors::{EgoOrder, Perspective, ReorderPolicy, SensorCapability, SensorKind};

use crate::collaborators::{AudioEmbedder, FrameProcessor, PooledEnvelope, ProcessError, ResizeNormalize, TextTokenizer};
use crate::conversation::{PromptStyle, prepare_multimodal};
use crate::tokenize::{LabelMasker, TokenizeError};
use egomux_data::{
    ArchiveError, ArchiveReader, ArchiveStore, AudioPayload, CameraRegistry, ConfigError, CropSize, DataConfig,
    DatasetProfile, FrameBranch, GazeDepthPayload, GazePayload, HandPayload, Modality, ModalitySet,
    PointCloudPayload, SampleDescriptor, TakePath, TakeSources,
};
use ndarray::{Array4, Axis, Ix4};
use rand::Rng;
use rand::seq::SliceRandom;
use sensors::Extraction;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tokenization error: {0}")]
    Tokenize(#[from] TokenizeError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Unexpected shape for {dataset}: {shape:?}")]
    UnexpectedShape { dataset: String, shape: Vec<usize> },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// External models used during assembly.
#[derive(Clone)]
pub struct Collaborators {
    pub frames: Arc<dyn FrameProcessor>,
    pub audio: Arc<dyn AudioEmbedder>,
    pub tokenizer: Arc<dyn TextTokenizer>,
}

impl Collaborators {
    pub fn new(
        frames: Arc<dyn FrameProcessor>,
        audio: Arc<dyn AudioEmbedder>,
        tokenizer: Arc<dyn TextTokenizer>,
    ) -> Self {
        Self {
            frames,
            audio,
            tokenizer,
        }
    }

    /// CLIP-normalized frames and pooled audio envelopes.
    pub fn reference(crop: CropSize, tokenizer: Arc<dyn TextTokenizer>) -> Self {
        Self::new(
            Arc::new(ResizeNormalize::clip(crop)),
            Arc::new(PooledEnvelope::default()),
            tokenizer,
        )
    }
}

/// One assembled training example.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleRecord {
    pub input_ids: Vec<i64>,
    pub labels: Vec<i64>,
    pub ego: Option<FrameBranch>,
    pub exo: Option<FrameBranch>,
    pub gaze: Option<GazePayload>,
    pub gaze_depth: Option<GazeDepthPayload>,
    pub hand: Option<HandPayload>,
    pub point_cloud: Option<PointCloudPayload>,
    pub audio: Option<AudioPayload>,
}

impl SampleRecord {
    /// Names of the modality payloads present in this record.
    pub fn modalities(&self) -> ModalitySet {
        let mut set = ModalitySet::new();
        let present = [
            (Modality::EgoFrames, self.ego.is_some()),
            (Modality::ExoFrames, self.exo.is_some()),
            (Modality::EyeGaze, self.gaze.is_some()),
            (Modality::EyeGazeDepth, self.gaze_depth.is_some()),
            (Modality::HandTracking, self.hand.is_some()),
            (Modality::PointCloud, self.point_cloud.is_some()),
            (Modality::Audio, self.audio.is_some()),
        ];
        for (modality, is_present) in present {
            if is_present {
                set.insert(modality);
            }
        }
        set
    }
}

#[derive(Default)]
struct Sensors {
    gaze: Option<GazePayload>,
    gaze_depth: Option<GazeDepthPayload>,
    hand: Option<HandPayload>,
    point_cloud: Option<PointCloudPayload>,
    audio: Option<AudioPayload>,
}

/// Assembles samples from an archive store.
///
/// Holds only immutable state; each fetch opens its own archive handle and
/// takes its own RNG, so one assembler can serve many workers.
pub struct SampleAssembler {
    store: Arc<dyn ArchiveStore>,
    config: Arc<DataConfig>,
    profile: DatasetProfile,
    collaborators: Collaborators,
    masker: LabelMasker,
}

impl SampleAssembler {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        config: DataConfig,
        collaborators: Collaborators,
    ) -> Result<Self, AssembleError> {
        config.validate()?;
        let profile = config.profile()?;
        let style: PromptStyle = config.prompt_style.parse()?;
        let masker = LabelMasker::new(style, Arc::clone(&collaborators.tokenizer))
            .with_model_max_length(config.model_max_length)
            .with_pad_token_id(config.pad_token_id);

        info!(
            "Sample assembler ready: profile {:?}, prompt style {}",
            profile, style
        );
        Ok(Self {
            store,
            config: Arc::new(config),
            profile,
            collaborators,
            masker,
        })
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn profile(&self) -> DatasetProfile {
        self.profile
    }

    pub fn assemble(&self, descriptor: &SampleDescriptor) -> Result<SampleRecord, AssembleError> {
        self.assemble_with_rng(descriptor, &mut rand::rng())
    }

    #[tracing::instrument(skip_all, fields(take = %descriptor.take_path(), frame = descriptor.frame_index))]
    pub fn assemble_with_rng<R: Rng + ?Sized>(
        &self,
        descriptor: &SampleDescriptor,
        rng: &mut R,
    ) -> Result<SampleRecord, AssembleError> {
        let take = descriptor.take_path();
        let mut available = descriptor.available.clone();
        self.profile.filter_modalities(&mut available);

        let reader = self.store.open()?;
        let sources = TakeSources::read(reader.as_ref(), &take)?;
        let registry = CameraRegistry::classify(sources.as_ref(), &available, &self.config);

        let (ego, exo) = self.extract_frames(
            reader.as_ref(),
            &take,
            descriptor.frame_index,
            &available,
            &registry,
            rng,
        )?;
        let has_image = ego.is_some() || exo.is_some();

        let ego_order = EgoOrder::new(ego.as_ref(), &self.config);
        let extraction = Extraction {
            reader: reader.as_ref(),
            take: &take,
            frame_index: descriptor.frame_index,
            config: &self.config,
            ego_range: registry.ego_range(),
            ego_order: &ego_order,
        };
        let sensors = self.extract_sensors(&extraction, &available, rng)?;
        drop(reader);

        let mut turns = descriptor.turns.clone();
        if self.config.is_multimodal {
            prepare_multimodal(&mut turns, self.config.mm_use_im_start_end);
        }
        let tokens = self.masker.tokenize(&turns, has_image)?;

        let (mut ego, mut exo) = self.arrange_branches(ego, exo, rng)?;
        if !has_image && self.config.is_multimodal {
            debug!("No frames available, using blank fallback");
            let crop = self.collaborators.frames.crop_size();
            exo = Some(FrameBranch::blank(crop));
            ego = match self.profile {
                DatasetProfile::DualBranch => Some(FrameBranch::blank(crop)),
                _ => None,
            };
        }

        Ok(SampleRecord {
            input_ids: tokens.input_ids,
            labels: tokens.labels,
            ego,
            exo,
            gaze: sensors.gaze,
            gaze_depth: sensors.gaze_depth,
            hand: sensors.hand,
            point_cloud: sensors.point_cloud,
            audio: sensors.audio,
        })
    }

    fn extract_frames<R: Rng + ?Sized>(
        &self,
        reader: &dyn ArchiveReader,
        take: &TakePath,
        frame_index: usize,
        available: &ModalitySet,
        registry: &CameraRegistry,
        rng: &mut R,
    ) -> Result<(Option<FrameBranch>, Option<FrameBranch>), AssembleError> {
        let wants_ego = available.contains(Modality::EgoFrames);
        let wants_exo = available.contains(Modality::ExoFrames);
        if !wants_ego && !wants_exo {
            return Ok((None, None));
        }

        let key = take.frames();
        if !reader.contains(&key) {
            warn!("{} missing from archive, skipping frames", key);
            return Ok((None, None));
        }
        let raw = reader.read_row(&key, frame_index)?;
        let shape = raw.shape().to_vec();
        let rgb = raw
            .into_dimensionality::<Ix4>()
            .map_err(|_| AssembleError::UnexpectedShape {
                dataset: key.clone(),
                shape: shape.clone(),
            })?;
        if rgb.len_of(Axis(3)) != 3 {
            return Err(AssembleError::UnexpectedShape { dataset: key, shape });
        }
        let cameras = rgb.len_of(Axis(0));

        let ego = if wants_ego {
            let candidates: Vec<usize> = registry.ego_range().clamp_to(cameras).indices().collect();
            self.transform_views(&rgb, &candidates, registry)?
        } else {
            None
        };

        let exo = if wants_exo {
            let mut candidates: Vec<usize> = registry.exo_range().clamp_to(cameras).indices().collect();
            if self.config.img_order_augment && !candidates.is_empty() {
                candidates.shuffle(rng);
                let keep = rng.random_range(1..=candidates.len().min(7));
                candidates.truncate(keep);
            }
            let branch = self.transform_views(&rgb, &candidates, registry)?;
            match self.profile {
                DatasetProfile::DualBranch => {
                    branch.map(|b| subsample(b, self.profile.max_exo_views(), rng))
                }
                _ => branch,
            }
        } else {
            None
        };

        debug!(
            "Frames: {} ego, {} exo of {} cameras",
            ego.as_ref().map_or(0, FrameBranch::len),
            exo.as_ref().map_or(0, FrameBranch::len),
            cameras
        );
        Ok((ego, exo))
    }

    /// Convert, pad and process the given cameras; all-zero frames are skipped.
    fn transform_views(
        &self,
        rgb: &Array4<f32>,
        cameras: &[usize],
        registry: &CameraRegistry,
    ) -> Result<Option<FrameBranch>, AssembleError> {
        let processor = &self.collaborators.frames;
        let mut views = Vec::new();
        let mut ids = Vec::new();
        let mut names = Vec::new();

        for &camera in cameras {
            let name = registry.name_of(camera);
            let Some(mut image) = frames::frame_to_image(rgb.index_axis(Axis(0), camera)) else {
                debug!("Skipping empty frame from {}", name);
                continue;
            };
            if self.config.reverses_channels(&name) {
                frames::reverse_channels(&mut image);
            }
            let square = frames::expand_to_square(image, processor.image_mean());
            views.push(processor.process(&square)?);
            ids.push(camera);
            names.push(name);
        }

        if views.is_empty() {
            return Ok(None);
        }
        Ok(Some(FrameBranch::from_views(views, ids, names)?))
    }

    fn extract_sensors<R: Rng + ?Sized>(
        &self,
        extraction: &Extraction<'_>,
        available: &ModalitySet,
        rng: &mut R,
    ) -> Result<Sensors, AssembleError> {
        let mut sensors = Sensors::default();
        for kind in SensorKind::ALL {
            let cap = kind.capability();
            if !available.contains(cap.modality) || !kind.gated_on(&self.config) {
                continue;
            }
            if !extraction.has_datasets(kind) {
                debug!("{} listed as available but missing from archive", cap.modality);
                continue;
            }
            if self.drops(rng) {
                debug!("Dropping {} for this sample", cap.modality);
                continue;
            }
            match kind {
                SensorKind::Gaze => sensors.gaze = extraction.gaze()?,
                SensorKind::GazeDepth => sensors.gaze_depth = extraction.gaze_depth()?,
                SensorKind::Hand => sensors.hand = extraction.hand()?,
                SensorKind::PointCloud => sensors.point_cloud = extraction.point_cloud()?,
                SensorKind::Audio => {
                    sensors.audio = extraction.audio(self.collaborators.audio.as_ref())?
                }
            }
        }
        Ok(sensors)
    }

    fn drops<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.config.drops_modalities() && rng.random::<f64>() <= self.config.multimodal_drop_prob
    }

    /// Merge ego into exo for profiles without a separate ego branch.
    fn arrange_branches<R: Rng + ?Sized>(
        &self,
        ego: Option<FrameBranch>,
        exo: Option<FrameBranch>,
        rng: &mut R,
    ) -> Result<(Option<FrameBranch>, Option<FrameBranch>), AssembleError> {
        if !self.profile.merges_branches() {
            return Ok((ego, exo));
        }
        let combined = match (ego, exo) {
            (Some(ego), Some(exo)) => Some(ego.concat(exo)?),
            (ego, exo) => ego.or(exo),
        };
        let combined = combined.map(|branch| subsample(branch, self.profile.max_exo_views(), rng));
        Ok((None, combined))
    }
}

/// Keep a random subset of 2 to `max_views` views when more than 2 exist.
pub fn subsample<R: Rng + ?Sized>(branch: FrameBranch, max_views: usize, rng: &mut R) -> FrameBranch {
    let n = branch.len();
    if n <= 2 {
        return branch;
    }
    let keep = rng.random_range(2..=max_views.clamp(2, n));
    let indices = rand::seq::index::sample(rng, n, keep).into_vec();
    branch.select(&indices)
}
