//! Shared fixtures: synthetic takes in an in-memory archive and a
//! whitespace tokenizer.

#![allow(dead_code)]

use egomux_data::{ArchiveStore, DataConfig, MemoryArchive, ModalitySet, SampleDescriptor, TakePath, Turn};
use egomux_train::{Collaborators, PooledEnvelope, ResizeNormalize, SampleAssembler, TextTokenizer, TokenizeError};
use ndarray::{Array5, ArrayD};
use std::sync::Arc;

pub const FRAME: usize = 1;
pub const BOS: i64 = 1;

pub const EGO: [&str; 4] = ["head_surgeon", "assistant", "circulator", "anesthetist"];

/// Splits on whitespace and around a few special tokens; id = 10 + word length.
pub struct Words;

const SPECIALS: [&str; 4] = ["</s>", "<s>", "<|im_end|>", "<|im_start|>"];

impl TextTokenizer for Words {
    fn token_ids(&self, text: &str) -> Result<Vec<i64>, TokenizeError> {
        let mut spaced = text.to_string();
        for special in SPECIALS {
            spaced = spaced.replace(special, &format!(" {special} "));
        }
        let mut ids = vec![BOS];
        ids.extend(spaced.split_whitespace().map(|w| 10 + w.len() as i64));
        Ok(ids)
    }

    fn bos_token_id(&self) -> Option<i64> {
        Some(BOS)
    }
}

pub fn take() -> TakePath {
    TakePath::new("MISS", "1", "1")
}

/// Builds one take with two recorded frames.
pub struct TakeBuilder {
    archive: MemoryArchive,
    cameras: usize,
    frames: Array5<f32>,
    store_frames: bool,
}

impl TakeBuilder {
    /// Cameras named in order; camera `c` is filled with `10 * (c + 1)`.
    pub fn new(names: &[&str]) -> Self {
        let mut builder = Self::unnamed(names.len());
        let sources = take().sources();
        builder
            .archive
            .set_attr(&sources, "source_count", names.len() as i64);
        for (i, name) in names.iter().enumerate() {
            builder.archive.set_attr(&sources, &format!("source_{i}"), *name);
        }
        builder
    }

    /// A take without a `sources` group.
    pub fn unnamed(cameras: usize) -> Self {
        let mut frames = Array5::<f32>::zeros((2, cameras, 2, 2, 3));
        for c in 0..cameras {
            for f in 0..2 {
                frames
                    .slice_mut(ndarray::s![f, c, .., .., ..])
                    .fill(10.0 * (c + 1) as f32);
            }
        }
        Self {
            archive: MemoryArchive::new(),
            cameras,
            frames,
            store_frames: true,
        }
    }

    pub fn zero_camera(mut self, camera: usize) -> Self {
        self.frames
            .slice_mut(ndarray::s![FRAME, camera, .., .., ..])
            .fill(0.0);
        self
    }

    /// Leave `frames/rgb` out of the archive.
    pub fn without_frames(mut self) -> Self {
        self.store_frames = false;
        self
    }

    /// Store `rows` as frame [`FRAME`] of a dataset relative to the take.
    pub fn dataset(mut self, relative: &str, rows: ArrayD<f32>) -> Self {
        let mut shape = vec![2];
        shape.extend_from_slice(rows.shape());
        let mut data = ArrayD::<f32>::zeros(shape);
        data.index_axis_mut(ndarray::Axis(0), FRAME).assign(&rows);
        self.archive.insert_dataset(&take().child(relative), data);
        self
    }

    pub fn cameras(&self) -> usize {
        self.cameras
    }

    pub fn build(self) -> Arc<dyn ArchiveStore> {
        let Self {
            mut archive,
            frames,
            store_frames,
            ..
        } = self;
        if store_frames {
            archive.insert_dataset(&take().frames(), frames.into_dyn());
        }
        Arc::new(archive.into_store())
    }
}

pub fn conversation() -> Vec<Turn> {
    vec![
        Turn::human("What is the head surgeon doing? <image>"),
        Turn::assistant("head_surgeon holding drill"),
    ]
}

pub fn descriptor(available: &[&str], turns: Vec<Turn>) -> SampleDescriptor {
    SampleDescriptor {
        surgery_type: "MISS".to_string(),
        procedure_id: "1".to_string(),
        take_id: "1".to_string(),
        frame_index: FRAME,
        available: ModalitySet::from_names(available),
        turns,
    }
}

pub fn assembler(store: Arc<dyn ArchiveStore>, config: DataConfig) -> SampleAssembler {
    let config = config.with_crop_size(4, 4);
    let collaborators = Collaborators::new(
        Arc::new(ResizeNormalize::clip(config.crop_size)),
        Arc::new(PooledEnvelope::new(4)),
        Arc::new(Words),
    );
    SampleAssembler::new(store, config, collaborators).unwrap()
}
