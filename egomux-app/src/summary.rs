//! Human-readable summaries of samples, batches and manifest lengths.

use egomux_data::{FrameBranch, Manifest};
use egomux_train::{Batch, IGNORE_INDEX, IMAGE_TOKEN_INDEX, SampleRecord};
use std::fmt;

pub struct SampleSummary {
    index: usize,
    tokens: usize,
    supervised: usize,
    images: usize,
    ego: Vec<String>,
    exo: Vec<String>,
    modalities: Vec<&'static str>,
}

fn view_names(branch: Option<&FrameBranch>) -> Vec<String> {
    branch.map(|b| b.source_names.clone()).unwrap_or_default()
}

impl SampleSummary {
    pub fn new(index: usize, record: &SampleRecord) -> Self {
        Self {
            index,
            tokens: record.input_ids.len(),
            supervised: record.labels.iter().filter(|&&l| l != IGNORE_INDEX).count(),
            images: record.input_ids.iter().filter(|&&id| id == IMAGE_TOKEN_INDEX).count(),
            ego: view_names(record.ego.as_ref()),
            exo: view_names(record.exo.as_ref()),
            modalities: record.modalities().iter().map(|m| m.name()).collect(),
        }
    }
}

impl fmt::Display for SampleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}: {} tokens ({} supervised, {} image), ego {:?}, exo {:?}, modalities [{}]",
            self.index,
            self.tokens,
            self.supervised,
            self.images,
            self.ego,
            self.exo,
            self.modalities.join(", ")
        )
    }
}

pub struct BatchSummary {
    shape: (usize, usize),
    padded: usize,
    keys: Vec<&'static str>,
}

impl BatchSummary {
    pub fn new(batch: &Batch) -> Self {
        Self {
            shape: batch.input_ids.dim(),
            padded: batch.attention_mask.iter().filter(|&&m| !m).count(),
            keys: batch.keys(),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch: {} x {} ({} padded positions), fields [{}]",
            self.shape.0,
            self.shape.1,
            self.padded,
            self.keys.join(", ")
        )
    }
}

/// Length statistics for length-grouped sampling.
#[derive(Debug, PartialEq)]
pub struct LengthSummary {
    pub samples: usize,
    pub multimodal: usize,
    pub text_only: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

impl LengthSummary {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let lengths = manifest.lengths();
        let modal = manifest.modality_lengths();
        let multimodal = modal.iter().filter(|&&l| l > 0).count();
        let mean = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        Self {
            samples: lengths.len(),
            multimodal,
            text_only: modal.len() - multimodal,
            min: lengths.iter().copied().min().unwrap_or(0),
            max: lengths.iter().copied().max().unwrap_or(0),
            mean,
        }
    }
}

impl fmt::Display for LengthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples ({} multimodal, {} text-only), length min {} max {} mean {:.1}",
            self.samples, self.multimodal, self.text_only, self.min, self.max, self.mean
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egomux_data::DataConfig;
    use egomux_train::Collator;

    #[test]
    fn test_length_summary() {
        let manifest = Manifest::from_json_str(
            r#"[
            {"conversations": [{"from": "human", "value": "<image>\nwho"}, {"from": "gpt", "value": "nurse"}],
             "hdf5_indices": {"surgery_type": "MISS", "procedure_id": 1, "take_id": 1, "frame_idx": 0}},
            {"conversations": [{"from": "human", "value": "what next"}, {"from": "gpt", "value": "suture it"}],
             "hdf5_indices": {"surgery_type": "MISS", "procedure_id": 1, "take_id": 1, "frame_idx": 1}}
        ]"#,
        )
        .unwrap();

        let summary = LengthSummary::from_manifest(&manifest);
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.multimodal, 1);
        assert_eq!(summary.text_only, 1);
        assert!(summary.min < summary.max);
    }

    #[test]
    fn test_empty_manifest_summary() {
        let summary = LengthSummary::from_manifest(&Manifest::new(Vec::new()));
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.mean, 0.0);
    }

    #[test]
    fn test_sample_and_batch_summary() {
        let record = SampleRecord {
            input_ids: vec![1, IMAGE_TOKEN_INDEX, 5, 6],
            labels: vec![IGNORE_INDEX, IGNORE_INDEX, 5, 6],
            ..Default::default()
        };
        let line = SampleSummary::new(0, &record).to_string();
        assert!(line.starts_with("#0: 4 tokens (2 supervised, 1 image)"));

        let short = SampleRecord {
            input_ids: vec![1, 2],
            labels: vec![IGNORE_INDEX, 2],
            ..Default::default()
        };
        let batch = Collator::new(&DataConfig::default())
            .unwrap()
            .collate(&[record, short]);
        let line = BatchSummary::new(&batch).to_string();
        assert!(line.starts_with("batch: 2 x 4 (2 padded positions)"));
    }
}
