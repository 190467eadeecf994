//! Egomux Training Crate
//!
//! Turns manifest samples into training examples for a multimodal sequence
//! model.
//!
//! ## Modules
//!
//! - [`assemble`]: per-sample archive reads, frame transforms and sensor payloads
//! - [`conversation`]: prompt templates, turn order checks and placeholder handling
//! - [`tokenize`]: tokenization with instruction masking
//! - [`collate`]: padding and grouping records into batches
//! - [`collaborators`]: frame processor, audio embedder and tokenizer seams

pub mod assemble;
pub mod collaborators;
pub mod collate;
pub mod conversation;
pub mod tokenize;

pub use assemble::{AssembleError, Collaborators, SampleAssembler, SampleRecord};
pub use collaborators::{AudioEmbedder, FrameProcessor, PooledEnvelope, ProcessError, ResizeNormalize, TextTokenizer};
pub use collate::{Batch, BranchColumns, Collator};
pub use conversation::PromptStyle;
pub use tokenize::{IGNORE_INDEX, IMAGE_TOKEN_INDEX, LabelMasker, TokenizeError, TokenizedExample};
