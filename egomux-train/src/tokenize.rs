//! Conversation tokenization and supervision masking.
//!
//! The prompt is rendered with its template, tokenized, and then split back
//! into rounds so that every instruction span gets [`IGNORE_INDEX`] labels
//! while assistant responses stay supervised.

use crate::collaborators::TextTokenizer;
use crate::conversation::{IMAGE_PLACEHOLDER, PromptStyle, ordered_turns, plain_prompt};
use egomux_data::{Speaker, Turn};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Label value for positions excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;
/// Token id standing in for the image placeholder.
pub const IMAGE_TOKEN_INDEX: i64 = -200;

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("Unsupported prompt style: {0}")]
    UnsupportedStyle(String),

    #[error("Turn {index} should come from {expected:?}")]
    RoleOrder { index: usize, expected: Speaker },

    #[error("Conversation has no turns")]
    EmptyConversation,

    #[error("Invalid plain-style conversation: {0}")]
    PlainShape(String),

    #[error("Tokenizer error: {0}")]
    Encode(String),
}

/// Equal-length token and label sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<i64>,
    pub labels: Vec<i64>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Positions whose labels take part in the loss.
    pub fn supervised(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label != IGNORE_INDEX)
            .map(|(i, label)| (i, *label))
    }
}

/// Tokenize a prompt, replacing every image placeholder with [`IMAGE_TOKEN_INDEX`].
///
/// Chunks between placeholders are encoded independently; a BOS token at the
/// start of the first chunk is kept once and stripped from the others.
pub fn tokenize_with_image(
    tokenizer: &dyn TextTokenizer,
    prompt: &str,
) -> Result<Vec<i64>, TokenizeError> {
    let chunks = prompt
        .split(IMAGE_PLACEHOLDER)
        .map(|chunk| tokenizer.token_ids(chunk))
        .collect::<Result<Vec<_>, _>>()?;

    let bos = tokenizer.bos_token_id();
    let offset = match (chunks.first().and_then(|c| c.first()), bos) {
        (Some(first), Some(bos)) if *first == bos => 1,
        _ => 0,
    };

    let mut ids = Vec::new();
    if offset == 1 {
        ids.extend(bos);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            ids.push(IMAGE_TOKEN_INDEX);
        }
        ids.extend(chunk.iter().skip(offset));
    }
    Ok(ids)
}

/// Outcome of splitting one round on the instruction/response separator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoundParse<'a> {
    Matched { instruction: String, round: &'a str },
    End,
    Malformed,
}

fn parse_round<'a>(round: &'a str, separator: &str) -> RoundParse<'a> {
    if round.is_empty() {
        return RoundParse::End;
    }
    let parts: Vec<&str> = round.split(separator).collect();
    if parts.len() != 2 {
        return RoundParse::Malformed;
    }
    RoundParse::Matched {
        instruction: format!("{}{}", parts[0], separator),
        round,
    }
}

fn mask(labels: &mut [i64], start: usize, end: usize) {
    let end = end.min(labels.len());
    if start < end {
        labels[start..end].fill(IGNORE_INDEX);
    }
}

/// Tokenizes conversations and masks their instruction spans.
#[derive(Clone)]
pub struct LabelMasker {
    style: PromptStyle,
    tokenizer: Arc<dyn TextTokenizer>,
    model_max_length: usize,
    pad_token_id: i64,
}

impl LabelMasker {
    pub fn new(style: PromptStyle, tokenizer: Arc<dyn TextTokenizer>) -> Self {
        Self {
            style,
            tokenizer,
            model_max_length: 512,
            pad_token_id: 0,
        }
    }

    pub fn with_model_max_length(mut self, max_length: usize) -> Self {
        self.model_max_length = max_length;
        self
    }

    pub fn with_pad_token_id(mut self, pad_token_id: i64) -> Self {
        self.pad_token_id = pad_token_id;
        self
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    /// Produce tokens and labels for one conversation.
    ///
    /// `has_image` selects image-aware tokenization for the templated styles;
    /// the plain and mpt styles always use it.
    pub fn tokenize(&self, turns: &[Turn], has_image: bool) -> Result<TokenizedExample, TokenizeError> {
        match self.style {
            PromptStyle::Plain => self.tokenize_plain(turns),
            PromptStyle::V1 | PromptStyle::Llama2 => {
                let turns = ordered_turns(turns)?;
                self.tokenize_two_sep(turns, has_image)
            }
            PromptStyle::Mpt => {
                let turns = ordered_turns(turns)?;
                self.tokenize_mpt(turns)
            }
        }
    }

    fn encode(&self, text: &str, image_aware: bool) -> Result<Vec<i64>, TokenizeError> {
        if image_aware {
            tokenize_with_image(self.tokenizer.as_ref(), text)
        } else {
            self.tokenizer.token_ids(text)
        }
    }

    fn tokenize_plain(&self, turns: &[Turn]) -> Result<TokenizedExample, TokenizeError> {
        let prompt = plain_prompt(turns)?;
        let input_ids = self.encode(&prompt, true)?;
        let prefix = self.encode(IMAGE_PLACEHOLDER, true)?.len();

        let mut labels = input_ids.clone();
        mask(&mut labels, 0, prefix);
        Ok(TokenizedExample { input_ids, labels })
    }

    /// V1 and Llama2 share the two-separator masking walk.
    fn tokenize_two_sep(&self, turns: &[Turn], has_image: bool) -> Result<TokenizedExample, TokenizeError> {
        let template = self.style.template();
        let prompt = self.style.render(turns);
        let mut input_ids = self.encode(&prompt, has_image)?;
        if !has_image {
            input_ids.truncate(self.model_max_length);
        }

        let round_sep = template.sep2.unwrap_or(template.sep);
        let separator = match self.style {
            PromptStyle::Llama2 => "[/INST] ".to_string(),
            _ => format!("{}{}: ", template.sep, template.roles[1]),
        };

        let mut labels = input_ids.clone();
        let mut cursor = 1;
        mask(&mut labels, 0, cursor);

        for round in prompt.split(round_sep) {
            match parse_round(round, &separator) {
                RoundParse::End => break,
                RoundParse::Malformed => {
                    warn!("Malformed round in {} conversation, masking example", self.style);
                    labels.fill(IGNORE_INDEX);
                    return Ok(TokenizedExample { input_ids, labels });
                }
                RoundParse::Matched { instruction, round } => {
                    let round_len = self.encode(round, has_image)?.len();
                    let instruction_len = self.encode(&instruction, has_image)?.len().saturating_sub(2);
                    mask(&mut labels, cursor, cursor + instruction_len);
                    cursor += round_len;
                }
            }
        }
        let len = labels.len();
        mask(&mut labels, cursor, len);

        self.check_length(&input_ids, &mut labels, cursor);
        Ok(TokenizedExample { input_ids, labels })
    }

    fn tokenize_mpt(&self, turns: &[Turn]) -> Result<TokenizedExample, TokenizeError> {
        let template = self.style.template();
        let prompt = self.style.render(turns);
        let input_ids = self.encode(&prompt, true)?;

        let sep = template.sep;
        let separator = format!("{sep}{}", template.roles[1]);
        let segments: Vec<&str> = prompt.split(sep).collect();

        // system + user + assistant, then user + assistant pairs
        let mut rounds = vec![segments[..segments.len().min(3)].join(sep)];
        let mut i = 3;
        while i < segments.len() {
            rounds.push(segments[i..(i + 2).min(segments.len())].join(sep));
            i += 2;
        }

        let sep_len = self.encode(sep, true)?.len();
        let mut labels = input_ids.clone();
        let mut cursor = 0;

        for round in &rounds {
            match parse_round(round, &separator) {
                RoundParse::End => break,
                RoundParse::Malformed => {
                    warn!("Malformed round in mpt conversation, masking example");
                    labels.fill(IGNORE_INDEX);
                    return Ok(TokenizedExample { input_ids, labels });
                }
                RoundParse::Matched { instruction, round } => {
                    let round_len = self.encode(round, true)?.len() + sep_len;
                    let instruction_len = self.encode(&instruction, true)?.len();
                    mask(&mut labels, cursor, cursor + instruction_len);
                    cursor += round_len;
                }
            }
        }
        let len = labels.len();
        mask(&mut labels, cursor, len);

        self.check_length(&input_ids, &mut labels, cursor);
        Ok(TokenizedExample { input_ids, labels })
    }

    /// Mask everything when the round walk disagrees with the token count.
    fn check_length(&self, input_ids: &[i64], labels: &mut [i64], cursor: usize) {
        if cursor >= self.model_max_length {
            return;
        }
        let total = input_ids.iter().filter(|&&id| id != self.pad_token_id).count();
        if cursor != total {
            warn!(
                "Tokenization mismatch: {} vs. {} (example ignored)",
                cursor, total
            );
            labels.fill(IGNORE_INDEX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits on whitespace and on a fixed set of special tokens.
    struct Words {
        bos: Option<i64>,
    }

    const SPECIALS: [&str; 5] = ["</s>", "<s>", "<|im_end|>", "<|im_start|>", "[/INST]"];

    impl TextTokenizer for Words {
        fn token_ids(&self, text: &str) -> Result<Vec<i64>, TokenizeError> {
            let mut spaced = text.to_string();
            for special in SPECIALS {
                spaced = spaced.replace(special, &format!(" {special} "));
            }
            let mut ids: Vec<i64> = self.bos.into_iter().collect();
            ids.extend(spaced.split_whitespace().map(|w| 10 + w.len() as i64));
            Ok(ids)
        }

        fn bos_token_id(&self) -> Option<i64> {
            self.bos
        }
    }

    fn masker(style: PromptStyle, bos: Option<i64>) -> LabelMasker {
        LabelMasker::new(style, Arc::new(Words { bos }))
    }

    #[test]
    fn test_image_token_insertion() {
        let tok = Words { bos: Some(1) };
        let ids = tokenize_with_image(&tok, "<image>\nhello there").unwrap();
        assert_eq!(ids, vec![1, IMAGE_TOKEN_INDEX, 15, 15]);

        let ids = tokenize_with_image(&tok, "a <image> b <image>").unwrap();
        assert_eq!(ids, vec![1, 11, IMAGE_TOKEN_INDEX, 11, IMAGE_TOKEN_INDEX]);
    }

    #[test]
    fn test_image_tokens_without_bos() {
        let tok = Words { bos: None };
        let ids = tokenize_with_image(&tok, "ab<image>cd").unwrap();
        assert_eq!(ids, vec![12, IMAGE_TOKEN_INDEX, 12]);
    }

    #[test]
    fn test_v1_masks_instruction() {
        let turns = vec![Turn::human("hi"), Turn::assistant("yo")];
        let out = masker(PromptStyle::V1, Some(1)).tokenize(&turns, false).unwrap();
        assert_eq!(out.input_ids.len(), out.labels.len());

        let supervised: Vec<_> = out.supervised().map(|(_, id)| id).collect();
        // "ASSISTANT:", "yo", "</s>"
        assert_eq!(supervised, vec![20, 12, 14]);
    }

    #[test]
    fn test_v1_multi_round() {
        let turns = vec![
            Turn::human("hi"),
            Turn::assistant("yo"),
            Turn::human("next"),
            Turn::assistant("fine"),
        ];
        let out = masker(PromptStyle::V1, Some(1)).tokenize(&turns, false).unwrap();
        let supervised: Vec<_> = out.supervised().map(|(_, id)| id).collect();
        assert_eq!(supervised, vec![20, 12, 14, 20, 14, 14]);
    }

    #[test]
    fn test_llama2_masks_instruction() {
        let turns = vec![Turn::human("hi"), Turn::assistant("yo")];
        let out = masker(PromptStyle::Llama2, Some(1)).tokenize(&turns, false).unwrap();
        let supervised: Vec<_> = out.supervised().map(|(_, id)| id).collect();
        // "[/INST]", "yo", "</s>"
        assert_eq!(supervised, vec![17, 12, 14]);
    }

    #[test]
    fn test_mpt_masks_instruction() {
        let turns = vec![Turn::human("hi"), Turn::assistant("yo")];
        let out = masker(PromptStyle::Mpt, None).tokenize(&turns, false).unwrap();
        let supervised: Vec<_> = out.supervised().map(|(_, id)| id).collect();
        // "yo", "<|im_end|>"
        assert_eq!(supervised, vec![12, 20]);
    }

    #[test]
    fn test_plain_masks_placeholder() {
        let turns = vec![Turn::human("<image>\ndescribe"), Turn::assistant("a drill")];
        let out = masker(PromptStyle::Plain, Some(1)).tokenize(&turns, false).unwrap();
        assert_eq!(out.input_ids, vec![1, IMAGE_TOKEN_INDEX, 11, 15]);
        assert_eq!(out.labels, vec![IGNORE_INDEX, IGNORE_INDEX, 11, 15]);
    }

    #[test]
    fn test_malformed_round_masks_everything() {
        // The response repeats the separator, so the round splits into 3 parts.
        let turns = vec![Turn::human("hi"), Turn::assistant("yo ASSISTANT: again")];
        let out = masker(PromptStyle::V1, Some(1)).tokenize(&turns, false).unwrap();
        assert!(out.labels.iter().all(|&l| l == IGNORE_INDEX));
        assert!(!out.input_ids.is_empty());
    }

    #[test]
    fn test_length_mismatch_masks_everything() {
        // Without BOS every round after the first comes up one token short.
        let turns = vec![
            Turn::human("hi"),
            Turn::assistant("yo"),
            Turn::human("next"),
            Turn::assistant("fine"),
        ];
        let out = masker(PromptStyle::V1, None).tokenize(&turns, false).unwrap();
        assert!(out.labels.iter().all(|&l| l == IGNORE_INDEX));
    }

    #[test]
    fn test_mismatch_skipped_past_max_length() {
        let turns = vec![Turn::human("hi"), Turn::assistant("yo")];
        let out = masker(PromptStyle::V1, None)
            .with_model_max_length(2)
            .tokenize(&turns, false)
            .unwrap();
        assert_eq!(out.input_ids.len(), 2);
        assert_eq!(out.labels.len(), 2);
    }

    #[test]
    fn test_mask_clamps_to_labels() {
        let mut labels = vec![5, 6, 7];
        mask(&mut labels, 1, usize::MAX);
        assert_eq!(labels, vec![5, IGNORE_INDEX, IGNORE_INDEX]);
        mask(&mut labels, 4, 9);
        assert_eq!(labels[0], 5);
    }

    #[test]
    fn test_plain_rejects_reversed_roles() {
        let turns = vec![Turn::assistant("<image>
describe"), Turn::human("a drill")];
        let result = masker(PromptStyle::Plain, Some(1)).tokenize(&turns, false);
        assert!(matches!(
            result,
            Err(TokenizeError::RoleOrder {
                index: 0,
                expected: Speaker::Human
            })
        ));
    }

    #[test]
    fn test_role_order_is_fatal() {
        let turns = vec![Turn::human("hi"), Turn::human("again")];
        let result = masker(PromptStyle::V1, Some(1)).tokenize(&turns, false);
        assert!(matches!(result, Err(TokenizeError::RoleOrder { .. })));
    }

    #[test]
    fn test_v1_with_image() {
        let turns = vec![Turn::human("<image>\nhi"), Turn::assistant("yo")];
        let out = masker(PromptStyle::V1, Some(1)).tokenize(&turns, true).unwrap();
        assert!(out.input_ids.contains(&IMAGE_TOKEN_INDEX));
        let supervised: Vec<_> = out.supervised().map(|(_, id)| id).collect();
        assert_eq!(supervised, vec![20, 12, 14]);
    }
}
