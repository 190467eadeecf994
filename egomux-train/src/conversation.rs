//! Prompt templates and conversation rendering.
//!
//! A [`PromptStyle`] selects one of four formatting conventions. Rendering
//! validates turn order and produces the single prompt string that the label
//! masker later splits back into rounds.

use crate::tokenize::TokenizeError;
use egomux_data::{Speaker, Turn};
use std::fmt;
use std::str::FromStr;

pub const IMAGE_PLACEHOLDER: &str = "<image>";
pub const IMAGE_START: &str = "<im_start>";
pub const IMAGE_END: &str = "<im_end>";

const V1_SYSTEM: &str = "A chat between a curious user and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the user's questions.";

const LLAMA2_SYSTEM: &str = "You are a helpful language and vision assistant. \
You are able to understand the visual content that the user provides, \
and assist the user with a variety of tasks using natural language.";

const MPT_SYSTEM: &str = "<|im_start|>system\nA conversation between a user and an LLM-based AI assistant. \
The assistant gives helpful and honest answers.";

/// Prompt formatting convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Image placeholder followed by the caption; no template.
    Plain,
    /// `USER:` / `ASSISTANT:` turns separated by a space and `</s>`.
    V1,
    /// `[INST]` wrapping with a `<<SYS>>` block on the first turn.
    Llama2,
    /// ChatML-style `<|im_start|>` roles ended by `<|im_end|>`.
    Mpt,
}

impl FromStr for PromptStyle {
    type Err = TokenizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "v1" | "vicuna_v1" => Ok(Self::V1),
            "llama_2" | "llama2" => Ok(Self::Llama2),
            "mpt" => Ok(Self::Mpt),
            other => Err(TokenizeError::UnsupportedStyle(other.to_string())),
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::V1 => "v1",
            Self::Llama2 => "llama_2",
            Self::Mpt => "mpt",
        };
        f.write_str(name)
    }
}

/// Static parts of a conversation template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub system: &'static str,
    pub roles: [&'static str; 2],
    pub sep: &'static str,
    pub sep2: Option<&'static str>,
}

impl PromptStyle {
    pub fn template(self) -> Template {
        match self {
            Self::Plain => Template {
                system: "",
                roles: ["", ""],
                sep: "\n",
                sep2: None,
            },
            Self::V1 => Template {
                system: V1_SYSTEM,
                roles: ["USER", "ASSISTANT"],
                sep: " ",
                sep2: Some("</s>"),
            },
            Self::Llama2 => Template {
                system: LLAMA2_SYSTEM,
                roles: ["USER", "ASSISTANT"],
                sep: "<s>",
                sep2: Some("</s>"),
            },
            Self::Mpt => Template {
                system: MPT_SYSTEM,
                roles: ["<|im_start|>user\n", "<|im_start|>assistant\n"],
                sep: "<|im_end|>",
                sep2: None,
            },
        }
    }

    /// Render alternating turns (human first) into one prompt string.
    ///
    /// The plain style has no multi-turn template; use [`plain_prompt`].
    pub fn render(self, turns: &[Turn]) -> String {
        let t = self.template();
        match self {
            Self::Plain => turns.iter().map(|turn| turn.value.as_str()).collect(),
            Self::V1 => {
                let seps = [t.sep, t.sep2.unwrap_or(t.sep)];
                let mut out = format!("{}{}", t.system, t.sep);
                for (i, turn) in turns.iter().enumerate() {
                    let role = t.roles[i % 2];
                    if turn.value.is_empty() {
                        out.push_str(&format!("{role}:"));
                    } else {
                        out.push_str(&format!("{role}: {}{}", turn.value, seps[i % 2]));
                    }
                }
                out
            }
            Self::Llama2 => {
                let sep2 = t.sep2.unwrap_or(t.sep);
                let mut out = String::new();
                for (i, turn) in turns.iter().enumerate() {
                    if turn.value.is_empty() {
                        continue;
                    }
                    if i % 2 == 0 {
                        let message = if i == 0 {
                            format!("<<SYS>>\n{}\n<</SYS>>\n\n{}", t.system, turn.value)
                        } else {
                            turn.value.clone()
                        };
                        out.push_str(&format!("{}[INST] {message} [/INST]", t.sep));
                    } else {
                        out.push_str(&format!(" {} {sep2}", turn.value));
                    }
                }
                out.strip_prefix(t.sep).map(str::to_string).unwrap_or(out)
            }
            Self::Mpt => {
                let mut out = format!("{}{}", t.system, t.sep);
                for (i, turn) in turns.iter().enumerate() {
                    out.push_str(t.roles[i % 2]);
                    if !turn.value.is_empty() {
                        out.push_str(&turn.value);
                        out.push_str(t.sep);
                    }
                }
                out
            }
        }
    }
}

/// Drop a single leading assistant turn, then require strict alternation
/// starting with a human turn.
pub fn ordered_turns(turns: &[Turn]) -> Result<&[Turn], TokenizeError> {
    let turns = match turns.first() {
        Some(first) if first.from == Speaker::Assistant => &turns[1..],
        _ => turns,
    };
    if turns.is_empty() {
        return Err(TokenizeError::EmptyConversation);
    }
    for (index, turn) in turns.iter().enumerate() {
        let expected = if index % 2 == 0 {
            Speaker::Human
        } else {
            Speaker::Assistant
        };
        if turn.from != expected {
            return Err(TokenizeError::RoleOrder { index, expected });
        }
    }
    Ok(turns)
}

/// Move the image placeholder of every turn to the front, followed by a
/// newline, and optionally wrap it in start/end tokens.
pub fn prepare_multimodal(turns: &mut [Turn], use_im_start_end: bool) {
    for turn in turns.iter_mut() {
        if turn.value.contains(IMAGE_PLACEHOLDER) {
            let rest = turn.value.replace(IMAGE_PLACEHOLDER, "");
            turn.value = format!("{IMAGE_PLACEHOLDER}\n{}", rest.trim())
                .trim()
                .to_string();
        }
        if use_im_start_end {
            let wrapped = format!("{IMAGE_START}{IMAGE_PLACEHOLDER}{IMAGE_END}");
            turn.value = turn.value.replace(IMAGE_PLACEHOLDER, &wrapped);
        }
    }
}

/// The plain-style prompt: placeholder, caption and separator.
///
/// Requires exactly two turns, human then assistant, with the placeholder in
/// the first.
pub fn plain_prompt(turns: &[Turn]) -> Result<String, TokenizeError> {
    if turns.len() != 2 {
        return Err(TokenizeError::PlainShape(format!(
            "expected 2 turns, got {}",
            turns.len()
        )));
    }
    for (index, expected) in [Speaker::Human, Speaker::Assistant].into_iter().enumerate() {
        if turns[index].from != expected {
            return Err(TokenizeError::RoleOrder { index, expected });
        }
    }
    if !turns[0].value.contains(IMAGE_PLACEHOLDER) {
        return Err(TokenizeError::PlainShape(
            "first turn has no image placeholder".to_string(),
        ));
    }
    let sep = PromptStyle::Plain.template().sep;
    Ok(format!("{IMAGE_PLACEHOLDER}{}{sep}", turns[1].value))
}
