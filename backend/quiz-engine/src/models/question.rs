use percent_encoding::percent_decode_str;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QuizError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Mixed,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Mixed => "mixed",
        }
    }

    /// Value sent to the trivia service. `Mixed` omits the filter entirely.
    pub fn api_filter(&self) -> Option<&'static str> {
        match self {
            Difficulty::Mixed => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "mixed" | "any" | "" => Ok(Difficulty::Mixed),
            other => Err(QuizError::InvalidParameters(format!(
                "unknown difficulty '{}'",
                other
            ))),
        }
    }
}

/// A multiple-choice question ready for presentation.
///
/// `presented_options` is shuffled exactly once when the question is built and
/// then travels with the question (including through session snapshots), so a
/// re-render or a resume never reorders the options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub category: String,
    pub difficulty: Difficulty,
    pub prompt_html: String,
    pub correct_answer: String,
    pub distractors: Vec<String>,
    pub presented_options: Vec<String>,
}

impl Question {
    pub fn is_correct(&self, answer: &str) -> bool {
        self.correct_answer == answer
    }

    pub fn offers(&self, option: &str) -> bool {
        self.presented_options.iter().any(|o| o == option)
    }
}

/// Question object as returned by the trivia service (url3986-encoded text).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawQuestion {
    pub category: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub difficulty: String,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

impl RawQuestion {
    /// Decodes all text fields and fixes the option order with one shuffle.
    pub fn into_question<R: Rng + ?Sized>(self, rng: &mut R) -> Question {
        let correct_answer = decode_text(&self.correct_answer);
        let distractors: Vec<String> = self
            .incorrect_answers
            .iter()
            .map(|a| decode_text(a))
            .collect();

        let mut presented_options = Vec::with_capacity(distractors.len() + 1);
        presented_options.push(correct_answer.clone());
        presented_options.extend(distractors.iter().cloned());
        presented_options.shuffle(rng);

        let difficulty = decode_text(&self.difficulty)
            .parse()
            .unwrap_or(Difficulty::Mixed);

        Question {
            category: decode_text(&self.category),
            difficulty,
            prompt_html: decode_text(&self.question),
            correct_answer,
            distractors,
            presented_options,
        }
    }
}

/// Percent-decodes a url3986 field. Invalid UTF-8 sequences are replaced
/// rather than rejected so one bad question cannot sink the whole set.
pub fn decode_text(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
