//! Leaf conditions that evaluate against a single audio [`MediaStream`].
//!
//! Conditions are combined by logical AND inside an
//! [`AudioStreamRule`](crate::AudioStreamRule).

use ef_core::MediaStream;
use serde::{Deserialize, Serialize};

use crate::comparator::NumberComparator;

/// Case-insensitive set membership with include/exclude polarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMatch {
    pub values: Vec<String>,
    /// `true` to match streams in the set, `false` to match streams outside it.
    #[serde(default = "default_matches")]
    pub matches: bool,
}

fn default_matches() -> bool {
    true
}

impl SetMatch {
    pub fn including(values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| v.to_string()).collect(),
            matches: true,
        }
    }

    pub fn excluding(values: &[&str]) -> Self {
        Self {
            matches: false,
            ..Self::including(values)
        }
    }

    fn test(&self, candidate: &str) -> bool {
        let contained = self
            .values
            .iter()
            .any(|v| v.trim().eq_ignore_ascii_case(candidate.trim()));
        contained == self.matches
    }
}

/// A leaf predicate over one audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StreamCondition {
    /// Always matches.
    Any,
    /// Matches on the codec short name.
    Codec(SetMatch),
    /// Matches on the language tag. Untagged streams always match.
    Language(SetMatch),
    /// Matches when `channels <comparator> value`. Unknown channel counts
    /// compare as zero.
    Channels {
        comparator: NumberComparator,
        value: u32,
    },
}

impl StreamCondition {
    /// Evaluate this condition against the given stream.
    pub fn evaluate(&self, stream: &MediaStream) -> bool {
        match self {
            StreamCondition::Any => true,
            StreamCondition::Codec(set) => set.test(&stream.codec_name),
            StreamCondition::Language(set) => match stream.language.as_deref() {
                Some(language) => set.test(language),
                None => true,
            },
            StreamCondition::Channels { comparator, value } => {
                comparator.compare(stream.channels.unwrap_or(0), *value)
            }
        }
    }
}
