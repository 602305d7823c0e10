//! The [`AudioRuleSet`] maps probed audio streams onto output mappings.
//!
//! Rules are evaluated in declared order and the first rule whose conditions
//! all hold governs the stream. Streams that no rule matches are dropped.

use ef_core::{Error, MediaStream, Result};
use serde::{Deserialize, Serialize};

use crate::rule::{AudioAction, AudioStreamRule};

/// Codec choice for one emitted audio mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCodec {
    Copy,
    Encode {
        encoder: String,
        bitrate: Option<String>,
    },
}

/// One emitted audio mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOutput {
    /// Index of the source stream within the input container.
    pub source_index: u32,
    /// Sequential index among emitted audio outputs.
    pub output_index: usize,
    pub codec: OutputCodec,
}

impl AudioOutput {
    /// The ffmpeg mapping for this output, with a leading space.
    pub fn arguments(&self) -> String {
        let map = format!(" -map 0:{} -c:a:{}", self.source_index, self.output_index);
        match &self.codec {
            OutputCodec::Copy => format!("{map} copy"),
            OutputCodec::Encode {
                encoder,
                bitrate: Some(bitrate),
            } => format!("{map} {encoder} -b:a:{} {bitrate}", self.output_index),
            OutputCodec::Encode {
                encoder,
                bitrate: None,
            } => format!("{map} {encoder}"),
        }
    }
}

/// An ordered list of audio stream rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRuleSet {
    rules: Vec<AudioStreamRule>,
}

impl AudioRuleSet {
    pub fn new(rules: Vec<AudioStreamRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AudioStreamRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Return the first rule whose conditions all hold, with its position.
    pub fn find_matching_rule(&self, stream: &MediaStream) -> Option<(usize, &AudioStreamRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(stream))
    }

    /// Codecs to emit for one stream, given how many audio outputs have
    /// already been emitted.
    fn outputs_for(&self, stream: &MediaStream, emitted: usize) -> Result<Vec<OutputCodec>> {
        let Some((position, rule)) = self.find_matching_rule(stream) else {
            tracing::trace!(index = stream.index, codec = %stream.codec_name, "no audio rule matched; dropping stream");
            return Ok(Vec::new());
        };

        let outputs = match rule.action {
            AudioAction::Copy => vec![OutputCodec::Copy],
            AudioAction::Delete => Vec::new(),
            AudioAction::DeleteUnlessOnly => {
                if position + 1 == self.rules.len() && emitted == 0 {
                    vec![OutputCodec::Copy]
                } else {
                    Vec::new()
                }
            }
            AudioAction::Clone => vec![OutputCodec::Copy, encode_codec(rule, position)?],
            AudioAction::Encode => vec![encode_codec(rule, position)?],
        };
        tracing::trace!(
            index = stream.index,
            rule = position,
            action = %rule.action,
            outputs = outputs.len(),
            "audio rule matched"
        );
        Ok(outputs)
    }

    /// Plan every audio stream, assigning output indices sequentially.
    pub fn plan<'a, I>(&self, streams: I) -> Result<Vec<AudioOutput>>
    where
        I: IntoIterator<Item = &'a MediaStream>,
    {
        let mut planned = Vec::new();
        for stream in streams {
            for codec in self.outputs_for(stream, planned.len())? {
                planned.push(AudioOutput {
                    source_index: stream.index,
                    output_index: planned.len(),
                    codec,
                });
            }
        }
        Ok(planned)
    }
}

fn encode_codec(rule: &AudioStreamRule, position: usize) -> Result<OutputCodec> {
    let encoder = rule
        .encoder
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "audio rule {position} ({}) has no target encoder",
                rule.action
            ))
        })?;
    Ok(OutputCodec::Encode {
        encoder: encoder.to_string(),
        bitrate: rule
            .bitrate
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string),
    })
}
