//! Encoder presets and tunable video options.
//!
//! A [`Preset`] is a named, reusable encoder configuration. Video options are
//! flag templates containing [`VALUE_PLACEHOLDER`]; a setting either supplies
//! a fixed value or asks for the value to be auto-tuned over the option's
//! [`TuningDomain`].

use ef_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::engine::AudioRuleSet;

/// Placeholder replaced by an option's value in its flag template.
pub const VALUE_PLACEHOLDER: &str = "<val>";

/// Placeholder replaced by the pass number in two-pass commands.
pub const PASS_PLACEHOLDER: &str = "%passnum%";

/// Encoder name meaning "pass the stream through unchanged".
pub const COPY_ENCODER: &str = "copy";

/// Largest number of values a range domain may expand to. Every candidate
/// costs one trial encode.
pub const MAX_RANGE_CANDIDATES: u64 = 1_000;

// ---------------------------------------------------------------------------
// Tunable options
// ---------------------------------------------------------------------------

/// Candidate values an auto-tuned option is searched over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TuningDomain {
    /// Every integer between `start` and `end` inclusive, tried nearest to
    /// `start` first.
    Range { start: i64, end: i64 },
    /// Discrete values tried in declared order.
    Values { values: Vec<String> },
}

impl TuningDomain {
    /// Candidate values in trial order.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if a range holds more than
    /// [`MAX_RANGE_CANDIDATES`] values.
    pub fn candidates(&self) -> Result<Vec<String>> {
        match *self {
            TuningDomain::Range { start, end } => {
                // `start` is one end of the range, so walking from it towards
                // `end` yields the values nearest to it first.
                let span = (i128::from(end) - i128::from(start)).unsigned_abs();
                if span >= u128::from(MAX_RANGE_CANDIDATES) {
                    return Err(Error::Configuration(format!(
                        "range {start}..={end} has more than {MAX_RANGE_CANDIDATES} values"
                    )));
                }
                let step: i128 = if end < start { -1 } else { 1 };
                Ok((0..=span as i128)
                    .map(|k| (i128::from(start) + step * k).to_string())
                    .collect())
            }
            TuningDomain::Values { ref values } => Ok(values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()),
        }
    }
}

/// Definition of one encoder flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableOption {
    pub name: String,
    /// Flag template, e.g. `-crf <val>`.
    pub arg: String,
    /// Option carries the pass number itself (`pass=%passnum%`) instead of a
    /// separate `-pass` flag.
    #[serde(default)]
    pub include_pass: bool,
    /// Option is left out when the preset targets a video bitrate.
    #[serde(default)]
    pub disabled_by_video_bitrate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<TuningDomain>,
}

impl TunableOption {
    /// Substitute `value` into the flag template.
    pub fn render(&self, value: &str) -> String {
        self.arg.replace(VALUE_PLACEHOLDER, value.trim())
    }

    /// Candidate values for auto-tuning.
    pub fn candidates(&self) -> Result<Vec<String>> {
        let domain = self.domain.as_ref().ok_or_else(|| {
            Error::Configuration(format!("option '{}' has no tuning domain", self.name))
        })?;
        let candidates = domain.candidates().map_err(|e| match e {
            Error::Configuration(reason) => {
                Error::Configuration(format!("option '{}': {reason}", self.name))
            }
            other => other,
        })?;
        if candidates.is_empty() {
            return Err(Error::Configuration(format!(
                "option '{}' has an empty tuning domain",
                self.name
            )));
        }
        Ok(candidates)
    }
}

/// A preset's use of one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOptionSetting {
    pub name: String,
    /// The option definition. `None` when the definition has been removed
    /// from the encoder's option list since the preset was saved.
    #[serde(default)]
    pub option: Option<TunableOption>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub auto_calculate: bool,
}

impl VideoOptionSetting {
    pub fn fixed(option: TunableOption, value: &str) -> Self {
        Self {
            name: option.name.clone(),
            option: Some(option),
            value: Some(value.to_string()),
            auto_calculate: false,
        }
    }

    pub fn auto(option: TunableOption) -> Self {
        Self {
            name: option.name.clone(),
            option: Some(option),
            value: None,
            auto_calculate: true,
        }
    }

    /// The option definition; a missing one is a configuration error.
    pub fn definition(&self) -> Result<&TunableOption> {
        self.option.as_ref().ok_or_else(|| {
            Error::Configuration(format!(
                "option '{}' is no longer available; rebuild the preset",
                self.name
            ))
        })
    }

    /// Fixed settings with a non-blank value.
    fn is_fixed(&self) -> bool {
        !self.auto_calculate && self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Preset
// ---------------------------------------------------------------------------

/// A named encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    /// Target container (muxer) name, e.g. "matroska". Empty keeps the
    /// source extension.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub hardware_decoder: Option<String>,
    #[serde(default)]
    pub extra_arguments: Option<String>,
    /// Target video bitrate in kbit/s. Presence enables two-pass encoding.
    #[serde(default)]
    pub video_bitrate: Option<u32>,
    pub video_encoder: String,
    #[serde(default)]
    pub video_options: Vec<VideoOptionSetting>,
    #[serde(default)]
    pub audio_rules: AudioRuleSet,
}

impl Preset {
    pub fn new(name: &str, video_encoder: &str) -> Self {
        Self {
            name: name.to_string(),
            container: None,
            frame_rate: None,
            hardware_decoder: None,
            extra_arguments: None,
            video_bitrate: None,
            video_encoder: video_encoder.to_string(),
            video_options: Vec::new(),
            audio_rules: AudioRuleSet::default(),
        }
    }

    pub fn is_copy_encoder(&self) -> bool {
        self.video_encoder.trim().eq_ignore_ascii_case(COPY_ENCODER)
    }

    pub fn is_two_pass(&self) -> bool {
        self.video_bitrate.is_some()
    }

    pub fn has_auto_tuned_options(&self) -> bool {
        self.video_options.iter().any(|o| o.auto_calculate)
    }

    /// Auto-tuned settings in declared order.
    pub fn auto_tuned_options(&self) -> impl Iterator<Item = &VideoOptionSetting> {
        self.video_options.iter().filter(|o| o.auto_calculate)
    }

    /// `-hwaccel <tag> `, or empty.
    pub fn hardware_prefix(&self) -> String {
        non_blank(self.hardware_decoder.as_deref())
            .map(|tag| format!("-hwaccel {tag} "))
            .unwrap_or_default()
    }

    /// ` -r <fps>`, or empty.
    pub fn frame_rate_fragment(&self) -> String {
        self.frame_rate
            .map(|fps| format!(" -r {fps}"))
            .unwrap_or_default()
    }

    /// Extra arguments, trimmed, with one leading space; or empty.
    pub fn extra_fragment(&self) -> String {
        non_blank(self.extra_arguments.as_deref())
            .map(|extra| format!(" {extra}"))
            .unwrap_or_default()
    }

    /// Whether some fixed option carries the pass number itself.
    pub fn pass_in_options(&self) -> Result<bool> {
        for setting in self.video_options.iter().filter(|s| s.is_fixed()) {
            if setting.definition()?.include_pass {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rendered fixed options, each with a leading space.
    ///
    /// With a target bitrate, options that carry the pass number get
    /// ` pass=%passnum%` appended and options disabled by a bitrate are
    /// skipped.
    pub fn fixed_options_fragment(&self) -> Result<String> {
        let mut fragment = String::new();
        for setting in self.video_options.iter().filter(|s| s.is_fixed()) {
            let option = setting.definition()?;
            let value = setting.value.as_deref().unwrap_or_default();
            let mut param = format!(" {}", option.render(value));
            if self.is_two_pass() {
                if option.include_pass {
                    param.push_str(&format!(" pass={PASS_PLACEHOLDER}"));
                }
                if option.disabled_by_video_bitrate {
                    continue;
                }
            }
            fragment.push_str(&param);
        }
        Ok(fragment)
    }

    /// Check that every referenced option definition and tuning domain exists.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("preset name is empty".into()));
        }
        if self.video_encoder.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "preset '{}' has no video encoder",
                self.name
            )));
        }
        for setting in &self.video_options {
            let option = setting.definition()?;
            if setting.auto_calculate || option.domain.is_some() {
                option.candidates()?;
            }
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn crf() -> TunableOption {
        TunableOption {
            name: "crf".into(),
            arg: "-crf <val>".into(),
            include_pass: false,
            disabled_by_video_bitrate: true,
            domain: Some(TuningDomain::Range { start: 23, end: 26 }),
        }
    }

    fn x265_params() -> TunableOption {
        TunableOption {
            name: "x265-params".into(),
            arg: "-x265-params log-level=error:<val>".into(),
            include_pass: true,
            disabled_by_video_bitrate: false,
            domain: None,
        }
    }

    #[test]
    fn range_candidates_nearest_start_first() {
        let domain = TuningDomain::Range { start: 23, end: 26 };
        assert_eq!(domain.candidates().unwrap(), vec!["23", "24", "25", "26"]);

        let domain = TuningDomain::Range { start: 5, end: 1 };
        assert_eq!(domain.candidates().unwrap(), vec!["5", "4", "3", "2", "1"]);

        let domain = TuningDomain::Range { start: 7, end: 7 };
        assert_eq!(domain.candidates().unwrap(), vec!["7"]);
    }

    #[test]
    fn range_crossing_zero_walks_away_from_start() {
        let domain = TuningDomain::Range { start: 2, end: -2 };
        assert_eq!(domain.candidates().unwrap(), vec!["2", "1", "0", "-1", "-2"]);
    }

    #[test]
    fn range_at_integer_limits() {
        let domain = TuningDomain::Range {
            start: i64::MAX,
            end: i64::MAX - 2,
        };
        assert_eq!(
            domain.candidates().unwrap(),
            vec![
                i64::MAX.to_string(),
                (i64::MAX - 1).to_string(),
                (i64::MAX - 2).to_string()
            ]
        );

        let domain = TuningDomain::Range {
            start: i64::MIN,
            end: i64::MAX,
        };
        assert_matches!(domain.candidates(), Err(Error::Configuration(_)));
    }

    #[test]
    fn range_size_is_bounded() {
        let at_limit = TuningDomain::Range {
            start: 0,
            end: MAX_RANGE_CANDIDATES as i64 - 1,
        };
        assert_eq!(at_limit.candidates().unwrap().len(), MAX_RANGE_CANDIDATES as usize);

        let over = TuningDomain::Range {
            start: 0,
            end: MAX_RANGE_CANDIDATES as i64,
        };
        assert_matches!(over.candidates(), Err(Error::Configuration(_)));
    }

    #[test]
    fn discrete_candidates_in_declared_order() {
        let domain = TuningDomain::Values {
            values: vec!["slow ".into(), "medium".into(), "".into(), "fast".into()],
        };
        assert_eq!(domain.candidates().unwrap(), vec!["slow", "medium", "fast"]);
    }

    #[test]
    fn missing_domain_is_configuration_error() {
        assert_matches!(x265_params().candidates(), Err(Error::Configuration(_)));
    }

    #[test]
    fn missing_definition_is_configuration_error() {
        let setting = VideoOptionSetting {
            name: "gone".into(),
            option: None,
            value: Some("1".into()),
            auto_calculate: false,
        };
        assert_matches!(setting.definition(), Err(Error::Configuration(_)));
    }

    #[test]
    fn fragments() {
        let mut preset = Preset::new("HEVC", "libx265");
        assert_eq!(preset.hardware_prefix(), "");
        assert_eq!(preset.frame_rate_fragment(), "");
        assert_eq!(preset.extra_fragment(), "");

        preset.hardware_decoder = Some("cuda".into());
        preset.frame_rate = Some(23.976);
        preset.extra_arguments = Some("  -tune film ".into());
        assert_eq!(preset.hardware_prefix(), "-hwaccel cuda ");
        assert_eq!(preset.frame_rate_fragment(), " -r 23.976");
        assert_eq!(preset.extra_fragment(), " -tune film");

        preset.frame_rate = Some(24.0);
        assert_eq!(preset.frame_rate_fragment(), " -r 24");
    }

    #[test]
    fn fixed_options_single_pass() {
        let mut preset = Preset::new("HEVC", "libx265");
        preset.video_options = vec![
            VideoOptionSetting::fixed(crf(), " 22 "),
            VideoOptionSetting::fixed(x265_params(), "aq-mode=3"),
            VideoOptionSetting::auto(crf()),
        ];
        assert_eq!(
            preset.fixed_options_fragment().unwrap(),
            " -crf 22 -x265-params log-level=error:aq-mode=3"
        );
        assert!(preset.pass_in_options().unwrap());
        assert!(preset.has_auto_tuned_options());
    }

    #[test]
    fn fixed_options_two_pass() {
        let mut preset = Preset::new("HEVC", "libx265");
        preset.video_bitrate = Some(4000);
        preset.video_options = vec![
            VideoOptionSetting::fixed(crf(), "22"),
            VideoOptionSetting::fixed(x265_params(), "aq-mode=3"),
        ];
        assert_eq!(
            preset.fixed_options_fragment().unwrap(),
            " -x265-params log-level=error:aq-mode=3 pass=%passnum%"
        );
    }

    #[test]
    fn blank_fixed_values_are_skipped() {
        let mut preset = Preset::new("HEVC", "libx265");
        preset.video_options = vec![VideoOptionSetting::fixed(crf(), "  ")];
        assert_eq!(preset.fixed_options_fragment().unwrap(), "");
    }

    #[test]
    fn copy_encoder_detection() {
        assert!(Preset::new("Remux", "Copy").is_copy_encoder());
        assert!(!Preset::new("HEVC", "libx265").is_copy_encoder());
    }

    #[test]
    fn validate_checks_auto_domains() {
        let mut preset = Preset::new("HEVC", "libx265");
        preset.video_options = vec![VideoOptionSetting::auto(x265_params())];
        assert_matches!(preset.validate(), Err(Error::Configuration(_)));

        preset.video_options = vec![VideoOptionSetting::auto(crf())];
        assert!(preset.validate().is_ok());
    }

    #[test]
    fn validate_rejects_oversized_ranges() {
        let mut huge = crf();
        huge.domain = Some(TuningDomain::Range {
            start: 0,
            end: i64::MAX,
        });

        let mut preset = Preset::new("HEVC", "libx265");
        preset.video_options = vec![VideoOptionSetting::auto(huge.clone())];
        let err = preset.validate().unwrap_err();
        assert!(err.to_string().contains("option 'crf'"), "{err}");

        // Also rejected while the option is only used with a fixed value.
        preset.video_options = vec![VideoOptionSetting::fixed(huge, "22")];
        assert_matches!(preset.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn deserialize_minimal_preset() {
        let json = r#"{
            "name": "Remux",
            "video_encoder": "copy",
            "audio_rules": [
                { "conditions": [{ "type": "any" }], "action": "copy" }
            ]
        }"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert!(preset.is_copy_encoder());
        assert_eq!(preset.audio_rules.rules().len(), 1);
        assert!(preset.video_options.is_empty());
    }
}
