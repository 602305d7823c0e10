//! # ef-rules
//!
//! Declarative encoder configuration for media processing.
//!
//! This crate holds everything a preset is made of and the pure matching
//! logic that maps probed audio streams onto output mappings.
//!
//! ## Overview
//!
//! - [`NumberComparator`] -- the six numeric comparison operators.
//! - [`StreamCondition`] -- leaf predicates that test one audio stream.
//! - [`AudioStreamRule`] -- conditions combined by AND, plus an action.
//! - [`AudioRuleSet`] -- first-match evaluation and the audio output plan.
//! - [`Preset`] -- a reusable encoder configuration, including tunable
//!   video options ([`TunableOption`], [`TuningDomain`]).

pub mod comparator;
pub mod condition;
pub mod engine;
pub mod preset;
pub mod rule;

pub use comparator::NumberComparator;
pub use condition::{SetMatch, StreamCondition};
pub use engine::{AudioOutput, AudioRuleSet, OutputCodec};
pub use preset::{
    Preset, TunableOption, TuningDomain, VideoOptionSetting, COPY_ENCODER, PASS_PLACEHOLDER,
    VALUE_PLACEHOLDER,
};
pub use rule::{AudioAction, AudioStreamRule};
