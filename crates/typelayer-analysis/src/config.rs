//! Analysis configuration.

use serde::{Deserialize, Serialize};

/// Default bound on how many type layers a single resolution may walk.
pub const DEFAULT_MAX_TYPE_LAYER: usize = 256;

/// Which resolution strategy indirect calls get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MltaMode {
    /// Indirect calls resolve to nothing.
    NoIndirectCalls,
    /// Every function whose signature matches the call site is a target; no
    /// layering.
    MatchSignatures,
    /// Full multi-layer refinement of the signature-matched set.
    #[default]
    FullMlta,
}

/// Configuration for [`crate::IndirectCallAnalysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Resolution mode.
    pub mode: MltaMode,

    /// Hard cap on layer-walk depth per call site.
    pub max_type_layer: usize,

    /// When set, escape and cap hits stop the layer walk (sound but less
    /// precise). When clear, walking continues past them.
    pub sound: bool,

    /// When set, every confinement and propagation emission collapses onto
    /// field index 0, removing the field dimension.
    pub field_insensitive: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mode: MltaMode::FullMlta,
            max_type_layer: DEFAULT_MAX_TYPE_LAYER,
            sound: false,
            field_insensitive: false,
        }
    }
}

impl AnalysisConfig {
    /// Set the resolution mode.
    pub fn with_mode(mut self, mode: MltaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the layer-walk depth bound.
    pub fn with_max_type_layer(mut self, max: usize) -> Self {
        self.max_type_layer = max;
        self
    }

    /// Enable or disable sound mode.
    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }

    /// Enable or disable field-insensitive collection.
    pub fn with_field_insensitive(mut self, field_insensitive: bool) -> Self {
        self.field_insensitive = field_insensitive;
        self
    }
}
