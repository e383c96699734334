//! Decode-time configuration.
//!
//! The option set passed to the acoustic model depends on which model
//! variant is loaded: a flow-based model takes noise scales, an
//! autoregressive attention model takes stopping/attention-window options,
//! and anything else takes only the universal teacher-forcing flag. The
//! active set is fixed once at construction by matching on
//! [`ModelVariant`](crate::model::ModelVariant); per-call overrides produce
//! a fresh merged copy and never mutate the original.

use serde::{Deserialize, Serialize};

use crate::model::ModelVariant;
use crate::{Error, Result};

/// Construction-time decode flags, covering every option of every variant.
///
/// Irrelevant flags are simply ignored when the loaded model's variant does
/// not use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeFlags {
    /// Use ground-truth features to guide decoding.
    pub use_teacher_forcing: bool,

    // --- Flow-based variant ---
    /// Noise scale for the flow.
    pub noise_scale: f64,
    /// Noise scale for the stochastic duration predictor.
    pub noise_scale_dur: f64,

    // --- Autoregressive variant ---
    /// Stop-token threshold.
    pub threshold: f64,
    /// Minimum output length as a ratio of the input length.
    pub minlenratio: f64,
    /// Maximum output length as a ratio of the input length.
    pub maxlenratio: f64,
    /// Constrain attention to be monotonic.
    pub use_att_constraint: bool,
    /// Use a dynamic filter over attention.
    pub use_dynamic_filter: bool,
    /// Attention window size looking forward.
    pub forward_window: usize,
    /// Attention window size looking backward.
    pub backward_window: usize,
}

impl Default for DecodeFlags {
    fn default() -> Self {
        Self {
            use_teacher_forcing: false,
            noise_scale: 0.667,
            noise_scale_dur: 0.8,
            threshold: 0.5,
            minlenratio: 0.0,
            maxlenratio: 10.0,
            use_att_constraint: false,
            use_dynamic_filter: false,
            forward_window: 4,
            backward_window: 2,
        }
    }
}

/// Options for a flow-based acoustic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowOptions {
    pub noise_scale: f64,
    pub noise_scale_dur: f64,
}

/// Options for an autoregressive attention acoustic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoregressiveOptions {
    pub threshold: f64,
    pub minlenratio: f64,
    pub maxlenratio: f64,
    pub use_att_constraint: bool,
    pub use_dynamic_filter: bool,
    pub forward_window: usize,
    pub backward_window: usize,
}

/// The variant-specific part of the decode configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariantOptions {
    /// Flow-based model (noise scales).
    Flow(FlowOptions),
    /// Autoregressive attention model (stopping + attention windows).
    Autoregressive(AutoregressiveOptions),
    /// Unknown variant — the universal flag only. Not an error: this is the
    /// default path for models of neither known variant.
    Universal,
}

/// The full decode configuration handed to the acoustic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeConfig {
    /// Universal flag, valid for every variant.
    pub use_teacher_forcing: bool,
    /// Variant-specific options.
    pub options: VariantOptions,
}

impl DecodeConfig {
    /// Build the configuration for a given model variant, taking exactly
    /// the flags that variant's inference contract accepts.
    pub fn for_variant(variant: ModelVariant, flags: &DecodeFlags) -> Self {
        let options = match variant {
            ModelVariant::Flow => VariantOptions::Flow(FlowOptions {
                noise_scale: flags.noise_scale,
                noise_scale_dur: flags.noise_scale_dur,
            }),
            ModelVariant::Autoregressive => {
                VariantOptions::Autoregressive(AutoregressiveOptions {
                    threshold: flags.threshold,
                    minlenratio: flags.minlenratio,
                    maxlenratio: flags.maxlenratio,
                    use_att_constraint: flags.use_att_constraint,
                    use_dynamic_filter: flags.use_dynamic_filter,
                    forward_window: flags.forward_window,
                    backward_window: flags.backward_window,
                })
            }
            ModelVariant::Unknown => VariantOptions::Universal,
        };
        Self {
            use_teacher_forcing: flags.use_teacher_forcing,
            options,
        }
    }

    /// Return a fresh copy with `over` merged on top: overridden options
    /// win, everything else is retained. Setting an option the active
    /// variant does not accept is an error — the model would otherwise
    /// reject the call as an unrecognized option.
    pub fn merged(&self, over: &DecodeOverride) -> Result<DecodeConfig> {
        let mut merged = *self;
        if let Some(v) = over.use_teacher_forcing {
            merged.use_teacher_forcing = v;
        }
        match &mut merged.options {
            VariantOptions::Flow(flow) => {
                over.reject_autoregressive()?;
                if let Some(v) = over.noise_scale {
                    flow.noise_scale = v;
                }
                if let Some(v) = over.noise_scale_dur {
                    flow.noise_scale_dur = v;
                }
            }
            VariantOptions::Autoregressive(ar) => {
                over.reject_flow()?;
                if let Some(v) = over.threshold {
                    ar.threshold = v;
                }
                if let Some(v) = over.minlenratio {
                    ar.minlenratio = v;
                }
                if let Some(v) = over.maxlenratio {
                    ar.maxlenratio = v;
                }
                if let Some(v) = over.use_att_constraint {
                    ar.use_att_constraint = v;
                }
                if let Some(v) = over.use_dynamic_filter {
                    ar.use_dynamic_filter = v;
                }
                if let Some(v) = over.forward_window {
                    ar.forward_window = v;
                }
                if let Some(v) = over.backward_window {
                    ar.backward_window = v;
                }
            }
            VariantOptions::Universal => {
                over.reject_flow()?;
                over.reject_autoregressive()?;
            }
        }
        Ok(merged)
    }
}

/// A per-call shallow override of [`DecodeConfig`]. `None` fields keep the
/// stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodeOverride {
    pub use_teacher_forcing: Option<bool>,
    pub noise_scale: Option<f64>,
    pub noise_scale_dur: Option<f64>,
    pub threshold: Option<f64>,
    pub minlenratio: Option<f64>,
    pub maxlenratio: Option<f64>,
    pub use_att_constraint: Option<bool>,
    pub use_dynamic_filter: Option<bool>,
    pub forward_window: Option<usize>,
    pub backward_window: Option<usize>,
}

impl DecodeOverride {
    fn reject_flow(&self) -> Result<()> {
        if self.noise_scale.is_some() || self.noise_scale_dur.is_some() {
            return Err(Error::Config(
                "noise-scale options are only valid for a flow-based model".into(),
            ));
        }
        Ok(())
    }

    fn reject_autoregressive(&self) -> Result<()> {
        if self.threshold.is_some()
            || self.minlenratio.is_some()
            || self.maxlenratio.is_some()
            || self.use_att_constraint.is_some()
            || self.use_dynamic_filter.is_some()
            || self.forward_window.is_some()
            || self.backward_window.is_some()
        {
            return Err(Error::Config(
                "attention/stopping options are only valid for an autoregressive model".into(),
            ));
        }
        Ok(())
    }
}

/// How a flat multi-layer discrete-token sequence is ordered.
///
/// The vocoder's native contract accepts only `[T, L]` (time-major), so
/// `Sequence` input is transposed after reshaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixType {
    /// Flat sequence is time-major: reshape to `[T, L]`.
    Frame,
    /// Flat sequence is layer-major: reshape to `[L, T]`, then transpose.
    Sequence,
}

impl std::fmt::Display for MixType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixType::Frame => write!(f, "frame"),
            MixType::Sequence => write!(f, "sequence"),
        }
    }
}

/// Per-resolution decomposition table for multi-layer token features.
///
/// Layer `i` of a `[T, L]` feature becomes a sub-sequence downsampled by
/// `resolution / base`, keyed by its resolution value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionTable {
    /// Frame resolutions in milliseconds, one per token layer.
    pub resolutions: &'static [u32],
    /// Base resolution the flat feature is expressed in.
    pub base: u32,
}

impl ResolutionTable {
    /// Downsampling stride for the layer at `index`.
    pub fn stride(&self, index: usize) -> usize {
        (self.resolutions[index] / self.base) as usize
    }
}

impl Default for ResolutionTable {
    fn default() -> Self {
        Self {
            resolutions: &[20, 40],
            base: 20,
        }
    }
}
