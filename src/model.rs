//! Collaborator contracts for the trained models.
//!
//! The acoustic model and the vocoder are black boxes trained elsewhere.
//! This crate never looks inside them — it only needs the inference
//! contract, the variant tag that selects the decode options, and the
//! conditioning-space metadata (speaker/language/embedding) that decides
//! which slots are mandatory.

use candle_core::Tensor;
use rand::RngCore;

use crate::batch::ConditioningBatch;
use crate::config::DecodeConfig;
use crate::Result;

/// Which decode-option family the loaded acoustic model speaks.
///
/// A model of neither known variant is [`Unknown`](ModelVariant::Unknown);
/// that is the default path, not an error — it receives only the universal
/// teacher-forcing flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    /// Flow-based model: accepts noise scales, produces a waveform
    /// end-to-end.
    Flow,
    /// Autoregressive attention model: accepts stopping thresholds, length
    /// ratios and attention windows, produces features + attention weights.
    Autoregressive,
    /// Anything else.
    Unknown,
}

/// Everything one acoustic-model inference call may produce.
///
/// Exactly one of the feature path (`feat_gen` et al.) and the end-to-end
/// waveform path (`wav`) is populated by a given model.
#[derive(Debug, Default)]
pub struct AcousticOutput {
    /// Generated (normalized) feature sequence `[T, D]`.
    pub feat_gen: Option<Tensor>,
    /// Denormalized feature sequence `[T, D]`.
    pub feat_gen_denorm: Option<Tensor>,
    /// Attention weights, `[T_out, T_in]` or `[h1, h2, T_out, T_in]`.
    pub att_w: Option<Tensor>,
    /// Stop-token probabilities `[T_out]`.
    pub prob: Option<Tensor>,
    /// Auxiliary pitch curve `[T]`, forwarded to the vocoder when present.
    pub pitch: Option<Tensor>,
    /// Waveform samples `[T_wav]` (end-to-end models only).
    pub wav: Option<Tensor>,
}

/// A trained acoustic model.
pub trait AcousticModel {
    /// Which decode-option family this model speaks.
    fn variant(&self) -> ModelVariant;

    /// Size of the speaker-id space, `None` when the model is not
    /// multi-speaker. `Some` makes the `sids` slot mandatory.
    fn speaker_count(&self) -> Option<usize>;

    /// Size of the language-id space, `None` when monolingual. `Some`
    /// makes the `lids` slot mandatory.
    fn language_count(&self) -> Option<usize>;

    /// Speaker-embedding dimension, `None` when embeddings are unused.
    /// `Some` makes the `spembs` slot mandatory.
    fn speaker_embed_dim(&self) -> Option<usize>;

    /// Output sampling rate declared by the model, if any.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Whether the model conditions on global-style tokens (which makes
    /// reference speech mandatory at synthesis time).
    fn uses_global_style(&self) -> bool {
        false
    }

    /// Run one inference call. The batch holds every supplied conditioning
    /// slot; `config` carries exactly the options this variant accepts.
    /// Errors propagate to the caller unmodified.
    fn inference(
        &self,
        batch: &ConditioningBatch,
        config: &DecodeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<AcousticOutput>;
}

/// Feature input accepted by a vocoder.
#[derive(Debug)]
pub enum VocoderFeature {
    /// A time-major feature sequence `[T, D]` (or `[T, L]` token layers).
    Frames(Tensor),
    /// Per-resolution sub-sequences, keyed by resolution value.
    MultiResolution(Vec<(u32, Tensor)>),
}

/// A trained vocoder converting acoustic features into a waveform.
pub trait Vocoder {
    /// Output sampling rate declared by the vocoder, if any.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Convert features (optionally with an auxiliary 1-D pitch curve)
    /// into waveform samples `[T_wav]`.
    fn synthesize(&self, feature: &VocoderFeature, pitch: Option<&Tensor>) -> Result<Tensor>;
}
