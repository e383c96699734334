//! Synthesis orchestration.
//!
//! [`SingingGenerator`] wraps one acoustic model and an optional vocoder.
//! At construction it fixes the decode configuration for the loaded model
//! variant and derives which conditioning slots are mandatory. Each
//! `synthesize` call normalizes heterogeneous input into one conditioning
//! batch, invokes the model, derives alignment diagnostics, and — when the
//! model produced features instead of audio — runs the vocoder, including
//! multi-layer discrete-token remixing.
//!
//! The generator is stateless per call apart from its read-only
//! configuration and the explicit RNG it threads into the model.

use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::batch::{ConditioningBatch, ConditioningSlots};
use crate::config::{DecodeConfig, DecodeFlags, DecodeOverride, MixType, ResolutionTable};
use crate::duration::DurationCalculator;
use crate::model::{AcousticModel, AcousticOutput, Vocoder, VocoderFeature};
use crate::score::{ScoreInput, ScorePreprocessor};
use crate::{Error, Result};

/// Construction-time configuration for [`SingingGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Decode flags; the loaded variant picks the relevant subset.
    pub flags: DecodeFlags,
    /// Number of discrete-token layers in the model's feature output.
    /// Values above 1 trigger remixing before vocoding.
    pub discrete_token_layers: usize,
    /// Layout of a flat multi-layer token sequence.
    pub mix_type: MixType,
    /// Feed normalized features to the vocoder even when denormalized ones
    /// exist.
    pub prefer_normalized_feats: bool,
    /// Decompose multi-layer features into per-resolution sub-sequences.
    pub use_singomd: bool,
    /// Resolution table used by the decomposition.
    pub resolution_table: ResolutionTable,
    /// RNG seed for the model's stochastic components.
    pub seed: u64,
    /// Reseed before every call so repeated calls are bit-identical.
    pub always_fix_seed: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            flags: DecodeFlags::default(),
            discrete_token_layers: 1,
            mix_type: MixType::Frame,
            prefer_normalized_feats: false,
            use_singomd: false,
            resolution_table: ResolutionTable::default(),
            seed: 777,
            always_fix_seed: false,
        }
    }
}

/// Input for one synthesis call: either an already-aligned tensor or raw
/// score material still to be preprocessed.
#[derive(Debug)]
pub enum SynthesisInput {
    /// Pre-aligned text/label tensor.
    Tensor(Tensor),
    /// Musical score plus phoneme alignment or free text.
    Score(ScoreInput),
}

/// Everything one synthesis call produced.
#[derive(Debug, Default)]
pub struct SynthesisOutput {
    /// Normalized feature sequence.
    pub feat_gen: Option<Tensor>,
    /// Denormalized feature sequence.
    pub feat_gen_denorm: Option<Tensor>,
    /// Attention weights.
    pub att_w: Option<Tensor>,
    /// Stop-token probabilities.
    pub prob: Option<Tensor>,
    /// Auxiliary pitch curve.
    pub pitch: Option<Tensor>,
    /// Duration per input unit (u32, derived from attention).
    pub duration: Option<Tensor>,
    /// Alignment quality scalar (derived from attention).
    pub focus_rate: Option<f32>,
    /// Waveform samples.
    pub wav: Option<Tensor>,
}

/// Stateful wrapper around one acoustic model and an optional vocoder.
pub struct SingingGenerator {
    model: Box<dyn AcousticModel>,
    vocoder: Option<Box<dyn Vocoder>>,
    preprocessor: Option<Box<dyn ScorePreprocessor>>,
    duration_calculator: DurationCalculator,
    decode_config: DecodeConfig,
    config: GeneratorConfig,
    device: Device,
    rng: ChaCha8Rng,
}

impl SingingGenerator {
    pub fn new(
        model: Box<dyn AcousticModel>,
        vocoder: Option<Box<dyn Vocoder>>,
        preprocessor: Option<Box<dyn ScorePreprocessor>>,
        device: Device,
        config: GeneratorConfig,
    ) -> Self {
        let decode_config = DecodeConfig::for_variant(model.variant(), &config.flags);
        tracing::info!(
            variant = ?model.variant(),
            decode_config = ?decode_config,
            device = ?device,
            has_vocoder = vocoder.is_some(),
            "singing generator ready"
        );
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            model,
            vocoder,
            preprocessor,
            duration_calculator: DurationCalculator::new(),
            decode_config,
            config,
            device,
            rng,
        }
    }

    /// The decode configuration fixed at construction.
    pub fn decode_config(&self) -> &DecodeConfig {
        &self.decode_config
    }

    /// Whether a speaker id is mandatory (the model defines a speaker-id
    /// space).
    pub fn use_sids(&self) -> bool {
        self.model.speaker_count().is_some()
    }

    /// Whether a language id is mandatory.
    pub fn use_lids(&self) -> bool {
        self.model.language_count().is_some()
    }

    /// Whether a speaker embedding is mandatory.
    pub fn use_spembs(&self) -> bool {
        self.model.speaker_embed_dim().is_some()
    }

    /// Whether reference speech is needed (teacher forcing requested, or
    /// the model conditions on global-style tokens).
    pub fn use_speech(&self) -> bool {
        self.decode_config.use_teacher_forcing || self.model.uses_global_style()
    }

    /// Output sampling rate: the vocoder's declared rate wins over the
    /// acoustic model's; `None` when neither declares one.
    pub fn sample_rate(&self) -> Option<u32> {
        self.vocoder
            .as_ref()
            .and_then(|v| v.sample_rate())
            .or_else(|| self.model.sample_rate())
    }

    /// Run one synthesis call.
    ///
    /// Fails before any model invocation when a mandatory conditioning
    /// slot is missing. `decode_override` is merged on top of the stored
    /// configuration for this call only.
    pub fn synthesize(
        &mut self,
        utt_id: &str,
        input: SynthesisInput,
        mut slots: ConditioningSlots,
        decode_override: Option<&DecodeOverride>,
    ) -> Result<SynthesisOutput> {
        if self.use_sids() && slots.sids.is_none() {
            return Err(Error::MissingConditioning("sids"));
        }
        if self.use_lids() && slots.lids.is_none() {
            return Err(Error::MissingConditioning("lids"));
        }
        if self.use_spembs() && slots.spembs.is_none() {
            return Err(Error::MissingConditioning("spembs"));
        }

        let text = match input {
            SynthesisInput::Tensor(text) => text,
            SynthesisInput::Score(score) => {
                let preprocessor = self.preprocessor.as_ref().ok_or_else(|| {
                    Error::Preprocess("score input given but no score preprocessor configured".into())
                })?;
                let preprocessed = preprocessor.preprocess(utt_id, &score)?;
                slots.apply_score(&preprocessed);
                preprocessed.label
            }
        };

        let batch = ConditioningBatch { text, slots }.to_device(&self.device)?;
        let config = match decode_override {
            Some(over) => self.decode_config.merged(over)?,
            None => self.decode_config,
        };

        if self.config.always_fix_seed {
            self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        }
        let mut output = self.model.inference(&batch, &config, &mut self.rng)?;

        let (duration, focus_rate) = match &output.att_w {
            Some(att_w) => {
                let (duration, focus_rate) = self.duration_calculator.compute(att_w)?;
                (Some(duration), Some(focus_rate))
            }
            None => (None, None),
        };

        let wav = match output.wav.take() {
            Some(wav) => Some(wav),
            None => match &self.vocoder {
                Some(vocoder) => Some(self.apply_vocoder(vocoder.as_ref(), &output)?),
                None => None,
            },
        };

        Ok(SynthesisOutput {
            feat_gen: output.feat_gen,
            feat_gen_denorm: output.feat_gen_denorm,
            att_w: output.att_w,
            prob: output.prob,
            pitch: output.pitch,
            duration,
            focus_rate,
            wav,
        })
    }

    /// Feature selection + token remixing + the vocoder call.
    fn apply_vocoder(&self, vocoder: &dyn Vocoder, output: &AcousticOutput) -> Result<Tensor> {
        let selected = if self.config.prefer_normalized_feats || output.feat_gen_denorm.is_none() {
            output.feat_gen.as_ref()
        } else {
            output.feat_gen_denorm.as_ref()
        };
        let mut feature = selected
            .ok_or_else(|| {
                Error::Model("acoustic model produced neither features nor a waveform".into())
            })?
            .clone();

        let layers = self.config.discrete_token_layers;
        tracing::debug!(mix_type = %self.config.mix_type, layers, "vocoder input");
        let feature = if layers > 1 {
            feature = remix_layers(&feature, layers, self.config.mix_type)?;
            if self.config.use_singomd {
                VocoderFeature::MultiResolution(decompose_resolutions(
                    &feature,
                    &self.config.resolution_table,
                )?)
            } else {
                VocoderFeature::Frames(feature)
            }
        } else {
            VocoderFeature::Frames(feature)
        };

        let pitch = match &output.pitch {
            Some(pitch) => {
                if pitch.rank() != 1 {
                    return Err(Error::Config(format!(
                        "pitch curve must be 1-D, got rank {}",
                        pitch.rank()
                    )));
                }
                Some(pitch)
            }
            None => None,
        };
        vocoder.synthesize(&feature, pitch)
    }
}

/// Bring a flat multi-layer token sequence into the vocoder's native
/// `[T, L]` layout.
pub fn remix_layers(feature: &Tensor, layers: usize, mix_type: MixType) -> Result<Tensor> {
    let flat = feature.flatten_all()?;
    Ok(match mix_type {
        MixType::Frame => flat.reshape(((), layers))?,
        MixType::Sequence => flat.reshape((layers, ()))?.t()?.contiguous()?,
    })
}

/// Decompose a `[T, L]` feature into per-resolution sub-sequences: layer
/// `i` downsampled by the table's stride, keyed by its resolution value.
pub fn decompose_resolutions(
    feature: &Tensor,
    table: &ResolutionTable,
) -> Result<Vec<(u32, Tensor)>> {
    let (t, _layers) = feature.dims2()?;
    let mut subs = Vec::with_capacity(table.resolutions.len());
    for (i, &resolution) in table.resolutions.iter().enumerate() {
        let column = feature.narrow(1, i, 1)?.contiguous()?;
        let stride = table.stride(i).max(1);
        let sub = if stride == 1 {
            column
        } else {
            let indexes: Vec<u32> = (0..t as u32).step_by(stride).collect();
            let count = indexes.len();
            let indexes = Tensor::from_vec(indexes, (count,), feature.device())?;
            column.index_select(&indexes, 0)?
        };
        subs.push((resolution, sub));
    }
    Ok(subs)
}
