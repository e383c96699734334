//! The batch decoding loop.
//!
//! [`BatchRunner`] drives one synthesis call per utterance over a lazy,
//! finite, non-restartable loader sequence and persists the results into
//! [`OutputChannels`]. Execution is strictly sequential: one utterance is
//! fully synthesized and written before the next is loaded.
//!
//! Per run: validate the configuration (fail fast, before any channel
//! exists) → stream (load → synthesize → write) → finalize (prune
//! channels that received nothing). Finalize runs even when the loader
//! yields zero utterances; on a synthesis failure the run aborts with
//! already-written utterances left in place, channels flushed and closed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, IndexOp, Tensor};

use crate::batch::ConditioningBatch;
use crate::generate::{SingingGenerator, SynthesisInput, SynthesisOutput};
use crate::output::OutputChannels;
use crate::{plot, Error, Result};

/// One loader item: the utterance id list (must hold exactly one id) and
/// the raw field map with a leading batch dimension of 1.
pub type LoadedBatch = (Vec<String>, BTreeMap<String, Tensor>);

/// Run-level configuration for the batch runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root directory for all output channels.
    pub output_dir: PathBuf,
    /// Utterances per synthesis call. Anything above 1 is rejected.
    pub batch_size: usize,
    /// Compute devices. Anything above 1 is rejected.
    pub device_count: usize,
}

impl RunnerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            batch_size: 1,
            device_count: 1,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Utterances synthesized and written.
    pub utterances: usize,
}

/// Drives the load → synthesize → write loop for one run.
pub struct BatchRunner<'a> {
    generator: &'a mut SingingGenerator,
    config: RunnerConfig,
}

impl<'a> BatchRunner<'a> {
    pub fn new(generator: &'a mut SingingGenerator, config: RunnerConfig) -> Self {
        Self { generator, config }
    }

    /// Consume the loader and run to completion.
    pub fn run<L>(mut self, loader: L) -> Result<RunSummary>
    where
        L: IntoIterator<Item = Result<LoadedBatch>>,
    {
        if self.config.batch_size > 1 {
            return Err(Error::Config(format!(
                "batch decoding is not implemented (batch_size = {})",
                self.config.batch_size
            )));
        }
        if self.config.device_count > 1 {
            return Err(Error::Config(format!(
                "only single device decoding is supported (devices = {})",
                self.config.device_count
            )));
        }

        let mut channels = OutputChannels::open(&self.config.output_dir)?;
        match self.stream(loader, &mut channels) {
            Ok(utterances) => {
                channels.finalize()?;
                tracing::info!(utterances, "decoding finished");
                Ok(RunSummary { utterances })
            }
            Err(error) => {
                // flush and release what was written so far, keep it on disk
                if let Err(close_error) = channels.close() {
                    tracing::warn!(%close_error, "flushing output channels after abort failed");
                }
                Err(error)
            }
        }
    }

    fn stream<L>(&mut self, loader: L, channels: &mut OutputChannels) -> Result<usize>
    where
        L: IntoIterator<Item = Result<LoadedBatch>>,
    {
        let mut utterances = 0;
        for item in loader {
            let (keys, fields) = item?;
            if keys.len() != 1 {
                return Err(Error::Batch(format!(
                    "expected exactly one utterance id per batch, got {}",
                    keys.len()
                )));
            }
            let key = &keys[0];
            let fields = strip_batch_dim(&fields)?;
            let batch = ConditioningBatch::from_fields(&fields)?;
            let in_size = batch.text.dim(0)? + 1;

            let start = Instant::now();
            let output = self.generator.synthesize(
                key,
                SynthesisInput::Tensor(batch.text),
                batch.slots,
                None,
            )?;
            let elapsed = start.elapsed().as_secs_f64();

            self.write_outputs(key, in_size, &output, elapsed, channels)?;
            utterances += 1;
        }
        Ok(utterances)
    }

    fn write_outputs(
        &self,
        key: &str,
        in_size: usize,
        output: &SynthesisOutput,
        elapsed: f64,
        channels: &mut OutputChannels,
    ) -> Result<()> {
        if let Some(feat) = &output.feat_gen {
            // feature path
            let frames = feat.dim(0)?;
            tracing::info!("inference speed = {:.1} frames / sec.", frames as f64 / elapsed);
            tracing::info!("{key} (size:{in_size}->{frames})");
            channels.norm.write(key, feat)?;
            let shape: Vec<String> = feat.dims().iter().map(|d| d.to_string()).collect();
            channels
                .speech_shape
                .write_line(&format!("{key} {}", shape.join(",")))?;
            if let Some(denorm) = &output.feat_gen_denorm {
                channels.denorm.write(key, denorm)?;
            }
        } else if let Some(wav) = &output.wav {
            // end-to-end waveform path
            let points = wav.dim(0)?;
            tracing::info!("inference speed = {:.1} points / sec.", points as f64 / elapsed);
            tracing::info!("{key} (size:{in_size}->{points})");
        }

        if let Some(duration) = &output.duration {
            let values: Vec<String> = duration
                .to_vec1::<u32>()?
                .iter()
                .map(|v| v.to_string())
                .collect();
            channels
                .durations
                .write_line(&format!("{key} {}", values.join(" ")))?;
        }
        if let Some(focus_rate) = output.focus_rate {
            channels
                .focus_rates
                .write_line(&format!("{key} {focus_rate:.5}"))?;
        }
        if let Some(att_w) = &output.att_w {
            channels
                .att_ws
                .save_with(key, |path| plot::save_attention(att_w, path))?;
        }
        if let Some(prob) = &output.prob {
            channels
                .probs
                .save_with(key, |path| plot::save_probability(prob, path))?;
        }
        if let Some(wav) = &output.wav {
            let sample_rate = self.generator.sample_rate().ok_or_else(|| {
                Error::Audio("cannot write waveform: no sampling rate declared".into())
            })?;
            let samples = wav.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
            channels.wav.write(key, &samples, sample_rate)?;
        }
        Ok(())
    }
}

/// Check the single-utterance invariant and drop the leading batch
/// dimension from every field.
fn strip_batch_dim(fields: &BTreeMap<String, Tensor>) -> Result<BTreeMap<String, Tensor>> {
    let mut stripped = BTreeMap::new();
    for (name, tensor) in fields {
        let batch = tensor.dim(0).map_err(|_| {
            Error::Batch(format!("field '{name}' has no batch dimension"))
        })?;
        if batch != 1 {
            return Err(Error::Batch(format!(
                "field '{name}' has batch size {batch}, expected 1"
            )));
        }
        stripped.insert(name.clone(), tensor.i(0)?);
    }
    Ok(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ConditioningBatch;
    use crate::config::DecodeConfig;
    use crate::generate::GeneratorConfig;
    use crate::model::{AcousticModel, AcousticOutput, ModelVariant};
    use candle_core::Device;
    use rand::RngCore;

    /// Feature-path stub: 50 frames of 3-dim features plus 4-D attention.
    struct FeatureModel;

    impl AcousticModel for FeatureModel {
        fn variant(&self) -> ModelVariant {
            ModelVariant::Autoregressive
        }
        fn speaker_count(&self) -> Option<usize> {
            None
        }
        fn language_count(&self) -> Option<usize> {
            None
        }
        fn speaker_embed_dim(&self) -> Option<usize> {
            None
        }
        fn inference(
            &self,
            batch: &ConditioningBatch,
            _config: &DecodeConfig,
            _rng: &mut dyn RngCore,
        ) -> Result<AcousticOutput> {
            let t_in = batch.text.dim(0)?;
            let feat = Tensor::rand(0f32, 1f32, (50, 3), &Device::Cpu)?;
            let att_w = Tensor::rand(0f32, 1f32, (1, 1, 50, t_in), &Device::Cpu)?;
            Ok(AcousticOutput {
                feat_gen: Some(feat),
                att_w: Some(att_w),
                ..Default::default()
            })
        }
    }

    /// Model that always fails, for the abort path.
    struct FailingModel;

    impl AcousticModel for FailingModel {
        fn variant(&self) -> ModelVariant {
            ModelVariant::Unknown
        }
        fn speaker_count(&self) -> Option<usize> {
            None
        }
        fn language_count(&self) -> Option<usize> {
            None
        }
        fn speaker_embed_dim(&self) -> Option<usize> {
            None
        }
        fn inference(
            &self,
            _batch: &ConditioningBatch,
            _config: &DecodeConfig,
            _rng: &mut dyn RngCore,
        ) -> Result<AcousticOutput> {
            Err(Error::Model("synthetic failure".into()))
        }
    }

    fn generator(model: Box<dyn AcousticModel>) -> SingingGenerator {
        SingingGenerator::new(model, None, None, Device::Cpu, GeneratorConfig::default())
    }

    fn loaded(key: &str, text_len: usize) -> Result<LoadedBatch> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "text".to_string(),
            Tensor::zeros((1, text_len), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        fields.insert(
            "text_lengths".to_string(),
            Tensor::zeros((1,), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        Ok((vec![key.to_string()], fields))
    }

    #[test]
    fn batch_size_above_one_aborts_before_any_channel_exists() {
        let root = tempfile::tempdir().unwrap();
        let output_dir = root.path().join("decode");
        let mut gen = generator(Box::new(FeatureModel));
        let config = RunnerConfig {
            batch_size: 2,
            ..RunnerConfig::new(&output_dir)
        };
        let result = BatchRunner::new(&mut gen, config).run(vec![loaded("utt1", 10)]);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!output_dir.exists());
    }

    #[test]
    fn multi_device_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let config = RunnerConfig {
            device_count: 2,
            ..RunnerConfig::new(root.path())
        };
        let result = BatchRunner::new(&mut gen, config).run(Vec::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn feature_path_run_writes_and_prunes_the_expected_channels() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let summary = BatchRunner::new(&mut gen, RunnerConfig::new(root.path()))
            .run(vec![loaded("utt1", 10)])
            .unwrap();
        assert_eq!(summary.utterances, 1);

        let shape = std::fs::read_to_string(root.path().join("speech_shape/speech_shape")).unwrap();
        assert_eq!(shape.trim_end(), "utt1 50,3");
        let durations = std::fs::read_to_string(root.path().join("durations/durations")).unwrap();
        assert!(durations.starts_with("utt1 "));
        let focus = std::fs::read_to_string(root.path().join("focus_rates/focus_rates")).unwrap();
        assert!(focus.starts_with("utt1 0."));
        assert!(root.path().join("norm/utt1.safetensors").exists());
        assert!(root.path().join("att_ws/utt1.png").exists());

        // channels this model variant never produces are gone
        assert!(!root.path().join("denorm").exists());
        assert!(!root.path().join("probs").exists());
        assert!(!root.path().join("wav").exists());
    }

    #[test]
    fn empty_loader_still_finalizes() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let summary = BatchRunner::new(&mut gen, RunnerConfig::new(root.path()))
            .run(Vec::new())
            .unwrap();
        assert_eq!(summary.utterances, 0);
        // nothing was written, nothing was left behind
        assert!(!root.path().join("norm").exists());
        assert!(!root.path().join("speech_shape").exists());
    }

    #[test]
    fn abort_keeps_prior_utterances_and_skips_pruning() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let items = vec![
            loaded("utt1", 10),
            Err(Error::Model("loader broke".into())),
            loaded("utt2", 10),
        ];
        let result = BatchRunner::new(&mut gen, RunnerConfig::new(root.path())).run(items);
        assert!(matches!(result, Err(Error::Model(_))));
        // utt1 survived the abort, utt2 was never reached
        assert!(root.path().join("norm/utt1.safetensors").exists());
        assert!(!root.path().join("norm/utt2.safetensors").exists());
    }

    #[test]
    fn model_failure_propagates_unmodified() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FailingModel));
        let result =
            BatchRunner::new(&mut gen, RunnerConfig::new(root.path())).run(vec![loaded("utt1", 4)]);
        match result {
            Err(Error::Model(msg)) => assert_eq!(msg, "synthetic failure"),
            other => panic!("expected model error, got {other:?}"),
        }
    }

    #[test]
    fn two_utterance_ids_in_one_batch_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let (_, fields) = loaded("utt1", 4).unwrap();
        let item = Ok((vec!["utt1".to_string(), "utt2".to_string()], fields));
        let result = BatchRunner::new(&mut gen, RunnerConfig::new(root.path())).run(vec![item]);
        assert!(matches!(result, Err(Error::Batch(_))));
    }

    #[test]
    fn oversized_batch_dimension_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut gen = generator(Box::new(FeatureModel));
        let mut fields = BTreeMap::new();
        fields.insert(
            "text".to_string(),
            Tensor::zeros((2, 4), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        let item = Ok((vec!["utt1".to_string()], fields));
        let result = BatchRunner::new(&mut gen, RunnerConfig::new(root.path())).run(vec![item]);
        assert!(matches!(result, Err(Error::Batch(_))));
    }
}
