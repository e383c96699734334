//! Command-line surface for batch decoding.
//!
//! [`DecodeArgs`] mirrors the option set a decoding recipe passes in;
//! [`DecodeArgs::validate`] applies the hard preconditions up front and the
//! conversion helpers turn the flat argument list into the typed
//! configurations the generator and runner take.
//!
//! Flag names keep underscores (`--output_dir`, not `--output-dir`) so
//! recipe yaml keys map onto them 1:1.

use std::path::PathBuf;
use std::str::FromStr;

use candle_core::{DType, Device};
use clap::{Parser, ValueEnum};

use crate::config::{DecodeFlags, MixType, ResolutionTable};
use crate::generate::GeneratorConfig;
use crate::runner::RunnerConfig;
use crate::{Error, Result};

/// One `path,name,type` data source triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// File on disk (scp, sound archive, ...).
    pub path: PathBuf,
    /// Field name the loader yields the data under (`text`, `singing`, ...).
    pub name: String,
    /// Loader type tag (`text`, `sound`, `npy`, ...).
    pub kind: String,
}

impl FromStr for DataSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(path), Some(name), Some(kind)) if !path.is_empty() && !name.is_empty() => {
                Ok(Self {
                    path: PathBuf::from(path),
                    name: name.to_string(),
                    kind: kind.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "data source must be 'path,name,type', got '{s}'"
            ))),
        }
    }
}

/// Which model task family the checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SvsTask {
    /// Standard singing-voice synthesis.
    Svs,
    /// GAN-based joint training variant.
    GanSvs,
}

impl std::fmt::Display for SvsTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SvsTask::Svs => write!(f, "svs"),
            SvsTask::GanSvs => write!(f, "gan-svs"),
        }
    }
}

/// Computation precision for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    Float16,
    Float32,
    Float64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::Float16 => DType::F16,
            Precision::Float32 => DType::F32,
            Precision::Float64 => DType::F64,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Float16 => write!(f, "float16"),
            Precision::Float32 => write!(f, "float32"),
            Precision::Float64 => write!(f, "float64"),
        }
    }
}

/// Arguments for one batch decoding run.
#[derive(Debug, Parser)]
#[command(name = "svs-decode", about = "Batch singing voice synthesis decoding")]
pub struct DecodeArgs {
    /// Root directory for all output channels.
    #[arg(long = "output_dir")]
    pub output_dir: PathBuf,

    /// Data sources as repeatable 'path,name,type' triples.
    #[arg(long = "data_path_and_name_and_type")]
    pub data: Vec<DataSource>,

    /// Key file restricting which utterances are decoded.
    #[arg(long = "key_file")]
    pub key_file: Option<PathBuf>,

    /// Accept data sources beyond the task's expected field names.
    #[arg(long = "allow_variable_data_keys", default_value_t = false)]
    pub allow_variable_data_keys: bool,

    /// Training configuration of the acoustic model.
    #[arg(long = "train_config")]
    pub train_config: Option<PathBuf>,

    /// Acoustic model checkpoint.
    #[arg(long = "model_file")]
    pub model_file: Option<PathBuf>,

    /// Published model tag, fetched instead of local files.
    #[arg(long = "model_tag")]
    pub model_tag: Option<String>,

    /// Model task family of the checkpoint.
    #[arg(long = "svs_task", value_enum, default_value_t = SvsTask::Svs)]
    pub svs_task: SvsTask,

    /// Vocoder configuration.
    #[arg(long = "vocoder_config")]
    pub vocoder_config: Option<PathBuf>,

    /// Vocoder checkpoint.
    #[arg(long = "vocoder_checkpoint")]
    pub vocoder_checkpoint: Option<PathBuf>,

    /// Published vocoder tag, fetched instead of local files.
    #[arg(long = "vocoder_tag")]
    pub vocoder_tag: Option<String>,

    /// Use ground-truth features to guide decoding.
    #[arg(long = "use_teacher_forcing", default_value_t = false)]
    pub use_teacher_forcing: bool,

    /// Noise scale for flow-based models.
    #[arg(long = "noise_scale", default_value_t = 0.667)]
    pub noise_scale: f64,

    /// Noise scale for the stochastic duration predictor.
    #[arg(long = "noise_scale_dur", default_value_t = 0.8)]
    pub noise_scale_dur: f64,

    /// Stop-token threshold for autoregressive models.
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,

    /// Minimum output length as a ratio of the input length.
    #[arg(long, default_value_t = 0.0)]
    pub minlenratio: f64,

    /// Maximum output length as a ratio of the input length.
    #[arg(long, default_value_t = 10.0)]
    pub maxlenratio: f64,

    /// Constrain attention to be monotonic.
    #[arg(long = "use_att_constraint", default_value_t = false)]
    pub use_att_constraint: bool,

    /// Use a dynamic filter over attention.
    #[arg(long = "use_dynamic_filter", default_value_t = false)]
    pub use_dynamic_filter: bool,

    /// Attention window size looking forward.
    #[arg(long = "forward_window", default_value_t = 4)]
    pub forward_window: usize,

    /// Attention window size looking backward.
    #[arg(long = "backward_window", default_value_t = 2)]
    pub backward_window: usize,

    /// Discrete-token layers in the model's feature output.
    #[arg(long = "discrete_token_layers", default_value_t = 1)]
    pub discrete_token_layers: usize,

    /// Layout of a flat multi-layer token sequence.
    #[arg(long = "mix_type", value_enum, default_value_t = MixType::Frame)]
    pub mix_type: MixType,

    /// Decompose multi-layer features into per-resolution sub-sequences.
    #[arg(long = "use_singomd", default_value_t = false)]
    pub use_singomd: bool,

    /// Feed normalized features to the vocoder even when denormalized ones
    /// exist.
    #[arg(long = "prefer_normalized_feats", default_value_t = false)]
    pub prefer_normalized_feats: bool,

    /// Utterances per synthesis call. Only 1 is supported.
    #[arg(long = "batch_size", default_value_t = 1)]
    pub batch_size: usize,

    /// Number of GPU devices. Only 0 (CPU) and 1 are supported.
    #[arg(long, default_value_t = 0)]
    pub ngpu: usize,

    /// RNG seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Reseed before every utterance so repeated runs are bit-identical.
    #[arg(long = "always_fix_seed", default_value_t = false)]
    pub always_fix_seed: bool,

    /// Computation precision.
    #[arg(long, value_enum, default_value_t = Precision::Float32)]
    pub dtype: Precision,

    /// Loader worker count.
    #[arg(long = "num_workers", default_value_t = 1)]
    pub num_workers: usize,

    /// Logging level (error, warn, info, debug, trace).
    #[arg(long = "log_level", default_value = "info")]
    pub log_level: String,
}

impl DecodeArgs {
    /// Check the hard preconditions before any resource is touched.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size > 1 {
            return Err(Error::Config(format!(
                "batch decoding is not implemented (batch_size = {})",
                self.batch_size
            )));
        }
        if self.ngpu > 1 {
            return Err(Error::Config(format!(
                "only single GPU decoding is supported (ngpu = {})",
                self.ngpu
            )));
        }
        if self.model_file.is_none() && self.model_tag.is_none() {
            return Err(Error::Config(
                "either --model_file or --model_tag is required".into(),
            ));
        }
        Ok(())
    }

    /// The compute device the run targets.
    pub fn device(&self) -> Result<Device> {
        if self.ngpu == 0 {
            Ok(Device::Cpu)
        } else {
            Ok(Device::new_cuda(0)?)
        }
    }

    pub fn decode_flags(&self) -> DecodeFlags {
        DecodeFlags {
            use_teacher_forcing: self.use_teacher_forcing,
            noise_scale: self.noise_scale,
            noise_scale_dur: self.noise_scale_dur,
            threshold: self.threshold,
            minlenratio: self.minlenratio,
            maxlenratio: self.maxlenratio,
            use_att_constraint: self.use_att_constraint,
            use_dynamic_filter: self.use_dynamic_filter,
            forward_window: self.forward_window,
            backward_window: self.backward_window,
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            flags: self.decode_flags(),
            discrete_token_layers: self.discrete_token_layers,
            mix_type: self.mix_type,
            prefer_normalized_feats: self.prefer_normalized_feats,
            use_singomd: self.use_singomd,
            resolution_table: ResolutionTable::default(),
            seed: self.seed,
            always_fix_seed: self.always_fix_seed,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_dir: self.output_dir.clone(),
            batch_size: self.batch_size,
            device_count: self.ngpu.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> DecodeArgs {
        let mut argv = vec!["svs-decode", "--output_dir", "out"];
        argv.extend_from_slice(extra);
        DecodeArgs::parse_from(argv)
    }

    #[test]
    fn defaults_match_the_decoding_recipe() {
        let args = parse(&["--model_file", "model.safetensors"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.noise_scale, 0.667);
        assert_eq!(args.noise_scale_dur, 0.8);
        assert_eq!(args.threshold, 0.5);
        assert_eq!(args.maxlenratio, 10.0);
        assert_eq!(args.forward_window, 4);
        assert_eq!(args.backward_window, 2);
        assert_eq!(args.discrete_token_layers, 1);
        assert_eq!(args.mix_type, MixType::Frame);
        assert_eq!(args.batch_size, 1);
        assert_eq!(args.dtype, Precision::Float32);
    }

    #[test]
    fn every_flag_parses_under_its_underscore_spelling() {
        let args = DecodeArgs::try_parse_from([
            "svs-decode",
            "--output_dir",
            "out",
            "--data_path_and_name_and_type",
            "dump/test/text,text,text",
            "--key_file",
            "keys",
            "--allow_variable_data_keys",
            "--train_config",
            "train.yaml",
            "--model_file",
            "model.safetensors",
            "--svs_task",
            "svs",
            "--vocoder_config",
            "voc.yaml",
            "--vocoder_checkpoint",
            "voc.safetensors",
            "--use_teacher_forcing",
            "--noise_scale",
            "0.5",
            "--noise_scale_dur",
            "0.7",
            "--use_att_constraint",
            "--use_dynamic_filter",
            "--forward_window",
            "3",
            "--backward_window",
            "1",
            "--discrete_token_layers",
            "2",
            "--mix_type",
            "sequence",
            "--use_singomd",
            "--prefer_normalized_feats",
            "--batch_size",
            "1",
            "--always_fix_seed",
            "--num_workers",
            "2",
            "--log_level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.key_file.as_deref(), Some(std::path::Path::new("keys")));
        assert!(args.allow_variable_data_keys);
        assert!(args.use_att_constraint);
        assert_eq!(args.forward_window, 3);
        assert_eq!(args.mix_type, MixType::Sequence);
        assert!(args.use_singomd);
        assert!(args.always_fix_seed);
        assert_eq!(args.num_workers, 2);
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn data_source_triples_parse() {
        let args = parse(&[
            "--model_file",
            "model.safetensors",
            "--data_path_and_name_and_type",
            "dump/test/text,text,text",
            "--data_path_and_name_and_type",
            "dump/test/label,label,duration",
        ]);
        assert_eq!(args.data.len(), 2);
        assert_eq!(args.data[0].name, "text");
        assert_eq!(args.data[1].kind, "duration");
    }

    #[test]
    fn malformed_data_source_is_rejected() {
        assert!("just-a-path".parse::<DataSource>().is_err());
        assert!(",name,type".parse::<DataSource>().is_err());
        assert!("a,b,c".parse::<DataSource>().is_ok());
    }

    #[test]
    fn oversized_batch_or_gpu_count_fails_validation() {
        let mut args = parse(&["--model_file", "m"]);
        args.batch_size = 2;
        assert!(args.validate().is_err());

        let mut args = parse(&["--model_file", "m"]);
        args.ngpu = 2;
        assert!(args.validate().is_err());
    }

    #[test]
    fn model_source_is_mandatory() {
        let args = parse(&[]);
        assert!(args.validate().is_err());
        let args = parse(&["--model_tag", "some/model"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn flags_flow_into_the_generator_config() {
        let args = parse(&[
            "--model_file",
            "m",
            "--use_teacher_forcing",
            "--noise_scale",
            "0.5",
            "--seed",
            "777",
            "--always_fix_seed",
            "--use_singomd",
        ]);
        let config = args.generator_config();
        assert!(config.flags.use_teacher_forcing);
        assert_eq!(config.flags.noise_scale, 0.5);
        assert_eq!(config.seed, 777);
        assert!(config.always_fix_seed);
        assert!(config.use_singomd);
    }
}
