//! Per-artifact output channels.
//!
//! One channel per artifact kind, all rooted at the run's output
//! directory. A channel is materialized on disk lazily, at its first
//! write; finalize flushes everything and sweeps away any channel
//! directory that received zero utterances, so downstream consumers can
//! tell which artifact kinds the loaded model variant never produces.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use candle_core::Tensor;

use crate::Result;

/// Feature tensors persisted one file per utterance, plus a `feats.scp`
/// index mapping id → path.
pub struct FeatureArchive {
    dir: PathBuf,
    scp: Option<BufWriter<File>>,
    count: usize,
}

impl FeatureArchive {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            scp: None,
            count: 0,
        }
    }

    pub fn write(&mut self, utt_id: &str, feature: &Tensor) -> Result<()> {
        if self.scp.is_none() {
            fs::create_dir_all(&self.dir)?;
            self.scp = Some(BufWriter::new(File::create(self.dir.join("feats.scp"))?));
        }
        let path = self.dir.join(format!("{utt_id}.safetensors"));
        let mut tensors = HashMap::new();
        tensors.insert("feats".to_string(), feature.clone());
        candle_core::safetensors::save(&tensors, &path)?;
        let scp = self.scp.as_mut().unwrap();
        writeln!(scp, "{utt_id} {}", path.display())?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn close(&mut self) -> Result<()> {
        if let Some(scp) = &mut self.scp {
            scp.flush()?;
        }
        self.scp = None;
        Ok(())
    }

    fn prune_if_empty(&mut self) -> Result<()> {
        if self.count == 0 && self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// A single text file of `id value...` lines inside its own channel
/// directory (the file is named after the directory).
pub struct LineChannel {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    count: usize,
}

impl LineChannel {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            writer: None,
            count: 0,
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if self.writer.is_none() {
            fs::create_dir_all(&self.dir)?;
            // the file carries the channel's name: e.g. durations/durations
            let name = self.dir.file_name().unwrap_or_default().to_owned();
            self.writer = Some(BufWriter::new(File::create(self.dir.join(name))?));
        }
        writeln!(self.writer.as_mut().unwrap(), "{line}")?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        self.writer = None;
        Ok(())
    }

    fn prune_if_empty(&mut self) -> Result<()> {
        if self.count == 0 && self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// 16-bit PCM WAV files, one per utterance, indexed by `wav.scp` lines of
/// `id absolute-path`.
pub struct WavChannel {
    dir: PathBuf,
    scp: Option<BufWriter<File>>,
    count: usize,
}

impl WavChannel {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            scp: None,
            count: 0,
        }
    }

    pub fn write(&mut self, utt_id: &str, samples: &[f32], sample_rate: u32) -> Result<PathBuf> {
        if self.scp.is_none() {
            fs::create_dir_all(&self.dir)?;
            self.scp = Some(BufWriter::new(File::create(self.dir.join("wav.scp"))?));
        }
        let path = self.dir.join(format!("{utt_id}.wav"));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in samples {
            let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(quantized)?;
        }
        writer.finalize()?;

        let absolute = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        writeln!(self.scp.as_mut().unwrap(), "{utt_id} {}", absolute.display())?;
        self.count += 1;
        Ok(absolute)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn close(&mut self) -> Result<()> {
        if let Some(scp) = &mut self.scp {
            scp.flush()?;
        }
        self.scp = None;
        Ok(())
    }

    fn prune_if_empty(&mut self) -> Result<()> {
        if self.count == 0 && self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// One PNG per utterance, rendered by a caller-supplied function.
pub struct PlotChannel {
    dir: PathBuf,
    count: usize,
}

impl PlotChannel {
    fn new(dir: PathBuf) -> Self {
        Self { dir, count: 0 }
    }

    pub fn save_with<F>(&mut self, utt_id: &str, render: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        fs::create_dir_all(&self.dir)?;
        render(&self.dir.join(format!("{utt_id}.png")))?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn prune_if_empty(&mut self) -> Result<()> {
        if self.count == 0 && self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// The full set of output channels for one run, exclusively owned by the
/// batch runner for the run's lifetime.
pub struct OutputChannels {
    pub norm: FeatureArchive,
    pub denorm: FeatureArchive,
    pub speech_shape: LineChannel,
    pub durations: LineChannel,
    pub focus_rates: LineChannel,
    pub wav: WavChannel,
    pub att_ws: PlotChannel,
    pub probs: PlotChannel,
}

impl OutputChannels {
    /// Open the channel set under `root`. Individual channel directories
    /// are only created once something is written to them.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            norm: FeatureArchive::new(root.join("norm")),
            denorm: FeatureArchive::new(root.join("denorm")),
            speech_shape: LineChannel::new(root.join("speech_shape")),
            durations: LineChannel::new(root.join("durations")),
            focus_rates: LineChannel::new(root.join("focus_rates")),
            wav: WavChannel::new(root.join("wav")),
            att_ws: PlotChannel::new(root.join("att_ws")),
            probs: PlotChannel::new(root.join("probs")),
        })
    }

    /// Flush and release every writer without pruning (the abort path).
    pub fn close(&mut self) -> Result<()> {
        self.norm.close()?;
        self.denorm.close()?;
        self.speech_shape.close()?;
        self.durations.close()?;
        self.focus_rates.close()?;
        self.wav.close()?;
        Ok(())
    }

    /// Flush everything and remove every channel that received zero
    /// utterances. Idempotent; also sweeps pre-created empty directories.
    pub fn finalize(&mut self) -> Result<()> {
        self.close()?;
        self.norm.prune_if_empty()?;
        self.denorm.prune_if_empty()?;
        self.speech_shape.prune_if_empty()?;
        self.durations.prune_if_empty()?;
        self.focus_rates.prune_if_empty()?;
        self.wav.prune_if_empty()?;
        self.att_ws.prune_if_empty()?;
        self.probs.prune_if_empty()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn channels_materialize_lazily() {
        let root = tempfile::tempdir().unwrap();
        let mut channels = OutputChannels::open(root.path()).unwrap();
        assert!(!root.path().join("norm").exists());
        assert!(!root.path().join("durations").exists());

        channels.durations.write_line("utt1 2 1").unwrap();
        assert!(root.path().join("durations/durations").exists());
        assert!(!root.path().join("norm").exists());
    }

    #[test]
    fn finalize_prunes_unwritten_channels_and_keeps_written_ones() {
        let root = tempfile::tempdir().unwrap();
        // a stale empty directory from an earlier run is also swept
        fs::create_dir_all(root.path().join("probs")).unwrap();

        let mut channels = OutputChannels::open(root.path()).unwrap();
        let feat = Tensor::zeros((4, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        channels.norm.write("utt1", &feat).unwrap();
        channels.finalize().unwrap();

        assert!(root.path().join("norm/utt1.safetensors").exists());
        assert!(root.path().join("norm/feats.scp").exists());
        assert!(!root.path().join("probs").exists());
        assert!(!root.path().join("wav").exists());

        // idempotent
        channels.finalize().unwrap();
        assert!(root.path().join("norm").exists());
    }

    #[test]
    fn wav_channel_writes_pcm16_and_absolute_scp_path() {
        let root = tempfile::tempdir().unwrap();
        let mut channels = OutputChannels::open(root.path()).unwrap();
        let path = channels
            .wav
            .write("utt1", &[0.0, 0.5, -0.5, 1.0], 16_000)
            .unwrap();
        assert!(path.is_absolute());
        channels.finalize().unwrap();

        let reader = hound::WavReader::open(root.path().join("wav/utt1.wav")).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(reader.into_samples::<i16>().count(), 4);

        let scp = fs::read_to_string(root.path().join("wav/wav.scp")).unwrap();
        assert!(scp.starts_with("utt1 "));
        assert!(scp.trim_end().ends_with("utt1.wav"));
    }

    #[test]
    fn feature_archive_round_trips_through_safetensors() {
        let root = tempfile::tempdir().unwrap();
        let mut channels = OutputChannels::open(root.path()).unwrap();
        let feat = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (2, 2), &Device::Cpu).unwrap();
        channels.norm.write("utt1", &feat).unwrap();
        channels.finalize().unwrap();

        let loaded = candle_core::safetensors::load(
            root.path().join("norm/utt1.safetensors"),
            &Device::Cpu,
        )
        .unwrap();
        let loaded = loaded.get("feats").unwrap();
        assert_eq!(loaded.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }
}
