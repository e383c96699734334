//! Conditioning-batch assembly.
//!
//! The acoustic model takes one mandatory text/label tensor plus a set of
//! optional conditioning slots. Instead of threading a dozen keyword
//! arguments around, the slots live in one explicit record with optional
//! fields, assembled by a pure function from the raw field map a loader
//! produces.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};

use crate::score::PreprocessedScore;
use crate::{Error, Result};

/// Every optional conditioning slot a model may consume.
#[derive(Debug, Default, Clone)]
pub struct ConditioningSlots {
    /// Reference singing waveform (teacher forcing / global style).
    pub singing: Option<Tensor>,
    /// Aligned phoneme label ids.
    pub label: Option<Tensor>,
    /// Aligned MIDI pitch ids.
    pub midi: Option<Tensor>,
    /// Phoneme durations from the alignment.
    pub duration_phn: Option<Tensor>,
    /// Phoneme durations derived from the score rules.
    pub duration_ruled_phn: Option<Tensor>,
    /// Syllable durations.
    pub duration_syb: Option<Tensor>,
    /// Phonemes per syllable.
    pub phn_cnt: Option<Tensor>,
    /// Slur flags.
    pub slur: Option<Tensor>,
    /// Frame-level pitch contour.
    pub pitch: Option<Tensor>,
    /// Frame-level energy contour.
    pub energy: Option<Tensor>,
    /// Speaker embedding vector.
    pub spembs: Option<Tensor>,
    /// Speaker id.
    pub sids: Option<Tensor>,
    /// Language id.
    pub lids: Option<Tensor>,
    /// Discrete token stream.
    pub discrete_token: Option<Tensor>,
}

impl ConditioningSlots {
    /// Fill the score-derived slots from a preprocessed score, replacing
    /// any previous values.
    pub fn apply_score(&mut self, score: &PreprocessedScore) {
        self.label = Some(score.label.clone());
        self.midi = Some(score.midi.clone());
        self.duration_phn = Some(score.duration_phn.clone());
        self.duration_ruled_phn = Some(score.duration_ruled_phn.clone());
        self.duration_syb = Some(score.duration_syb.clone());
        self.phn_cnt = Some(score.phn_cnt.clone());
        self.slur = Some(score.slur.clone());
    }
}

/// One model-ready conditioning batch: the mandatory text/label tensor plus
/// all supplied optional slots. Created per utterance, consumed exactly
/// once.
#[derive(Debug, Clone)]
pub struct ConditioningBatch {
    pub text: Tensor,
    pub slots: ConditioningSlots,
}

impl ConditioningBatch {
    /// Assemble a batch from a raw field map (as yielded by a loader).
    ///
    /// Auxiliary `*_lengths` fields are stripped — inference consumes
    /// single sequences, not padded mini-batches. A field outside the
    /// known slot set is an error.
    pub fn from_fields(fields: &BTreeMap<String, Tensor>) -> Result<Self> {
        let mut text = None;
        let mut slots = ConditioningSlots::default();
        for (name, tensor) in fields {
            if name.ends_with("_lengths") {
                continue;
            }
            let tensor = tensor.clone();
            match name.as_str() {
                "text" => text = Some(tensor),
                "singing" => slots.singing = Some(tensor),
                "label" => slots.label = Some(tensor),
                "midi" => slots.midi = Some(tensor),
                "duration_phn" => slots.duration_phn = Some(tensor),
                "duration_ruled_phn" => slots.duration_ruled_phn = Some(tensor),
                "duration_syb" => slots.duration_syb = Some(tensor),
                "phn_cnt" => slots.phn_cnt = Some(tensor),
                "slur" => slots.slur = Some(tensor),
                "pitch" => slots.pitch = Some(tensor),
                "energy" => slots.energy = Some(tensor),
                "spembs" => slots.spembs = Some(tensor),
                "sids" => slots.sids = Some(tensor),
                "lids" => slots.lids = Some(tensor),
                "discrete_token" => slots.discrete_token = Some(tensor),
                other => {
                    return Err(Error::Batch(format!(
                        "unexpected conditioning field '{other}'"
                    )))
                }
            }
        }
        let text = text.ok_or_else(|| Error::Batch("missing 'text' field".into()))?;
        Ok(Self { text, slots })
    }

    /// Move every tensor of the batch to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        let move_opt = |t: &Option<Tensor>| -> Result<Option<Tensor>> {
            Ok(match t {
                Some(t) => Some(t.to_device(device)?),
                None => None,
            })
        };
        Ok(Self {
            text: self.text.to_device(device)?,
            slots: ConditioningSlots {
                singing: move_opt(&self.slots.singing)?,
                label: move_opt(&self.slots.label)?,
                midi: move_opt(&self.slots.midi)?,
                duration_phn: move_opt(&self.slots.duration_phn)?,
                duration_ruled_phn: move_opt(&self.slots.duration_ruled_phn)?,
                duration_syb: move_opt(&self.slots.duration_syb)?,
                phn_cnt: move_opt(&self.slots.phn_cnt)?,
                slur: move_opt(&self.slots.slur)?,
                pitch: move_opt(&self.slots.pitch)?,
                energy: move_opt(&self.slots.energy)?,
                spembs: move_opt(&self.slots.spembs)?,
                sids: move_opt(&self.slots.sids)?,
                lids: move_opt(&self.slots.lids)?,
                discrete_token: move_opt(&self.slots.discrete_token)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tensor(len: usize) -> Tensor {
        Tensor::zeros((len,), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn assembles_known_fields_and_strips_lengths() {
        let mut fields = BTreeMap::new();
        fields.insert("text".to_string(), tensor(10));
        fields.insert("text_lengths".to_string(), tensor(1));
        fields.insert("midi".to_string(), tensor(10));
        fields.insert("midi_lengths".to_string(), tensor(1));
        fields.insert("sids".to_string(), tensor(1));

        let batch = ConditioningBatch::from_fields(&fields).unwrap();
        assert_eq!(batch.text.dims(), &[10]);
        assert!(batch.slots.midi.is_some());
        assert!(batch.slots.sids.is_some());
        assert!(batch.slots.label.is_none());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("text".to_string(), tensor(4));
        fields.insert("tempo_curve".to_string(), tensor(4));
        assert!(matches!(
            ConditioningBatch::from_fields(&fields),
            Err(Error::Batch(_))
        ));
    }

    #[test]
    fn missing_text_is_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("midi".to_string(), tensor(4));
        assert!(matches!(
            ConditioningBatch::from_fields(&fields),
            Err(Error::Batch(_))
        ));
    }
}
