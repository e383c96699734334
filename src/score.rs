//! Structured musical input.
//!
//! A synthesis call can start from raw score material instead of
//! pre-aligned tensors: a [`MusicScore`] plus either a phoneme-level label
//! alignment or free lyric text. The external [`ScorePreprocessor`] turns
//! that into the aligned tensors the acoustic model consumes — this crate
//! only defines the exchange types.

use candle_core::Tensor;

use crate::Result;

/// One note of a musical score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreNote {
    /// Note onset in seconds.
    pub start: f64,
    /// Note offset in seconds.
    pub end: f64,
    /// Lyric attached to the note (`"—"` for a melisma continuation).
    pub lyric: String,
    /// MIDI pitch of the note.
    pub midi: f32,
    /// Phonemes sung on the note, space-joined.
    pub phones: String,
}

/// A tempo-annotated note sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicScore {
    /// Tempo in beats per minute.
    pub tempo: u32,
    pub notes: Vec<ScoreNote>,
}

/// Phoneme labels with start/end times, as produced by forced alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PhonemeAlignment {
    /// `(start, end)` in seconds, one entry per phoneme.
    pub times: Vec<(f64, f64)>,
    pub phonemes: Vec<String>,
}

impl PhonemeAlignment {
    pub fn new(times: Vec<(f64, f64)>, phonemes: Vec<String>) -> Result<Self> {
        if times.len() != phonemes.len() {
            return Err(crate::Error::Preprocess(format!(
                "alignment has {} time spans but {} phonemes",
                times.len(),
                phonemes.len()
            )));
        }
        Ok(Self { times, phonemes })
    }
}

/// The lyric side of a score input: either an existing alignment or free
/// text still to be aligned.
#[derive(Debug, Clone, PartialEq)]
pub enum LyricSource {
    Label(PhonemeAlignment),
    Text(String),
}

/// Raw musical input for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput {
    pub score: MusicScore,
    pub lyrics: LyricSource,
}

/// Aligned tensors derived from a [`ScoreInput`].
///
/// `label` doubles as the primary text slot of the conditioning batch.
#[derive(Debug)]
pub struct PreprocessedScore {
    pub label: Tensor,
    pub midi: Tensor,
    pub duration_phn: Tensor,
    pub duration_ruled_phn: Tensor,
    pub duration_syb: Tensor,
    pub phn_cnt: Tensor,
    pub slur: Tensor,
}

/// External collaborator turning raw score material into aligned tensors.
pub trait ScorePreprocessor {
    fn preprocess(&self, utt_id: &str, input: &ScoreInput) -> Result<PreprocessedScore>;
}
