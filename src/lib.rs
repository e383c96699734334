//! Batch inference for singing voice synthesis.
//!
//! This crate is the orchestration layer between a trained acoustic model,
//! an optional neural vocoder, and a decoding recipe: it normalizes
//! heterogeneous per-utterance input into conditioning batches, runs
//! inference with variant-specific decode options, derives alignment
//! diagnostics, vocodes feature output into waveforms, and persists every
//! artifact kind into its own output channel.
//!
//! The two entry points are [`generate::SingingGenerator`] (one utterance
//! at a time, in-memory) and [`runner::BatchRunner`] (a whole corpus,
//! written to disk). Acoustic models and vocoders plug in through the
//! [`model::AcousticModel`] and [`model::Vocoder`] traits; this crate does
//! not ship network architectures of its own.

pub mod batch;
pub mod cli;
pub mod config;
pub mod duration;
pub mod generate;
pub mod model;
pub mod output;
pub mod plot;
pub mod pretrained;
pub mod runner;
pub mod score;

mod error;

pub use error::{Error, Result};
