//! Duration and focus-rate derivation from attention weights.
//!
//! Given an alignment matrix, the duration of input unit `i` is the number
//! of output frames whose attention argmax lands on `i`; the focus rate is
//! the mean of the per-frame attention maxima (1.0 = perfectly peaked
//! alignment). Multi-head input selects the single most focused head.

use candle_core::{DType, Tensor, D};

use crate::{Error, Result};

/// Computes per-input durations and a scalar focus rate from attention
/// weights.
#[derive(Debug, Default, Clone)]
pub struct DurationCalculator;

impl DurationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// `att_w` must be `[T_out, T_in]` or `[h1, h2, T_out, T_in]`.
    ///
    /// Returns the duration tensor `[T_in]` (u32) and the focus rate.
    pub fn compute(&self, att_w: &Tensor) -> Result<(Tensor, f32)> {
        match att_w.rank() {
            2 => Self::compute_single(att_w),
            4 => {
                let (h1, h2, t_out, t_in) = att_w.dims4()?;
                let heads = att_w.reshape((h1 * h2, t_out, t_in))?;
                let mut best: Option<(f32, Tensor)> = None;
                for h in 0..h1 * h2 {
                    let head = heads.get(h)?;
                    let focus = Self::focus_rate(&head)?;
                    let replace = match &best {
                        Some((best_focus, _)) => focus > *best_focus,
                        None => true,
                    };
                    if replace {
                        best = Some((focus, head));
                    }
                }
                // h1*h2 >= 1, so best is always set
                let (_, head) = best.ok_or_else(|| {
                    Error::Config("attention weights have zero heads".into())
                })?;
                Self::compute_single(&head)
            }
            rank => Err(Error::Config(format!(
                "attention weights must be 2-D or 4-D, got rank {rank}"
            ))),
        }
    }

    fn compute_single(att_w: &Tensor) -> Result<(Tensor, f32)> {
        let (_t_out, t_in) = att_w.dims2()?;
        let argmax = att_w.argmax(D::Minus1)?.to_vec1::<u32>()?;
        let mut counts = vec![0u32; t_in];
        for idx in argmax {
            counts[idx as usize] += 1;
        }
        let duration = Tensor::from_vec(counts, (t_in,), att_w.device())?;
        let focus = Self::focus_rate(att_w)?;
        Ok((duration, focus))
    }

    fn focus_rate(att_w: &Tensor) -> Result<f32> {
        Ok(att_w
            .max(D::Minus1)?
            .mean_all()?
            .to_dtype(DType::F32)?
            .to_scalar::<f32>()?)
    }
}
