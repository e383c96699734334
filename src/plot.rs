//! Diagnostic plot rendering.
//!
//! Attention weights become heatmap grids, stop-token probabilities become
//! a line plot; both are written as PNG. A 4-D attention tensor is read as
//! `[h1, h2, T_out, T_in]` and rendered as an `h1 × h2` grid of heatmaps;
//! 2-D is a single heatmap; any other rank is a hard error.

use std::path::Path;

use candle_core::{DType, Tensor};
use image::{Rgb, RgbImage};

use crate::{Error, Result};

const CELL_PADDING: u32 = 4;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Render attention weights as a heatmap grid PNG.
pub fn save_attention(att_w: &Tensor, path: &Path) -> Result<()> {
    let (h1, h2, t_out, t_in) = match att_w.rank() {
        2 => {
            let (t_out, t_in) = att_w.dims2()?;
            (1, 1, t_out, t_in)
        }
        4 => att_w.dims4()?,
        rank => {
            return Err(Error::Plot(format!(
                "attention weights must be 2-D or 4-D, got rank {rank}"
            )))
        }
    };
    if t_out == 0 || t_in == 0 {
        return Err(Error::Plot("attention weights are empty".into()));
    }

    let values = att_w.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

    // Keep tiny alignments readable, cap the blow-up for large ones.
    let scale = (256 / t_out.max(t_in) as u32).clamp(1, 8);
    let cell_w = t_in as u32 * scale;
    let cell_h = t_out as u32 * scale;
    let width = h2 as u32 * cell_w + (h2 as u32 + 1) * CELL_PADDING;
    let height = h1 as u32 * cell_h + (h1 as u32 + 1) * CELL_PADDING;
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    for row in 0..h1 {
        for col in 0..h2 {
            let cell = &values[(row * h2 + col) * t_out * t_in..][..t_out * t_in];
            let (min, max) = min_max(cell);
            let range = if max > min { max - min } else { 1.0 };
            let x0 = col as u32 * cell_w + (col as u32 + 1) * CELL_PADDING;
            let y0 = row as u32 * cell_h + (row as u32 + 1) * CELL_PADDING;
            for y in 0..t_out {
                for x in 0..t_in {
                    let v = (cell[y * t_in + x] - min) / range;
                    let color = heat_color(v);
                    for dy in 0..scale {
                        for dx in 0..scale {
                            img.put_pixel(
                                x0 + x as u32 * scale + dx,
                                y0 + y as u32 * scale + dy,
                                color,
                            );
                        }
                    }
                }
            }
        }
    }

    img.save(path)?;
    Ok(())
}

/// Render a stop-token probability curve (values in [0, 1]) as a PNG.
pub fn save_probability(prob: &Tensor, path: &Path) -> Result<()> {
    if prob.rank() != 1 {
        return Err(Error::Plot(format!(
            "stop probabilities must be 1-D, got rank {}",
            prob.rank()
        )));
    }
    let values = prob.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    if values.is_empty() {
        return Err(Error::Plot("stop probabilities are empty".into()));
    }

    let (width, height, margin) = (640u32, 320u32, 24u32);
    let plot_w = (width - 2 * margin) as f32;
    let plot_h = (height - 2 * margin) as f32;
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    // horizontal gridlines at 0, 0.25, ..., 1
    for step in 0..=4 {
        let y = margin + (plot_h * step as f32 / 4.0) as u32;
        for x in margin..width - margin {
            img.put_pixel(x, y, Rgb([220, 220, 220]));
        }
    }

    let point = |t: usize| -> (i64, i64) {
        let x = if values.len() == 1 {
            margin as f32
        } else {
            margin as f32 + plot_w * t as f32 / (values.len() - 1) as f32
        };
        let y = margin as f32 + plot_h * (1.0 - values[t].clamp(0.0, 1.0));
        (x as i64, y as i64)
    };
    for t in 0..values.len().saturating_sub(1) {
        draw_line(&mut img, point(t), point(t + 1), Rgb([30, 60, 180]));
    }
    if values.len() == 1 {
        let (x, y) = point(0);
        img.put_pixel(x as u32, y as u32, Rgb([30, 60, 180]));
    }

    img.save(path)?;
    Ok(())
}

fn min_max(values: &[f32]) -> (f32, f32) {
    values.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

/// Two-segment dark-blue → magenta → yellow ramp.
fn heat_color(v: f32) -> Rgb<u8> {
    let v = v.clamp(0.0, 1.0);
    let lerp = |a: f32, b: f32, t: f32| (a + (b - a) * t) as u8;
    if v < 0.5 {
        let t = v * 2.0;
        Rgb([lerp(13.0, 204.0, t), lerp(8.0, 71.0, t), lerp(135.0, 120.0, t)])
    } else {
        let t = (v - 0.5) * 2.0;
        Rgb([lerp(204.0, 240.0, t), lerp(71.0, 249.0, t), lerp(120.0, 33.0, t)])
    }
}

fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let (x1, y1) = to;
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
            img.put_pixel(x as u32, y as u32, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
