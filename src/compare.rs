//! Image comparison metrics
//!
//! Pure functions turning two equal-shaped RGB buffers into a divergence
//! score. Alpha is dropped on load; channels are held as `i16` so that the
//! blur intermediate and signed differences fit without overflow.

use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{HarnessError, Result};

/// Separable 9-tap Gaussian kernel, applied horizontally then vertically
pub const GAUSSIAN_COEFF: [f32; 9] = [
    0.014_497_975,
    0.049_284_517,
    0.118_071_63,
    0.199_411_16,
    0.237_469_45,
    0.199_411_16,
    0.118_071_63,
    0.049_284_517,
    0.014_497_975,
];

/// RGB pixel buffer, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<[i16; 3]>,
}

impl PixelBuffer {
    pub fn from_rgb(img: &RgbImage) -> Self {
        let data = img
            .pixels()
            .map(|p| [p[0] as i16, p[1] as i16, p[2] as i16])
            .collect();
        Self {
            width: img.width(),
            height: img.height(),
            data,
        }
    }

    /// Any color type; alpha is truncated, not composited
    pub fn from_image(img: &DynamicImage) -> Self {
        Self::from_rgb(&img.to_rgb8())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let img = image::open(path)?;
        Ok(Self::from_image(&img))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> usize {
        self.data.len()
    }

    fn at(&self, x: i64, y: i64) -> [i16; 3] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width as usize + x]
    }
}

/// Fails with `ShapeMismatch` unless both buffers have the same dimensions
pub fn check_shape(a: &PixelBuffer, b: &PixelBuffer) -> Result<()> {
    if a.dimensions() != b.dimensions() {
        return Err(HarnessError::ShapeMismatch {
            capture: a.dimensions(),
            truth: b.dimensions(),
            artifacts: PathBuf::new(),
        });
    }
    Ok(())
}

/// Mean over pixels of the per-pixel squared channel distance
pub fn mse(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64> {
    check_shape(a, b)?;
    if a.pixels() == 0 {
        return Ok(0.0);
    }
    let acc: f64 = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(pa, pb)| {
            (0..3)
                .map(|k| {
                    let v = (pa[k] - pb[k]) as f64;
                    v * v
                })
                .sum::<f64>()
        })
        .sum();
    Ok(acc / a.pixels() as f64)
}

pub fn rmse(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64> {
    Ok(mse(a, b)?.sqrt())
}

/// Sum of absolute per-channel differences
pub fn sum_difference(a: &PixelBuffer, b: &PixelBuffer) -> Result<u64> {
    check_shape(a, b)?;
    Ok(a.data
        .iter()
        .zip(&b.data)
        .map(|(pa, pb)| {
            (0..3)
                .map(|k| (pa[k] as i32 - pb[k] as i32).unsigned_abs() as u64)
                .sum::<u64>()
        })
        .sum())
}

/// Number of pixels where any channel differs
pub fn pixel_count(a: &PixelBuffer, b: &PixelBuffer) -> Result<u64> {
    check_shape(a, b)?;
    Ok(a.data.iter().zip(&b.data).filter(|(pa, pb)| pa != pb).count() as u64)
}

/// Separable Gaussian blur; each pass truncates to `i16`.
///
/// Samples past the border are clamped to the nearest edge pixel.
pub fn gaussian_blur(src: &PixelBuffer) -> PixelBuffer {
    let (w, h) = (src.width as i64, src.height as i64);

    let pass = |input: &PixelBuffer, dx: i64, dy: i64| -> Vec<[i16; 3]> {
        let mut out = Vec::with_capacity(input.data.len());
        for y in 0..h {
            for x in 0..w {
                let mut acc = [0.0f32; 3];
                for (i, coeff) in GAUSSIAN_COEFF.iter().enumerate() {
                    let k = i as i64 - 4;
                    let p = input.at(x + k * dx, y + k * dy);
                    for c in 0..3 {
                        acc[c] += coeff * p[c] as f32;
                    }
                }
                out.push([acc[0] as i16, acc[1] as i16, acc[2] as i16]);
            }
        }
        out
    };

    let horizontal = PixelBuffer {
        width: src.width,
        height: src.height,
        data: pass(src, 1, 0),
    };
    let vertical = pass(&horizontal, 0, 1);
    PixelBuffer {
        width: src.width,
        height: src.height,
        data: vertical,
    }
}

/// Sum difference after blurring both inputs
pub fn blur_sum_difference(a: &PixelBuffer, b: &PixelBuffer) -> Result<u64> {
    check_shape(a, b)?;
    sum_difference(&gaussian_blur(a), &gaussian_blur(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareMethod {
    Rmse,
    Mse,
    SumDifference,
    BlurSumDifference,
    PixelCount,
}

impl CompareMethod {
    pub const ALL: [CompareMethod; 5] = [
        CompareMethod::Rmse,
        CompareMethod::Mse,
        CompareMethod::SumDifference,
        CompareMethod::BlurSumDifference,
        CompareMethod::PixelCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CompareMethod::Rmse => "rmse",
            CompareMethod::Mse => "mse",
            CompareMethod::SumDifference => "sum-difference",
            CompareMethod::BlurSumDifference => "blur-sum-difference",
            CompareMethod::PixelCount => "pixel-count",
        }
    }

    /// Divergence score of `a` against `b`
    pub fn score(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<f64> {
        Ok(match self {
            CompareMethod::Rmse => rmse(a, b)?,
            CompareMethod::Mse => mse(a, b)?,
            CompareMethod::SumDifference => sum_difference(a, b)? as f64,
            CompareMethod::BlurSumDifference => blur_sum_difference(a, b)? as f64,
            CompareMethod::PixelCount => pixel_count(a, b)? as f64,
        })
    }

    /// Value that 100% corresponds to for an image of `pixels` pixels
    pub fn full_scale(&self, pixels: usize) -> f64 {
        match self {
            CompareMethod::Rmse | CompareMethod::Mse => 255.0,
            CompareMethod::SumDifference | CompareMethod::BlurSumDifference => {
                pixels as f64 * 3.0 * 255.0
            }
            CompareMethod::PixelCount => pixels as f64,
        }
    }
}

impl fmt::Display for CompareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompareMethod {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        CompareMethod::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| HarnessError::Config(format!("Unknown compare method: {}", s)))
    }
}

/// Allowed divergence, absolute or as a percentage of the metric's full scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Threshold {
    Absolute(f64),
    Percent(f64),
}

impl Threshold {
    /// Absolute bound for `method` on an image of `pixels` pixels
    pub fn resolve(&self, method: CompareMethod, pixels: usize) -> f64 {
        match *self {
            Threshold::Absolute(v) => v,
            Threshold::Percent(p) => p * method.full_scale(pixels) / 100.0,
        }
    }

    pub fn from_toml(value: &toml::Value) -> Result<Self> {
        let threshold = match value {
            toml::Value::Integer(n) => Threshold::Absolute(*n as f64),
            toml::Value::Float(f) => Threshold::Absolute(*f),
            toml::Value::String(s) => s.parse()?,
            other => {
                return Err(HarnessError::Config(format!(
                    "threshold must be a number or a percentage string, got {}",
                    other
                )));
            }
        };
        let v = match threshold {
            Threshold::Absolute(v) | Threshold::Percent(v) => v,
        };
        if !v.is_finite() || v < 0.0 {
            return Err(HarnessError::Config(format!(
                "threshold must be non-negative, got {}",
                v
            )));
        }
        Ok(threshold)
    }
}

impl FromStr for Threshold {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || HarnessError::Config(format!("invalid threshold '{}'", s));
        match s.strip_suffix('%') {
            Some(pct) => pct.trim().parse().map(Threshold::Percent).map_err(|_| bad()),
            None => s.parse().map(Threshold::Absolute).map_err(|_| bad()),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Absolute(v) => write!(f, "{}", v),
            Threshold::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// Outcome of one comparison
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub method: CompareMethod,
    pub diff: f64,
    pub threshold: f64,
    pub pixels: usize,
}

impl Comparison {
    /// Fails only when the score is strictly above the bound
    pub fn passed(&self) -> bool {
        self.diff <= self.threshold
    }
}

/// Score `capture` against `truth` and resolve the threshold
pub fn compare_images(
    capture: &PixelBuffer,
    truth: &PixelBuffer,
    method: CompareMethod,
    threshold: Threshold,
) -> Result<Comparison> {
    let diff = method.score(capture, truth)?;
    let pixels = capture.pixels();
    Ok(Comparison {
        method,
        diff,
        threshold: threshold.resolve(method, pixels),
        pixels,
    })
}
