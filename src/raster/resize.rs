//! Resampling of tiles and regions to exact target sizes.
//!
//! 8-bit rasters go through the `image` crate's Catmull-Rom filter. Large
//! reductions are split into several passes that each shrink the image by
//! [`SHRINK_RATIO`], which keeps fine structures from aliasing.
//!
//! 16-bit and float rasters are interpolated directly, channel by channel,
//! with a Catmull-Rom kernel over a 4x4 neighbourhood. Pixels within two
//! samples of the border, or next to a NaN sample, use bilinear
//! interpolation that prefers the defined neighbour over a NaN.

use image::imageops::FilterType;

use crate::error::PyramidError;

use super::{Raster, SampleType, Samples};

/// Factor applied to each dimension per reduction pass.
///
/// Changing it changes the bytes of every generated tile.
pub const SHRINK_RATIO: f64 = 0.79;

/// Resample `raster` to exactly `width` x `height`.
///
/// A raster that already has the requested size is returned unchanged.
///
/// # Errors
///
/// Returns [`PyramidError::InvalidParameters`] for a zero target dimension.
pub fn resize(raster: Raster, width: u32, height: u32) -> Result<Raster, PyramidError> {
    if width == 0 || height == 0 {
        return Err(PyramidError::InvalidParameters(format!(
            "cannot resize to {width}x{height}"
        )));
    }
    if raster.dimensions() == (width, height) {
        return Ok(raster);
    }

    match raster.sample_type() {
        SampleType::U8 => resize_8bit(raster, width, height),
        SampleType::U16 | SampleType::F32 => resize_interpolated(&raster, width, height),
    }
}

fn resize_8bit(raster: Raster, width: u32, height: u32) -> Result<Raster, PyramidError> {
    let mut image = raster.into_dynamic()?;

    if width > image.width() || height > image.height() {
        let resized = image.resize_exact(width, height, FilterType::CatmullRom);
        return Ok(Raster::from_dynamic(resized));
    }

    let (mut current_width, mut current_height) = (image.width(), image.height());
    while (current_width, current_height) != (width, height) {
        current_width = shrink_step(current_width, width);
        current_height = shrink_step(current_height, height);
        image = image.resize_exact(current_width, current_height, FilterType::CatmullRom);
    }
    Ok(Raster::from_dynamic(image))
}

/// Next intermediate size on the way from `current` down to `target`.
fn shrink_step(current: u32, target: u32) -> u32 {
    if current <= target {
        return current;
    }
    ((f64::from(current) * SHRINK_RATIO) as u32).max(target)
}

fn resize_interpolated(raster: &Raster, width: u32, height: u32) -> Result<Raster, PyramidError> {
    let (src_width, src_height) = raster.dimensions();
    let channels = raster.layout().channels();

    let x_scale = f64::from(width) / f64::from(src_width);
    let y_scale = f64::from(height) / f64::from(src_height);
    let src_center_x = f64::from(src_width) / 2.0;
    let src_center_y = f64::from(src_height) / 2.0;
    let dst_center_x = (f64::from(width) + x_scale) / 2.0;
    let dst_center_y = (f64::from(height) + y_scale) / 2.0;

    let mut values = Vec::with_capacity(width as usize * height as usize * channels);
    for y in 0..height {
        let ys = (f64::from(y) - dst_center_y) / y_scale + src_center_y;
        for x in 0..width {
            let xs = (f64::from(x) - dst_center_x) / x_scale + src_center_x;
            for channel in 0..channels {
                values.push(bicubic(raster, channel, xs, ys));
            }
        }
    }

    let samples = match raster.sample_type() {
        SampleType::U8 => Samples::U8(
            values
                .into_iter()
                .map(|v| (v + 0.5).trunc().clamp(0.0, 255.0) as u8)
                .collect(),
        ),
        SampleType::U16 => Samples::U16(
            values
                .into_iter()
                .map(|v| (v + 0.5).trunc().clamp(0.0, 65535.0) as u16)
                .collect(),
        ),
        SampleType::F32 => Samples::F32(values.into_iter().map(|v| v as f32).collect()),
    };
    Raster::new(width, height, raster.layout(), samples)
}

fn bicubic(raster: &Raster, channel: usize, x0: f64, y0: f64) -> f64 {
    let width = i64::from(raster.width());
    let height = i64::from(raster.height());
    let u0 = x0.floor() as i64;
    let v0 = y0.floor() as i64;
    if u0 <= 0 || u0 >= width - 2 || v0 <= 0 || v0 >= height - 2 {
        return bilinear(raster, channel, x0, y0);
    }

    let mut q = 0.0;
    for v in v0 - 1..=v0 + 2 {
        let mut p = 0.0;
        for u in u0 - 1..=u0 + 2 {
            let sample = raster.sample(u as u32, v as u32, channel);
            if sample.is_nan() {
                return bilinear(raster, channel, x0, y0);
            }
            p += sample * cubic(x0 - u as f64);
        }
        q += p * cubic(y0 - v as f64);
    }
    q
}

fn bilinear(raster: &Raster, channel: usize, x: f64, y: f64) -> f64 {
    let width = f64::from(raster.width());
    let height = f64::from(raster.height());
    if x < -1.0 || x >= width || y < -1.0 || y >= height {
        return 0.0;
    }
    if raster.width() == 1 && raster.height() == 1 {
        return raster.sample(0, 0, channel);
    }

    let x = if x >= width - 1.0 { width - 1.001 } else { x.max(0.0) };
    let y = if y >= height - 1.0 { height - 1.001 } else { y.max(0.0) };
    let x_base = x as u32;
    let y_base = y as u32;
    let x_fraction = x - f64::from(x_base);
    let y_fraction = y - f64::from(y_base);
    let at = |dx: u32, dy: u32| raster.sample(x_base + dx, y_base + dy, channel);

    if raster.height() == 1 {
        return blend(at(0, 0), at(1, 0), x_fraction);
    }
    let (top, bottom) = if raster.width() == 1 {
        (at(0, 0), at(0, 1))
    } else {
        (
            blend(at(0, 0), at(1, 0), x_fraction),
            blend(at(0, 1), at(1, 1), x_fraction),
        )
    };
    blend(top, bottom, y_fraction)
}

/// Linear blend that falls back to the defined side when the nearer one is
/// NaN.
fn blend(a: f64, b: f64, fraction: f64) -> f64 {
    if a.is_nan() && fraction >= 0.5 {
        return b;
    }
    if b.is_nan() && fraction < 0.5 {
        return a;
    }
    a + fraction * (b - a)
}

/// Catmull-Rom kernel (`a = 0.5`).
fn cubic(x: f64) -> f64 {
    const A: f64 = 0.5;
    let x = x.abs();
    if x < 1.0 {
        x * x * (x * (-A + 2.0) + (A - 3.0)) + 1.0
    } else if x < 2.0 {
        -A * x * x * x + 5.0 * A * x * x - 8.0 * A * x + 4.0 * A
    } else {
        0.0
    }
}
