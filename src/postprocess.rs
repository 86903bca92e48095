use image::imageops::FilterType;
use rayon::prelude::*;

use crate::error::{DvsError, DvsResult};

/// Largest accepted median window edge.
pub const MAX_MEDIAN_KSIZE: u32 = 13;

/// Output height for a raster scaled to `out_width`, preserving aspect ratio.
///
/// Rounded down to an even number (yuv420p needs even dimensions), never below 2.
pub fn scaled_height(width: u32, height: u32, out_width: u32) -> u32 {
    let h = (u64::from(out_width) * u64::from(height) / u64::from(width.max(1))) as u32;
    (h & !1).max(2)
}

fn expected_len(width: u32, height: u32) -> DvsResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| DvsError::encode("rgb8 buffer size overflow"))
}

/// Bilinear resize of a tightly packed RGB8 buffer.
pub fn resize_rgb8(
    src: &[u8],
    width: u32,
    height: u32,
    out_width: u32,
    out_height: u32,
) -> DvsResult<Vec<u8>> {
    if src.len() != expected_len(width, height)? {
        return Err(DvsError::encode(
            "resize_rgb8 expects src matching width*height*3",
        ));
    }
    if out_width == 0 || out_height == 0 {
        return Err(DvsError::validation("resize target must be non-zero"));
    }
    if (width, height) == (out_width, out_height) {
        return Ok(src.to_vec());
    }
    let img = image::RgbImage::from_raw(width, height, src.to_vec())
        .ok_or_else(|| DvsError::encode("rgb8 buffer does not match its dimensions"))?;
    Ok(image::imageops::resize(&img, out_width, out_height, FilterType::Triangle).into_raw())
}

/// Per-channel median filter over a `ksize x ksize` window with replicated borders.
///
/// `ksize` must be odd; 1 is the identity.
pub fn median_blur_rgb8(src: &[u8], width: u32, height: u32, ksize: u32) -> DvsResult<Vec<u8>> {
    if src.len() != expected_len(width, height)? {
        return Err(DvsError::encode(
            "median_blur_rgb8 expects src matching width*height*3",
        ));
    }
    validate_ksize(ksize)?;
    if ksize == 1 || src.is_empty() {
        return Ok(src.to_vec());
    }

    let r = (ksize / 2) as i64;
    let (w, h) = (i64::from(width), i64::from(height));
    let stride = width as usize * 3;
    let mut out = vec![0u8; src.len()];

    out.par_chunks_mut(stride)
        .enumerate()
        .for_each_init(
            || Vec::with_capacity((ksize * ksize) as usize),
            |window, (y, row)| {
                let y = y as i64;
                for x in 0..w {
                    for c in 0..3usize {
                        window.clear();
                        for dy in -r..=r {
                            let sy = (y + dy).clamp(0, h - 1) as usize;
                            let base = sy * stride;
                            for dx in -r..=r {
                                let sx = (x + dx).clamp(0, w - 1) as usize;
                                window.push(src[base + sx * 3 + c]);
                            }
                        }
                        let mid = window.len() / 2;
                        let (_, m, _) = window.select_nth_unstable(mid);
                        row[x as usize * 3 + c] = *m;
                    }
                }
            },
        );
    Ok(out)
}

pub fn validate_ksize(ksize: u32) -> DvsResult<()> {
    if ksize == 0 || ksize.is_multiple_of(2) || ksize > MAX_MEDIAN_KSIZE {
        return Err(DvsError::validation(format!(
            "median blur size must be odd and in 1..={MAX_MEDIAN_KSIZE}, got {ksize}"
        )));
    }
    Ok(())
}
