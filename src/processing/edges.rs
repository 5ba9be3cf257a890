// SPDX-License-Identifier: GPL-3.0-only

//! Canny edge detection on a grayscale image

use image::{GrayImage, Luma, RgbaImage};

const EDGE: u8 = 255;

/// Sobel gradients with clamped borders; returns (L1 magnitude, direction bucket)
fn gradients(gray: &GrayImage) -> (Vec<f32>, Vec<u8>) {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as isize, height as isize);
    let sample = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        gray.get_pixel(x, y).0[0] as f32
    };

    let len = (width * height) as usize;
    let mut magnitude = vec![0.0f32; len];
    let mut direction = vec![0u8; len];

    for y in 0..h {
        for x in 0..w {
            let tl = sample(x - 1, y - 1);
            let tm = sample(x, y - 1);
            let tr = sample(x + 1, y - 1);
            let ml = sample(x - 1, y);
            let mr = sample(x + 1, y);
            let bl = sample(x - 1, y + 1);
            let bm = sample(x, y + 1);
            let br = sample(x + 1, y + 1);

            let gx = -tl - 2.0 * ml - bl + tr + 2.0 * mr + br;
            let gy = -tl - 2.0 * tm - tr + bl + 2.0 * bm + br;

            let i = (y * w + x) as usize;
            magnitude[i] = gx.abs() + gy.abs();

            // 0: horizontal gradient, 1: 45°, 2: vertical, 3: 135°
            let angle = gy.atan2(gx).to_degrees().rem_euclid(180.0);
            direction[i] = match angle {
                a if !(22.5..157.5).contains(&a) => 0,
                a if a < 67.5 => 1,
                a if a < 112.5 => 2,
                _ => 3,
            };
        }
    }
    (magnitude, direction)
}

/// Edge map with hysteresis thresholds `low` and `high` (white edges on black)
pub fn canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut out = GrayImage::new(width, height);
    if width < 3 || height < 3 {
        return out;
    }

    let (magnitude, direction) = gradients(gray);
    let (w, h) = (width as usize, height as usize);
    let at = |x: usize, y: usize| magnitude[y * w + x];

    // Non-maximum suppression, borders excluded
    let mut thin = vec![0.0f32; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let m = at(x, y);
            let (a, b) = match direction[y * w + x] {
                0 => (at(x - 1, y), at(x + 1, y)),
                1 => (at(x + 1, y + 1), at(x - 1, y - 1)),
                2 => (at(x, y - 1), at(x, y + 1)),
                _ => (at(x - 1, y + 1), at(x + 1, y - 1)),
            };
            if m > a && m >= b {
                thin[y * w + x] = m;
            }
        }
    }

    // Hysteresis: grow from strong pixels through weak ones
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if thin[y * w + x] > high {
                stack.push((x, y));
            }
        }
    }
    while let Some((x, y)) = stack.pop() {
        if out.get_pixel(x as u32, y as u32).0[0] == EDGE {
            continue;
        }
        out.put_pixel(x as u32, y as u32, Luma([EDGE]));
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx == 0 || ny == 0 || nx >= w - 1 || ny >= h - 1 {
                    continue;
                }
                if thin[ny * w + nx] > low && out.get_pixel(nx as u32, ny as u32).0[0] != EDGE {
                    stack.push((nx, ny));
                }
            }
        }
    }
    out
}

/// Opaque RGBA from a single-channel edge map
pub fn to_rgba(edges: &GrayImage) -> RgbaImage {
    let (width, height) = edges.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let v = edges.get_pixel(x, y).0[0];
        image::Rgba([v, v, v, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_image_has_no_edges() {
        let gray = GrayImage::from_pixel(16, 16, Luma([128]));
        let edges = canny(&gray, 80.0, 100.0);
        assert!(edges.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_vertical_step_produces_vertical_line() {
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 0 } else { 255 }]));
        let edges = canny(&gray, 80.0, 100.0);

        for y in 2..14 {
            let row: Vec<u32> = (0..16)
                .filter(|&x| edges.get_pixel(x, y).0[0] == EDGE)
                .collect();
            assert!(!row.is_empty(), "row {} has no edge", y);
            assert!(row.iter().all(|&x| (7..=8).contains(&x)), "row {}: {:?}", y, row);
        }
    }

    #[test]
    fn test_weak_gradient_below_low_threshold_is_ignored() {
        // A 10-level step gives an L1 Sobel response of 40, under both thresholds
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 100 } else { 110 }]));
        let edges = canny(&gray, 80.0, 100.0);
        assert!(edges.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_tiny_image_is_blank() {
        let gray = GrayImage::from_pixel(2, 2, Luma([255]));
        assert_eq!(canny(&gray, 80.0, 100.0).dimensions(), (2, 2));
    }

    #[test]
    fn test_rgba_is_opaque_grayscale() {
        let edges = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
        let rgba = to_rgba(&edges);
        assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }
}
