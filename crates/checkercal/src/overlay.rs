//! Detected-corner overlay drawn on an RGB copy of the input image.

use crate::core::DetectedCorners;
use image::{DynamicImage, Rgb, RgbImage};

const MARKER_RADIUS: i32 = 4;

/// Hue per board row, cycled.
const ROW_COLORS: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 200, 0]),
    Rgb([0, 128, 255]),
    Rgb([160, 0, 255]),
];

/// Draw every corner as a ring and connect them in raster order.
///
/// Rows get distinct colours, so a flipped or rotated ordering is visible at a
/// glance.
pub fn draw_corners(image: &DynamicImage, corners: &DetectedCorners) -> RgbImage {
    let mut out = image.to_rgb8();
    let columns = corners.geometry().columns() as usize;
    let pixels: Vec<(i32, i32)> = corners
        .points()
        .iter()
        .map(|p| (p.x.round() as i32, p.y.round() as i32))
        .collect();

    for (i, &p) in pixels.iter().enumerate() {
        let color = ROW_COLORS[(i / columns) % ROW_COLORS.len()];
        if let Some(&next) = pixels.get(i + 1) {
            draw_line_segment(&mut out, p, next, color);
        }
        draw_ring(&mut out, p, MARKER_RADIUS, color);
    }
    out
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

// Bresenham
fn draw_line_segment(img: &mut RgbImage, p1: (i32, i32), p2: (i32, i32), color: Rgb<u8>) {
    let (mut x0, mut y0) = p1;
    let (x1, y1) = p2;

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_ring(img: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (cx, cy) = center;
    let outer = radius * radius;
    let inner = (radius - 1) * (radius - 1);
    for y in (cy - radius)..=(cy + radius) {
        for x in (cx - radius)..=(cx + radius) {
            let d2 = (x - cx).pow(2) + (y - cy).pow(2);
            if d2 <= outer && d2 >= inner {
                put(img, x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GridGeometry;
    use nalgebra::Point2;

    #[test]
    fn draws_rings_and_links_on_a_copy() {
        let gray = image::GrayImage::from_pixel(40, 30, image::Luma([50]));
        let input = DynamicImage::ImageLuma8(gray);
        let geometry = GridGeometry::new(2, 2).unwrap();
        let corners = DetectedCorners::new(
            geometry,
            vec![
                Point2::new(10.0, 10.0),
                Point2::new(30.0, 10.0),
                Point2::new(10.0, 20.0),
                Point2::new(30.0, 20.0),
            ],
        )
        .unwrap();

        let out = draw_corners(&input, &corners);
        assert_eq!(out.dimensions(), (40, 30));
        // ring of the first corner, first row colour
        assert_eq!(*out.get_pixel(14, 10), ROW_COLORS[0]);
        // link between corners 0 and 1
        assert_eq!(*out.get_pixel(20, 10), ROW_COLORS[0]);
        // second row
        assert_eq!(*out.get_pixel(10, 24), ROW_COLORS[1]);
        // untouched background, and the input stays gray
        assert_eq!(*out.get_pixel(20, 27), Rgb([50, 50, 50]));
        assert_eq!(input.color(), image::ColorType::L8);
    }

    #[test]
    fn corners_outside_the_image_are_clipped() {
        let input = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let corners = DetectedCorners::new(
            GridGeometry::new(2, 2).unwrap(),
            vec![
                Point2::new(-20.0, -20.0),
                Point2::new(50.0, -3.0),
                Point2::new(4.0, 4.0),
                Point2::new(100.0, 100.0),
            ],
        )
        .unwrap();
        let out = draw_corners(&input, &corners);
        assert_eq!(out.dimensions(), (8, 8));
    }
}
