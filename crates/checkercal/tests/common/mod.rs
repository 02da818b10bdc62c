//! Rendered checkerboard shots written to disk.

#![allow(dead_code)]

use checkercal::core::synthetic::{board_pose, SyntheticCamera};
use checkercal::core::{BoardModel, Distortion, GridGeometry, Intrinsics};
use std::path::{Path, PathBuf};

/// Tilts at 0.8 m that keep the whole 9x5 board inside a 320x240 frame.
pub const TILTS: [(f64, f64, f64); 10] = [
    (0.25, -0.2, 0.1),
    (0.0, 0.0, 0.0),
    (-0.35, 0.3, -0.4),
    (0.3, 0.25, 0.2),
    (-0.2, -0.3, 0.05),
    (0.1, 0.35, -0.2),
    (-0.3, -0.1, 0.3),
    (0.15, -0.3, -0.1),
    (-0.1, 0.2, 0.25),
    (0.35, 0.0, -0.3),
];

pub fn camera() -> SyntheticCamera {
    SyntheticCamera {
        intrinsics: Intrinsics {
            fx: 400.0,
            fy: 400.0,
            cx: 160.0,
            cy: 120.0,
        },
        distortion: Distortion {
            k1: -0.12,
            k2: 0.03,
            p1: 0.0005,
            p2: -0.0004,
            k3: 0.0,
        },
        width: 320,
        height: 240,
    }
}

pub fn board() -> BoardModel {
    BoardModel::new(GridGeometry::new(9, 5).unwrap(), 0.04).unwrap()
}

/// Save one rendered view as PNG.
pub fn write_board(path: &Path, tilt: (f64, f64, f64)) {
    let board = board();
    let (roll, pitch, yaw) = tilt;
    let img = camera().render(&board, &board_pose(&board, 0.8, roll, pitch, yaw));
    image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data)
        .unwrap()
        .save(path)
        .unwrap();
}

/// Save one rendered view centred on a larger `size` canvas of the same
/// light background, so the board reads the same at another resolution.
pub fn write_padded_board(path: &Path, tilt: (f64, f64, f64), size: (u32, u32)) {
    let board = board();
    let (roll, pitch, yaw) = tilt;
    let img = camera().render(&board, &board_pose(&board, 0.8, roll, pitch, yaw));
    let view = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data).unwrap();
    let mut canvas = image::GrayImage::from_pixel(size.0, size.1, *view.get_pixel(0, 0));
    let x = (size.0 - view.width()) / 2;
    let y = (size.1 - view.height()) / 2;
    image::imageops::replace(&mut canvas, &view, x as i64, y as i64);
    canvas.save(path).unwrap();
}

/// Save a frame without any board: a smooth horizontal ramp.
pub fn write_blank(path: &Path) {
    image::GrayImage::from_fn(320, 240, |x, _| image::Luma([(40 + x / 2) as u8]))
        .save(path)
        .unwrap();
}

/// `boards` rendered views followed by `blanks` empty frames, in name order.
pub fn write_shots(dir: &Path, boards: usize, blanks: usize) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for (i, &tilt) in TILTS.iter().take(boards).enumerate() {
        let path = dir.join(format!("shot{i:02}.png"));
        write_board(&path, tilt);
        paths.push(path);
    }
    for i in 0..blanks {
        let path = dir.join(format!("shot{:02}.png", boards + i));
        write_blank(&path);
        paths.push(path);
    }
    paths
}
