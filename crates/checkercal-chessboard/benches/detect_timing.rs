use std::hint::black_box;

use checkercal_chessboard::{chess_response, CornerRefiner, PatternDetector, RefineParams};
use checkercal_core::synthetic::{board_pose, SyntheticCamera};
use checkercal_core::{BoardModel, Distortion, GrayImage, GridGeometry, Intrinsics};
use criterion::{criterion_group, criterion_main, Criterion};

fn fixture(width: usize, height: usize) -> (BoardModel, GrayImage) {
    let focal = width as f64 * 1.25;
    let cam = SyntheticCamera {
        intrinsics: Intrinsics {
            fx: focal,
            fy: focal,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        },
        distortion: Distortion {
            k1: -0.12,
            k2: 0.03,
            ..Distortion::default()
        },
        width,
        height,
    };
    let board = BoardModel::new(GridGeometry::new(9, 6).unwrap(), 0.04).unwrap();
    let pose = board_pose(&board, 0.8, 0.2, -0.15, 0.1);
    let img = cam.render(&board, &pose);
    (board, img)
}

fn bench_response(c: &mut Criterion) {
    let (_, img) = fixture(640, 480);
    c.bench_function("chess_response_640x480", |b| {
        b.iter(|| {
            let map = chess_response(black_box(&img.view()));
            black_box(map.max())
        })
    });
}

fn bench_detect(c: &mut Criterion) {
    let detector = PatternDetector::default();
    for (w, h) in [(640, 480), (1280, 960)] {
        let (board, img) = fixture(w, h);
        c.bench_function(&format!("detect_9x6_{w}x{h}"), |b| {
            b.iter(|| {
                let found = detector.detect(black_box(&img.view()), board.geometry());
                black_box(found.map(|d| d.len()))
            })
        });
    }
}

fn bench_refine(c: &mut Criterion) {
    let (board, img) = fixture(640, 480);
    let detected = PatternDetector::default()
        .detect(&img.view(), board.geometry())
        .expect("synthetic board should be detected");
    let refiner = CornerRefiner::new(RefineParams::default()).unwrap();
    c.bench_function("refine_54_corners", |b| {
        b.iter(|| {
            let refined = refiner.refine(black_box(&img.view()), black_box(detected.points()));
            black_box(refined.len())
        })
    });
}

criterion_group!(detect_timing, bench_response, bench_detect, bench_refine);
criterion_main!(detect_timing);
