//! Performance benchmarks for detour_core using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use detour_core::config::DetectorConfig;
use detour_core::detector::DetourDetector;
use detour_core::geo::point_to_polyline_m;
use detour_core::geometry::douglas_peucker;
use detour_core::model::{GeoPoint, VehicleFix};
use detour_core::test_helpers::{fix, static_data_with, straight_shape, OFF_ROUTE_LAT, TEST_ROUTE};

/// A long east-west shape with `vertices` points, 0.001 degrees apart.
fn long_shape_lons(vertices: usize) -> Vec<f64> {
    (0..vertices).map(|i| -79.70 + 0.001 * i as f64).collect()
}

fn bench_polyline_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_to_polyline");
    for vertices in [100usize, 500, 1000] {
        let shape = straight_shape("bench", &long_shape_lons(vertices));
        let p = GeoPoint { lat: 44.395, lon: -79.70 + 0.001 * (vertices as f64 / 2.0) };
        group.bench_with_input(BenchmarkId::from_parameter(vertices), &shape, |b, shape| {
            b.iter(|| black_box(point_to_polyline_m(&p, &shape.points)));
        });
    }
    group.finish();
}

fn bench_douglas_peucker(c: &mut Criterion) {
    // A zigzag track: worst-ish case, every corner survives simplification.
    let track: Vec<GeoPoint> = (0..200)
        .map(|i| GeoPoint {
            lat: 44.39 + 0.001 * ((i % 5) as f64),
            lon: -79.70 + 0.0005 * i as f64,
        })
        .collect();
    c.bench_function("douglas_peucker_200", |b| {
        b.iter(|| black_box(douglas_peucker(&track, 25.0)));
    });
}

fn bench_detector_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("detector_tick");
    for fleet in [10usize, 50, 200] {
        let data = static_data_with(vec![straight_shape("bench", &long_shape_lons(200))], TEST_ROUTE);
        group.bench_with_input(BenchmarkId::from_parameter(fleet), &fleet, |b, &fleet| {
            b.iter(|| {
                let mut detector = DetourDetector::new(DetectorConfig::default());
                let mut now_ms = 1_700_000_000_000;
                for _ in 0..5 {
                    now_ms += 30_000;
                    let fixes: Vec<VehicleFix> = (0..fleet)
                        .map(|i| {
                            fix(
                                &format!("bus-{i}"),
                                TEST_ROUTE,
                                OFF_ROUTE_LAT,
                                -79.70 + 0.001 * i as f64,
                                now_ms,
                            )
                        })
                        .collect();
                    black_box(detector.process_vehicles(&fixes, &data, now_ms));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_polyline_projection,
    bench_douglas_peucker,
    bench_detector_tick
);
criterion_main!(benches);
