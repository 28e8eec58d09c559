//! Fidelity properties of the animation key reduction.
//!
//! The pruned and resampled curves must reproduce the originals within
//! the documented per-channel tolerances when sampled at the original key
//! times.

use glam::{Quat, Vec3};
use ufg::animation::{
    convert_keys_to_linear, prune_animation_keys, QuatMetric, ScaleMetric, SeparateStream,
    TranslationMetric,
};
use ufg::euler::{convert_rotation_keys, euler_to_quat};
use ufg::json::animation::Interpolation;
use ufg::math;

fn sample_vec3(times: &[f32], points: &[Vec3], t: f32) -> Vec3 {
    if times.is_empty() {
        return points[0];
    }
    if t <= times[0] {
        return points[0];
    }
    if t >= *times.last().unwrap() {
        return *points.last().unwrap();
    }
    let i1 = times.iter().position(|&kt| kt >= t).unwrap();
    let i0 = i1 - 1;
    let s = (t - times[i0]) / (times[i1] - times[i0]);
    points[i0].lerp(points[i1], s)
}

fn sample_quat_nlerp(times: &[f32], points: &[Quat], t: f32) -> Quat {
    if times.is_empty() {
        return points[0];
    }
    if t <= times[0] {
        return points[0];
    }
    if t >= *times.last().unwrap() {
        return *points.last().unwrap();
    }
    let i1 = times.iter().position(|&kt| kt >= t).unwrap();
    let i0 = i1 - 1;
    let s = (t - times[i0]) / (times[i1] - times[i0]);
    math::nlerp(points[i0], points[i1], s)
}

// A wavy but smooth translation curve with redundant interior keys.
fn wavy_translations() -> (Vec<f32>, Vec<Vec3>) {
    let mut times = Vec::new();
    let mut points = Vec::new();
    for i in 0..60 {
        let t = i as f32 * 0.1;
        times.push(t);
        points.push(Vec3::new(t * 2.0, (t * 0.7).sin() * 5.0, 0.0));
    }
    (times, points)
}

#[test]
fn translation_pruning_stays_in_tolerance() {
    let (times, points) = wavy_translations();
    let mut stream = SeparateStream::<Vec3, TranslationMetric>::new(&times, &points);
    prune_animation_keys(times.len(), &mut stream);

    assert!(stream.times.len() < times.len());
    assert!(stream.times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*stream.times.last().unwrap(), *times.last().unwrap());

    // Any run's proportional tolerance is bounded by the largest pairwise
    // distance between original keys.
    let mut span_sq = 0.0f32;
    for a in &points {
        for b in &points {
            span_sq = span_sq.max((*a - *b).length_squared());
        }
    }
    let tol_sq = (span_sq * math::PRUNE_TRANSLATION_PROPORTIONAL_SQ)
        .max(math::PRUNE_TRANSLATION_ABSOLUTE_SQ);
    for (&t, &original) in times.iter().zip(&points) {
        let pruned = sample_vec3(&stream.times, &stream.points, t);
        let error_sq = (pruned - original).length_squared();
        // The hybrid tolerance is per-run; the whole-span bound is the
        // loosest it can get.
        assert!(
            error_sq <= tol_sq,
            "error {} at t {} exceeds {}",
            error_sq,
            t,
            tol_sq
        );
    }
}

#[test]
fn rotation_pruning_stays_in_tolerance() {
    let mut times = Vec::new();
    let mut points = Vec::new();
    for i in 0..80 {
        let t = i as f32 * 0.05;
        times.push(t);
        points.push(Quat::from_rotation_y(t * 0.6) * Quat::from_rotation_x((t * 0.9).sin() * 0.4));
    }

    let mut stream = SeparateStream::<Quat, QuatMetric>::new(&times, &points);
    prune_animation_keys(times.len(), &mut stream);
    assert!(stream.times.len() < times.len());

    for (&t, &original) in times.iter().zip(&points) {
        let pruned = sample_quat_nlerp(&stream.times, &stream.points, t);
        let error = math::quat_abs_min_delta_angle(pruned, original);
        // Tolerance accumulates at most per committed run; stay within a
        // small multiple of the per-key bound.
        assert!(
            error <= 4.0 * math::PRUNE_ROTATION_COMPONENT,
            "error {} at t {}",
            error,
            t
        );
    }
}

#[test]
fn scale_pruning_keeps_endpoints_and_order() {
    let times: Vec<f32> = (0..20).map(|i| i as f32 * 0.25).collect();
    let points: Vec<Vec3> = times
        .iter()
        .map(|&t| Vec3::splat(1.0 + 0.5 * (t * 0.3).sin()))
        .collect();
    let mut stream = SeparateStream::<Vec3, ScaleMetric>::new(&times, &points);
    prune_animation_keys(times.len(), &mut stream);
    assert_eq!(stream.times[0], times[0]);
    assert_eq!(*stream.times.last().unwrap(), *times.last().unwrap());
    assert!(stream.times.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn euler_resampling_matches_at_source_keys() {
    let times: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
    let quats: Vec<Quat> = times
        .iter()
        .map(|&t| Quat::from_rotation_z(t * 0.4) * Quat::from_rotation_x(t * 0.2))
        .collect();

    let (out_times, out_eulers) = convert_rotation_keys(&times, &quats);
    assert!(out_times.windows(2).all(|w| w[0] < w[1]));

    for (&t, &expected) in times.iter().zip(&quats) {
        // Linear interpolation in Euler space at the source key time.
        let e = {
            let i1 = out_times
                .iter()
                .position(|&kt| kt >= t - 1e-6)
                .unwrap_or(out_times.len() - 1);
            if i1 == 0 || (out_times[i1] - t).abs() < 1e-6 {
                out_eulers[i1]
            } else {
                let i0 = i1 - 1;
                let s = (t - out_times[i0]) / (out_times[i1] - out_times[i0]);
                out_eulers[i0].lerp(out_eulers[i1], s)
            }
        };
        let q = euler_to_quat(e.as_dvec3()).as_quat();
        let error = math::quat_abs_min_delta_angle(q, expected);
        // The documented bound is 0.1°; allow the f32 round trip on top.
        assert!(error < 0.005, "error {} at t {}", error, t);
    }
}

#[test]
fn cubic_tessellation_preserves_monotonic_times() {
    let mut times = vec![0.0, 0.6, 1.5];
    let zero = Vec3::ZERO;
    // (in-tangent, point, out-tangent) triples.
    let mut points = vec![
        zero,
        Vec3::ZERO,
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(1.0, 2.0, 0.0),
        Vec3::new(-3.0, 0.0, 0.0),
        Vec3::new(-3.0, 0.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        zero,
    ];
    convert_keys_to_linear::<Vec3, TranslationMetric>(
        Interpolation::CubicSpline,
        &mut times,
        &mut points,
    );
    assert_eq!(times.len(), points.len());
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(times[0], 0.0);
    assert_eq!(*times.last().unwrap(), 1.5);
    assert_eq!(points[0], Vec3::ZERO);
    assert_eq!(*points.last().unwrap(), Vec3::new(0.0, -1.0, 0.0));
}
