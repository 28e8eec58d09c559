//! Quaternion to Euler-angle resampling.
//!
//! USD expresses non-skin rotations as Euler XYZ ops, but Euler-space
//! linear interpolation does not match quaternion slerp, so a direct
//! per-key conversion drifts between keys. The resampler walks each slerp
//! segment, measuring the angular error of the Euler-space line against
//! the quaternion curve, and inserts keys wherever the error would exceed
//! the bound. Near-180° arcs are split at the midpoint first since their
//! interpolation direction is ambiguous. All math runs in f64.

use glam::{DQuat, DVec3, Quat, Vec3};

/// Converts XYZ Tait-Bryan angles to a quaternion.
pub fn euler_to_quat(e: DVec3) -> DQuat {
    let (sz, cz) = (e.z * 0.5).sin_cos();
    let (sy, cy) = (e.y * 0.5).sin_cos();
    let (sx, cx) = (e.x * 0.5).sin_cos();

    let w = cz * cy * cx + sz * sy * sx;
    let x = cz * cy * sx - sz * sy * cx;
    let y = sz * cy * sx + cz * sy * cx;
    let z = sz * cy * cx - cz * sy * sx;
    DQuat::from_xyzw(x, y, z, w)
}

/// Converts a quaternion to XYZ Tait-Bryan angles.
///
/// The `asin` clamp is replaced with `copysign(π/2)` when the sine leaves
/// `[-1, 1]`, which happens at the poles under rounding.
pub fn quat_to_euler(q: DQuat) -> DVec3 {
    let (qx, qy, qz, qw) = (q.x, q.y, q.z, q.w);

    let sx_cy = 2.0 * (qw * qx + qy * qz);
    let cx_cy = 1.0 - 2.0 * (qx * qx + qy * qy);
    let x = sx_cy.atan2(cx_cy);

    let sy = 2.0 * (qw * qy - qz * qx);
    let y = if sy.abs() < 1.0 {
        sy.asin()
    } else {
        (std::f64::consts::FRAC_PI_2).copysign(sy)
    };

    let sz_cy = 2.0 * (qw * qz + qx * qy);
    let cz_cy = 1.0 - 2.0 * (qy * qy + qz * qz);
    let z = sz_cy.atan2(cz_cy);

    DVec3::new(x, y, z)
}

/// Steps each component of `e` by multiples of 2π to the representative
/// nearest `reference`, preserving winding across key boundaries.
pub fn euler_step(reference: DVec3, e: DVec3) -> DVec3 {
    const TAU: f64 = 2.0 * std::f64::consts::PI;
    DVec3::new(
        e.x + TAU * ((reference.x - e.x) / TAU).round(),
        e.y + TAU * ((reference.y - e.y) / TAU).round(),
        e.z + TAU * ((reference.z - e.z) / TAU).round(),
    )
}

fn quat_abs_min_delta_angle(a: DQuat, b: DQuat) -> f64 {
    2.0 * a.dot(b).abs().clamp(0.0, 1.0).acos()
}

// Length (in radians) to subdivide rotation arcs for error tests. Must
// stay below 90° so local error maxima cannot hide between samples.
const SUBDIV_ANGLE_INTERVAL: f64 = 15.0 * std::f64::consts::PI / 180.0;
// Maximum allowable angular error between the Euler line and the
// quaternion curve.
const ERROR_MAX: f64 = 0.1 * std::f64::consts::PI / 180.0;
// Tolerance used to refine the search for split points.
const ERROR_REFINE_TOL: f64 = ERROR_MAX / 100.0;
// Arcs beyond this split at the midpoint to fix the interpolation
// direction before fitting.
const QUAT_180_TOL: f64 = std::f64::consts::PI * 0.9;
// Bisection iteration cap; convergence is fast, this is a failsafe
// against floating-point stalls.
const ERROR_REFINE_LIMIT: usize = 20;
// Minimum DT between generated keys.
const DT_MIN: f64 = 1.0 / 120.0;

/// Resamples a quaternion key sequence into Euler keys whose linear
/// interpolation tracks the slerp curve within the error bound.
pub fn convert_rotation_keys(src_times: &[f32], src_quats: &[Quat]) -> (Vec<f32>, Vec<Vec3>) {
    let src_count = src_times.len();
    if src_count < 2 {
        // Fewer than two keys: direct conversion.
        let times = src_times.to_vec();
        let eulers = src_quats
            .iter()
            .map(|&q| quat_to_euler(q.as_dquat()).as_vec3())
            .collect();
        return (times, eulers);
    }

    let mut times: Vec<f32> = Vec::with_capacity(src_count);
    let mut eulers: Vec<Vec3> = Vec::with_capacity(src_count);

    let mut t0 = src_times[0] as f64;
    let mut q0 = src_quats[0].as_dquat();
    let mut e0 = quat_to_euler(q0);

    let mut i1 = 1;
    while i1 != src_count {
        times.push(t0 as f32);
        eulers.push(e0.as_vec3());

        let mut t1 = src_times[i1] as f64;
        let mut q1 = src_quats[i1].as_dquat();
        let half_step = quat_abs_min_delta_angle(q0, q1) > QUAT_180_TOL;
        if half_step {
            // Ambiguous direction near 180°: recurse on the halves by
            // fitting to the midpoint first.
            t1 = t0 + (t1 - t0) * 0.5;
            q1 = q0.slerp(q1, 0.5);
        }

        let e1 = euler_step(e0, quat_to_euler(q1));

        let delta_angle = quat_abs_min_delta_angle(q0, q1);
        let subdiv_count = ((delta_angle / SUBDIV_ANGLE_INTERVAL).ceil() as usize).max(1);
        let subdiv_scale = 1.0 / subdiv_count as f64;
        let mut subdiv_index = 0;
        loop {
            let s = (subdiv_index + 1) as f64 * subdiv_scale;
            let qs = q0.slerp(q1, s);
            let es = e0.lerp(e1, s);
            let e2qs = euler_to_quat(es);
            let error = quat_abs_min_delta_angle(qs, e2qs);
            let dt = (t1 - t0) * s;
            let exceeds_error = error > ERROR_MAX && dt > DT_MIN;
            let final_segment = subdiv_index + 1 == subdiv_count;
            if !exceeds_error && !final_segment {
                subdiv_index += 1;
                continue;
            }

            // Refine the split point with a bisection search.
            let mut s_lower = s - subdiv_scale;
            let mut s_upper = s;
            if exceeds_error && (error - ERROR_MAX).abs() > ERROR_REFINE_TOL {
                for _ in 0..ERROR_REFINE_LIMIT {
                    let s_mid = 0.5 * (s_lower + s_upper);
                    let q_mid = q0.slerp(q1, s_mid);
                    let e_mid = e0.lerp(e1, s_mid);
                    let error_mid = quat_abs_min_delta_angle(q_mid, euler_to_quat(e_mid));
                    if (error_mid - ERROR_MAX).abs() <= ERROR_REFINE_TOL {
                        s_upper = s_mid;
                        break;
                    }
                    if error_mid < ERROR_MAX {
                        s_lower = s_mid;
                    } else {
                        s_upper = s_mid;
                    }
                }
            }

            let dt_upper = (t1 - t0) * s_upper;
            if dt_upper < DT_MIN {
                // Force a minimum dt so the animation cannot balloon when
                // the quaternion blends through an Euler singularity. The
                // result is technically wrong inside this window, but the
                // error is bounded at the next frame.
                s_upper = if t0 + DT_MIN < t1 {
                    DT_MIN / (t1 - t0)
                } else {
                    1.0
                };
            }
            t0 += (t1 - t0) * s_upper;
            q0 = q0.slerp(q1, s_upper);
            e0 = euler_step(e0, quat_to_euler(q0));
            // Half-step segments and dt-clamped splits leave `i1` alone so
            // the remainder of the source segment is fitted next; t0
            // advances by at least DT_MIN each round, so this terminates.
            if final_segment && !half_step && s_upper >= 1.0 {
                i1 += 1;
            }
            break;
        }
    }

    times.push(t0 as f32);
    eulers.push(e0.as_vec3());

    (times, eulers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn fit_error_at(times: &[f32], eulers: &[Vec3], t: f32, expected: DQuat) -> f64 {
        // Linear interpolation in Euler space at time t, then compare the
        // recomposed quaternion against the expected one.
        let i1 = times.iter().position(|&kt| kt >= t).unwrap();
        let e = if i1 == 0 || times[i1] == t {
            eulers[i1]
        } else {
            let i0 = i1 - 1;
            let s = (t - times[i0]) / (times[i1] - times[i0]);
            eulers[i0].lerp(eulers[i1], s)
        };
        let q = euler_to_quat(e.as_dvec3());
        quat_abs_min_delta_angle(q, expected)
    }

    #[test]
    fn round_trips_euler_quat() {
        let e = DVec3::new(0.3, -0.7, 1.9);
        let q = euler_to_quat(e);
        let back = quat_to_euler(q);
        let q2 = euler_to_quat(back);
        assert!(quat_abs_min_delta_angle(q, q2) < 1e-12);
    }

    #[test]
    fn pole_clamp_does_not_panic() {
        // Exactly ±90° pitch drives sin(y) to ±1.
        let q = euler_to_quat(DVec3::new(0.0, PI / 2.0, 0.0));
        let e = quat_to_euler(q);
        assert_relative_eq!(e.y, PI / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn winding_step_picks_near_representative() {
        let reference = DVec3::new(6.0, 0.0, 0.0);
        let e = DVec3::new(-0.4, 0.0, 0.0);
        let stepped = euler_step(reference, e);
        assert_relative_eq!(stepped.x, -0.4 + 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn single_key_converts_directly(){
        let (times, eulers) = convert_rotation_keys(&[0.5], &[Quat::from_rotation_z(0.25)]);
        assert_eq!(times, vec![0.5]);
        assert_relative_eq!(eulers[0].z, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn fits_quarter_turn_within_error_bound() {
        let q0 = Quat::IDENTITY;
        let q1 = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let (times, eulers) = convert_rotation_keys(&[0.0, 1.0], &[q0, q1]);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(times[0], 0.0);
        assert_relative_eq!(*times.last().unwrap(), 1.0, epsilon = 1e-6);

        // Sample the source slerp densely and verify the Euler fit.
        let dq0 = q0.as_dquat();
        let dq1 = q1.as_dquat();
        for i in 0..=20 {
            let s = i as f64 / 20.0;
            let expected = dq0.slerp(dq1, s);
            let error = fit_error_at(&times, &eulers, s as f32, expected);
            assert!(error < 2.0 * ERROR_MAX, "error {} at s {}", error, s);
        }
    }

    #[test]
    fn splits_near_180_arcs() {
        let q0 = Quat::IDENTITY;
        let q1 = Quat::from_rotation_y(3.1);
        let (times, eulers) = convert_rotation_keys(&[0.0, 2.0], &[q0, q1]);
        assert!(times.len() >= 3);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        // The curve passes through the y = π/2 Euler singularity, where
        // the fit error is only bounded by the dt floor; allow slack.
        let dq0 = q0.as_dquat();
        let dq1 = q1.as_dquat();
        for i in 1..20 {
            let s = i as f64 / 20.0;
            let expected = dq0.slerp(dq1, s);
            let error = fit_error_at(&times, &eulers, (2.0 * s) as f32, expected);
            assert!(error < 0.2, "error {} at s {}", error, s);
        }
    }
}
