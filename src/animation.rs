//! Animation key extraction and reduction.
//!
//! Every sampler is first rewritten into LINEAR-interpolated key arrays
//! (step segments become two keys an epsilon apart, cubic splines are
//! tessellated with an error-bounded forward fit). Key arrays are then
//! pruned by finding maximal runs reproducible by linear interpolation
//! under per-channel error metrics. Skins get per-frame multi-joint keys
//! built by a merge-walk over desynchronized per-joint channels.

use std::marker::PhantomData;
use std::ops::{Add, Mul};

use glam::{Quat, Vec3};

use crate::cache::AccessorCache;
use crate::json;
use crate::json::animation::{Interpolation, Property};
use crate::json::validation::Checked;
use crate::math::{
    self, Srt, ANIM_DT_MIN, PRUNE_ROTATION_COMPONENT, PRUNE_SCALE_COMPONENT,
    PRUNE_TRANSLATION_ABSOLUTE_SQ, PRUNE_TRANSLATION_PROPORTIONAL_SQ,
};
use crate::message::{Logger, Message, OnceLogger, Severity};
use crate::scene;

/// Separate passes over the node hierarchy.
///
/// glTF skinned meshes ignore the transforms of the nodes containing them
/// and use only the skeleton; USD applies mesh transforms cumulatively on
/// top. Skinned meshes are therefore re-anchored under their skeleton root
/// in a second pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pass {
    /// Static and rigidly-animated nodes.
    Rigid = 0,
    /// Skeletons and the meshes bound to them.
    Skinned = 1,
}

/// Number of passes.
pub const PASS_COUNT: usize = 2;

/// Per-node animation state gathered before emission.
#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    /// True when any channel animates this node.
    pub is_animated: bool,
    /// Which passes emit this node.
    pub passes_used: [bool; PASS_COUNT],
    /// The skin whose skeleton root points at this node, if any.
    pub root_skin: Option<usize>,
    /// Translation key times; empty for a static channel.
    pub translation_times: Vec<f32>,
    /// Translation key points; one static point when times is empty.
    pub translation_points: Vec<Vec3>,
    /// Rotation key times.
    pub rotation_times: Vec<f32>,
    /// Rotation key points.
    pub rotation_points: Vec<Quat>,
    /// Scale key times.
    pub scale_times: Vec<f32>,
    /// Scale key points.
    pub scale_points: Vec<Vec3>,
    /// Nodes carrying a mesh+skin pair whose skeleton root is this node,
    /// used to re-anchor skinned meshes into the skeleton hierarchy.
    pub skinned_nodes: Vec<usize>,
}

impl NodeInfo {
    /// Sets all channels to static (non-animated) values.
    pub fn set_static(&mut self, srt: &Srt) {
        self.translation_times.clear();
        self.rotation_times.clear();
        self.scale_times.clear();
        self.translation_points = vec![srt.translation];
        self.rotation_points = vec![srt.rotation];
        self.scale_points = vec![srt.scale];
    }
}

/// Time range and reach of one selected animation.
#[derive(Clone, Debug, Default)]
pub struct AnimInfo {
    /// Animation table index.
    pub index: Option<usize>,
    /// Smallest sampler input time.
    pub time_min: f32,
    /// Largest sampler input time.
    pub time_max: f32,
    /// Per-node flag, propagated to all descendants of targeted nodes.
    pub nodes_animated: Vec<bool>,
}

/// Computes the time range and animated-node set of an animation.
pub fn anim_info(root: &json::Root, anim_index: usize, cache: &AccessorCache) -> AnimInfo {
    let animation = &root.animations[anim_index];
    let mut info = AnimInfo {
        index: Some(anim_index),
        time_min: f32::MAX,
        time_max: f32::MIN,
        nodes_animated: vec![false; root.nodes.len()],
    };
    for sampler in &animation.samplers {
        if let Some(times) = cache.access::<f32>(sampler.input.value()) {
            let times = times.as_slice();
            if let (Some(&first), Some(&last)) = (times.first(), times.last()) {
                info.time_min = info.time_min.min(first);
                info.time_max = info.time_max.max(last);
            }
        }
    }
    if info.time_min > info.time_max {
        info.time_min = 0.0;
        info.time_max = 0.0;
    }
    for channel in &animation.channels {
        if let Some(node) = channel.target.node {
            scene::mark_affected_nodes(&root.nodes, node.value(), &mut info.nodes_animated);
        }
    }
    info
}

/// Propagates pass-use flags from descendants up through `node`.
pub fn propagate_passes_used(
    node_index: usize,
    nodes: &[json::Node],
    node_infos: &mut [NodeInfo],
) {
    let children: Vec<usize> = nodes[node_index]
        .children
        .iter()
        .map(|c| c.value())
        .collect();
    for child in children {
        propagate_passes_used(child, nodes, node_infos);
        for pass in 0..PASS_COUNT {
            if node_infos[child].passes_used[pass] {
                node_infos[node_index].passes_used[pass] = true;
            }
        }
    }
}

/// Normalizes quaternion keys and forces successive keys onto the minimal
/// arc, since the consumer does not re-hemisphere during interpolation.
pub fn sanitize_rotations(quats: &mut [Quat]) {
    if quats.is_empty() {
        return;
    }
    quats[0] = quats[0].normalize();
    for i in 1..quats.len() {
        let mut q = quats[i].normalize();
        if math::quat_half_cos_delta_angle(quats[i - 1], q) < 0.0 {
            q = -q;
        }
        quats[i] = q;
    }
}

// ---- key point blending -------------------------------------------------

/// Point types that animation curves carry.
pub trait KeyPoint: Copy + Add<Output = Self> + Mul<f32, Output = Self> {
    /// Curve-appropriate blend between two keys.
    fn blend(a: Self, b: Self, s: f32) -> Self;

    /// True when `b` sits on the far hemisphere relative to `a` and must
    /// be negated (together with its tangent) for minimal-arc blending.
    fn opposed(a: Self, b: Self) -> bool;

    /// Negates the point; pairs with [`KeyPoint::opposed`].
    fn flip_sign(self) -> Self;
}

impl KeyPoint for Vec3 {
    fn blend(a: Self, b: Self, s: f32) -> Self {
        a.lerp(b, s)
    }

    fn opposed(_a: Self, _b: Self) -> bool {
        false
    }

    fn flip_sign(self) -> Self {
        self
    }
}

impl KeyPoint for Quat {
    fn blend(a: Self, b: Self, s: f32) -> Self {
        a.slerp(b, s)
    }

    fn opposed(a: Self, b: Self) -> bool {
        math::quat_half_cos_delta_angle(a, b) < 0.0
    }

    fn flip_sign(self) -> Self {
        -self
    }
}

// ---- per-channel error metrics ------------------------------------------

/// Decides whether an interior key is reproducible from its run endpoints.
pub trait PruneMetric<P> {
    /// True when `p1` at fraction `s` is within tolerance of the
    /// interpolation between `p0` and `p2`.
    fn should_prune(p0: &P, p1: &P, p2: &P, s: f32) -> bool;

    /// True when two keys are close enough to collapse to a constant.
    fn constant(a: &P, b: &P) -> bool;
}

/// Hybrid proportional/absolute translation tolerance.
pub struct TranslationMetric;

impl PruneMetric<Vec3> for TranslationMetric {
    fn should_prune(p0: &Vec3, p1: &Vec3, p2: &Vec3, s: f32) -> bool {
        // Tolerance proportional to the distances between the
        // interpolation points, with an absolute floor.
        let offset01 = *p1 - *p0;
        let offset02 = *p2 - *p0;
        let dist_max_sq = offset01.length_squared().max(offset02.length_squared());
        let proportional_tol_sq = dist_max_sq * PRUNE_TRANSLATION_PROPORTIONAL_SQ;

        let error_sq = (offset02 * s - offset01).length_squared();
        error_sq <= proportional_tol_sq || error_sq <= PRUNE_TRANSLATION_ABSOLUTE_SQ
    }

    fn constant(a: &Vec3, b: &Vec3) -> bool {
        (*b - *a).length_squared() <= PRUNE_TRANSLATION_ABSOLUTE_SQ
    }
}

/// Quaternion tolerance measured against the renderer's Nlerp model.
pub struct QuatMetric;

impl PruneMetric<Quat> for QuatMetric {
    fn should_prune(p0: &Quat, p1: &Quat, p2: &Quat, s: f32) -> bool {
        // Near-180º arcs have an ambiguous interpolation direction.
        const ANGLE_MAX: f32 = 0.99 * std::f32::consts::PI;
        if math::quat_delta_angle(*p0, *p2) > ANGLE_MAX {
            return false;
        }
        let p = math::nlerp(*p0, *p2, s);
        math::quat_abs_min_delta_angle(p, *p1) < PRUNE_ROTATION_COMPONENT
    }

    fn constant(a: &Quat, b: &Quat) -> bool {
        math::quat_abs_min_delta_angle(*a, *b) < PRUNE_ROTATION_COMPONENT
    }
}

/// Componentwise Euler tolerance, used by the quat→Euler resampler.
pub struct EulerMetric;

impl PruneMetric<Vec3> for EulerMetric {
    fn should_prune(p0: &Vec3, p1: &Vec3, p2: &Vec3, s: f32) -> bool {
        let p = p0.lerp(*p2, s);
        math::nearly_equal_vec3(p, *p1, PRUNE_ROTATION_COMPONENT)
    }

    fn constant(a: &Vec3, b: &Vec3) -> bool {
        math::nearly_equal_vec3(*a, *b, PRUNE_ROTATION_COMPONENT)
    }
}

/// Componentwise scale tolerance.
pub struct ScaleMetric;

impl PruneMetric<Vec3> for ScaleMetric {
    fn should_prune(p0: &Vec3, p1: &Vec3, p2: &Vec3, s: f32) -> bool {
        let p = p0.lerp(*p2, s);
        math::nearly_equal_vec3(p, *p1, PRUNE_SCALE_COMPONENT)
    }

    fn constant(a: &Vec3, b: &Vec3) -> bool {
        math::nearly_equal_vec3(*a, *b, PRUNE_SCALE_COMPONENT)
    }
}

// ---- pruning ------------------------------------------------------------

/// Key storage a pruner reads from and writes to.
pub trait PrunerStream {
    /// Source key time at `i`.
    fn time(&self, i: usize) -> f32;

    /// Whether interior source key `i1` can be reproduced from the run
    /// endpoints `i0` and `i2` at fraction `s`.
    fn should_prune(&self, i0: usize, i1: usize, i2: usize, s: f32) -> bool;

    /// Copies source key `src` to destination slot `dst`.
    fn set_key(&mut self, src: usize, dst: usize);

    /// Sets the destination length.
    fn resize(&mut self, len: usize);
}

/// Prunes keys reproducible by linear interpolation between run endpoints.
///
/// For each candidate run `[i_begin, i_end]` every interior key is tested
/// against the endpoints, because interpolation error accumulates: a
/// tessellated circle has tiny error between neighbors but huge error
/// across opposite points. O(n²) worst case, accepted because animations
/// are small. Keys closer together than the DT floor are never pruned
/// across since they may encode a discontinuity. The final key is always
/// retained.
pub fn prune_animation_keys<S: PrunerStream>(src_count: usize, stream: &mut S) {
    if src_count == 0 {
        stream.resize(0);
        return;
    }
    if src_count == 1 {
        stream.resize(1);
        stream.set_key(0, 0);
        return;
    }
    let mut dst_count = 0;
    stream.resize(src_count);
    stream.set_key(0, dst_count);
    dst_count += 1;

    let mut i_begin = 0;
    for i_end in 2..src_count {
        let t_begin = stream.time(i_begin);
        let t_end = stream.time(i_end);
        let dt = t_end - t_begin;
        let prune = if dt <= ANIM_DT_MIN {
            false
        } else {
            let recip_dt = 1.0 / dt;
            (i_begin + 1..i_end).all(|i| {
                let s = (stream.time(i) - t_begin) * recip_dt;
                stream.should_prune(i_begin, i, i_end, s)
            })
        };
        if !prune {
            // The end of the current run is the beginning of the next.
            i_begin = i_end - 1;
            stream.set_key(i_begin, dst_count);
            dst_count += 1;
        }
    }

    stream.set_key(src_count - 1, dst_count);
    dst_count += 1;
    stream.resize(dst_count);
}

/// Pruner stream over parallel time/point arrays.
pub struct SeparateStream<'a, P, M> {
    src_times: &'a [f32],
    src_points: &'a [P],
    /// Pruned key times.
    pub times: Vec<f32>,
    /// Pruned key points.
    pub points: Vec<P>,
    _metric: PhantomData<M>,
}

impl<'a, P: Copy, M: PruneMetric<P>> SeparateStream<'a, P, M> {
    /// Wraps borrowed source arrays.
    pub fn new(src_times: &'a [f32], src_points: &'a [P]) -> Self {
        Self {
            src_times,
            src_points,
            times: Vec::new(),
            points: Vec::new(),
            _metric: PhantomData,
        }
    }

    /// True when the pruned result collapses to a constant.
    pub fn is_pruned_constant(&self) -> bool {
        if self.times.len() != 2 {
            return self.times.len() < 2;
        }
        M::constant(&self.points[0], &self.points[1])
    }
}

impl<P: Copy + Default, M: PruneMetric<P>> PrunerStream for SeparateStream<'_, P, M> {
    fn time(&self, i: usize) -> f32 {
        self.src_times[i]
    }

    fn should_prune(&self, i0: usize, i1: usize, i2: usize, s: f32) -> bool {
        M::should_prune(
            &self.src_points[i0],
            &self.src_points[i1],
            &self.src_points[i2],
            s,
        )
    }

    fn set_key(&mut self, src: usize, dst: usize) {
        self.times[dst] = self.src_times[src];
        self.points[dst] = self.src_points[src];
    }

    fn resize(&mut self, len: usize) {
        self.times.resize(len, 0.0);
        self.points.resize(len, P::default());
    }
}

/// One multi-joint key: every joint's value sampled at one time.
#[derive(Clone, Debug)]
pub struct JointKey<P> {
    /// Key time.
    pub t: f32,
    /// One point per joint.
    pub p: Vec<P>,
}

/// Pruner stream over multi-joint keys; pruning a key requires the metric
/// to hold for every joint simultaneously.
pub struct JointKeyStream<'a, P, M> {
    src_keys: &'a [JointKey<P>],
    /// Pruned keys.
    pub keys: Vec<JointKey<P>>,
    _metric: PhantomData<M>,
}

impl<'a, P: Copy, M: PruneMetric<P>> JointKeyStream<'a, P, M> {
    /// Wraps borrowed source keys.
    pub fn new(src_keys: &'a [JointKey<P>]) -> Self {
        Self {
            src_keys,
            keys: Vec::new(),
            _metric: PhantomData,
        }
    }

    /// True when the pruned result collapses to a constant.
    pub fn is_pruned_constant(&self) -> bool {
        if self.keys.len() != 2 {
            return self.keys.len() < 2;
        }
        let (k0, k1) = (&self.keys[0], &self.keys[1]);
        k0.p.iter().zip(&k1.p).all(|(a, b)| M::constant(a, b))
    }
}

impl<P: Copy, M: PruneMetric<P>> PrunerStream for JointKeyStream<'_, P, M> {
    fn time(&self, i: usize) -> f32 {
        self.src_keys[i].t
    }

    fn should_prune(&self, i0: usize, i1: usize, i2: usize, s: f32) -> bool {
        let (k0, k1, k2) = (&self.src_keys[i0], &self.src_keys[i1], &self.src_keys[i2]);
        (0..k0.p.len()).all(|j| M::should_prune(&k0.p[j], &k1.p[j], &k2.p[j], s))
    }

    fn set_key(&mut self, src: usize, dst: usize) {
        self.keys[dst] = self.src_keys[src].clone();
    }

    fn resize(&mut self, len: usize) {
        self.keys.resize(
            len,
            JointKey {
                t: 0.0,
                p: Vec::new(),
            },
        );
    }
}

// ---- skin key generation ------------------------------------------------

// Find the last key index whose time is <= t, starting after `start`.
fn find_next_time_before(times: &[f32], start: isize, t: f32) -> isize {
    let mut i1 = start + 1;
    while (i1 as usize) < times.len() && times[i1 as usize] <= t {
        i1 += 1;
    }
    i1 - 1
}

/// Builds per-frame multi-joint keys from desynchronized joint channels.
///
/// Each channel is a (times, points) pair; a static channel has empty
/// times and exactly one point. At each merge step the smallest next time
/// across all joints becomes the key time and every joint is evaluated
/// there by interpolation between its own bracketing keys.
pub fn generate_skin_keys<P: KeyPoint>(channels: &[(&[f32], &[P])]) -> Vec<JointKey<P>> {
    let joint_count = channels.len();
    debug_assert!(joint_count > 0);

    let mut keys: Vec<JointKey<P>> = Vec::new();
    let mut src_its = vec![-1isize; joint_count];
    loop {
        // The smallest next source time across all joints.
        let mut t = f32::MAX;
        for (joint, (times, _)) in channels.iter().enumerate() {
            let next = (src_its[joint] + 1) as usize;
            if next < times.len() {
                t = t.min(times[next]);
            }
        }
        if t == f32::MAX {
            break;
        }

        let mut key = JointKey {
            t,
            p: Vec::with_capacity(joint_count),
        };
        for (joint, (times, points)) in channels.iter().enumerate() {
            let i0 = find_next_time_before(times, src_its[joint], t);
            src_its[joint] = i0;
            let i1 = (i0 + 1) as usize;
            let p = if i0 < 0 {
                // Before the first key: clamp to it.
                points[i1.min(points.len() - 1)]
            } else if i1 >= times.len() {
                // Past the last key: clamp to it.
                points[(i0 as usize).min(points.len() - 1)]
            } else {
                let t0 = times[i0 as usize];
                let t1 = times[i1];
                let dt = t1 - t0;
                let s = if dt < ANIM_DT_MIN { 0.0 } else { (t - t0) / dt };
                P::blend(points[i0 as usize], points[i1], s)
            };
            key.p.push(p);
        }
        keys.push(key);
    }
    keys
}

// ---- interpolation-mode normalization -----------------------------------

// Cubic splines carry three elements per key.
const SPLINE_IN_TANGENT: usize = 0;
const SPLINE_POINT: usize = 1;
const SPLINE_OUT_TANGENT: usize = 2;
const SPLINE_ELEMENT_COUNT: usize = 3;

fn eval_spline<P: KeyPoint>(p0: P, m0: P, p1: P, m1: P, t: f32) -> P {
    let t2 = t * t;
    let t3 = t2 * t;
    let a = 2.0 * t3 - 3.0 * t2 + 1.0;
    let b = t3 - 2.0 * t2 + t;
    let c = 3.0 * t2 - 2.0 * t3;
    let d = t3 - t2;
    p0 * a + m0 * b + p1 * c + m1 * d
}

fn sample_spline<P: KeyPoint>(key0: &[P], t0: f32, key1: &[P], t1: f32, s: f32) -> P {
    let dt = t1 - t0;
    let p0 = key0[SPLINE_POINT];
    let m0 = key0[SPLINE_OUT_TANGENT] * dt;
    // Interpolate along the minimal arc: the far endpoint negates along
    // with its in-tangent.
    let mut p1 = key1[SPLINE_POINT];
    let mut m1 = key1[SPLINE_IN_TANGENT] * dt;
    if P::opposed(p0, p1) {
        p1 = p1.flip_sign();
        m1 = m1.flip_sign();
    }
    eval_spline(p0, m0, p1, m1, s)
}

fn add_spline_points<P: KeyPoint, M: PruneMetric<P>>(
    t0: f32,
    key0: &[P],
    t1: f32,
    key1: &[P],
    times: &mut Vec<f32>,
    points: &mut Vec<P>,
) {
    // Sampling frame-rate for the linear search. Larger is slower but fits
    // tighter.
    const SAMPLE_FPS: f32 = 300.0;
    const STEP_MIN: f32 = 0.1;
    const STEP_MIN_DT: f32 = 1.0 / (SAMPLE_FPS * STEP_MIN);
    let dt = t1 - t0;
    let s_step = if dt < STEP_MIN_DT {
        STEP_MIN
    } else {
        (STEP_MIN * STEP_MIN_DT) / dt
    };

    // Add points in fixed intervals, pruning redundant ones as we go. The
    // current segment is [s_begin, s_end]; when the segment midpoint can no
    // longer be reproduced, the previous end commits as a new key. This is
    // a forward linear scan, not an optimal fit.
    let mut s_begin = 0.0f32;
    let mut s_end = s_step.min(1.0);
    let mut p_begin = key0[SPLINE_POINT];
    let mut p_end = sample_spline(key0, t0, key1, t1, s_end);
    loop {
        let next_s_end = (s_end + s_step).min(1.0);
        let next_s_mid = 0.5 * (s_begin + next_s_end);
        let next_p_mid = sample_spline(key0, t0, key1, t1, next_s_mid);
        let next_p_end = sample_spline(key0, t0, key1, t1, next_s_end);
        // The segment end key is added exactly at t1 below.
        if s_end < 1.0 && !M::should_prune(&p_begin, &next_p_mid, &next_p_end, 0.5) {
            times.push(math::lerp(t0, t1, s_end));
            points.push(p_end);
            s_begin = s_end;
            p_begin = p_end;
        }
        if s_end >= 1.0 {
            break;
        }
        s_end = next_s_end;
        p_end = next_p_end;
    }

    // Always land exactly on the segment end.
    times.push(t1);
    points.push(key1[SPLINE_POINT]);
}

/// Rewrites a sampler's key arrays into LINEAR-interpolated form.
///
/// * LINEAR passes through unchanged.
/// * STEP becomes two keys an epsilon apart per segment, preserving the
///   step semantics under linear interpolation.
/// * CUBICSPLINE is tessellated with an error-bounded forward fit under
///   the channel's metric.
pub fn convert_keys_to_linear<P: KeyPoint, M: PruneMetric<P>>(
    interpolation: Interpolation,
    times: &mut Vec<f32>,
    points: &mut Vec<P>,
) {
    let src_count = times.len();
    if src_count == 0 {
        return;
    }
    match interpolation {
        Interpolation::Linear => {
            debug_assert_eq!(points.len(), src_count);
        }
        Interpolation::Step => {
            debug_assert_eq!(points.len(), src_count);
            const LINEAR_TO_STEP_FRACTION: f32 = 0.001;
            let mut dst_times = Vec::with_capacity(2 * src_count - 1);
            let mut dst_points = Vec::with_capacity(2 * src_count - 1);
            for i0 in 0..src_count - 1 {
                let i1 = i0 + 1;
                let t0 = times[i0];
                let dt = times[i1] - t0;
                // Two keys infinitesimally apart snap between the values.
                let eps = (dt * LINEAR_TO_STEP_FRACTION).min(ANIM_DT_MIN);
                dst_times.push(t0);
                dst_points.push(points[i0]);
                dst_times.push(t0 + eps);
                dst_points.push(points[i1]);
            }
            dst_times.push(times[src_count - 1]);
            dst_points.push(points[src_count - 1]);
            *times = dst_times;
            *points = dst_points;
        }
        Interpolation::CubicSpline => {
            debug_assert_eq!(points.len(), src_count * SPLINE_ELEMENT_COUNT);
            let src_times = std::mem::take(times);
            let src_points = std::mem::take(points);

            times.push(src_times[0]);
            points.push(src_points[SPLINE_POINT]);
            for i0 in 0..src_count - 1 {
                let i1 = i0 + 1;
                let key0 = &src_points[i0 * SPLINE_ELEMENT_COUNT..];
                let key1 = &src_points[i1 * SPLINE_ELEMENT_COUNT..];
                add_spline_points::<P, M>(
                    src_times[i0],
                    key0,
                    src_times[i1],
                    key1,
                    times,
                    points,
                );
            }
        }
    }
}

// ---- channel loading ----------------------------------------------------

/// Loads one animation's channels into per-node key arrays.
///
/// Rotation keys are normalized and re-hemisphered, every interpolation
/// mode collapses to LINEAR, and weight channels emit the one-time morph
/// diagnostic. Per-channel failures abort just that channel.
pub fn load_node_animations(
    root: &json::Root,
    anim_index: usize,
    cache: &AccessorCache,
    node_infos: &mut [NodeInfo],
    logger: &dyn Logger,
    once: &OnceLogger,
) {
    let animation = &root.animations[anim_index];
    for (channel_index, channel) in animation.channels.iter().enumerate() {
        let Some(node) = channel.target.node else {
            continue;
        };
        let node_index = node.value();
        let Checked::Valid(property) = channel.target.path else {
            continue;
        };
        let Some(sampler) = animation.samplers.get(channel.sampler.value()) else {
            continue;
        };
        let interpolation = match sampler.interpolation {
            Checked::Valid(interpolation) => interpolation,
            Checked::Invalid => continue,
        };

        if property == Property::MorphTargetWeights {
            once.add(
                &format!("channel{}", channel_index),
                Message::new(
                    "MORPH_TARGETS_UNSUPPORTED",
                    Severity::Warning,
                    "morph targets are not converted",
                ),
            );
            continue;
        }

        let Some(input) = cache.access::<f32>(sampler.input.value()) else {
            logger.add(Message::new(
                "ANIM_INPUT_READ",
                Severity::Error,
                format!("failed to read input for animation channel {}", channel_index),
            ));
            continue;
        };
        let mut times = input.as_slice().to_vec();
        if times.is_empty() {
            // An empty channel leaves the node's static value in place.
            continue;
        }
        if times.first().map_or(false, |&t| t < 0.0)
            || times.windows(2).any(|w| w[1] <= w[0])
        {
            logger.add(Message::new(
                "ANIM_INPUT_NOT_INCREASING",
                Severity::Error,
                format!(
                    "animation channel {} input times must be non-negative and strictly increasing",
                    channel_index
                ),
            ));
            continue;
        }
        let Some(output) = cache.access::<f32>(sampler.output.value()) else {
            logger.add(Message::new(
                "ANIM_OUTPUT_READ",
                Severity::Error,
                format!("failed to read output for animation channel {}", channel_index),
            ));
            continue;
        };
        let scalars = output.as_slice();

        let info = &mut node_infos[node_index];
        match property {
            Property::Translation => {
                let mut points: Vec<Vec3> = scalars
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2]))
                    .collect();
                convert_keys_to_linear::<Vec3, TranslationMetric>(
                    interpolation,
                    &mut times,
                    &mut points,
                );
                info.translation_times = times;
                info.translation_points = points;
                info.is_animated = true;
            }
            Property::Rotation => {
                let mut points: Vec<Quat> = scalars
                    .chunks_exact(4)
                    .map(|c| Quat::from_xyzw(c[0], c[1], c[2], c[3]))
                    .collect();
                if interpolation != Interpolation::CubicSpline {
                    sanitize_rotations(&mut points);
                }
                convert_keys_to_linear::<Quat, QuatMetric>(interpolation, &mut times, &mut points);
                if interpolation == Interpolation::CubicSpline {
                    sanitize_rotations(&mut points);
                }
                info.rotation_times = times;
                info.rotation_points = points;
                info.is_animated = true;
            }
            Property::Scale => {
                let mut points: Vec<Vec3> = scalars
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2]))
                    .collect();
                convert_keys_to_linear::<Vec3, ScaleMetric>(interpolation, &mut times, &mut points);
                info.scale_times = times;
                info.scale_points = points;
                info.is_animated = true;
            }
            Property::MorphTargetWeights => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn prune_translations(times: &[f32], points: &[Vec3]) -> (Vec<f32>, Vec<Vec3>) {
        let mut stream = SeparateStream::<Vec3, TranslationMetric>::new(times, points);
        prune_animation_keys(times.len(), &mut stream);
        (stream.times, stream.points)
    }

    #[test]
    fn prunes_collinear_translations() {
        let times = [0.0, 1.0, 2.0, 3.0];
        let points = [
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
        ];
        let (out_times, out_points) = prune_translations(&times, &points);
        assert_eq!(out_times, vec![0.0, 3.0]);
        assert_eq!(out_points.len(), 2);
    }

    #[test]
    fn keeps_corners() {
        let times = [0.0, 1.0, 2.0];
        let points = [
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let (out_times, _) = prune_translations(&times, &points);
        assert_eq!(out_times.len(), 3);
    }

    #[test]
    fn never_prunes_across_dt_floor() {
        // The middle key encodes a discontinuity one epsilon after key 0.
        let eps = 0.001;
        let times = [0.0, eps, 2.0 * eps];
        let points = [Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)];
        let (out_times, _) = prune_translations(&times, &points);
        assert_eq!(out_times.len(), 3);
    }

    #[test]
    fn retains_final_key() {
        let times = [0.0, 1.0];
        let points = [Vec3::ZERO, Vec3::ZERO];
        let (out_times, _) = prune_translations(&times, &points);
        assert_eq!(out_times, vec![0.0, 1.0]);
    }

    #[test]
    fn pruned_constant_detection() {
        let times = [0.0, 1.0];
        let points = [Vec3::ZERO, Vec3::ZERO];
        let mut stream = SeparateStream::<Vec3, TranslationMetric>::new(&times, &points);
        prune_animation_keys(2, &mut stream);
        assert!(stream.is_pruned_constant());

        let points = [Vec3::ZERO, Vec3::X];
        let mut stream = SeparateStream::<Vec3, TranslationMetric>::new(&times, &points);
        prune_animation_keys(2, &mut stream);
        assert!(!stream.is_pruned_constant());
    }

    #[test]
    fn step_conversion_inserts_epsilon_keys() {
        let mut times = vec![0.0, 1.0];
        let mut points = vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)];
        convert_keys_to_linear::<Vec3, TranslationMetric>(
            Interpolation::Step,
            &mut times,
            &mut points,
        );
        assert_eq!(times.len(), 3);
        assert_eq!(points.len(), 3);
        assert_eq!(times[0], 0.0);
        assert!(times[1] > 0.0 && times[1] < 0.0011);
        assert_eq!(times[2], 1.0);
        assert_eq!(points[1], Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(points[2], Vec3::new(1.0, 0.0, 0.0));

        // The pruner must not re-collapse the step.
        let (out_times, _) = {
            let mut stream =
                SeparateStream::<Vec3, TranslationMetric>::new(&times, &points);
            prune_animation_keys(times.len(), &mut stream);
            (stream.times, stream.points)
        };
        assert_eq!(out_times.len(), 3);
    }

    #[test]
    fn constant_quat_spline_collapses_to_endpoints() {
        // One segment whose endpoints coincide and whose tangents are
        // zero describes a constant curve: tessellation adds no interior
        // keys and pruning leaves just the two endpoints.
        let q = Quat::from_rotation_y(0.3);
        let zero = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let mut times = vec![0.0, 1.0];
        let mut points = vec![zero, q, zero, zero, q, zero];
        convert_keys_to_linear::<Quat, QuatMetric>(
            Interpolation::CubicSpline,
            &mut times,
            &mut points,
        );
        sanitize_rotations(&mut points);
        let mut stream = SeparateStream::<Quat, QuatMetric>::new(&times, &points);
        prune_animation_keys(times.len(), &mut stream);
        assert_eq!(stream.times.len(), 2);
        assert_relative_eq!(stream.times[0], 0.0);
        assert_relative_eq!(*stream.times.last().unwrap(), 1.0);
        assert!(math::quat_abs_min_delta_angle(stream.points[0], q) < 1e-3);
        assert!(stream.is_pruned_constant());
    }

    #[test]
    fn cubic_spline_tessellation_tracks_the_curve() {
        // A genuinely curved segment keeps interior keys, and every
        // retained point lies on the sampled Hermite curve.
        let q0 = Quat::IDENTITY;
        let q1 = Quat::from_rotation_y(1.2);
        let zero = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let mut times = vec![0.0, 1.0];
        let mut points = vec![zero, q0, zero, zero, q1, zero];
        convert_keys_to_linear::<Quat, QuatMetric>(
            Interpolation::CubicSpline,
            &mut times,
            &mut points,
        );
        assert!(times.len() > 2);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(times[0], 0.0);
        assert_relative_eq!(*times.last().unwrap(), 1.0);
    }

    #[test]
    fn skin_keys_merge_desynchronized_channels() {
        // Joint 0 keys at 0 and 2; joint 1 keys at 1 and 3.
        let times0 = [0.0f32, 2.0];
        let points0 = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)];
        let times1 = [1.0f32, 3.0];
        let points1 = [Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)];
        let keys = generate_skin_keys::<Vec3>(&[
            (&times0, &points0),
            (&times1, &points1),
        ]);
        let key_times: Vec<f32> = keys.iter().map(|k| k.t).collect();
        assert_eq!(key_times, vec![0.0, 1.0, 2.0, 3.0]);
        // Joint 0 at t=1 is halfway along its own segment.
        assert_relative_eq!(keys[1].p[0].x, 1.0, epsilon = 1e-6);
        // Joint 1 before its first key clamps to it.
        assert_relative_eq!(keys[0].p[1].y, 0.0, epsilon = 1e-6);
        // Joint 0 past its last key clamps to it.
        assert_relative_eq!(keys[3].p[0].x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn static_channels_participate_in_skin_keys() {
        let times0 = [0.0f32, 1.0];
        let points0 = [Vec3::ZERO, Vec3::X];
        let static_times: [f32; 0] = [];
        let static_points = [Vec3::new(9.0, 9.0, 9.0)];
        let keys =
            generate_skin_keys::<Vec3>(&[(&times0, &points0), (&static_times, &static_points)]);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].p[1], Vec3::new(9.0, 9.0, 9.0));
        assert_eq!(keys[1].p[1], Vec3::new(9.0, 9.0, 9.0));
    }

    #[test]
    fn sanitize_flips_far_hemisphere() {
        let q = Quat::from_rotation_y(0.5);
        let mut quats = vec![Quat::IDENTITY, -q];
        sanitize_rotations(&mut quats);
        assert!(math::quat_half_cos_delta_angle(quats[0], quats[1]) >= 0.0);
        assert!(math::quat_abs_min_delta_angle(quats[1], q) < 1e-6);
    }
}
