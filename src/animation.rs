use std::collections::HashMap;

use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use crate::error::ReconcileError;
use crate::math::{cross_quat, decompose_srt};

/// One sampled key on a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

/// Scale, rotation, and translation curves for one bone. The same shape
/// holds total-transform keys (interchange side) and channel keys (host
/// side); the [`ChannelTransformer`] converts between the two.
#[derive(Debug, Clone, Default)]
pub struct TransformCurves {
    pub scales: Vec<Keyframe<f32>>,
    pub rotations: Vec<Keyframe<UnitQuaternion<f32>>>,
    pub translations: Vec<Keyframe<Vector3<f32>>>,
}

impl TransformCurves {
    pub fn is_empty(&self) -> bool {
        self.scales.is_empty() && self.rotations.is_empty() && self.translations.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pose {
    scale: f32,
    rotation: UnitQuaternion<f32>,
    translation: Vector3<f32>,
}

/// Converts animation keys between total bone transforms and host pose
/// channels for one bone, given its bind matrix and the correction applied
/// to it on import.
///
/// Channel values are what the host layers on top of the corrected bind
/// pose; total values are the bone's full local transform in interchange
/// space. The two directions are exact inverses of each other up to
/// floating point error.
#[derive(Debug)]
pub struct ChannelTransformer {
    bind: Pose,
    bind_rotation_inverse: UnitQuaternion<f32>,
    correction: Pose,
    correction_rotation_inverse: UnitQuaternion<f32>,
}

impl ChannelTransformer {
    /// `bone` only labels the offender if either matrix carries non-uniform
    /// scale.
    pub fn new(
        bone: &str,
        bind: &Matrix4<f32>,
        correction: &Matrix4<f32>,
    ) -> Result<Self, ReconcileError> {
        let bind = decompose_srt(bind, bone)?;
        let correction = decompose_srt(correction, bone)?;
        let bind = Pose {
            scale: bind.scale,
            rotation: bind.rotation_quat(),
            translation: bind.translation,
        };
        let correction = Pose {
            scale: correction.scale,
            rotation: correction.rotation_quat(),
            translation: correction.translation,
        };
        Ok(ChannelTransformer {
            bind_rotation_inverse: bind.rotation.inverse(),
            bind,
            correction_rotation_inverse: correction.rotation.inverse(),
            correction,
        })
    }

    /// Turns total-transform keys into host channel keys.
    ///
    /// Translation keys need the channel rotation and scale at the same
    /// time; exact key-time matches are reused from a cache, anything else
    /// is interpolated from the converted curves.
    pub fn total_to_channel(&self, total: &TransformCurves) -> TransformCurves {
        let mut out = TransformCurves::default();
        let mut rotation_cache: HashMap<u32, UnitQuaternion<f32>> = HashMap::new();
        let mut scale_cache: HashMap<u32, f32> = HashMap::new();

        for key in sorted_by_time(&total.scales) {
            let value = key.value / self.bind.scale;
            scale_cache.insert(key.time.to_bits(), value);
            out.scales.push(Keyframe {
                time: key.time,
                value,
            });
        }

        for key in sorted_by_time(&total.rotations) {
            let channel = cross_quat(&self.bind_rotation_inverse, &key.value);
            let corrected = cross_quat(
                &cross_quat(&self.correction_rotation_inverse, &channel),
                &self.correction.rotation,
            );
            rotation_cache.insert(key.time.to_bits(), corrected);
            out.rotations.push(Keyframe {
                time: key.time,
                value: corrected,
            });
        }

        for key in sorted_by_time(&total.translations) {
            let channel =
                (self.bind_rotation_inverse * (key.value - self.bind.translation)) / self.bind.scale;
            let rotation = rotation_cache
                .get(&key.time.to_bits())
                .copied()
                .unwrap_or_else(|| sample_rotation(&out.rotations, key.time));
            let scale = scale_cache
                .get(&key.time.to_bits())
                .copied()
                .unwrap_or_else(|| sample_scale(&out.scales, key.time));
            let value = (self.correction_rotation_inverse
                * (rotation * (self.correction.translation * scale) + channel
                    - self.correction.translation))
                / self.correction.scale;
            out.translations.push(Keyframe {
                time: key.time,
                value,
            });
        }
        out
    }

    /// Turns host channel keys back into total-transform keys.
    pub fn channel_to_total(&self, channel: &TransformCurves) -> TransformCurves {
        let mut out = TransformCurves::default();
        let mut rotation_cache: HashMap<u32, UnitQuaternion<f32>> = HashMap::new();
        let mut scale_cache: HashMap<u32, f32> = HashMap::new();

        let scales = sorted_by_time(&channel.scales);
        let rotations = sorted_by_time(&channel.rotations);

        for key in &scales {
            scale_cache.insert(key.time.to_bits(), key.value);
            out.scales.push(Keyframe {
                time: key.time,
                value: key.value * self.bind.scale,
            });
        }

        for key in &rotations {
            rotation_cache.insert(key.time.to_bits(), key.value);
            let uncorrected = cross_quat(
                &cross_quat(&self.correction.rotation, &key.value),
                &self.correction_rotation_inverse,
            );
            out.rotations.push(Keyframe {
                time: key.time,
                value: cross_quat(&self.bind.rotation, &uncorrected),
            });
        }

        for key in sorted_by_time(&channel.translations) {
            let rotation = rotation_cache
                .get(&key.time.to_bits())
                .copied()
                .unwrap_or_else(|| sample_rotation(&rotations, key.time));
            let scale = scale_cache
                .get(&key.time.to_bits())
                .copied()
                .unwrap_or_else(|| sample_scale(&scales, key.time));
            let uncorrected = self.correction.rotation * (key.value * self.correction.scale)
                + self.correction.translation
                - rotation * (self.correction.translation * scale);
            out.translations.push(Keyframe {
                time: key.time,
                value: self.bind.rotation * (uncorrected * self.bind.scale)
                    + self.bind.translation,
            });
        }
        out
    }
}

fn sorted_by_time<T: Copy>(keys: &[Keyframe<T>]) -> Vec<Keyframe<T>> {
    let mut keys = keys.to_vec();
    keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    keys
}

/// Slerps between the bracketing keys; clamps outside the key range and
/// returns identity for empty curves. Assumes `keys` sorted by time.
fn sample_rotation(keys: &[Keyframe<UnitQuaternion<f32>>], time: f32) -> UnitQuaternion<f32> {
    let Some(first) = keys.first() else {
        return UnitQuaternion::identity();
    };
    if time <= first.time {
        return first.value;
    }
    for pair in keys.windows(2) {
        if time <= pair[1].time {
            let span = pair[1].time - pair[0].time;
            if span <= 0.0 {
                return pair[1].value;
            }
            let t = (time - pair[0].time) / span;
            return pair[0].value.slerp(&pair[1].value, t);
        }
    }
    keys[keys.len() - 1].value
}

/// Linear interpolation counterpart of [`sample_rotation`]; empty curves
/// sample as 1.0 (no scaling).
fn sample_scale(keys: &[Keyframe<f32>], time: f32) -> f32 {
    sample_value(keys, time, 1.0)
}

/// Lerps between the bracketing keys of a scalar curve; clamps outside the
/// key range and returns `default` for empty curves. Assumes `keys` sorted
/// by time.
fn sample_value(keys: &[Keyframe<f32>], time: f32, default: f32) -> f32 {
    let Some(first) = keys.first() else {
        return default;
    };
    if time <= first.time {
        return first.value;
    }
    for pair in keys.windows(2) {
        if time <= pair[1].time {
            let span = pair[1].time - pair[0].time;
            if span <= 0.0 {
                return pair[1].value;
            }
            let t = (time - pair[0].time) / span;
            return pair[0].value + (pair[1].value - pair[0].value) * t;
        }
    }
    keys[keys.len() - 1].value
}

/// Merges per-axis Euler curves (radians) into quaternion keys.
///
/// One quaternion key is emitted per time in the union of the three
/// channels' key times; channels without a key at that time are
/// interpolated (clamped at the ends, 0 when the channel is absent).
/// Channels whose key times do not correspond within `epsilon` are a
/// non-fatal authoring inconsistency and are logged.
pub fn merge_euler_rotations(
    x: &[Keyframe<f32>],
    y: &[Keyframe<f32>],
    z: &[Keyframe<f32>],
    epsilon: f32,
) -> Vec<Keyframe<UnitQuaternion<f32>>> {
    let mut times: Vec<f32> = x
        .iter()
        .chain(y)
        .chain(z)
        .map(|key| key.time)
        .collect();
    times.sort_by(f32::total_cmp);
    times.dedup_by(|a, b| (*a - *b).abs() <= epsilon);
    if [x, y, z].iter().any(|c| !c.is_empty() && c.len() != times.len()) {
        log::warn!(
            "rotation channel key times do not correspond; evaluating each channel at the union of key times"
        );
    }

    let xs = sorted_by_time(x);
    let ys = sorted_by_time(y);
    let zs = sorted_by_time(z);
    times
        .into_iter()
        .map(|time| Keyframe {
            time,
            value: UnitQuaternion::from_euler_angles(
                sample_value(&xs, time, 0.0),
                sample_value(&ys, time, 0.0),
                sample_value(&zs, time, 0.0),
            ),
        })
        .collect()
}
