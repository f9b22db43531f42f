use std::collections::HashMap;

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::skeleton::{BoneArena, BoneIndex};
use crate::types::{RealignMode, ReconciliationContext, SceneNodeKind, AXIS_SELECT_SCALE};

// ─── Axis-aligned corrections ───────────────────────────────────────────────

/// The six candidate bone corrections. Each rotates the interchange bone
/// frame so the host +Y axis (head to tail) lines up with one signed axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionAxis {
    PosX,
    PosY,
    PosZ,
    NegX,
    NegY,
    NegZ,
}

impl CorrectionAxis {
    /// Candidate order matches the component order used by the heuristic:
    /// `[x, y, z, -x, -y, -z]`.
    pub const ALL: [CorrectionAxis; 6] = [
        CorrectionAxis::PosX,
        CorrectionAxis::PosY,
        CorrectionAxis::PosZ,
        CorrectionAxis::NegX,
        CorrectionAxis::NegY,
        CorrectionAxis::NegZ,
    ];

    pub fn matrix(self) -> Matrix3<f32> {
        match self {
            CorrectionAxis::PosX => Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            CorrectionAxis::PosY => Matrix3::identity(),
            CorrectionAxis::PosZ => Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0),
            CorrectionAxis::NegX => Matrix3::new(0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            CorrectionAxis::NegY => Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0),
            CorrectionAxis::NegZ => Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0),
        }
    }
}

/// Correction rotation for `bone`, chosen by the head-to-tail alignment
/// heuristic.
///
/// The dominant component of the offset (mean of child translations for
/// interior bones, the bone's own armature-space position otherwise) picks
/// one of the six candidates. Components are scaled by [`AXIS_SELECT_SCALE`]
/// and truncated to integers before comparison, so ties and sub-tolerance
/// offsets resolve deterministically. If the off-axis residual exceeds
/// `alignment_fallback` relative to the dominant component, the identity is
/// returned instead.
///
/// Always identity when realignment is not [`RealignMode::AxisAligned`], for
/// non-bone nodes, and for `None` (used by leaf bones whose parent is not a
/// bone). An unreliable-heuristic fallback is recorded as an informational
/// diagnostic on the context, never as an error.
pub fn find_correction_matrix(
    arena: &BoneArena,
    bone: Option<BoneIndex>,
    ctx: &mut ReconciliationContext<'_>,
) -> Matrix3<f32> {
    let Some(index) = bone else {
        return Matrix3::identity();
    };
    if ctx.config.realign != RealignMode::AxisAligned
        || arena.node(index).kind != SceneNodeKind::Bone
    {
        return Matrix3::identity();
    }

    let children = arena.bone_children(index);
    let offset: Vector3<f32> = if children.is_empty() {
        arena.armature_space_matrix(index).fixed_view::<3, 1>(0, 3).into_owned()
    } else {
        let sum: Vector3<f32> = children
            .iter()
            .map(|&c| {
                arena
                    .node(c)
                    .local_transform
                    .fixed_view::<3, 1>(0, 3)
                    .into_owned()
            })
            .sum();
        sum / children.len() as f32
    };

    let signed = [offset.x, offset.y, offset.z, -offset.x, -offset.y, -offset.z];
    let scaled: Vec<i32> = signed.iter().map(|c| (c * AXIS_SELECT_SCALE) as i32).collect();
    let mut best = 0;
    for (i, value) in scaled.iter().enumerate() {
        if *value > scaled[best] {
            best = i;
        }
    }

    let (on_axis, off_axis) = match best {
        0 | 3 => (offset.x.abs(), offset.y.abs() + offset.z.abs()),
        1 | 4 => (offset.y.abs(), offset.z.abs() + offset.x.abs()),
        _ => (offset.z.abs(), offset.x.abs() + offset.y.abs()),
    };
    let mut alignment_offset = 0.0;
    if on_axis > 0.0 {
        alignment_offset = off_axis / on_axis;
    }

    if alignment_offset < ctx.config.alignment_fallback {
        CorrectionAxis::ALL[best].matrix()
    } else {
        ctx.info(
            "ALIGNMENT_FALLBACK",
            format!(
                "bone '{}' offset strays {:.3} from its dominant axis; keeping identity correction",
                arena.node(index).name,
                alignment_offset
            ),
        );
        Matrix3::identity()
    }
}

// ─── Correction store ────────────────────────────────────────────────────────

/// Durable map from host bone name to the effective correction applied on
/// import (`host_matrix * interchange_matrix.inverse()`). Export consults it
/// to undo the import exactly.
pub trait CorrectionStore {
    fn get(&self, bone_name: &str) -> Option<Matrix4<f32>>;
    fn set(&mut self, bone_name: &str, correction: Matrix4<f32>);
}

/// In-memory [`CorrectionStore`] with JSON snapshots for persistence across
/// sessions.
#[derive(Debug, Default)]
pub struct MemoryCorrectionStore {
    entries: HashMap<String, Matrix4<f32>>,
}

impl MemoryCorrectionStore {
    pub fn new() -> Self {
        MemoryCorrectionStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes all entries, sorted by bone name so snapshots diff cleanly.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut records: Vec<StoredCorrection> = self
            .entries
            .iter()
            .map(|(bone, matrix)| StoredCorrection::from_matrix(bone, matrix))
            .collect();
        records.sort_by(|a, b| a.bone.cmp(&b.bone));
        serde_json::to_string_pretty(&records)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let records: Vec<StoredCorrection> = serde_json::from_str(json)?;
        let mut store = MemoryCorrectionStore::new();
        for record in &records {
            store.entries.insert(record.bone.clone(), record.to_matrix());
        }
        Ok(store)
    }
}

impl CorrectionStore for MemoryCorrectionStore {
    fn get(&self, bone_name: &str) -> Option<Matrix4<f32>> {
        self.entries.get(bone_name).copied()
    }

    fn set(&mut self, bone_name: &str, correction: Matrix4<f32>) {
        self.entries.insert(bone_name.to_string(), correction);
    }
}

/// One serialized correction entry, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCorrection {
    pub bone: String,
    pub matrix: [[f32; 4]; 4],
}

impl StoredCorrection {
    pub fn from_matrix(bone: &str, matrix: &Matrix4<f32>) -> Self {
        let mut rows = [[0.0f32; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = matrix[(r, c)];
            }
        }
        StoredCorrection {
            bone: bone.to_string(),
            matrix: rows,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        let mut out = Matrix4::identity();
        for (r, row) in self.matrix.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                out[(r, c)] = *cell;
            }
        }
        out
    }
}
