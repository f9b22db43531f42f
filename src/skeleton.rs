use std::collections::HashMap;

use nalgebra::{Matrix3, Matrix4, Vector3};

use crate::correction::find_correction_matrix;
use crate::error::ReconcileError;
use crate::math::{compose_srt, decompose_srt, is_identity};
use crate::types::{RealignMode, ReconciliationContext, SceneNodeKind};

// ─── Interchange node arena ─────────────────────────────────────────────────

pub type BoneIndex = usize;

/// One interchange scene node: a local transform relative to the parent plus
/// the node kind.
#[derive(Debug, Clone)]
pub struct BoneNode {
    pub name: String,
    pub kind: SceneNodeKind,
    pub local_transform: Matrix4<f32>,
    pub parent: Option<BoneIndex>,
    pub children: Vec<BoneIndex>,
}

/// Flat arena of interchange nodes. Parents are pushed before children, so
/// indices order a valid traversal of every subtree.
#[derive(Debug, Default)]
pub struct BoneArena {
    nodes: Vec<BoneNode>,
    // nearest enclosing Armature node, resolved at push time
    owners: Vec<Option<BoneIndex>>,
}

impl BoneArena {
    pub fn new() -> Self {
        BoneArena::default()
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        kind: SceneNodeKind,
        local_transform: Matrix4<f32>,
        parent: Option<BoneIndex>,
    ) -> BoneIndex {
        let index = self.nodes.len();
        let owner = parent.and_then(|p| {
            if self.nodes[p].kind == SceneNodeKind::Armature {
                Some(p)
            } else {
                self.owners[p]
            }
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(index);
        }
        self.nodes.push(BoneNode {
            name: name.into(),
            kind,
            local_transform,
            parent,
            children: Vec::new(),
        });
        self.owners.push(owner);
        index
    }

    pub fn node(&self, index: BoneIndex) -> &BoneNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The Armature node this node hangs under, if any.
    pub fn armature_of(&self, index: BoneIndex) -> Option<BoneIndex> {
        self.owners[index]
    }

    pub fn bone_children(&self, index: BoneIndex) -> Vec<BoneIndex> {
        self.nodes[index]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].kind == SceneNodeKind::Bone)
            .collect()
    }

    /// Transform of `index` relative to its owning armature (or to the scene
    /// root when it has no armature), the product of local transforms along
    /// the ancestor chain.
    pub fn armature_space_matrix(&self, index: BoneIndex) -> Matrix4<f32> {
        let mut matrix = self.nodes[index].local_transform;
        let mut cursor = self.nodes[index].parent;
        while let Some(p) = cursor {
            if self.nodes[p].kind == SceneNodeKind::Armature {
                break;
            }
            matrix = self.nodes[p].local_transform * matrix;
            cursor = self.nodes[p].parent;
        }
        matrix
    }
}

// ─── Host skeleton ───────────────────────────────────────────────────────────

/// A bone as the host editor sees it: head and tail points in armature space
/// plus an explicit roll orientation.
#[derive(Debug, Clone)]
pub struct HostBone {
    pub name: String,
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    pub roll_matrix: Matrix3<f32>,
    pub parent: Option<usize>,
}

/// An editor armature. Bones are stored parent-before-child.
#[derive(Debug, Default)]
pub struct HostSkeleton {
    pub name: String,
    bones: Vec<HostBone>,
    by_name: HashMap<String, usize>,
}

impl HostSkeleton {
    pub fn new(name: impl Into<String>) -> Self {
        HostSkeleton {
            name: name.into(),
            bones: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn push(&mut self, bone: HostBone) -> usize {
        let index = self.bones.len();
        debug_assert!(bone.parent.is_none_or(|p| p < index));
        self.by_name.insert(bone.name.clone(), index);
        self.bones.push(bone);
        index
    }

    pub fn bones(&self) -> &[HostBone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> &HostBone {
        &self.bones[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// The bone's armature-space matrix: unit scale, the roll orientation,
    /// and the head as translation.
    pub fn bone_matrix(&self, index: usize) -> Matrix4<f32> {
        let bone = &self.bones[index];
        compose_srt(1.0, &bone.roll_matrix, &bone.head)
    }
}

/// Looks up the skeleton a skin instance binds to, by root node name.
pub fn find_skeleton_root<'a>(
    skeletons: &'a [HostSkeleton],
    root: &str,
) -> Result<&'a HostSkeleton, ReconcileError> {
    skeletons
        .iter()
        .find(|s| s.name == root)
        .ok_or_else(|| ReconcileError::MissingSkeletonRoot {
            root: root.to_string(),
        })
}

// ─── Import ──────────────────────────────────────────────────────────────────

/// Converts every bone under `armature` into host bones.
///
/// Each bone gets a head (its armature-space position), a tail (mean of the
/// child heads, or a synthesized nub for leaves and zero-length bones), and a
/// roll orientation per the configured realign mode. Whenever the resulting
/// host matrix differs from the interchange matrix, the effective correction
/// is recorded in the context's store so export can reverse it.
pub fn import_armature(
    arena: &BoneArena,
    armature: BoneIndex,
    ctx: &mut ReconciliationContext<'_>,
) -> Result<HostSkeleton, ReconcileError> {
    let name = ctx.host_name(&arena.node(armature).name).to_string();
    let mut skeleton = HostSkeleton::new(name);
    for child in arena.bone_children(armature) {
        import_bone(arena, child, None, &mut skeleton, ctx)?;
    }
    Ok(skeleton)
}

fn import_bone(
    arena: &BoneArena,
    index: BoneIndex,
    parent_host: Option<usize>,
    skeleton: &mut HostSkeleton,
    ctx: &mut ReconciliationContext<'_>,
) -> Result<(), ReconcileError> {
    let node = arena.node(index);
    let host_name = ctx.host_name(&node.name).to_string();
    let armature_space = arena.armature_space_matrix(index);
    let srt = decompose_srt(&armature_space, &host_name)?;
    let head = srt.translation;
    let children = arena.bone_children(index);

    // leaves inherit the parent's correction so finger chains stay straight
    let correction = if children.is_empty() {
        find_correction_matrix(arena, node.parent, ctx)
    } else {
        find_correction_matrix(arena, Some(index), ctx)
    };

    let roll_matrix = match ctx.config.realign {
        RealignMode::AxisAligned => correction * srt.rotation,
        RealignMode::None => srt.rotation,
        RealignMode::KeepUnit => Matrix3::identity(),
    };

    let mut tail = head;
    let mut zero_length = true;
    if !children.is_empty() {
        let sum: Vector3<f32> = children
            .iter()
            .map(|&c| {
                arena
                    .armature_space_matrix(c)
                    .fixed_view::<3, 1>(0, 3)
                    .into_owned()
            })
            .sum();
        tail = sum / children.len() as f32;
        let d = head - tail;
        zero_length = (d.x + d.y + d.z).abs() * 200.0 < ctx.config.epsilon;
    }

    if zero_length {
        let nub = ctx.config.nub_length * ctx.config.scale_correction;
        let parent_is_bone = node
            .parent
            .is_some_and(|p| arena.node(p).kind == SceneNodeKind::Bone);
        let use_parent = ctx.config.realign != RealignMode::AxisAligned && parent_is_bone;
        let direction = match (use_parent, parent_host) {
            // keep non-realigned nubs pointing away from the parent
            (true, Some(parent_index)) => {
                let parent = skeleton.bone(parent_index);
                let mut d = head - parent.tail;
                if (d.x + d.y + d.z).abs() * 200.0 < ctx.config.epsilon {
                    d = parent.tail - parent.head;
                }
                if d.norm() < ctx.config.epsilon {
                    Vector3::y()
                } else {
                    d.normalize()
                }
            }
            _ => roll_matrix * Vector3::y(),
        };
        tail = head + direction * nub;
    }

    let host_matrix = compose_srt(1.0, &roll_matrix, &head);
    let interchange_inverse = armature_space
        .try_inverse()
        .unwrap_or_else(Matrix4::identity);
    let effective = host_matrix * interchange_inverse;
    if !is_identity(&effective, ctx.config.epsilon) {
        ctx.store.set(&host_name, effective);
    }

    let host_index = skeleton.push(HostBone {
        name: host_name,
        head,
        tail,
        roll_matrix,
        parent: parent_host,
    });
    for child in children {
        import_bone(arena, child, Some(host_index), skeleton, ctx)?;
    }
    Ok(())
}

// ─── Export ──────────────────────────────────────────────────────────────────

/// Recovers the interchange local bind transform of every bone in `skeleton`,
/// parallel to [`HostSkeleton::bones`].
///
/// For each bone the stored effective correction is undone against the host
/// matrix, then the result is re-expressed relative to the parent. Bones that
/// never went through import (no store entry) export their host orientation
/// as-is, with a warning.
pub fn export_bind_transforms(
    skeleton: &HostSkeleton,
    ctx: &mut ReconciliationContext<'_>,
) -> Vec<Matrix4<f32>> {
    let mut armature_space: Vec<Matrix4<f32>> = Vec::with_capacity(skeleton.len());
    let mut locals = Vec::with_capacity(skeleton.len());
    for (index, bone) in skeleton.bones().iter().enumerate() {
        let host_matrix = skeleton.bone_matrix(index);
        let correction = match ctx.store.get(&bone.name) {
            Some(matrix) => matrix,
            None => {
                ctx.warn(
                    "BONE_NOT_ROUNDTRIPPED",
                    format!(
                        "no stored correction for bone '{}'; exporting the host orientation verbatim",
                        bone.name
                    ),
                );
                Matrix4::identity()
            }
        };
        let interchange = correction.try_inverse().unwrap_or_else(Matrix4::identity) * host_matrix;
        let local = match bone.parent {
            Some(p) => {
                armature_space[p]
                    .try_inverse()
                    .unwrap_or_else(Matrix4::identity)
                    * interchange
            }
            None => interchange,
        };
        armature_space.push(interchange);
        locals.push(local);
    }
    locals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::MemoryCorrectionStore;
    use crate::types::{ReconcileConfig, NUB_LENGTH};
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3};

    fn translation(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Translation3::new(x, y, z).to_homogeneous()
    }

    fn chain_arena() -> (BoneArena, BoneIndex) {
        let mut arena = BoneArena::new();
        let armature = arena.push(
            "Scene Root",
            SceneNodeKind::Armature,
            Matrix4::identity(),
            None,
        );
        let root = arena.push(
            "Bip01",
            SceneNodeKind::Bone,
            Matrix4::identity(),
            Some(armature),
        );
        let mid = arena.push(
            "Bip01 Spine",
            SceneNodeKind::Bone,
            translation(0.0, 2.0, 0.0),
            Some(root),
        );
        arena.push(
            "Bip01 Head",
            SceneNodeKind::Bone,
            translation(0.0, 3.0, 0.0),
            Some(mid),
        );
        (arena, armature)
    }

    #[test]
    fn given_chain_when_imported_then_tails_meet_child_heads() {
        let mut store = MemoryCorrectionStore::new();
        let mut ctx = ReconciliationContext::new(ReconcileConfig::default(), &mut store);
        let (arena, armature) = chain_arena();
        let skeleton = import_armature(&arena, armature, &mut ctx).unwrap();

        let root = skeleton.bone(skeleton.index_of("Bip01").unwrap());
        assert_relative_eq!(root.head, Vector3::zeros(), epsilon = 1e-6);
        assert_relative_eq!(root.tail, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-6);
        let mid = skeleton.bone(skeleton.index_of("Bip01 Spine").unwrap());
        assert_relative_eq!(mid.tail, Vector3::new(0.0, 5.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn given_leaf_bone_when_imported_then_nub_runs_along_corrected_y() {
        let mut store = MemoryCorrectionStore::new();
        let config = ReconcileConfig {
            scale_correction: 2.0,
            ..ReconcileConfig::default()
        };
        let mut ctx = ReconciliationContext::new(config, &mut store);
        let (arena, armature) = chain_arena();
        let skeleton = import_armature(&arena, armature, &mut ctx).unwrap();

        // both chain bones point along +Y, so the leaf inherits the identity
        // correction from its parent and its nub extends straight up
        let tip = skeleton.bone(skeleton.index_of("Bip01 Head").unwrap());
        assert_relative_eq!(tip.roll_matrix, Matrix3::identity(), epsilon = 1e-6);
        assert_relative_eq!(
            tip.tail,
            Vector3::new(0.0, 5.0 + NUB_LENGTH * 2.0, 0.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn given_rotated_bones_when_round_tripped_then_locals_are_recovered() {
        let mut arena = BoneArena::new();
        let armature = arena.push(
            "Scene Root",
            SceneNodeKind::Armature,
            Matrix4::identity(),
            None,
        );
        let root_local = compose_srt(
            1.0,
            Rotation3::from_euler_angles(0.0, 0.0, 0.5).matrix(),
            &Vector3::new(0.0, 0.0, 1.0),
        );
        // child offset along -X forces a non-identity correction on both
        // bones, so export has to consult the store to round trip
        let child_local = compose_srt(
            1.0,
            Rotation3::from_euler_angles(0.2, 0.0, -0.3).matrix(),
            &Vector3::new(-2.0, 0.05, 0.0),
        );
        let root = arena.push("Bip01", SceneNodeKind::Bone, root_local, Some(armature));
        arena.push("Bip01 Pelvis", SceneNodeKind::Bone, child_local, Some(root));

        let mut store = MemoryCorrectionStore::new();
        let mut ctx = ReconciliationContext::new(ReconcileConfig::default(), &mut store);
        let skeleton = import_armature(&arena, armature, &mut ctx).unwrap();
        assert!(ctx.store.get("Bip01").is_some());
        let locals = export_bind_transforms(&skeleton, &mut ctx);

        let expected = [
            (skeleton.index_of("Bip01").unwrap(), root_local),
            (skeleton.index_of("Bip01 Pelvis").unwrap(), child_local),
        ];
        for (index, original) in expected {
            assert_relative_eq!(locals[index], original, epsilon = 1e-5);
        }
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn given_foreign_bone_when_exported_then_warning_is_recorded() {
        let mut skeleton = HostSkeleton::new("Scene Root");
        skeleton.push(HostBone {
            name: "HandMadeBone".to_string(),
            head: Vector3::zeros(),
            tail: Vector3::new(0.0, 1.0, 0.0),
            roll_matrix: Matrix3::identity(),
            parent: None,
        });
        let mut store = MemoryCorrectionStore::new();
        let mut ctx = ReconciliationContext::new(ReconcileConfig::default(), &mut store);
        let locals = export_bind_transforms(&skeleton, &mut ctx);
        assert_relative_eq!(locals[0], Matrix4::identity(), epsilon = 1e-6);
        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(ctx.diagnostics[0].code, "BONE_NOT_ROUNDTRIPPED");
    }

    #[test]
    fn given_missing_root_when_looked_up_then_error_names_it() {
        let skeletons = [HostSkeleton::new("Scene Root")];
        let err = find_skeleton_root(&skeletons, "Bip01").unwrap_err();
        assert_eq!(
            err,
            ReconcileError::MissingSkeletonRoot {
                root: "Bip01".to_string()
            }
        );
    }

    #[test]
    fn given_nested_nodes_when_queried_then_armature_space_accumulates() {
        let (arena, _) = chain_arena();
        let head_index = 3;
        let m = arena.armature_space_matrix(head_index);
        assert_relative_eq!(m[(1, 3)], 5.0, epsilon = 1e-6);
        assert_eq!(arena.armature_of(head_index), Some(0));
    }
}
