//! Skeletal binding and transform reconciliation.
//!
//! Converts rigged characters between an interchange scene format that
//! stores bones as local 4x4 matrices and a host editor that stores bones
//! as head/tail points with a roll orientation (local +Y runs head to
//! tail). Import picks an axis-aligned correction per bone and records the
//! effective correction in a [`correction::CorrectionStore`]; export
//! consults the store so a round trip reproduces the original bind pose.
//! Animation keys and skin weights ride along through the same corrections,
//! and skinned meshes are split into hardware-friendly bone partitions.

pub mod animation;
pub mod correction;
pub mod error;
pub mod math;
pub mod partition;
pub mod skeleton;
pub mod skinning;
pub mod types;

pub use animation::{merge_euler_rotations, ChannelTransformer, Keyframe, TransformCurves};
pub use correction::{find_correction_matrix, CorrectionAxis, CorrectionStore, MemoryCorrectionStore};
pub use error::ReconcileError;
pub use partition::{partition_skin, PartitionOutcome, SkinPartition};
pub use skeleton::{
    export_bind_transforms, find_skeleton_root, import_armature, BoneArena, HostBone,
    HostSkeleton,
};
pub use skinning::{normalize_weights, require_fully_weighted, SkinBinding, VertexGroup, VertexMap};
pub use types::{
    Diagnostic, RealignMode, ReconcileConfig, ReconciliationContext, SceneNodeKind, Severity,
};
