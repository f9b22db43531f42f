use thiserror::Error;

/// Errors fatal to the bone, mesh, or action currently being reconciled.
///
/// These abort the offending object only; callers are expected to report the
/// error and continue with sibling objects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error(
        "bone '{name}' has non-uniform scale ({:.4}, {:.4}, {:.4}); apply the scale in the source tool and re-export",
        .scale[0], .scale[1], .scale[2]
    )]
    NonUniformScale { name: String, scale: [f32; 3] },

    #[error("skin instance points at skeleton root '{root}', which is not among the reconciled nodes")]
    MissingSkeletonRoot { root: String },

    #[error(
        "mesh '{mesh}' has {} vertices with no bone influence (first: vertex {})",
        .vertices.len(), .vertices[0]
    )]
    UnweightedVertices { mesh: String, vertices: Vec<u32> },

    #[error("{kind} count {count} exceeds the 16-bit index budget ({budget})")]
    TooManyElements {
        kind: &'static str,
        count: usize,
        budget: usize,
    },

    #[error(
        "a triangle needs more than {max_bones} bones even after dropping removable influences; raise max_bones_per_partition"
    )]
    PartitionBudget { max_bones: u32 },

    #[error(
        "pad_bones requires max_bones_per_partition ({per_partition}) to equal max_bones_per_vertex ({per_vertex})"
    )]
    PadBonesMismatch { per_partition: u32, per_vertex: u32 },

    #[error("part tag count {tags} does not match triangle count {triangles}")]
    PartTagCountMismatch { triangles: usize, tags: usize },
}
