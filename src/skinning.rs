use std::collections::HashMap;

use crate::error::ReconcileError;

/// All weights one deform group (one bone) assigns to original vertices.
#[derive(Debug, Clone)]
pub struct VertexGroup {
    pub bone: String,
    /// `(original_vertex, raw_weight)` pairs, unnormalized.
    pub weights: Vec<(u32, f32)>,
}

/// Maps each original (pre-duplication) vertex to the expanded vertices the
/// geometry pipeline produced for it, e.g. after splitting along UV seams.
#[derive(Debug, Clone, Default)]
pub struct VertexMap {
    expanded: Vec<Vec<u32>>,
}

impl VertexMap {
    /// Every original vertex maps to itself; no duplication happened.
    pub fn identity(count: usize) -> Self {
        VertexMap {
            expanded: (0..count as u32).map(|v| vec![v]).collect(),
        }
    }

    pub fn from_expansion(expanded: Vec<Vec<u32>>) -> Self {
        VertexMap { expanded }
    }

    pub fn expanded(&self, original: u32) -> &[u32] {
        self.expanded
            .get(original as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-vertex influences ready for partitioning: bone slot order is the
/// group order, weights sum to 1 for every weighted vertex.
#[derive(Debug, Clone)]
pub struct SkinBinding {
    /// Bone names, indexed by the slot stored in `weights`.
    pub bones: Vec<String>,
    /// For each expanded vertex, `(bone_slot, weight)` sorted by slot.
    pub weights: Vec<Vec<(usize, f32)>>,
    /// Expanded vertices no group gave any weight.
    pub unweighted: Vec<u32>,
}

/// Expands group weights through the vertex map and normalizes them so each
/// vertex's influences sum to 1.
///
/// Raw zero weights are dropped. Vertices whose weights are all zero (or
/// that no group mentions) end up in `unweighted`; whether that is fatal is
/// the caller's call, via [`require_fully_weighted`].
pub fn normalize_weights(
    groups: &[VertexGroup],
    vertex_map: &VertexMap,
    expanded_count: usize,
) -> SkinBinding {
    let mut totals: HashMap<u32, f32> = HashMap::new();
    for group in groups {
        for &(vertex, weight) in &group.weights {
            *totals.entry(vertex).or_insert(0.0) += weight;
        }
    }

    let mut weights: Vec<Vec<(usize, f32)>> = vec![Vec::new(); expanded_count];
    let mut bones = Vec::with_capacity(groups.len());
    for (slot, group) in groups.iter().enumerate() {
        bones.push(group.bone.clone());
        for &(vertex, weight) in &group.weights {
            if weight == 0.0 {
                continue;
            }
            let total = totals[&vertex];
            if total <= 0.0 {
                continue;
            }
            for &expanded in vertex_map.expanded(vertex) {
                weights[expanded as usize].push((slot, weight / total));
            }
        }
    }

    for list in &mut weights {
        list.sort_by_key(|&(slot, _)| slot);
        // the same bone may list a vertex twice; fold duplicates together
        list.dedup_by(|b, a| {
            if a.0 == b.0 {
                a.1 += b.1;
                true
            } else {
                false
            }
        });
    }

    let unweighted = (0..expanded_count as u32)
        .filter(|&v| weights[v as usize].is_empty())
        .collect();

    SkinBinding {
        bones,
        weights,
        unweighted,
    }
}

/// Fails with [`ReconcileError::UnweightedVertices`] when the binding left
/// vertices without influence.
pub fn require_fully_weighted(binding: &SkinBinding, mesh: &str) -> Result<(), ReconcileError> {
    if binding.unweighted.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::UnweightedVertices {
            mesh: mesh.to_string(),
            vertices: binding.unweighted.clone(),
        })
    }
}
