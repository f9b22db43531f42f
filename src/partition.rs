use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::ReconcileError;
use crate::skinning::SkinBinding;
use crate::types::{ReconcileConfig, MAX_INDEX_BUDGET};

/// One hardware skin partition: a bone palette and the triangles deformed
/// exclusively by it.
#[derive(Debug, Clone)]
pub struct SkinPartition {
    /// Bone slots into the binding's bone list, ascending. When `pad_bones`
    /// is set, padded up to `max_bones_per_partition` with slot 0.
    pub bones: Vec<usize>,
    pub triangles: Vec<[u32; 3]>,
    /// Vertices referenced by `triangles`, ascending and deduplicated.
    pub vertices: Vec<u32>,
    /// Influence count per entry of `vertices`, after reduction.
    pub bone_counts: Vec<usize>,
    /// Body-part tag the triangles came from, when tags were supplied.
    pub part_tag: Option<u32>,
}

/// Result of partitioning one skinned mesh.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub partitions: Vec<SkinPartition>,
    /// Per-vertex weights after influence reduction, parallel to the
    /// binding's weight lists. Unchanged vertices keep their input weights.
    pub weights: Vec<Vec<(usize, f32)>>,
    /// Total normalized weight dropped while enforcing the per-vertex and
    /// per-triangle bone limits. Zero means the partitioning was lossless.
    pub lost_weight: f32,
}

#[derive(Debug, Clone)]
struct Part {
    bones: BTreeSet<usize>,
    triangles: Vec<[u32; 3]>,
    tag: u32,
}

/// Splits a skinned mesh into partitions that each fit the configured bone
/// budget.
///
/// Influences are first reduced per vertex (lightest dropped, remainder
/// renormalized), then per triangle (lightest removable bone across the
/// three vertices, single-influence bones are never dropped). Triangles are
/// then grouped greedily by shared bone sets, grown along shared vertices,
/// and merged while budgets allow. Triangles with different `part_tags`
/// entries never share a partition.
pub fn partition_skin(
    triangles: &[[u32; 3]],
    binding: &SkinBinding,
    config: &ReconcileConfig,
    part_tags: Option<&[u32]>,
) -> Result<PartitionOutcome, ReconcileError> {
    if triangles.len() > MAX_INDEX_BUDGET {
        return Err(ReconcileError::TooManyElements {
            kind: "triangle",
            count: triangles.len(),
            budget: MAX_INDEX_BUDGET,
        });
    }
    if binding.weights.len() > MAX_INDEX_BUDGET {
        return Err(ReconcileError::TooManyElements {
            kind: "vertex",
            count: binding.weights.len(),
            budget: MAX_INDEX_BUDGET,
        });
    }
    if config.pad_bones && config.max_bones_per_partition != config.max_bones_per_vertex {
        return Err(ReconcileError::PadBonesMismatch {
            per_partition: config.max_bones_per_partition,
            per_vertex: config.max_bones_per_vertex,
        });
    }
    if let Some(tags) = part_tags {
        if tags.len() != triangles.len() {
            return Err(ReconcileError::PartTagCountMismatch {
                triangles: triangles.len(),
                tags: tags.len(),
            });
        }
    }

    let max_per_vertex = config.max_bones_per_vertex as usize;
    let max_per_partition = config.max_bones_per_partition as usize;
    let mut weights = binding.weights.clone();
    let mut lost_weight = 0.0f32;

    // enforce the per-vertex influence limit, dropping the lightest first
    for list in &mut weights {
        if list.len() <= max_per_vertex {
            continue;
        }
        list.sort_by(|a, b| b.1.total_cmp(&a.1));
        for &(_, weight) in &list[max_per_vertex..] {
            lost_weight += weight;
        }
        list.truncate(max_per_vertex);
        let total: f32 = list.iter().map(|&(_, w)| w).sum();
        for entry in list.iter_mut() {
            entry.1 /= total;
        }
        list.sort_by_key(|&(slot, _)| slot);
    }

    // enforce the per-triangle bone limit
    for triangle in triangles {
        loop {
            let tribones: BTreeSet<usize> = triangle
                .iter()
                .flat_map(|&v| weights[v as usize].iter().map(|&(slot, _)| slot))
                .collect();
            if tribones.len() <= max_per_partition {
                break;
            }
            let mut sums: BTreeMap<usize, f32> = BTreeMap::new();
            let mut pinned: HashSet<usize> = HashSet::new();
            for &vertex in triangle {
                let list = &weights[vertex as usize];
                if list.len() == 1 {
                    pinned.insert(list[0].0);
                }
                for &(slot, weight) in list {
                    *sums.entry(slot).or_insert(0.0) += weight;
                }
            }
            let victim = sums
                .iter()
                .filter(|(slot, _)| !pinned.contains(slot))
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(&slot, _)| slot);
            let Some(victim) = victim else {
                return Err(ReconcileError::PartitionBudget {
                    max_bones: config.max_bones_per_partition,
                });
            };
            log::debug!("triangle over bone budget; dropping influences of bone slot {victim}");
            for &vertex in triangle {
                let list = &mut weights[vertex as usize];
                if let Some(position) = list.iter().position(|&(slot, _)| slot == victim) {
                    lost_weight += list[position].1;
                    list.remove(position);
                    let total: f32 = list.iter().map(|&(_, w)| w).sum();
                    for entry in list.iter_mut() {
                        entry.1 /= total;
                    }
                }
            }
        }
    }

    // greedy grouping: seed a partition, sweep in every triangle whose bones
    // already fit, then grow across shared vertices while the budget allows
    let default_tags;
    let tags: &[u32] = match part_tags {
        Some(tags) => tags,
        None => {
            default_tags = vec![0u32; triangles.len()];
            &default_tags
        }
    };
    let mut remaining: Vec<([u32; 3], u32)> = triangles
        .iter()
        .copied()
        .zip(tags.iter().copied())
        .collect();
    let mut parts: Vec<Part> = Vec::new();

    while !remaining.is_empty() {
        let mut part = Part {
            bones: BTreeSet::new(),
            triangles: Vec::new(),
            tag: remaining[0].1,
        };
        let mut used_vertices: HashSet<u32> = HashSet::new();
        let mut growing = true;
        while growing {
            let mut kept = Vec::with_capacity(remaining.len());
            for (triangle, tag) in remaining.drain(..) {
                let tribones: BTreeSet<usize> = triangle_bones(&triangle, &weights);
                if tag == part.tag
                    && (part.triangles.is_empty() || part.bones.is_superset(&tribones))
                {
                    part.bones.extend(tribones);
                    used_vertices.extend(triangle);
                    part.triangles.push(triangle);
                } else {
                    kept.push((triangle, tag));
                }
            }
            remaining = kept;

            growing = false;
            if part.bones.len() < max_per_partition {
                let mut kept = Vec::with_capacity(remaining.len());
                for (triangle, tag) in remaining.drain(..) {
                    let adjacent = triangle.iter().any(|v| used_vertices.contains(v));
                    if tag == part.tag && adjacent {
                        let tribones = triangle_bones(&triangle, &weights);
                        if part.bones.union(&tribones).count() <= max_per_partition {
                            part.bones.extend(tribones);
                            used_vertices.extend(triangle);
                            part.triangles.push(triangle);
                            growing = true;
                            continue;
                        }
                    }
                    kept.push((triangle, tag));
                }
                remaining = kept;
            }
        }
        parts.push(part);
    }

    // merge partitions whose combined palette still fits
    let mut merged = true;
    while merged {
        merged = false;
        let mut combined: Vec<Part> = Vec::with_capacity(parts.len());
        let mut taken = vec![false; parts.len()];
        for a in 0..parts.len() {
            if taken[a] {
                continue;
            }
            let mut current = parts[a].clone();
            taken[a] = true;
            for b in (a + 1)..parts.len() {
                if taken[b]
                    || current.tag != parts[b].tag
                    || current.bones.union(&parts[b].bones).count() > max_per_partition
                {
                    continue;
                }
                current.bones.extend(parts[b].bones.iter().copied());
                current.triangles.extend_from_slice(&parts[b].triangles);
                taken[b] = true;
                merged = true;
            }
            combined.push(current);
        }
        parts = combined;
    }

    // optionally widen palettes so consecutive partitions share one bone set
    if config.maximize_bone_sharing {
        let mut shared_parts: Vec<Part> = Vec::with_capacity(parts.len());
        let mut rest = parts;
        while !rest.is_empty() {
            let mut group = vec![rest.remove(0)];
            let mut palette = group[0].bones.clone();
            let mut kept = Vec::with_capacity(rest.len());
            for part in rest {
                if palette.union(&part.bones).count() <= max_per_partition {
                    palette.extend(part.bones.iter().copied());
                    group.push(part);
                } else {
                    kept.push(part);
                }
            }
            for part in &mut group {
                part.bones = palette.clone();
            }
            shared_parts.extend(group);
            rest = kept;
        }
        parts = shared_parts;
    }

    let partitions = parts
        .into_iter()
        .map(|part| {
            let mut bones: Vec<usize> = part.bones.into_iter().collect();
            if config.pad_bones {
                // dummy slots refer to the first bone, like the reference
                // skin blocks expect
                bones.resize(max_per_partition, 0);
            }
            let vertices: Vec<u32> = part
                .triangles
                .iter()
                .flatten()
                .copied()
                .collect::<BTreeSet<u32>>()
                .into_iter()
                .collect();
            let bone_counts = vertices
                .iter()
                .map(|&v| weights[v as usize].len())
                .collect();
            SkinPartition {
                bones,
                triangles: part.triangles,
                vertices,
                bone_counts,
                part_tag: part_tags.map(|_| part.tag),
            }
        })
        .collect();

    Ok(PartitionOutcome {
        partitions,
        weights,
        lost_weight,
    })
}

fn triangle_bones(triangle: &[u32; 3], weights: &[Vec<(usize, f32)>]) -> BTreeSet<usize> {
    triangle
        .iter()
        .flat_map(|&v| weights[v as usize].iter().map(|&(slot, _)| slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skinning::{normalize_weights, VertexGroup, VertexMap};
    use approx::assert_relative_eq;

    fn binding_from(weights: Vec<Vec<(usize, f32)>>, bone_count: usize) -> SkinBinding {
        SkinBinding {
            bones: (0..bone_count).map(|i| format!("Bone{i}")).collect(),
            weights,
            unweighted: Vec::new(),
        }
    }

    fn config(per_partition: u32, per_vertex: u32) -> ReconcileConfig {
        ReconcileConfig {
            max_bones_per_partition: per_partition,
            max_bones_per_vertex: per_vertex,
            ..ReconcileConfig::default()
        }
    }

    #[test]
    fn given_small_mesh_when_partitioned_then_one_lossless_partition_results() {
        let weights = vec![
            vec![(0, 1.0)],
            vec![(0, 0.5), (1, 0.5)],
            vec![(1, 1.0)],
            vec![(0, 0.25), (1, 0.75)],
        ];
        let binding = binding_from(weights, 2);
        let triangles = [[0, 1, 2], [1, 2, 3]];
        let outcome = partition_skin(&triangles, &binding, &config(4, 4), None).unwrap();

        assert_eq!(outcome.partitions.len(), 1);
        assert_eq!(outcome.partitions[0].bones, vec![0, 1]);
        assert_eq!(outcome.partitions[0].triangles.len(), 2);
        assert_eq!(outcome.partitions[0].vertices, vec![0, 1, 2, 3]);
        assert_relative_eq!(outcome.lost_weight, 0.0);
    }

    #[test]
    fn given_five_influences_when_reduced_then_lightest_weight_is_lost() {
        let weights = vec![
            vec![(0, 0.4), (1, 0.3), (2, 0.15), (3, 0.1), (4, 0.05)],
            vec![(0, 1.0)],
            vec![(1, 1.0)],
        ];
        let binding = binding_from(weights, 5);
        let outcome =
            partition_skin(&[[0, 1, 2]], &binding, &config(18, 4), None).unwrap();

        assert_relative_eq!(outcome.lost_weight, 0.05, epsilon = 1e-6);
        let reduced = &outcome.weights[0];
        assert_eq!(reduced.len(), 4);
        assert!(reduced.iter().all(|&(slot, _)| slot != 4));
        let sum: f32 = reduced.iter().map(|&(_, w)| w).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn given_triangle_over_budget_then_lightest_removable_bone_is_dropped() {
        let weights = vec![
            vec![(0, 0.9), (1, 0.1)],
            vec![(0, 0.8), (2, 0.2)],
            vec![(0, 0.7), (3, 0.3)],
        ];
        let binding = binding_from(weights, 4);
        let outcome =
            partition_skin(&[[0, 1, 2]], &binding, &config(3, 4), None).unwrap();

        assert_relative_eq!(outcome.lost_weight, 0.1, epsilon = 1e-6);
        assert_eq!(outcome.partitions[0].bones, vec![0, 2, 3]);
        assert_eq!(outcome.weights[0], vec![(0, 1.0)]);
    }

    #[test]
    fn given_only_pinned_bones_over_budget_then_partitioning_fails() {
        let weights = vec![vec![(0, 1.0)], vec![(1, 1.0)], vec![(2, 1.0)]];
        let binding = binding_from(weights, 3);
        let err = partition_skin(&[[0, 1, 2]], &binding, &config(2, 4), None).unwrap_err();
        assert_eq!(err, ReconcileError::PartitionBudget { max_bones: 2 });
    }

    #[test]
    fn given_bone_budget_when_partitioned_then_every_palette_fits() {
        // two islands with disjoint bone pairs cannot merge under budget 2
        let weights = vec![
            vec![(0, 0.5), (1, 0.5)],
            vec![(0, 1.0)],
            vec![(1, 1.0)],
            vec![(2, 0.5), (3, 0.5)],
            vec![(2, 1.0)],
            vec![(3, 1.0)],
        ];
        let binding = binding_from(weights, 4);
        let triangles = [[0, 1, 2], [3, 4, 5]];
        let outcome = partition_skin(&triangles, &binding, &config(2, 4), None).unwrap();

        assert_eq!(outcome.partitions.len(), 2);
        for partition in &outcome.partitions {
            assert!(partition.bones.len() <= 2);
            assert!(partition.bone_counts.iter().all(|&c| c <= 4));
            for triangle in &partition.triangles {
                for bone in triangle_bones(triangle, &outcome.weights) {
                    assert!(partition.bones.contains(&bone));
                }
            }
        }
    }

    #[test]
    fn given_part_tags_then_triangles_never_mix_across_tags() {
        let weights = vec![vec![(0, 1.0)]; 4];
        let binding = binding_from(weights, 1);
        let triangles = [[0, 1, 2], [1, 2, 3]];
        let outcome =
            partition_skin(&triangles, &binding, &config(4, 4), Some(&[7, 9])).unwrap();

        assert_eq!(outcome.partitions.len(), 2);
        let tags: Vec<u32> = outcome
            .partitions
            .iter()
            .map(|p| p.part_tag.unwrap())
            .collect();
        assert!(tags.contains(&7) && tags.contains(&9));
    }

    #[test]
    fn given_short_part_tag_slice_then_error_is_raised() {
        let weights = vec![vec![(0, 1.0)]; 4];
        let binding = binding_from(weights, 1);
        let triangles = [[0, 1, 2], [1, 2, 3]];
        let err =
            partition_skin(&triangles, &binding, &config(4, 4), Some(&[7])).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::PartTagCountMismatch {
                triangles: 2,
                tags: 1
            }
        );
    }

    #[test]
    fn given_pad_bones_then_palettes_are_padded_to_the_budget() {
        let weights = vec![vec![(1, 1.0)]; 3];
        let binding = binding_from(weights, 2);
        let cfg = ReconcileConfig {
            pad_bones: true,
            ..config(4, 4)
        };
        let outcome = partition_skin(&[[0, 1, 2]], &binding, &cfg, None).unwrap();
        assert_eq!(outcome.partitions[0].bones, vec![1, 0, 0, 0]);
    }

    #[test]
    fn given_pad_bones_with_mismatched_budgets_then_error_is_raised() {
        let binding = binding_from(vec![vec![(0, 1.0)]; 3], 1);
        let cfg = ReconcileConfig {
            pad_bones: true,
            ..config(18, 4)
        };
        let err = partition_skin(&[[0, 1, 2]], &binding, &cfg, None).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::PadBonesMismatch {
                per_partition: 18,
                per_vertex: 4
            }
        );
    }

    #[test]
    fn given_bone_sharing_then_compatible_partitions_use_one_palette() {
        let weights = vec![
            vec![(0, 1.0)],
            vec![(0, 1.0)],
            vec![(0, 1.0)],
            vec![(1, 1.0)],
            vec![(1, 1.0)],
            vec![(1, 1.0)],
        ];
        let binding = binding_from(weights, 2);
        // different tags prevent merging, sharing still unifies palettes
        let cfg = ReconcileConfig {
            maximize_bone_sharing: true,
            ..config(4, 4)
        };
        let outcome =
            partition_skin(&[[0, 1, 2], [3, 4, 5]], &binding, &cfg, Some(&[1, 2])).unwrap();
        assert_eq!(outcome.partitions.len(), 2);
        assert_eq!(outcome.partitions[0].bones, outcome.partitions[1].bones);
        assert_eq!(outcome.partitions[0].bones, vec![0, 1]);
    }

    #[test]
    fn given_normalized_binding_then_partition_pipeline_connects() {
        let groups = [
            VertexGroup {
                bone: "Bip01 L Thigh".to_string(),
                weights: vec![(0, 1.0), (1, 0.5), (2, 0.5)],
            },
            VertexGroup {
                bone: "Bip01 L Calf".to_string(),
                weights: vec![(1, 0.5), (2, 0.5)],
            },
        ];
        let binding = normalize_weights(&groups, &VertexMap::identity(3), 3);
        let outcome =
            partition_skin(&[[0, 1, 2]], &binding, &ReconcileConfig::default(), None).unwrap();
        assert_eq!(outcome.partitions.len(), 1);
        assert_eq!(outcome.partitions[0].bones, vec![0, 1]);
        assert_relative_eq!(outcome.lost_weight, 0.0);
    }
}
