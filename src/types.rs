use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::correction::CorrectionStore;

/// Host-side length given to bones whose tail cannot be derived from
/// children, before scale correction.
pub const NUB_LENGTH: f32 = 5.0;

/// Alignment offset above which the axis heuristic falls back to the
/// identity correction.
pub const ALIGNMENT_FALLBACK_THRESHOLD: f32 = 0.25;

/// Multiplier applied before truncating alignment components to integers,
/// so sub-0.005 offsets compare as zero.
pub const AXIS_SELECT_SCALE: f32 = 200.0;

/// Largest element count addressable by the 16-bit indices of the
/// interchange skin blocks.
pub const MAX_INDEX_BUDGET: usize = 65_535;

/// What a scene node represents. Only `Bone` nodes take part in the
/// correction heuristic; everything else passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneNodeKind {
    Bone,
    Mesh,
    Armature,
    Empty,
}

/// How imported bones should be oriented in the host editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealignMode {
    /// Keep the interchange rotation as the host roll verbatim.
    None,
    /// Give every bone the identity roll.
    KeepUnit,
    /// Pick one of the six axis-aligned corrections per bone.
    AxisAligned,
}

/// Tunables shared by import, export, and partitioning.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Global unit conversion between the interchange file and the host scene.
    pub scale_correction: f32,
    pub realign: RealignMode,
    pub max_bones_per_partition: u32,
    pub max_bones_per_vertex: u32,
    /// Pad partition bone lists up to `max_bones_per_partition` with slot 0.
    pub pad_bones: bool,
    /// Regroup partitions after merging so runs of them share one bone set.
    pub maximize_bone_sharing: bool,
    /// General comparison tolerance, also used for zero-length bone checks.
    pub epsilon: f32,
    pub nub_length: f32,
    pub alignment_fallback: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            scale_correction: 1.0,
            realign: RealignMode::AxisAligned,
            max_bones_per_partition: 18,
            max_bones_per_vertex: 4,
            pad_bones: false,
            maximize_bone_sharing: false,
            epsilon: 0.005,
            nub_length: NUB_LENGTH,
            alignment_fallback: ALIGNMENT_FALLBACK_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

/// A non-fatal finding surfaced to the caller alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// Mutable state threaded through a reconciliation run: configuration, the
/// correction store that makes round trips lossless, the interchange-to-host
/// name registry, and accumulated diagnostics.
pub struct ReconciliationContext<'a> {
    pub config: ReconcileConfig,
    pub store: &'a mut dyn CorrectionStore,
    names: HashMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> ReconciliationContext<'a> {
    pub fn new(config: ReconcileConfig, store: &'a mut dyn CorrectionStore) -> Self {
        ReconciliationContext {
            config,
            store,
            names: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Records that `interchange` is known as `host` on the editor side.
    /// Later lookups for the same interchange name return the host alias.
    pub fn register_name(&mut self, interchange: impl Into<String>, host: impl Into<String>) {
        self.names.insert(interchange.into(), host.into());
    }

    /// The host-side name for an interchange node, falling back to the
    /// interchange name itself when no alias was registered.
    pub fn host_name<'n>(&'n self, interchange: &'n str) -> &'n str {
        self.names
            .get(interchange)
            .map(String::as_str)
            .unwrap_or(interchange)
    }

    pub fn warn(&mut self, code: &str, message: String) {
        log::warn!("{code}: {message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            code: code.to_string(),
            message,
        });
    }

    pub fn info(&mut self, code: &str, message: String) {
        log::info!("{code}: {message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Info,
            code: code.to_string(),
            message,
        });
    }
}
