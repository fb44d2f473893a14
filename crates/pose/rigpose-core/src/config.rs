//! Core configuration for rigpose-core.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Selects which IK bones get the toe-style first-iteration target.
///
/// A toe IK bone is solved before its target bone in deformation order, so on
/// its first iteration the solver aims with the target's IK-off position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "names", rename_all = "snake_case")]
pub enum ToeIkTrigger {
    /// Single-link chain whose target is deformed after the IK bone.
    #[default]
    Structural,
    /// Only IK bones with one of these names (still requires a single link).
    Names(Vec<String>),
    /// Never apply the adjustment.
    Disabled,
}

/// Tunables for one deformer. Keep this minimal; defaults reproduce the
/// reference poses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeformConfig {
    /// Maximum recursion depth when walking effector (appendix) chains.
    pub effector_depth_limit: usize,
    /// Local-space target/goal distance under which a single-target solve stops.
    pub ik_convergence_distance: f64,
    /// Middle-axis clamp for Euler decomposition, and the raw-angle threshold
    /// above which single-link solves snap to their limit axis.
    pub gimbal_limit_degrees: f64,
    /// Outer iterations of the multi-target solver.
    pub multi_target_iterations: usize,
    pub toe_ik: ToeIkTrigger,
    /// Entries kept by the pose cache of a `Deformer`.
    pub cache_capacity: usize,
}

impl Default for DeformConfig {
    fn default() -> Self {
        Self {
            effector_depth_limit: 10,
            ik_convergence_distance: 1e-5,
            gimbal_limit_degrees: 88.0,
            multi_target_iterations: 20,
            toe_ik: ToeIkTrigger::Structural,
            cache_capacity: 64,
        }
    }
}

impl DeformConfig {
    /// Parse a config from JSON; missing fields fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[inline]
    pub fn gimbal_limit(&self) -> f64 {
        self.gimbal_limit_degrees.to_radians()
    }
}
