//! Rigid-body and joint parameter deltas supplied alongside a frame.
//!
//! Nothing here simulates; the values are copied from the keyframe source so
//! consumers can query them next to the bone deltas.

use serde::{Deserialize, Serialize};

use crate::keyframes::KeyframeSource;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyDelta {
    pub name: String,
    #[serde(default)]
    pub size: [f64; 3],
    #[serde(default)]
    pub mass: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointDelta {
    pub name: String,
    pub translation_limit_min: [f64; 3],
    pub translation_limit_max: [f64; 3],
    pub rotation_limit_min: [f64; 3],
    pub rotation_limit_max: [f64; 3],
    pub spring_constant_translation: [f64; 3],
    pub spring_constant_rotation: [f64; 3],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsDeltas {
    pub rigid_bodies: Vec<RigidBodyDelta>,
    pub joints: Vec<JointDelta>,
}

impl PhysicsDeltas {
    pub fn from_source<S: KeyframeSource + ?Sized>(source: &S, frame: f32) -> Self {
        Self {
            rigid_bodies: source.rigid_body_deltas(frame),
            joints: source.joint_deltas(frame),
        }
    }

    pub fn rigid_body(&self, name: &str) -> Option<&RigidBodyDelta> {
        self.rigid_bodies.iter().find(|r| r.name == name)
    }

    pub fn joint(&self, name: &str) -> Option<&JointDelta> {
        self.joints.iter().find(|j| j.name == name)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rigid_bodies.is_empty() && self.joints.is_empty()
    }
}
