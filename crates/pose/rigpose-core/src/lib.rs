//! Rigpose Core (engine-agnostic)
//!
//! Skeletal deformation for keyframed rigs: bone pose deltas, transform
//! composition with effector inheritance and cancelable transforms, CCD
//! inverse kinematics with angle limits, and morph blending. Model and motion
//! file formats, rendering and physics simulation live outside this crate.

pub mod cache;
pub mod compose;
pub mod config;
pub mod delta;
pub mod error;
pub mod ik;
pub mod keyframes;
pub mod math;
pub mod morph;
pub mod physics;
pub mod scheduler;
pub mod skeleton;

// Re-exports for consumers (loaders, renderers, exporters)
pub use cache::{PoseCache, PoseKey};
pub use config::{DeformConfig, ToeIkTrigger};
pub use delta::{BoneDelta, BonePose, PoseDeltaStore, PoseSnapshot};
pub use error::{DeformError, Result};
pub use ik::{solve, solve_targets, IkGoal, IkOutcome};
pub use keyframes::{BoneFrame, BoneKey, KeyframeSource, MotionTracks};
pub use morph::{blend, MaterialValues, Morph, MorphDeltas, MorphOffsets};
pub use physics::{JointDelta, PhysicsDeltas, RigidBodyDelta};
pub use scheduler::{deform, deform_indices, deform_into, DeformRequest, Deformer, Deltas};
pub use skeleton::{Bone, DeformPass, Skeleton, SkeletonDesc};
