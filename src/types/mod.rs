//! Shared geometric primitives used throughout the wire codec, shape model
//! and viewer data pipeline.

mod bounds;
mod vector;

pub use bounds::{Aabb, BoundingBox2D, BoundingBox3D};
pub use vector::{Quaternion, Vector2, Vector3};
