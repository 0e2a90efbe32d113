//! View-frustum bounds culling (`spec.md` §4.10 "Bounds culling").
//!
//! Grounded on `original_source/3esview/3esview/BoundsCuller.h/.cpp`: the
//! allocate/release/update/cull API and the "stamp visible entries with the
//! current mark, compare against the last mark to answer `is_visible`"
//! scheme carry over directly, backed by [`crate::resource_list::ResourceList`]
//! instead of the original's own `ResourceList<T>` template. The Magnum
//! frustum/intersection dependency has no counterpart in this crate's stack,
//! so frustum planes and the AABB/plane test are expressed directly in terms
//! of [`Vector3`]/[`Aabb`].

use crate::resource_list::{ResourceId, ResourceList};
use crate::types::{Aabb, Vector3};

/// A half-space boundary of a view frustum: `normal . point + offset >= 0`
/// holds for points on the inside of the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3,
    pub offset: f64,
}

impl Plane {
    pub fn new(normal: Vector3, offset: f64) -> Self {
        Plane { normal, offset }
    }
}

/// The six bounding planes of a view frustum, normals facing inward.
#[derive(Debug, Clone)]
pub struct Frustum {
    pub planes: Vec<Plane>,
}

impl Frustum {
    pub fn new(planes: Vec<Plane>) -> Self {
        Frustum { planes }
    }

    /// True if `bounds` intersects or lies inside every plane (the standard
    /// "positive vertex" AABB/frustum test: a box is entirely outside a
    /// plane only if its most-positive-facing corner is still outside it).
    pub fn intersects(&self, bounds: &Aabb) -> bool {
        let centre = bounds.center();
        let half_extents = Vector3::new(
            bounds.width() * 0.5,
            bounds.height() * 0.5,
            bounds.depth() * 0.5,
        );
        for plane in &self.planes {
            let radius = half_extents.x * plane.normal.x.abs()
                + half_extents.y * plane.normal.y.abs()
                + half_extents.z * plane.normal.z.abs();
            let distance = plane.normal.dot(&centre) + plane.offset;
            if distance + radius < 0.0 {
                return false;
            }
        }
        true
    }
}

pub type BoundsId = ResourceId;

struct CullBounds {
    bounds: Aabb,
    /// Render mark this entry was last found visible at.
    visible_mark: u32,
}

/// Tracks AABBs for culling against a view frustum once per frame.
///
/// Callers `allocate` an entry per renderable, `update` its bounds as the
/// renderable moves, and call `cull` once per frame with a monotonically
/// advancing `mark`; `is_visible` then answers whether an entry was inside
/// the frustum at that (or the most recent) mark.
pub struct BoundsCuller {
    bounds: ResourceList<CullBounds>,
    last_mark: u32,
}

impl Default for BoundsCuller {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundsCuller {
    pub fn new() -> Self {
        BoundsCuller {
            bounds: ResourceList::new(),
            last_mark: u32::MAX,
        }
    }

    pub fn allocate(&mut self, bounds: Aabb) -> BoundsId {
        // Stamped one mark behind `last_mark` so a freshly allocated entry
        // is not spuriously visible before the next `cull()`.
        let visible_mark = self.last_mark.wrapping_sub(1);
        self.bounds.allocate(CullBounds { bounds, visible_mark })
    }

    pub fn release(&mut self, id: BoundsId) {
        let _ = self.bounds.release(id);
    }

    pub fn update(&mut self, id: BoundsId, bounds: Aabb) {
        if let Some(entry) = self.bounds.get_mut(id) {
            entry.bounds = bounds;
        }
    }

    pub fn cull(&mut self, mark: u32, frustum: &Frustum) {
        for (_, entry) in self.bounds.iter_mut() {
            if frustum.intersects(&entry.bounds) {
                entry.visible_mark = mark;
            }
        }
        self.last_mark = mark;
    }

    pub fn is_visible_at(&self, id: BoundsId, mark: u32) -> bool {
        self.bounds.get(id).is_some_and(|entry| entry.visible_mark == mark)
    }

    pub fn is_visible(&self, id: BoundsId) -> bool {
        self.is_visible_at(id, self.last_mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_frustum() -> Frustum {
        // An axis-aligned box frustum: inside [-1, 1] on every axis.
        Frustum::new(vec![
            Plane::new(Vector3::new(1.0, 0.0, 0.0), 1.0),
            Plane::new(Vector3::new(-1.0, 0.0, 0.0), 1.0),
            Plane::new(Vector3::new(0.0, 1.0, 0.0), 1.0),
            Plane::new(Vector3::new(0.0, -1.0, 0.0), 1.0),
            Plane::new(Vector3::new(0.0, 0.0, 1.0), 1.0),
            Plane::new(Vector3::new(0.0, 0.0, -1.0), 1.0),
        ])
    }

    #[test]
    fn allocated_entry_is_invisible_before_first_cull() {
        let mut culler = BoundsCuller::new();
        let id = culler.allocate(Aabb::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.1, 0.1, 0.1)));
        assert!(!culler.is_visible(id));
    }

    #[test]
    fn cull_marks_intersecting_bounds_visible() {
        let mut culler = BoundsCuller::new();
        let inside = culler.allocate(Aabb::new(Vector3::new(-0.1, -0.1, -0.1), Vector3::new(0.1, 0.1, 0.1)));
        let outside = culler.allocate(Aabb::new(Vector3::new(5.0, 5.0, 5.0), Vector3::new(6.0, 6.0, 6.0)));

        culler.cull(1, &unit_frustum());
        assert!(culler.is_visible(inside));
        assert!(!culler.is_visible(outside));
    }

    #[test]
    fn update_moves_bounds_for_next_cull() {
        let mut culler = BoundsCuller::new();
        let id = culler.allocate(Aabb::new(Vector3::new(5.0, 5.0, 5.0), Vector3::new(6.0, 6.0, 6.0)));
        culler.cull(1, &unit_frustum());
        assert!(!culler.is_visible(id));

        culler.update(id, Aabb::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.1, 0.1, 0.1)));
        culler.cull(2, &unit_frustum());
        assert!(culler.is_visible(id));
    }

    #[test]
    fn released_entry_is_not_visible() {
        let mut culler = BoundsCuller::new();
        let id = culler.allocate(Aabb::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.1, 0.1, 0.1)));
        culler.cull(1, &unit_frustum());
        culler.release(id);
        assert!(!culler.is_visible(id));
    }
}
