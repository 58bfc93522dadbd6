use bacnet_core::{BoundingBox, CancelToken, Cancelled, ObjectClass, ObjectId, ObjectSet};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// How two boxes relate once each is inflated by the tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapRelation {
    Disjoint,
    /// The second box lies inside the (inflated) first one.
    Contains,
    /// The first box lies inside the (inflated) second one.
    ContainedBy,
    /// Any other intersection, including near-identical boxes.
    Partial,
}

/// Classify `b` against `a`.
pub fn classify_pair(a: &BoundingBox, b: &BoundingBox, tolerance: i32) -> OverlapRelation {
    let inflated_a = a.inflate(tolerance);
    let b_in_a = inflated_a.corners_inside(b) == 4;
    let a_in_b = b.inflate(tolerance).corners_inside(a) == 4;
    match (b_in_a, a_in_b) {
        (true, false) => OverlapRelation::Contains,
        (false, true) => OverlapRelation::ContainedBy,
        (true, true) => OverlapRelation::Partial,
        // Covers both a corner inside and two edges crossing without one.
        (false, false) if inflated_a.intersects(b) => OverlapRelation::Partial,
        (false, false) => OverlapRelation::Disjoint,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapParams {
    /// Pixels added on every side before the corner test.
    pub tolerance: i32,
}

impl Default for OverlapParams {
    fn default() -> Self {
        Self { tolerance: 10 }
    }
}

/// Counts gathered by one resolver pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlapStats {
    pub containments: usize,
    pub partial: usize,
    pub nanowire_links: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OverlapResolver {
    params: OverlapParams,
}

impl OverlapResolver {
    pub fn new(params: OverlapParams) -> Self {
        Self { params }
    }

    /// Fill `overlaps` on every cell and `cell_overlaps` on every nanowire.
    ///
    /// Previous lists are cleared first. On cancellation the lists are left
    /// partially filled.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, objects, cancel), fields(objects = objects.len()))
    )]
    pub fn resolve(
        &self,
        objects: &mut ObjectSet,
        cancel: &CancelToken,
    ) -> Result<OverlapStats, Cancelled> {
        let tol = self.params.tolerance;
        let boxes_of = |objects: &ObjectSet, class: ObjectClass| -> Vec<(ObjectId, BoundingBox)> {
            objects
                .iter()
                .filter(|o| o.class == class)
                .map(|o| (o.id, o.bbox))
                .collect()
        };
        let cells = boxes_of(objects, ObjectClass::Cell);
        let wires = boxes_of(objects, ObjectClass::Nanowire);

        for obj in objects.iter_mut() {
            obj.overlaps.clear();
            obj.cell_overlaps.clear();
        }

        let mut stats = OverlapStats::default();
        let record = |objects: &mut ObjectSet, owner: ObjectId, other: ObjectId| {
            if let Some(o) = objects.get_mut(owner) {
                o.overlaps.push(other);
            }
        };

        for (i, &(id_a, box_a)) in cells.iter().enumerate() {
            for &(id_b, box_b) in &cells[i + 1..] {
                cancel.check()?;
                match classify_pair(&box_a, &box_b, tol) {
                    OverlapRelation::Disjoint => {}
                    OverlapRelation::Contains => {
                        record(objects, id_a, id_b);
                        stats.containments += 1;
                    }
                    OverlapRelation::ContainedBy => {
                        record(objects, id_b, id_a);
                        stats.containments += 1;
                    }
                    OverlapRelation::Partial => {
                        record(objects, id_a, id_b);
                        record(objects, id_b, id_a);
                        stats.partial += 1;
                    }
                }
            }
        }

        for &(wire_id, wire_box) in &wires {
            for &(cell_id, cell_box) in &cells {
                cancel.check()?;
                if classify_pair(&wire_box, &cell_box, tol) == OverlapRelation::Disjoint {
                    continue;
                }
                if let Some(wire) = objects.get_mut(wire_id) {
                    wire.cell_overlaps.push(cell_id);
                    stats.nanowire_links += 1;
                }
            }
        }

        debug!(
            "overlaps: {} cells, {} nanowires, {} containments, {} partial, {} wire-cell links",
            cells.len(),
            wires.len(),
            stats.containments,
            stats.partial,
            stats.nanowire_links
        );
        Ok(stats)
    }
}
