use bacnet_core::{
    CancelToken, Cancelled, ContourMask, EdgeKind, ObjectClass, ObjectError, ObjectId, ObjectSet,
    Progress, SURFACE_ID,
};
use bacnet_segment::{ContourExtractor, ContourParams};
use image::GrayImage;
use log::{debug, warn};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Object(#[from] ObjectError),
}

/// What one [`NetworkBuilder::build`] pass produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub contact_edges: usize,
    pub cell_to_cell_edges: usize,
    pub cell_to_surface_edges: usize,
    /// Nanowires touching no segmented cell.
    pub dangling_nanowires: usize,
    /// Nanowires still touching more than two cells after contour filtering.
    pub unresolved_nanowires: Vec<ObjectId>,
}

impl BuildReport {
    pub fn edge_count(&self) -> usize {
        self.contact_edges + self.cell_to_cell_edges + self.cell_to_surface_edges
    }
}

/// Infers cell contacts and nanowire bridges for one image.
///
/// Expects overlaps resolved and cell centroids computed; contours that are
/// still missing are extracted on demand.
pub struct NetworkBuilder<'a> {
    extractor: ContourExtractor<'a>,
}

enum Bridge {
    None,
    ToSurface(ObjectId),
    Between(ObjectId, ObjectId),
    Ambiguous,
}

impl Bridge {
    fn from_candidates(cells: &[ObjectId]) -> Self {
        match *cells {
            [] => Bridge::None,
            [c] => Bridge::ToSurface(c),
            [a, b] => Bridge::Between(a, b),
            _ => Bridge::Ambiguous,
        }
    }
}

/// Masks touch if they share a pixel, or do so after growing either one by a
/// pixel.
pub fn masks_touch(a: &ContourMask, b: &ContourMask) -> bool {
    a.intersects(b) || a.dilated().intersects(b) || b.dilated().intersects(a)
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(image: &'a GrayImage, params: ContourParams) -> Self {
        Self {
            extractor: ContourExtractor::new(image, params),
        }
    }

    /// Record CellContact, CellToCell and CellToSurface edges on `objects`.
    ///
    /// Edges from a previous build are cleared first.
    ///
    /// Progress runs over cells (contact scan) and then nanowires (bridging)
    /// and ends at 100.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(objects = objects.len()))
    )]
    pub fn build(
        &self,
        objects: &mut ObjectSet,
        progress: &mut Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<BuildReport, BuildError> {
        let cells = objects.ids_of(ObjectClass::Cell);
        let wires = objects.ids_of(ObjectClass::Nanowire);
        let total = cells.len() + wires.len();
        let mut report = BuildReport::default();
        objects.clear_edges();

        self.contact_contours(objects, &cells, cancel)?;

        for (i, &a) in cells.iter().enumerate() {
            let partners: Vec<ObjectId> = objects
                .get(a)
                .map(|o| o.overlaps.iter().copied().filter(|&b| b > a).collect())
                .unwrap_or_default();
            for b in partners {
                cancel.check()?;
                if self.in_contact(objects, a, b) {
                    objects.add_edge(a, b, EdgeKind::CellContact, None)?;
                    report.contact_edges += 1;
                }
            }
            progress.fraction(i + 1, total);
        }

        for (i, &wire) in wires.iter().enumerate() {
            cancel.check()?;
            match self.bridge_for(objects, wire) {
                Bridge::None => report.dangling_nanowires += 1,
                Bridge::ToSurface(cell) => {
                    objects.add_edge(cell, SURFACE_ID, EdgeKind::CellToSurface, Some(wire))?;
                    report.cell_to_surface_edges += 1;
                }
                Bridge::Between(a, b) => {
                    objects.add_edge(a, b, EdgeKind::CellToCell, Some(wire))?;
                    report.cell_to_cell_edges += 1;
                }
                Bridge::Ambiguous => {
                    warn!("nanowire {wire} still touches more than two cells; left unresolved");
                    report.unresolved_nanowires.push(wire);
                }
            }
            progress.fraction(cells.len() + i + 1, total);
        }
        progress.finish();

        debug!(
            "network: {} contacts, {} cell-cell bridges, {} cell-surface bridges, {} unresolved",
            report.contact_edges,
            report.cell_to_cell_edges,
            report.cell_to_surface_edges,
            report.unresolved_nanowires.len()
        );
        Ok(report)
    }

    /// Make sure every segmented cell with an overlap has a contour.
    fn contact_contours(
        &self,
        objects: &mut ObjectSet,
        cells: &[ObjectId],
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        for &id in cells {
            cancel.check()?;
            let needs = objects
                .get(id)
                .is_some_and(|o| o.centroid.is_some() && !o.overlaps.is_empty());
            if needs {
                if let Err(e) = self.extractor.ensure_contour(objects, id) {
                    warn!("cell {id}: no contour for contact test: {e}");
                }
            }
        }
        Ok(())
    }

    fn in_contact(&self, objects: &ObjectSet, a: ObjectId, b: ObjectId) -> bool {
        let (Some(oa), Some(ob)) = (objects.get(a), objects.get(b)) else {
            return false;
        };
        if !ob.overlaps.contains(&a) {
            return false;
        }
        match (&oa.contour, &ob.contour) {
            (Some(ma), Some(mb)) => masks_touch(ma, mb),
            _ => false,
        }
    }

    fn bridge_for(&self, objects: &mut ObjectSet, wire: ObjectId) -> Bridge {
        let candidates: Vec<ObjectId> = objects
            .get(wire)
            .map(|w| {
                w.cell_overlaps
                    .iter()
                    .copied()
                    .filter(|&c| objects.get(c).is_some_and(|o| o.centroid.is_some()))
                    .collect()
            })
            .unwrap_or_default();

        let bridge = Bridge::from_candidates(&candidates);
        if !matches!(bridge, Bridge::Ambiguous) {
            return bridge;
        }

        // Too many boxes: keep only cells whose region meets the wire's.
        if let Err(e) = self.extractor.ensure_contour(objects, wire) {
            warn!("nanowire {wire}: {e}");
            return Bridge::Ambiguous;
        }
        let mut confirmed = Vec::new();
        for c in candidates {
            if let Err(e) = self.extractor.ensure_contour(objects, c) {
                warn!("cell {c}: {e}");
                continue;
            }
            let wire_mask = objects.get(wire).and_then(|w| w.contour.as_ref());
            let cell_mask = objects.get(c).and_then(|o| o.contour.as_ref());
            if matches!((wire_mask, cell_mask), (Some(w), Some(m)) if w.intersects(m)) {
                confirmed.push(c);
            }
        }
        debug!(
            "nanowire {wire}: {} of its cells confirmed by contour",
            confirmed.len()
        );
        Bridge::from_candidates(&confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacnet_core::BoundingBox;
    use bacnet_segment::{OverlapResolver, OverlapParams};
    use image::Luma;

    fn bb(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    fn fill(img: &mut GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) {
        for y in y1..=y2 {
            for x in x1..=x2 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
    }

    fn prepare(img: &GrayImage, objects: &mut ObjectSet) {
        let token = CancelToken::new();
        OverlapResolver::new(OverlapParams::default())
            .resolve(objects, &token)
            .unwrap();
        ContourExtractor::new(img, ContourParams::default())
            .compute_centroids(objects, &token)
            .unwrap();
    }

    fn build(img: &GrayImage, objects: &mut ObjectSet) -> BuildReport {
        prepare(img, objects);
        NetworkBuilder::new(img, ContourParams::default())
            .build(objects, &mut Progress::none(), &CancelToken::new())
            .unwrap()
    }

    fn kinds(objects: &ObjectSet) -> Vec<EdgeKind> {
        objects.edges().iter().map(|e| e.kind).collect()
    }

    #[test]
    fn touching_cells_get_a_contact_edge() {
        let mut img = GrayImage::new(200, 100);
        fill(&mut img, 20, 20, 59, 60);
        fill(&mut img, 60, 20, 99, 60);
        fill(&mut img, 150, 20, 180, 60);
        let mut objects = ObjectSet::new(200, 100);
        let a = objects.push(ObjectClass::Cell, bb(15, 15, 62, 65)).unwrap();
        let b = objects.push(ObjectClass::Cell, bb(57, 15, 104, 65)).unwrap();
        objects.push(ObjectClass::Cell, bb(145, 15, 185, 65)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.contact_edges, 1);
        let e = objects.edges()[0];
        assert_eq!((e.tail, e.head, e.kind), (a, b, EdgeKind::CellContact));
        assert_eq!(objects.edges_of(a).count(), 1);
        assert_eq!(objects.edges_of(b).count(), 1);
    }

    #[test]
    fn rebuilding_replaces_previous_edges() {
        let mut img = GrayImage::new(300, 100);
        fill(&mut img, 10, 30, 49, 70);
        fill(&mut img, 50, 30, 89, 70);
        fill(&mut img, 200, 30, 240, 70);
        fill(&mut img, 90, 50, 199, 51);
        let mut objects = ObjectSet::new(300, 100);
        let a = objects.push(ObjectClass::Cell, bb(5, 25, 52, 75)).unwrap();
        let b = objects.push(ObjectClass::Cell, bb(47, 25, 94, 75)).unwrap();
        objects.push(ObjectClass::Cell, bb(195, 25, 245, 75)).unwrap();
        objects.push(ObjectClass::Nanowire, bb(92, 45, 202, 56)).unwrap();

        build(&img, &mut objects);
        let first = objects.edges().to_vec();
        assert!(!first.is_empty());

        let builder = NetworkBuilder::new(&img, ContourParams::default());
        builder
            .build(&mut objects, &mut Progress::none(), &CancelToken::new())
            .unwrap();
        assert_eq!(objects.edges(), first.as_slice());
        for id in [a, b] {
            assert_eq!(
                objects.edges_of(id).count(),
                first.iter().filter(|e| e.other(id).is_some()).count()
            );
        }
    }

    #[test]
    fn overlapping_boxes_without_touching_regions_do_not_connect() {
        let mut img = GrayImage::new(200, 100);
        fill(&mut img, 20, 20, 45, 60);
        fill(&mut img, 75, 20, 99, 60);
        let mut objects = ObjectSet::new(200, 100);
        objects.push(ObjectClass::Cell, bb(15, 15, 70, 65)).unwrap();
        objects.push(ObjectClass::Cell, bb(50, 15, 104, 65)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.contact_edges, 0);
        assert!(objects.edges().is_empty());
    }

    #[test]
    fn wire_between_two_cells_is_cell_to_cell() {
        let mut img = GrayImage::new(300, 100);
        fill(&mut img, 10, 30, 50, 70);
        fill(&mut img, 200, 30, 240, 70);
        fill(&mut img, 51, 50, 199, 51);
        let mut objects = ObjectSet::new(300, 100);
        let a = objects.push(ObjectClass::Cell, bb(5, 25, 55, 75)).unwrap();
        let b = objects.push(ObjectClass::Cell, bb(195, 25, 245, 75)).unwrap();
        let wire = objects.push(ObjectClass::Nanowire, bb(48, 45, 202, 56)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.cell_to_cell_edges, 1);
        assert_eq!(report.cell_to_surface_edges, 0);
        assert_eq!(kinds(&objects), vec![EdgeKind::CellToCell]);
        let e = objects.edges()[0];
        assert_eq!((e.tail, e.head, e.nanowire), (a, b, Some(wire)));
    }

    #[test]
    fn wire_from_one_cell_reaches_the_surface() {
        let mut img = GrayImage::new(300, 100);
        fill(&mut img, 10, 30, 50, 70);
        fill(&mut img, 51, 50, 199, 51);
        let mut objects = ObjectSet::new(300, 100);
        let a = objects.push(ObjectClass::Cell, bb(5, 25, 55, 75)).unwrap();
        let wire = objects.push(ObjectClass::Nanowire, bb(48, 45, 202, 56)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.cell_to_surface_edges, 1);
        let e = objects.edges()[0];
        assert_eq!(
            (e.tail, e.head, e.kind, e.nanowire),
            (a, SURFACE_ID, EdgeKind::CellToSurface, Some(wire))
        );
        assert_eq!(objects.edges_of(SURFACE_ID).count(), 1);
    }

    #[test]
    fn isolated_wire_adds_nothing() {
        let mut img = GrayImage::new(300, 100);
        fill(&mut img, 10, 30, 50, 70);
        fill(&mut img, 120, 50, 199, 51);
        let mut objects = ObjectSet::new(300, 100);
        objects.push(ObjectClass::Cell, bb(5, 25, 55, 75)).unwrap();
        objects.push(ObjectClass::Nanowire, bb(115, 45, 202, 56)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.dangling_nanowires, 1);
        assert!(objects.edges().is_empty());
    }

    #[test]
    fn contours_pick_two_of_three_candidate_cells() {
        // A third cell's box overlaps the wire box but its body sits below
        // the wire.
        let mut img = GrayImage::new(300, 160);
        fill(&mut img, 10, 30, 50, 70);
        fill(&mut img, 200, 30, 240, 70);
        fill(&mut img, 51, 50, 199, 51);
        fill(&mut img, 110, 90, 140, 130);
        let mut objects = ObjectSet::new(300, 160);
        let a = objects.push(ObjectClass::Cell, bb(5, 25, 55, 75)).unwrap();
        let b = objects.push(ObjectClass::Cell, bb(195, 25, 245, 75)).unwrap();
        objects.push(ObjectClass::Cell, bb(105, 58, 145, 135)).unwrap();
        let wire = objects.push(ObjectClass::Nanowire, bb(48, 45, 202, 56)).unwrap();

        prepare(&img, &mut objects);
        assert_eq!(objects.get(wire).unwrap().cell_overlaps.len(), 3);
        let report = NetworkBuilder::new(&img, ContourParams::default())
            .build(&mut objects, &mut Progress::none(), &CancelToken::new())
            .unwrap();

        assert!(report.unresolved_nanowires.is_empty());
        assert_eq!(kinds(&objects), vec![EdgeKind::CellToCell]);
        let e = objects.edges()[0];
        assert_eq!((e.tail, e.head), (a, b));
        assert!(objects.get(wire).unwrap().has_contour());
    }

    #[test]
    fn wire_through_three_cells_stays_unresolved() {
        let mut img = GrayImage::new(300, 100);
        fill(&mut img, 10, 30, 50, 70);
        fill(&mut img, 120, 30, 160, 70);
        fill(&mut img, 230, 30, 270, 70);
        fill(&mut img, 51, 50, 229, 51);
        let mut objects = ObjectSet::new(300, 100);
        objects.push(ObjectClass::Cell, bb(5, 25, 55, 75)).unwrap();
        objects.push(ObjectClass::Cell, bb(115, 25, 165, 75)).unwrap();
        objects.push(ObjectClass::Cell, bb(225, 25, 275, 75)).unwrap();
        let wire = objects.push(ObjectClass::Nanowire, bb(48, 45, 232, 56)).unwrap();

        let report = build(&img, &mut objects);
        assert_eq!(report.unresolved_nanowires, vec![wire]);
        assert!(objects.edges().is_empty());
    }

    #[test]
    fn progress_reaches_100_and_cancel_aborts() {
        let mut img = GrayImage::new(100, 100);
        fill(&mut img, 10, 10, 30, 30);
        let mut objects = ObjectSet::new(100, 100);
        objects.push(ObjectClass::Cell, bb(5, 5, 35, 35)).unwrap();
        prepare(&img, &mut objects);

        let mut seen = Vec::new();
        let mut sink = |p: u8| seen.push(p);
        let mut progress = Progress::new(&mut sink);
        let builder = NetworkBuilder::new(&img, ContourParams::default());
        builder
            .build(&mut objects, &mut progress, &CancelToken::new())
            .unwrap();
        drop(progress);
        assert_eq!(seen.last(), Some(&100));

        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            builder.build(&mut objects, &mut Progress::none(), &token),
            Err(BuildError::Cancelled(Cancelled))
        );
    }
}
