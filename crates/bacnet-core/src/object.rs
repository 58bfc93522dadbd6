use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::mask::ContourMask;

/// Stable per-image object id. Id `0` is reserved for the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

/// Id of the synthetic surface object present in every [`ObjectSet`].
pub const SURFACE_ID: ObjectId = ObjectId(0);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Cell,
    Nanowire,
    Surface,
}

impl ObjectClass {
    /// Map a detector / label-file class name.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "cell" => Some(Self::Cell),
            "nanowire" => Some(Self::Nanowire),
            "surface" => Some(Self::Surface),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Nanowire => "nanowire",
            Self::Surface => "surface",
        }
    }
}

/// Relationship carried by a [`NetworkEdge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Two cells whose contours touch.
    CellContact,
    /// Two cells bridged by one nanowire.
    CellToCell,
    /// A cell wired to the conductive surface.
    CellToSurface,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CellContact => "cell_contact",
            Self::CellToCell => "cell_to_cell",
            Self::CellToSurface => "cell_to_surface",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub tail: ObjectId,
    pub head: ObjectId,
    pub kind: EdgeKind,
    /// Bridging nanowire for `CellToCell` / `CellToSurface` edges.
    pub nanowire: Option<ObjectId>,
}

impl NetworkEdge {
    /// The endpoint that is not `id`, if `id` is an endpoint.
    pub fn other(&self, id: ObjectId) -> Option<ObjectId> {
        if self.tail == id {
            Some(self.head)
        } else if self.head == id {
            Some(self.tail)
        } else {
            None
        }
    }
}

/// One detected (or synthesized) object of an image.
#[derive(Clone, Debug)]
pub struct DetectedObject {
    pub id: ObjectId,
    pub bbox: BoundingBox,
    pub class: ObjectClass,
    /// Detector confidence, when the object came from a detector run.
    pub confidence: Option<f32>,
    /// Segmented centroid in image coordinates; `None` until computed or if
    /// segmentation failed.
    pub centroid: Option<Point2<i32>>,
    pub contour: Option<ContourMask>,
    /// Objects whose boxes must be masked out when segmenting this one.
    ///
    /// Not symmetric: a box fully inside this one is listed here, but this
    /// one is not listed in the inner box's overlaps.
    pub overlaps: Vec<ObjectId>,
    /// Nanowires only: cells whose boxes touch this wire.
    pub cell_overlaps: Vec<ObjectId>,
    /// Indices into [`ObjectSet::edges`].
    pub edges: Vec<usize>,
}

impl DetectedObject {
    fn new(id: ObjectId, bbox: BoundingBox, class: ObjectClass) -> Self {
        Self {
            id,
            bbox,
            class,
            confidence: None,
            centroid: None,
            contour: None,
            overlaps: Vec::new(),
            cell_overlaps: Vec::new(),
            edges: Vec::new(),
        }
    }

    #[inline]
    pub fn is_cell(&self) -> bool {
        self.class == ObjectClass::Cell
    }

    #[inline]
    pub fn is_nanowire(&self) -> bool {
        self.class == ObjectClass::Nanowire
    }

    #[inline]
    pub fn is_surface(&self) -> bool {
        self.class == ObjectClass::Surface
    }

    #[inline]
    pub fn has_contour(&self) -> bool {
        self.contour.is_some()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    #[error("the surface object is synthesized once per image and cannot be added")]
    DuplicateSurface,
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
}

/// Arena of every object of one image plus the edge table.
///
/// Ids are dense: `objects[i].id == ObjectId(i)`.
#[derive(Clone, Debug)]
pub struct ObjectSet {
    image_width: u32,
    image_height: u32,
    objects: Vec<DetectedObject>,
    edges: Vec<NetworkEdge>,
}

impl ObjectSet {
    /// Create the set for a `width x height` image, synthesizing the surface.
    pub fn new(image_width: u32, image_height: u32) -> Self {
        let bbox = BoundingBox {
            x1: 0,
            y1: 0,
            x2: image_width as i32,
            y2: image_height as i32,
        };
        let mut surface = DetectedObject::new(SURFACE_ID, bbox, ObjectClass::Surface);
        surface.centroid = Some(Point2::origin());
        Self {
            image_width,
            image_height,
            objects: vec![surface],
            edges: Vec::new(),
        }
    }

    #[inline]
    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    /// Add a cell or nanowire and return its id.
    pub fn push(&mut self, class: ObjectClass, bbox: BoundingBox) -> Result<ObjectId, ObjectError> {
        if class == ObjectClass::Surface {
            return Err(ObjectError::DuplicateSurface);
        }
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(DetectedObject::new(id, bbox, class));
        Ok(id)
    }

    /// Like [`push`](Self::push) but records the detector confidence.
    pub fn push_detection(
        &mut self,
        class: ObjectClass,
        bbox: BoundingBox,
        confidence: f32,
    ) -> Result<ObjectId, ObjectError> {
        let id = self.push(class, bbox)?;
        self.objects[id.0 as usize].confidence = Some(confidence);
        Ok(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&DetectedObject> {
        self.objects.get(id.0 as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut DetectedObject> {
        self.objects.get_mut(id.0 as usize)
    }

    pub fn surface(&self) -> &DetectedObject {
        &self.objects[SURFACE_ID.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectedObject> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DetectedObject> {
        self.objects.iter_mut()
    }

    pub fn ids_of(&self, class: ObjectClass) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|o| o.class == class)
            .map(|o| o.id)
            .collect()
    }

    pub fn cell_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_cell()).count()
    }

    pub fn edges(&self) -> &[NetworkEdge] {
        &self.edges
    }

    /// Record an edge on both endpoints and return its index.
    ///
    /// A relation already present with the same endpoints (either order),
    /// kind and nanowire is not duplicated; its index is returned instead.
    pub fn add_edge(
        &mut self,
        tail: ObjectId,
        head: ObjectId,
        kind: EdgeKind,
        nanowire: Option<ObjectId>,
    ) -> Result<usize, ObjectError> {
        for id in [tail, head] {
            if self.get(id).is_none() {
                return Err(ObjectError::UnknownObject(id));
            }
        }
        let existing = self.objects[tail.0 as usize].edges.iter().copied().find(|&i| {
            let e = &self.edges[i];
            e.kind == kind
                && e.nanowire == nanowire
                && ((e.tail, e.head) == (tail, head) || (e.tail, e.head) == (head, tail))
        });
        if let Some(index) = existing {
            return Ok(index);
        }
        let index = self.edges.len();
        self.edges.push(NetworkEdge {
            tail,
            head,
            kind,
            nanowire,
        });
        self.objects[tail.0 as usize].edges.push(index);
        if head != tail {
            self.objects[head.0 as usize].edges.push(index);
        }
        Ok(index)
    }

    /// Drop the edge table and every object's edge list.
    pub fn clear_edges(&mut self) {
        self.edges.clear();
        for obj in &mut self.objects {
            obj.edges.clear();
        }
    }

    /// Edges incident to `id`.
    pub fn edges_of(&self, id: ObjectId) -> impl Iterator<Item = &NetworkEdge> + '_ {
        self.get(id)
            .map(|o| o.edges.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.edges[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn surface_is_synthesized_with_id_zero() {
        let set = ObjectSet::new(640, 480);
        assert_eq!(set.len(), 1);
        let surface = set.surface();
        assert_eq!(surface.id, SURFACE_ID);
        assert!(surface.is_surface());
        assert_eq!(surface.bbox, bbox(0, 0, 640, 480));
    }

    #[test]
    fn ids_are_sequential_and_surface_cannot_be_pushed() {
        let mut set = ObjectSet::new(100, 100);
        let a = set.push(ObjectClass::Cell, bbox(0, 0, 10, 10)).unwrap();
        let b = set
            .push_detection(ObjectClass::Nanowire, bbox(5, 5, 30, 8), 0.9)
            .unwrap();
        assert_eq!(a, ObjectId(1));
        assert_eq!(b, ObjectId(2));
        assert_eq!(set.get(b).unwrap().confidence, Some(0.9));
        assert_eq!(
            set.push(ObjectClass::Surface, bbox(0, 0, 1, 1)),
            Err(ObjectError::DuplicateSurface)
        );
    }

    #[test]
    fn edges_are_listed_on_both_endpoints() {
        let mut set = ObjectSet::new(100, 100);
        let a = set.push(ObjectClass::Cell, bbox(0, 0, 10, 10)).unwrap();
        let b = set.push(ObjectClass::Cell, bbox(20, 0, 30, 10)).unwrap();
        let w = set.push(ObjectClass::Nanowire, bbox(8, 4, 22, 6)).unwrap();
        set.add_edge(a, b, EdgeKind::CellToCell, Some(w)).unwrap();

        assert_eq!(set.edges_of(a).count(), 1);
        assert_eq!(set.edges_of(b).count(), 1);
        assert_eq!(set.edges_of(w).count(), 0);
        assert_eq!(set.edges()[0].other(a), Some(b));
        assert!(set
            .add_edge(a, ObjectId(99), EdgeKind::CellContact, None)
            .is_err());
    }

    #[test]
    fn identical_relations_are_stored_once() {
        let mut set = ObjectSet::new(100, 100);
        let a = set.push(ObjectClass::Cell, bbox(0, 0, 10, 10)).unwrap();
        let b = set.push(ObjectClass::Cell, bbox(20, 0, 30, 10)).unwrap();
        let w = set.push(ObjectClass::Nanowire, bbox(8, 4, 22, 6)).unwrap();

        let first = set.add_edge(a, b, EdgeKind::CellContact, None).unwrap();
        assert_eq!(set.add_edge(b, a, EdgeKind::CellContact, None), Ok(first));
        // A different kind or bridge is a distinct parallel edge.
        let bridged = set.add_edge(a, b, EdgeKind::CellToCell, Some(w)).unwrap();
        assert_ne!(bridged, first);
        assert_eq!(set.add_edge(a, b, EdgeKind::CellToCell, Some(w)), Ok(bridged));
        assert_eq!(set.edges().len(), 2);
        assert_eq!(set.edges_of(a).count(), 2);
        assert_eq!(set.edges_of(b).count(), 2);

        set.clear_edges();
        assert!(set.edges().is_empty());
        assert_eq!(set.edges_of(a).count(), 0);
    }

    #[test]
    fn class_labels_round_trip() {
        for class in [ObjectClass::Cell, ObjectClass::Nanowire, ObjectClass::Surface] {
            assert_eq!(ObjectClass::from_label(class.as_str()), Some(class));
        }
        assert_eq!(ObjectClass::from_label(" Cell "), Some(ObjectClass::Cell));
        assert_eq!(ObjectClass::from_label("debris"), None);
        let json = serde_json::to_string(&EdgeKind::CellToSurface).unwrap();
        assert_eq!(json, "\"cell_to_surface\"");
    }
}
