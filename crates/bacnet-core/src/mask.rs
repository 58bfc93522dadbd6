//! Binary contour masks.
//!
//! A mask behaves like an image-sized binary array but only stores the
//! window that can contain foreground. Queries outside the window are
//! background.

use nalgebra::Point2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContourMask {
    image_width: usize,
    image_height: usize,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    bits: Vec<bool>, // row-major, len = width*height
}

impl ContourMask {
    /// Create a mask whose window starts at `(x0, y0)` in image coordinates.
    ///
    /// Returns `None` if the window does not fit in the image or `bits` has
    /// the wrong length.
    pub fn from_window(
        image_width: usize,
        image_height: usize,
        x0: usize,
        y0: usize,
        width: usize,
        height: usize,
        bits: Vec<bool>,
    ) -> Option<Self> {
        if x0 + width > image_width || y0 + height > image_height {
            return None;
        }
        if bits.len() != width * height {
            return None;
        }
        Some(Self {
            image_width,
            image_height,
            x0,
            y0,
            width,
            height,
            bits,
        })
    }

    /// Mask from a list of image-coordinate pixels; the window is their
    /// bounding rectangle.
    pub fn from_pixels(
        image_width: usize,
        image_height: usize,
        pixels: &[(usize, usize)],
    ) -> Option<Self> {
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        for &(x, y) in pixels {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if pixels.is_empty() {
            return Self::from_window(image_width, image_height, 0, 0, 0, 0, Vec::new());
        }
        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let mut bits = vec![false; width * height];
        for &(x, y) in pixels {
            bits[(y - min_y) * width + (x - min_x)] = true;
        }
        Self::from_window(image_width, image_height, min_x, min_y, width, height, bits)
    }

    #[inline]
    pub fn image_size(&self) -> (usize, usize) {
        (self.image_width, self.image_height)
    }

    /// Stored window as `(x0, y0, width, height)`.
    #[inline]
    pub fn window(&self) -> (usize, usize, usize, usize) {
        (self.x0, self.y0, self.width, self.height)
    }

    /// Foreground test in image coordinates.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        if x < self.x0 || y < self.y0 || x >= self.x0 + self.width || y >= self.y0 + self.height {
            return false;
        }
        self.bits[(y - self.y0) * self.width + (x - self.x0)]
    }

    pub fn area(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Iterate over foreground pixels in image coordinates.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.bits.iter().enumerate().filter_map(move |(i, &b)| {
            b.then(|| (self.x0 + i % self.width, self.y0 + i / self.width))
        })
    }

    /// Foreground centroid rounded to whole pixels.
    pub fn centroid(&self) -> Option<Point2<i32>> {
        let (mut sx, mut sy, mut n) = (0f64, 0f64, 0usize);
        for (x, y) in self.pixels() {
            sx += x as f64;
            sy += y as f64;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(Point2::new(
            (sx / n as f64).round() as i32,
            (sy / n as f64).round() as i32,
        ))
    }

    /// True if both masks share at least one foreground pixel.
    pub fn intersects(&self, other: &ContourMask) -> bool {
        let x_lo = self.x0.max(other.x0);
        let y_lo = self.y0.max(other.y0);
        let x_hi = (self.x0 + self.width).min(other.x0 + other.width);
        let y_hi = (self.y0 + self.height).min(other.y0 + other.height);
        if x_lo >= x_hi || y_lo >= y_hi {
            return false;
        }
        (y_lo..y_hi).any(|y| (x_lo..x_hi).any(|x| self.get(x, y) && other.get(x, y)))
    }

    /// One-pixel dilation with a 3x3 cross, clipped to the image.
    pub fn dilated(&self) -> ContourMask {
        let x0 = self.x0.saturating_sub(1);
        let y0 = self.y0.saturating_sub(1);
        let x1 = (self.x0 + self.width + 1).min(self.image_width);
        let y1 = (self.y0 + self.height + 1).min(self.image_height);
        let width = x1 - x0;
        let height = y1 - y0;

        let mut bits = vec![false; width * height];
        for (x, y) in self.pixels() {
            let mut set = |px: usize, py: usize| {
                bits[(py - y0) * width + (px - x0)] = true;
            };
            set(x, y);
            if x > x0 {
                set(x - 1, y);
            }
            if x + 1 < x1 {
                set(x + 1, y);
            }
            if y > y0 {
                set(x, y - 1);
            }
            if y + 1 < y1 {
                set(x, y + 1);
            }
        }

        ContourMask {
            image_width: self.image_width,
            image_height: self.image_height,
            x0,
            y0,
            width,
            height,
            bits,
        }
    }

    /// Expand to a full image-sized row-major `0/1` array.
    pub fn to_dense(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.image_width * self.image_height];
        for (x, y) in self.pixels() {
            out[y * self.image_width + x] = 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: usize, y0: usize, side: usize) -> ContourMask {
        let pixels: Vec<_> = (y0..y0 + side)
            .flat_map(|y| (x0..x0 + side).map(move |x| (x, y)))
            .collect();
        ContourMask::from_pixels(50, 50, &pixels).unwrap()
    }

    #[test]
    fn window_rejects_out_of_bounds() {
        assert!(ContourMask::from_window(10, 10, 8, 0, 4, 1, vec![true; 4]).is_none());
        assert!(ContourMask::from_window(10, 10, 0, 0, 2, 2, vec![true; 3]).is_none());
    }

    #[test]
    fn adjacent_squares_touch_only_after_dilation() {
        let a = square(5, 5, 5); // x in 5..=9
        let b = square(10, 5, 5); // x in 10..=14
        assert!(!a.intersects(&b));
        assert!(a.dilated().intersects(&b));

        let far = square(12, 5, 3);
        assert!(!a.dilated().intersects(&far));
    }

    #[test]
    fn dilation_is_clipped_to_image() {
        let corner = square(0, 0, 2);
        let d = corner.dilated();
        assert_eq!(d.window(), (0, 0, 3, 3));
        assert!(d.get(2, 0));
        assert!(!d.get(2, 2), "cross dilation must not fill diagonals");
    }

    #[test]
    fn dense_matches_sparse() {
        let m = square(3, 4, 2);
        let dense = m.to_dense();
        assert_eq!(dense.len(), 2500);
        assert_eq!(dense.iter().filter(|&&v| v == 1).count(), 4);
        assert_eq!(dense[4 * 50 + 3], 1);
        assert_eq!(m.centroid(), Some(Point2::new(4, 5)));
    }
}
