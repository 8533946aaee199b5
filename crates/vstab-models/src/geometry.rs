//! Basic 2D geometry: points, frame sizes and crop rectangles.

use serde::{Deserialize, Serialize};

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    /// Horizontal coordinate (0 = left edge)
    pub x: f64,
    /// Vertical coordinate (0 = top edge)
    pub y: f64,
}

impl Point2 {
    /// Create a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Vector from `self` to `other`.
    #[inline]
    pub fn delta_to(&self, other: &Point2) -> Point2 {
        Point2::new(other.x - self.x, other.y - self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Create a new frame size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check whether a (sub-pixel) point lies inside the frame.
    #[inline]
    pub fn contains(&self, p: &Point2) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= (self.width as f64 - 1.0) && p.y <= (self.height as f64 - 1.0)
    }

    /// Width / height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }
}

/// Axis-aligned crop rectangle in integer pixel coordinates.
///
/// The rectangle covers columns `x..x + width` and rows `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge x-coordinate
    pub x: u32,
    /// Top edge y-coordinate
    pub y: u32,
    /// Rectangle width
    pub width: u32,
    /// Rectangle height
    pub height: u32,
}

impl CropRect {
    /// Create a new crop rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// A rectangle centred in the frame covering `ratio` of each dimension.
    ///
    /// Dimensions are rounded down to even values (required by most codecs).
    pub fn centered(frame: FrameSize, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        let width = ((frame.width as f64 * ratio) as u32 / 2 * 2).max(2).min(frame.width);
        let height = ((frame.height as f64 * ratio) as u32 / 2 * 2).max(2).min(frame.height);
        Self {
            x: (frame.width - width) / 2,
            y: (frame.height - height) / 2,
            width,
            height,
        }
    }

    /// Right edge (exclusive).
    #[inline]
    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub fn y2(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if the rectangle lies entirely within a frame of the given size.
    pub fn fits_within(&self, frame: FrameSize) -> bool {
        !self.is_empty() && self.x2() <= frame.width && self.y2() <= frame.height
    }

    /// Output size of a frame cut with this rectangle.
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Pixel-centre coordinates of the four corners, clockwise from top-left.
    pub fn corners(&self) -> [Point2; 4] {
        let x0 = self.x as f64;
        let y0 = self.y as f64;
        let x1 = (self.x2() - 1) as f64;
        let y1 = (self.y2() - 1) as f64;
        [
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect() {
        let frame = FrameSize::new(1920, 1080);
        let rect = CropRect::centered(frame, 0.8);
        assert_eq!(rect.width, 1536);
        assert_eq!(rect.height, 864);
        assert_eq!(rect.x, 192);
        assert_eq!(rect.y, 108);
        assert!(rect.fits_within(frame));
    }

    #[test]
    fn test_centered_rect_full_frame() {
        let frame = FrameSize::new(100, 50);
        let rect = CropRect::centered(frame, 1.0);
        assert_eq!(rect, CropRect::new(0, 0, 100, 50));
    }

    #[test]
    fn test_fits_within() {
        let frame = FrameSize::new(100, 100);
        assert!(CropRect::new(10, 10, 90, 90).fits_within(frame));
        assert!(!CropRect::new(11, 10, 90, 90).fits_within(frame));
        assert!(!CropRect::new(0, 0, 0, 10).fits_within(frame));
    }

    #[test]
    fn test_corners() {
        let rect = CropRect::new(2, 3, 4, 5);
        let c = rect.corners();
        assert_eq!(c[0], Point2::new(2.0, 3.0));
        assert_eq!(c[2], Point2::new(5.0, 7.0));
    }

    #[test]
    fn test_frame_contains() {
        let frame = FrameSize::new(10, 10);
        assert!(frame.contains(&Point2::new(0.0, 9.0)));
        assert!(!frame.contains(&Point2::new(9.5, 0.0)));
        assert!(!frame.contains(&Point2::new(-0.1, 0.0)));
    }
}
