//! Screen viewport geometry.
//!
//! The cache engine only needs the projection of the screen bounds onto the
//! map plane: four corner points, in map pixels relative to the view center,
//! that feed the scanline fill. Everything else about rendering projection
//! lives outside the core.

/// Pixel dimensions of the visible map area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: f32,
    height: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
        }
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    pub fn height(&self) -> u32 {
        self.height as u32
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width as f32;
        self.height = height as f32;
    }

    /// Corner points of the visible map area in map pixels relative to the
    /// view center, rotated by `rotation` degrees and grown by `buffer`
    /// pixels on every side.
    ///
    /// Order is top-left, top-right, bottom-right, bottom-left: the order the
    /// scanline fill expects its quad corners in.
    pub fn map_extents(&self, rotation: f32, buffer: f32) -> [f32; 8] {
        let hw = self.width / 2.0 + buffer;
        let hh = self.height / 2.0 + buffer;

        let (sin, cos) = (rotation.to_radians()).sin_cos();
        let rotate = |x: f32, y: f32| (x * cos - y * sin, x * sin + y * cos);

        let (x0, y0) = rotate(-hw, -hh);
        let (x1, y1) = rotate(hw, -hh);
        let (x2, y2) = rotate(hw, hh);
        let (x3, y3) = rotate(-hw, hh);

        [x0, y0, x1, y1, x2, y2, x3, y3]
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extents_axis_aligned() {
        let vp = Viewport::new(800, 600);
        let box_ = vp.map_extents(0.0, 0.0);
        assert_eq!(box_, [-400.0, -300.0, 400.0, -300.0, 400.0, 300.0, -400.0, 300.0]);
    }

    #[test]
    fn test_extents_buffer() {
        let vp = Viewport::new(100, 100);
        let box_ = vp.map_extents(0.0, 10.0);
        assert_eq!(box_[0], -60.0);
        assert_eq!(box_[4], 60.0);
    }

    #[test]
    fn test_extents_rotation_preserves_size() {
        let vp = Viewport::new(400, 200);
        let box_ = vp.map_extents(37.0, 0.0);
        // rotation keeps corner distances from center intact
        let r = (200.0f32 * 200.0 + 100.0 * 100.0).sqrt();
        for i in (0..8).step_by(2) {
            let d = (box_[i] * box_[i] + box_[i + 1] * box_[i + 1]).sqrt();
            assert!((d - r).abs() < 1e-3);
        }
    }
}
