//! Coordinate mapping from detector space into render space
//!
//! Three coordinate systems are involved:
//!
//! 1. **Normalized**: detector output, `[0,1]²`, origin bottom-left.
//! 2. **Source pixel**: the decoded track before rotation, origin top-left,
//!    natural size `(sw, sh)`.
//! 3. **Render**: the output frame after orientation correction, origin
//!    top-left. Quarter turns swap the axes, so the render size is `(sh, sw)`.
//!
//! The whole chain is folded into one [`AffineTransform`]:
//!
//! | Orientation      | source → render            | render size |
//! |------------------|----------------------------|-------------|
//! | `Upright`        | `(x, y)`                   | `(sw, sh)`  |
//! | `Rotated90Cw`    | `(sh - y, x)`              | `(sh, sw)`  |
//! | `Rotated90Ccw`   | `(y, sw - x)`              | `(sh, sw)`  |
//! | `UpsideDown`     | `(sw - x, sh - y)`         | `(sw, sh)`  |
//!
//! preceded by the scale + vertical flip `(x, y) → (sw·x, sh − sh·y)`. The
//! flip appears exactly once, in that first step.

use serde::{Deserialize, Serialize};

use super::detection::NormalizedRect;

/// Rotation the source track needs to be displayed upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Upright,
    Rotated90Cw,
    Rotated90Ccw,
    UpsideDown,
}

impl Orientation {
    /// Map a clockwise display rotation in degrees to the nearest quarter turn.
    #[must_use]
    pub fn from_rotation_degrees(degrees: i32) -> Self {
        let quarter = ((f64::from(degrees) / 90.0).round() as i64).rem_euclid(4);
        match quarter {
            1 => Self::Rotated90Cw,
            2 => Self::UpsideDown,
            3 => Self::Rotated90Ccw,
            _ => Self::Upright,
        }
    }

    /// Clockwise rotation in degrees, `0..360`.
    #[must_use]
    pub fn rotation_degrees(self) -> i32 {
        match self {
            Self::Upright => 0,
            Self::Rotated90Cw => 90,
            Self::UpsideDown => 180,
            Self::Rotated90Ccw => 270,
        }
    }

    /// Portrait-style rotations that swap width and height.
    #[must_use]
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Rotated90Cw | Self::Rotated90Ccw)
    }

    /// Render size for a track of the given natural size.
    #[must_use]
    pub fn render_size(self, natural_width: u32, natural_height: u32) -> (u32, u32) {
        if self.is_quarter_turn() {
            (natural_height, natural_width)
        } else {
            (natural_width, natural_height)
        }
    }

    /// ffmpeg video filter that performs the same rotation on decoded frames.
    #[must_use]
    pub fn ffmpeg_filter(self) -> Option<&'static str> {
        match self {
            Self::Upright => None,
            Self::Rotated90Cw => Some("transpose=1"),
            Self::Rotated90Ccw => Some("transpose=2"),
            Self::UpsideDown => Some("hflip,vflip"),
        }
    }

    /// Source-pixel → render transform for a source of size `(sw, sh)`.
    #[must_use]
    pub fn transform(self, source_width: f64, source_height: f64) -> AffineTransform {
        let (sw, sh) = (source_width, source_height);
        match self {
            Self::Upright => AffineTransform::IDENTITY,
            Self::Rotated90Cw => AffineTransform::new(0.0, 1.0, -1.0, 0.0, sh, 0.0),
            Self::Rotated90Ccw => AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, sw),
            Self::UpsideDown => AffineTransform::new(-1.0, 0.0, 0.0, -1.0, sw, sh),
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Upright => "upright",
            Self::Rotated90Cw => "rotated-90-cw",
            Self::Rotated90Ccw => "rotated-90-ccw",
            Self::UpsideDown => "upside-down",
        };
        f.write_str(name)
    }
}

/// 2D affine map: `x' = a·x + c·y + tx`, `y' = b·x + d·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    #[must_use]
    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// `self` followed by `next`.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }
}

/// Rectangle in render pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Bounding box of this rect's corners after `t`.
    #[must_use]
    pub fn applying(&self, t: &AffineTransform) -> Self {
        let corners = [
            t.apply(self.x, self.y),
            t.apply(self.max_x(), self.y),
            t.apply(self.x, self.max_y()),
            t.apply(self.max_x(), self.max_y()),
        ];
        let (mut min_x, mut min_y) = corners[0];
        let (mut max_x, mut max_y) = corners[0];
        for (x, y) in &corners[1..] {
            min_x = min_x.min(*x);
            min_y = min_y.min(*y);
            max_x = max_x.max(*x);
            max_y = max_y.max(*y);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// Pure normalized → render mapping for one render surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformer {
    render_width: u32,
    render_height: u32,
    orientation: Orientation,
    transform: AffineTransform,
}

impl CoordinateTransformer {
    /// Build the composed transform for a render surface of `render_width × render_height`.
    #[must_use]
    pub fn new(render_width: u32, render_height: u32, orientation: Orientation) -> Self {
        // Undo the render-size swap to recover the source pixel size.
        let (sw, sh) = orientation.render_size(render_width, render_height);
        let (sw, sh) = (f64::from(sw), f64::from(sh));

        let scale_and_flip = AffineTransform::new(sw, 0.0, 0.0, -sh, 0.0, sh);
        let transform = scale_and_flip.then(&orientation.transform(sw, sh));

        Self {
            render_width,
            render_height,
            orientation,
            transform,
        }
    }

    /// Natural size of the decoded track before rotation.
    #[must_use]
    pub fn source_size(&self) -> (u32, u32) {
        self.orientation
            .render_size(self.render_width, self.render_height)
    }

    #[must_use]
    pub fn render_size(&self) -> (u32, u32) {
        (self.render_width, self.render_height)
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// The single composed normalized → render matrix.
    #[must_use]
    pub fn transform(&self) -> AffineTransform {
        self.transform
    }

    /// Map a detector box into render pixels. Out-of-range input is not clamped.
    #[must_use]
    pub fn to_render_rect(&self, rect: &NormalizedRect) -> PixelRect {
        PixelRect::new(rect.x, rect.y, rect.width, rect.height).applying(&self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rect(actual: PixelRect, expected: (f64, f64, f64, f64)) {
        let (x, y, w, h) = expected;
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(
            close(actual.x, x) && close(actual.y, y) && close(actual.width, w) && close(actual.height, h),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_upright_unit_box_covers_frame() {
        let t = CoordinateTransformer::new(1920, 1080, Orientation::Upright);
        assert_rect(t.to_render_rect(&NormalizedRect::unit()), (0.0, 0.0, 1920.0, 1080.0));
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let t = CoordinateTransformer::new(640, 480, Orientation::Rotated90Ccw);
        let r = NormalizedRect::new(0.12, 0.34, 0.2, 0.1);
        let first = t.to_render_rect(&r);
        for _ in 0..10 {
            assert_eq!(t.to_render_rect(&r), first);
        }
        assert_eq!(CoordinateTransformer::new(640, 480, Orientation::Rotated90Ccw), t);
    }

    #[test]
    fn test_flip_applied_once() {
        // Bottom-left quadrant in detector space is the bottom-left in pixels.
        let t = CoordinateTransformer::new(200, 100, Orientation::Upright);
        let r = t.to_render_rect(&NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        assert_rect(r, (0.0, 50.0, 100.0, 50.0));
    }

    #[test]
    fn test_rotated_cw_moves_bottom_left_to_top_left() {
        // Source 200x100, rendered as 100x200.
        let t = CoordinateTransformer::new(100, 200, Orientation::Rotated90Cw);
        assert_eq!(t.source_size(), (200, 100));
        let r = t.to_render_rect(&NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        assert_rect(r, (0.0, 0.0, 50.0, 100.0));
    }

    #[test]
    fn test_rotated_ccw_moves_bottom_left_to_bottom_right() {
        let t = CoordinateTransformer::new(100, 200, Orientation::Rotated90Ccw);
        let r = t.to_render_rect(&NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        assert_rect(r, (50.0, 100.0, 50.0, 100.0));
    }

    #[test]
    fn test_upside_down_moves_bottom_left_to_top_right() {
        let t = CoordinateTransformer::new(200, 100, Orientation::UpsideDown);
        let r = t.to_render_rect(&NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        assert_rect(r, (100.0, 0.0, 100.0, 50.0));
    }

    #[test]
    fn test_unit_box_fills_render_surface_for_every_orientation() {
        for o in [
            Orientation::Upright,
            Orientation::Rotated90Cw,
            Orientation::Rotated90Ccw,
            Orientation::UpsideDown,
        ] {
            let t = CoordinateTransformer::new(300, 500, o);
            assert_rect(t.to_render_rect(&NormalizedRect::unit()), (0.0, 0.0, 300.0, 500.0));
        }
    }

    #[test]
    fn test_out_of_range_input_is_not_clamped() {
        let t = CoordinateTransformer::new(100, 100, Orientation::Upright);
        let r = t.to_render_rect(&NormalizedRect::new(-0.5, 0.0, 2.0, 1.0));
        assert_rect(r, (-50.0, 0.0, 200.0, 100.0));
    }

    #[test]
    fn test_orientation_from_degrees() {
        assert_eq!(Orientation::from_rotation_degrees(0), Orientation::Upright);
        assert_eq!(Orientation::from_rotation_degrees(90), Orientation::Rotated90Cw);
        assert_eq!(Orientation::from_rotation_degrees(-90), Orientation::Rotated90Ccw);
        assert_eq!(Orientation::from_rotation_degrees(270), Orientation::Rotated90Ccw);
        assert_eq!(Orientation::from_rotation_degrees(180), Orientation::UpsideDown);
        assert_eq!(Orientation::from_rotation_degrees(-180), Orientation::UpsideDown);
        assert_eq!(Orientation::from_rotation_degrees(89), Orientation::Rotated90Cw);
        assert_eq!(Orientation::from_rotation_degrees(360), Orientation::Upright);
    }

    #[test]
    fn test_render_size_swaps_for_quarter_turns() {
        assert_eq!(Orientation::Rotated90Cw.render_size(1920, 1080), (1080, 1920));
        assert_eq!(Orientation::UpsideDown.render_size(1920, 1080), (1920, 1080));
    }

    #[test]
    fn test_then_composes_in_order() {
        let scale = AffineTransform::scale(2.0, 3.0);
        let shift = AffineTransform::new(1.0, 0.0, 0.0, 1.0, 10.0, 20.0);
        assert_eq!(scale.then(&shift).apply(1.0, 1.0), (12.0, 23.0));
        assert_eq!(shift.then(&scale).apply(1.0, 1.0), (22.0, 63.0));
    }
}
