//! Page viewport math
//!
//! A viewport maps the page's intrinsic coordinate frame (PDF user space,
//! Y axis pointing up) onto CSS pixels (Y axis pointing down) at a given
//! scale and rotation. Backing-store sizes additionally account for the
//! device pixel ratio.

use serde::Serialize;

/// Page box in PDF user space: `[x0, y0, x1, y1]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl ViewBox {
    #[must_use]
    pub const fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// A box anchored at the origin, the common case for most pages
    #[must_use]
    pub const fn sized(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Axis-aligned rectangle in CSS pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CssRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Page coordinate frame scaled to a target size
#[derive(Clone, Debug, PartialEq)]
pub struct Viewport {
    pub view_box: ViewBox,
    pub scale: f64,
    /// Rotation in degrees, normalized to 0, 90, 180 or 270
    pub rotation: u16,
    /// CSS width at `scale`
    pub width: f64,
    /// CSS height at `scale`
    pub height: f64,
    /// Affine page-to-viewport transform `[a, b, c, d, e, f]`
    pub transform: [f64; 6],
    /// Whether the Y axis is flipped from page space to screen space
    pub flipped: bool,
}

impl Viewport {
    /// Build the default (Y-flipped) viewport for a page box
    #[must_use]
    pub fn new(view_box: ViewBox, scale: f64, rotation: i32) -> Self {
        Self::build(view_box, scale, rotation, false)
    }

    fn build(view_box: ViewBox, scale: f64, rotation: i32, dont_flip: bool) -> Self {
        let center_x = (view_box.x1 + view_box.x0) / 2.0;
        let center_y = (view_box.y1 + view_box.y0) / 2.0;

        let rotation = normalize_rotation(rotation);
        let (a, b, mut c, mut d) = match rotation {
            90 => (0.0, 1.0, 1.0, 0.0),
            180 => (-1.0, 0.0, 0.0, 1.0),
            270 => (0.0, -1.0, -1.0, 0.0),
            _ => (1.0, 0.0, 0.0, -1.0),
        };
        if dont_flip {
            c = -c;
            d = -d;
        }

        let (offset_x, offset_y, width, height) = if a == 0.0 {
            (
                (center_y - view_box.y0).abs() * scale,
                (center_x - view_box.x0).abs() * scale,
                view_box.height() * scale,
                view_box.width() * scale,
            )
        } else {
            (
                (center_x - view_box.x0).abs() * scale,
                (center_y - view_box.y0).abs() * scale,
                view_box.width() * scale,
                view_box.height() * scale,
            )
        };

        let transform = [
            a * scale,
            b * scale,
            c * scale,
            d * scale,
            offset_x - a * scale * center_x - c * scale * center_y,
            offset_y - b * scale * center_x - d * scale * center_y,
        ];

        Self {
            view_box,
            scale,
            rotation,
            width,
            height,
            transform,
            flipped: !dont_flip,
        }
    }

    /// Same frame and scale with the vertical flip disabled.
    ///
    /// Annotation geometry is positioned with this clone: annotation
    /// rectangles are already expressed top-down by the engine.
    #[must_use]
    pub fn clone_unflipped(&self) -> Self {
        Self::build(self.view_box, self.scale, i32::from(self.rotation), true)
    }

    /// Map a page-space point to viewport (CSS pixel) coordinates
    #[must_use]
    pub fn to_viewport_point(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.transform;
        (x * m[0] + y * m[2] + m[4], x * m[1] + y * m[3] + m[5])
    }

    /// Map a page-space rectangle to a normalized CSS rectangle
    #[must_use]
    pub fn to_viewport_rect(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> CssRect {
        let (ax, ay) = self.to_viewport_point(x0, y0);
        let (bx, by) = self.to_viewport_point(x1, y1);
        CssRect {
            left: ax.min(bx),
            top: ay.min(by),
            width: (ax - bx).abs(),
            height: (ay - by).abs(),
        }
    }
}

fn normalize_rotation(rotation: i32) -> u16 {
    match rotation.rem_euclid(360) {
        r @ (90 | 180 | 270) => r as u16,
        _ => 0,
    }
}

/// Scale that fits a page of `intrinsic_width` into the first usable width.
///
/// Candidates are tried in order: container width, canvas rendered width,
/// then the intrinsic width itself. A candidate is usable when it is finite
/// and positive. The result is always finite and positive.
#[must_use]
pub fn fit_scale(container_width: f64, canvas_width: f64, intrinsic_width: f64) -> f64 {
    if !intrinsic_width.is_finite() || intrinsic_width <= 0.0 {
        return 1.0;
    }

    let desired = [container_width, canvas_width]
        .into_iter()
        .find(|w| w.is_finite() && *w > 0.0)
        .unwrap_or(intrinsic_width);

    let scale = desired / intrinsic_width;
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Device-scaled backing store size for a viewport, at least 1x1
#[must_use]
pub fn backing_size(viewport: &Viewport, device_pixel_ratio: f64) -> (u32, u32) {
    let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };
    let to_px = |v: f64| (v * ratio).floor().clamp(1.0, f64::from(u32::MAX)) as u32;
    (to_px(viewport.width), to_px(viewport.height))
}
