use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in page space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

pub const DEFAULT_CONTENT_WIDTH: f64 = 800.0;
pub const DEFAULT_CONTENT_HEIGHT: f64 = 600.0;

impl Bounds {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            x,
            y,
            w: w.max(0.0),
            h: h.max(0.0),
        }
    }

    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    pub fn default_viewport() -> Self {
        Self::new(0.0, 0.0, DEFAULT_CONTENT_WIDTH, DEFAULT_CONTENT_HEIGHT)
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.w
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.h
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.max_x().max(other.max_x()),
            self.max_y().max(other.max_y()),
        )
    }

    pub fn union_all<'a>(items: impl IntoIterator<Item = &'a Bounds>) -> Option<Bounds> {
        items
            .into_iter()
            .fold(None, |acc: Option<Bounds>, item| match acc {
                Some(existing) => Some(existing.union(item)),
                None => Some(*item),
            })
    }

    pub fn contains(&self, other: &Bounds) -> bool {
        const EPS: f64 = 1e-9;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.max_x() <= self.max_x() + EPS
            && other.max_y() <= self.max_y() + EPS
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub bounds: Bounds,
    pub scale: f64,
}

/// Below this a target side is flat and does not constrain the scale.
const MIN_TARGET_EXTENT: f64 = 1e-6;

/// Uniformly scales `content_w`×`content_h` into `target`, never above 1×,
/// and centers the result on the target. Flat sides of the target (a lone
/// line, collinear shapes) are ignored; a point target keeps natural size.
pub fn fit_within(content_w: f64, content_h: f64, target: &Bounds) -> Placement {
    let content_w = if content_w > 0.0 {
        content_w
    } else {
        DEFAULT_CONTENT_WIDTH
    };
    let content_h = if content_h > 0.0 {
        content_h
    } else {
        DEFAULT_CONTENT_HEIGHT
    };
    let scale = [(target.w, content_w), (target.h, content_h)]
        .into_iter()
        .filter(|(side, _)| *side > MIN_TARGET_EXTENT)
        .map(|(side, content)| side / content)
        .fold(1.0, f64::min);
    let w = content_w * scale;
    let h = content_h * scale;
    let (cx, cy) = target.center();
    Placement {
        bounds: Bounds::new(cx - w / 2.0, cy - h / 2.0, w, h),
        scale,
    }
}
