use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use indexmap::IndexMap;

use super::{AssetId, CanvasChange, CanvasListener, CanvasProvider, ShapeId};
use crate::geometry::Bounds;
use crate::media::EncodedImage;

const EXPORT_PADDING: f64 = 16.0;
const MAX_RASTER_EDGE: u32 = 4096;
const INK: Rgba<u8> = Rgba([20, 20, 20, 255]);
const IMAGE_FILL: Rgba<u8> = Rgba([200, 200, 200, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    Line,
    Text(String),
    Image(AssetId),
}

impl ShapeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rectangle => "rect",
            Self::Ellipse => "ellipse",
            Self::Line => "line",
            Self::Text(_) => "text",
            Self::Image(_) => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    pub kind: ShapeKind,
    pub bounds: Bounds,
}

#[derive(Debug, Clone)]
struct Asset {
    image: EncodedImage,
    width: f64,
    height: f64,
}

/// In-process canvas used by the CLI session and by tests.
#[derive(Default)]
pub struct MemoryCanvas {
    shapes: IndexMap<ShapeId, Shape>,
    selection: Vec<ShapeId>,
    assets: IndexMap<AssetId, Asset>,
    listeners: Vec<CanvasListener>,
    next_shape: u64,
    next_asset: u64,
}

impl MemoryCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shape(&mut self, kind: ShapeKind, bounds: Bounds) -> ShapeId {
        self.next_shape += 1;
        let id = ShapeId(format!("shape:{}", self.next_shape));
        self.shapes.insert(
            id.clone(),
            Shape {
                id: id.clone(),
                kind,
                bounds,
            },
        );
        self.notify(CanvasChange::ShapeAdded(id.clone()));
        id
    }

    pub fn move_shape(&mut self, id: &ShapeId, bounds: Bounds) -> Result<()> {
        let Some(shape) = self.shapes.get_mut(id) else {
            bail!("unknown shape {id}");
        };
        shape.bounds = bounds;
        self.notify(CanvasChange::ShapeUpdated(id.clone()));
        Ok(())
    }

    pub fn select(&mut self, ids: &[ShapeId]) {
        self.selection = ids
            .iter()
            .filter(|id| self.shapes.contains_key(*id))
            .cloned()
            .collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    pub fn shape(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn asset_image(&self, id: &AssetId) -> Option<&EncodedImage> {
        self.assets.get(id).map(|asset| &asset.image)
    }

    pub fn asset_size(&self, id: &AssetId) -> Option<(f64, f64)> {
        self.assets.get(id).map(|asset| (asset.width, asset.height))
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    fn notify(&mut self, change: CanvasChange) {
        for listener in self.listeners.iter_mut() {
            listener(&change);
        }
    }
}

impl CanvasProvider for MemoryCanvas {
    fn shape_ids(&self) -> Vec<ShapeId> {
        self.shapes.keys().cloned().collect()
    }

    fn selected_shape_ids(&self) -> Vec<ShapeId> {
        self.selection.clone()
    }

    fn bounds_of(&self, ids: &[ShapeId]) -> Option<Bounds> {
        Bounds::union_all(
            ids.iter()
                .filter_map(|id| self.shapes.get(id))
                .map(|shape| &shape.bounds),
        )
    }

    fn rasterize(&self, ids: &[ShapeId], scale: f64) -> Result<Option<EncodedImage>> {
        let shapes: Vec<&Shape> = ids.iter().filter_map(|id| self.shapes.get(id)).collect();
        let Some(region) = Bounds::union_all(shapes.iter().map(|shape| &shape.bounds)) else {
            return Ok(None);
        };
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let origin_x = region.x - EXPORT_PADDING;
        let origin_y = region.y - EXPORT_PADDING;
        let width = raster_edge((region.w + EXPORT_PADDING * 2.0) * scale);
        let height = raster_edge((region.h + EXPORT_PADDING * 2.0) * scale);

        let mut raster = RgbaImage::from_pixel(width, height, PAPER);
        let to_px = |value: f64, origin: f64| ((value - origin) * scale).round() as i64;
        for shape in shapes {
            let x0 = to_px(shape.bounds.x, origin_x);
            let y0 = to_px(shape.bounds.y, origin_y);
            let x1 = to_px(shape.bounds.max_x(), origin_x);
            let y1 = to_px(shape.bounds.max_y(), origin_y);
            match &shape.kind {
                ShapeKind::Rectangle => stroke_rect(&mut raster, x0, y0, x1, y1),
                ShapeKind::Ellipse => stroke_ellipse(&mut raster, x0, y0, x1, y1),
                ShapeKind::Line => draw_line(&mut raster, x0, y0, x1, y1),
                ShapeKind::Text(_) => {
                    let baseline = y1.max(y0 + 1);
                    draw_line(&mut raster, x0, baseline, x1, baseline);
                }
                ShapeKind::Image(_) => fill_rect(&mut raster, x0, y0, x1, y1),
            }
        }

        let mut out = Cursor::new(Vec::new());
        raster
            .write_to(&mut out, ImageFormat::Png)
            .context("failed to encode canvas raster")?;
        Ok(Some(EncodedImage::png(&out.into_inner())))
    }

    fn delete_shapes(&mut self, ids: &[ShapeId]) -> Result<()> {
        for id in ids {
            self.shapes.shift_remove(id);
        }
        self.selection.retain(|id| !ids.contains(id));
        Ok(())
    }

    fn create_asset(&mut self, image: &EncodedImage, width: f64, height: f64) -> Result<AssetId> {
        if image.is_empty() {
            bail!("cannot create an asset from an empty image");
        }
        self.next_asset += 1;
        let id = AssetId(format!("asset:{}", self.next_asset));
        self.assets.insert(
            id.clone(),
            Asset {
                image: image.clone(),
                width,
                height,
            },
        );
        Ok(id)
    }

    fn place_image(&mut self, asset: &AssetId, bounds: Bounds) -> Result<ShapeId> {
        if !self.assets.contains_key(asset) {
            bail!("unknown asset {asset}");
        }
        Ok(self.add_shape(ShapeKind::Image(asset.clone()), bounds))
    }

    fn subscribe(&mut self, listener: CanvasListener) {
        self.listeners.push(listener);
    }
}

fn raster_edge(value: f64) -> u32 {
    (value.ceil().max(1.0) as u32).min(MAX_RASTER_EDGE)
}

fn put(raster: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < raster.width() && y < raster.height() {
        raster.put_pixel(x, y, color);
    }
}

fn draw_line(raster: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        put(raster, x, y, INK);
        if x == x1 && y == y1 {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x += sx;
        }
        if doubled <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn stroke_rect(raster: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    draw_line(raster, x0, y0, x1, y0);
    draw_line(raster, x1, y0, x1, y1);
    draw_line(raster, x1, y1, x0, y1);
    draw_line(raster, x0, y1, x0, y0);
}

fn fill_rect(raster: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    let max_x = i64::from(raster.width()) - 1;
    let max_y = i64::from(raster.height()) - 1;
    for y in y0.min(y1).max(0)..=y0.max(y1).min(max_y) {
        for x in x0.min(x1).max(0)..=x0.max(x1).min(max_x) {
            put(raster, x, y, IMAGE_FILL);
        }
    }
}

fn stroke_ellipse(raster: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    let cx = (x0 + x1) as f64 / 2.0;
    let cy = (y0 + y1) as f64 / 2.0;
    let rx = (x1 - x0).abs() as f64 / 2.0;
    let ry = (y1 - y0).abs() as f64 / 2.0;
    let steps = ((rx + ry) * 4.0).max(16.0) as usize;
    let mut prev: Option<(i64, i64)> = None;
    for step in 0..=steps {
        let theta = step as f64 / steps as f64 * std::f64::consts::TAU;
        let point = (
            (cx + rx * theta.cos()).round() as i64,
            (cy + ry * theta.sin()).round() as i64,
        );
        if let Some((px, py)) = prev {
            draw_line(raster, px, py, point.0, point.1);
        }
        prev = Some(point);
    }
}
