//! Overlay rendering for published frames.
//!
//! Shapes are always drawn. Text needs a font; without one the label
//! backgrounds still appear so the layout stays recognizable.

use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::aggregate::RoadSummary;
use crate::detect::VehicleClass;
use crate::roi::{RoiPolygon, ScopedObject};

pub const REGION_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PANEL_COLOR: Rgb<u8> = Rgb([32, 32, 32]);

const OUTLINE_THICKNESS: i32 = 4;
const ANCHOR_RADIUS: i32 = 5;

/// Overlay color for a class.
pub fn class_color(class: VehicleClass) -> Rgb<u8> {
    match class {
        VehicleClass::Car => Rgb([0, 0, 255]),
        VehicleClass::Motorbike => Rgb([255, 0, 0]),
    }
}

/// Text shown next to an in-scope object. Missing speeds render as zero.
pub fn speed_label(speed: Option<u32>) -> String {
    format!("{} km/h", speed.unwrap_or(0))
}

/// Summary block lines, motorbikes first.
pub fn summary_lines(summary: &RoadSummary) -> [String; 2] {
    [
        format!(
            "Motorbike: {}, avg {} km/h",
            summary.count(VehicleClass::Motorbike),
            summary.avg_speed(VehicleClass::Motorbike)
        ),
        format!(
            "Car: {}, avg {} km/h",
            summary.count(VehicleClass::Car),
            summary.avg_speed(VehicleClass::Car)
        ),
    ]
}

#[derive(Clone)]
pub struct Annotator {
    font: Option<Arc<FontVec>>,
    label_scale: PxScale,
    panel_scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            label_scale: PxScale::from(18.0),
            panel_scale: PxScale::from(22.0),
        }
    }
}

impl Annotator {
    /// Annotator without text rendering.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("{} is not a usable TTF/OTF font", path.display()))?;
        Ok(Self::default().with_font(font))
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(Arc::new(font));
        self
    }

    /// Burn the region, in-scope objects, summary block and FPS badge into `image`.
    pub fn draw(
        &self,
        image: &mut RgbImage,
        polygon: &RoiPolygon,
        objects: &[ScopedObject],
        summary: &RoadSummary,
        fps: f32,
    ) {
        self.draw_region(image, polygon);
        for object in objects {
            self.draw_object(image, object);
        }
        self.draw_summary(image, summary);
        self.draw_fps(image, fps);
    }

    fn draw_region(&self, image: &mut RgbImage, polygon: &RoiPolygon) {
        let half = OUTLINE_THICKNESS / 2;
        for ((ax, ay), (bx, by)) in polygon.edges() {
            for offset in -half + 1..=half {
                let o = offset as f32;
                draw_line_segment_mut(
                    image,
                    (ax as f32 + o, ay as f32),
                    (bx as f32 + o, by as f32),
                    REGION_COLOR,
                );
                draw_line_segment_mut(
                    image,
                    (ax as f32, ay as f32 + o),
                    (bx as f32, by as f32 + o),
                    REGION_COLOR,
                );
            }
        }
    }

    fn draw_object(&self, image: &mut RgbImage, object: &ScopedObject) {
        let color = class_color(object.class);
        draw_filled_circle_mut(image, object.anchor, ANCHOR_RADIUS, color);
        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                color,
                object.anchor.0 - 50,
                object.anchor.1 - 15,
                self.label_scale,
                font.as_ref(),
                &speed_label(object.speed),
            );
        }
    }

    fn draw_summary(&self, image: &mut RgbImage, summary: &RoadSummary) {
        let width = image.width().min(330);
        draw_filled_rect_mut(image, Rect::at(0, 0).of_size(width.max(1), 70), PANEL_COLOR);
        if let Some(font) = &self.font {
            for (row, line) in summary_lines(summary).iter().enumerate() {
                draw_text_mut(
                    image,
                    TEXT_COLOR,
                    10,
                    8 + row as i32 * 30,
                    self.panel_scale,
                    font.as_ref(),
                    line,
                );
            }
        }
    }

    fn draw_fps(&self, image: &mut RgbImage, fps: f32) {
        let badge_width = 110u32;
        if image.width() <= badge_width + 10 {
            return;
        }
        let x = (image.width() - badge_width - 10) as i32;
        draw_filled_rect_mut(image, Rect::at(x, 5).of_size(badge_width, 30), PANEL_COLOR);
        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                TEXT_COLOR,
                x + 8,
                10,
                self.label_scale,
                font.as_ref(),
                &format!("FPS: {:.1}", fps),
            );
        }
    }
}
