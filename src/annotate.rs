use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::classifier::Classification;
use crate::detector::CandidateRegion;
use crate::state::DetectionSnapshot;

// Panel geometry, in pixels from the top-left corner of the frame.
const PANEL_LEFT: u32 = 10;
const PANEL_TOP: u32 = 10;
const PANEL_RIGHT: u32 = 400;
const PANEL_BOTTOM: u32 = 200;
const PANEL_SHADE: f32 = 0.4;
const BAR_LEFT: i32 = 20;
const BAR_TOP: i32 = 40;
const BAR_PITCH: i32 = 30;
const BAR_HEIGHT: u32 = 16;
const BAR_MAX_WIDTH: f64 = 360.0;
const STATUS_TOP: i32 = 165;
const STATUS_HEIGHT: u32 = 10;

pub const GREEN_BAR: Rgb<u8> = Rgb([0, 255, 0]);
pub const YELLOW_BAR: Rgb<u8> = Rgb([255, 255, 0]);
pub const BROWN_BAR: Rgb<u8> = Rgb([139, 100, 0]);
pub const RED_BAR: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceStyle {
    /// Thin yellow outline
    Low,
    /// Thick green outline
    High,
}

impl ConfidenceStyle {
    pub fn for_probability(probability: f32, high_threshold: f32) -> Self {
        if probability < high_threshold {
            ConfidenceStyle::Low
        } else {
            ConfidenceStyle::High
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            ConfidenceStyle::Low => Rgb([255, 255, 0]),
            ConfidenceStyle::High => Rgb([0, 255, 0]),
        }
    }

    pub fn thickness(&self) -> u32 {
        match self {
            ConfidenceStyle::Low => 2,
            ConfidenceStyle::High => 4,
        }
    }
}

/// Draws detection outlines onto the display copy of a frame.
#[derive(Debug, Clone)]
pub struct FrameAnnotator {
    high_confidence_threshold: f32,
}

impl FrameAnnotator {
    pub fn new(high_confidence_threshold: f32) -> Self {
        Self {
            high_confidence_threshold,
        }
    }

    pub fn style_for(&self, classification: &Classification) -> ConfidenceStyle {
        ConfidenceStyle::for_probability(classification.probability, self.high_confidence_threshold)
    }

    pub fn annotate(
        &self,
        canvas: &mut RgbImage,
        region: &CandidateRegion,
        classification: &Classification,
    ) -> ConfidenceStyle {
        let style = self.style_for(classification);
        draw_contour(canvas, &region.contour, style);
        style
    }

    /// Live analysis panel: a darkened box with one bar per colour band, scaled to its
    /// share of the last analysed crop, and a status strip green when healthy, red otherwise.
    pub fn draw_health_panel(&self, canvas: &mut RgbImage, snapshot: &DetectionSnapshot) {
        shade(canvas);

        let profile = &snapshot.profile;
        let bands = [
            (profile.green, GREEN_BAR),
            (profile.yellow, YELLOW_BAR),
            (profile.brown, BROWN_BAR),
            (profile.red, RED_BAR),
        ];
        for (row, (share, color)) in bands.into_iter().enumerate() {
            let width = (share.clamp(0.0, 100.0) / 100.0 * BAR_MAX_WIDTH).round() as u32;
            if width == 0 {
                continue;
            }
            let top = BAR_TOP + row as i32 * BAR_PITCH;
            draw_filled_rect_mut(canvas, Rect::at(BAR_LEFT, top).of_size(width, BAR_HEIGHT), color);
        }

        let status = if snapshot.health.is_healthy() { GREEN_BAR } else { RED_BAR };
        draw_filled_rect_mut(
            canvas,
            Rect::at(BAR_LEFT, STATUS_TOP).of_size(BAR_MAX_WIDTH as u32, STATUS_HEIGHT),
            status,
        );
    }
}

fn shade(canvas: &mut RgbImage) {
    let right = PANEL_RIGHT.min(canvas.width());
    let bottom = PANEL_BOTTOM.min(canvas.height());
    for y in PANEL_TOP..bottom {
        for x in PANEL_LEFT..right {
            let pixel = canvas.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * PANEL_SHADE) as u8;
            }
        }
    }
}

/// Closed outline through `contour`. Thickness is built by stamping discs on every
/// contour point, which border following keeps 8-connected.
pub fn draw_contour(canvas: &mut RgbImage, contour: &[Point<i32>], style: ConfidenceStyle) {
    let color = style.color();
    let radius = (style.thickness() / 2) as i32;

    for (p, q) in contour.iter().zip(contour.iter().cycle().skip(1)) {
        draw_line_segment_mut(canvas, (p.x as f32, p.y as f32), (q.x as f32, q.y as f32), color);
        if radius > 0 {
            draw_filled_circle_mut(canvas, (p.x, p.y), radius, color);
        }
    }
}
