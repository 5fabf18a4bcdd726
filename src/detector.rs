//! Leaf candidate detection: colour mask, morphology, contour extraction and an ordered
//! chain of geometric and colour filters.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use imageproc::point::Point;
use std::cell::OnceCell;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::frame::{BoundingBox, Frame, HsvImage, HsvMean};

/// A contour-bounded crop that passed every filter stage.
#[derive(Debug, Clone)]
pub struct CandidateRegion {
    pub contour: Vec<Point<i32>>,
    pub metrics: RegionMetrics,
    pub mean_color: HsvMean,
    pub crop: RgbImage,
}

impl CandidateRegion {
    pub fn bbox(&self) -> BoundingBox {
        self.metrics.bbox
    }

    pub fn area(&self) -> f64 {
        self.metrics.area
    }

    pub fn perimeter(&self) -> f64 {
        self.metrics.perimeter
    }

    pub fn circularity(&self) -> f64 {
        self.metrics.circularity().unwrap_or(0.0)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.metrics.aspect_ratio().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionMetrics {
    pub area: f64,
    pub perimeter: f64,
    pub bbox: BoundingBox,
}

impl RegionMetrics {
    pub fn from_contour(points: &[Point<i32>]) -> Option<Self> {
        let bbox = BoundingBox::enclosing(points.iter().map(|p| (p.x, p.y)))?;
        Some(Self {
            area: polygon_area(points),
            perimeter: closed_length(points),
            bbox,
        })
    }

    /// `4π·area/perimeter²`; `None` for a zero perimeter.
    pub fn circularity(&self) -> Option<f64> {
        if self.perimeter <= 0.0 {
            return None;
        }
        Some(4.0 * std::f64::consts::PI * self.area / (self.perimeter * self.perimeter))
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        self.bbox.aspect_ratio()
    }
}

/// A contour under evaluation. The mean colour of its bounding box is only computed when
/// the colour stage asks for it.
pub struct RegionView<'a> {
    pub metrics: RegionMetrics,
    hsv: &'a HsvImage,
    mean: OnceCell<Option<HsvMean>>,
}

impl<'a> RegionView<'a> {
    pub fn new(metrics: RegionMetrics, hsv: &'a HsvImage) -> Self {
        Self {
            metrics,
            hsv,
            mean: OnceCell::new(),
        }
    }

    pub fn mean_color(&self) -> Option<HsvMean> {
        *self.mean.get_or_init(|| self.hsv.mean_in(&self.metrics.bbox))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    Area,
    Circularity,
    AspectRatio,
    MeanColor,
}

impl FilterStage {
    /// Evaluation order. A contour is rejected by the first stage it fails.
    pub const ORDER: [FilterStage; 4] = [
        FilterStage::Area,
        FilterStage::Circularity,
        FilterStage::AspectRatio,
        FilterStage::MeanColor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterStage::Area => "area",
            FilterStage::Circularity => "circularity",
            FilterStage::AspectRatio => "aspect_ratio",
            FilterStage::MeanColor => "mean_color",
        }
    }

    pub fn passes(&self, view: &RegionView<'_>, config: &DetectorConfig) -> bool {
        match self {
            FilterStage::Area => config.area_ok(view.metrics.area),
            FilterStage::Circularity => view
                .metrics
                .circularity()
                .is_some_and(|c| config.circularity_ok(c)),
            FilterStage::AspectRatio => view
                .metrics
                .aspect_ratio()
                .is_some_and(|r| config.aspect_ratio_ok(r)),
            FilterStage::MeanColor => view
                .mean_color()
                .is_some_and(|mean| config.mean_color_ok(&mean)),
        }
    }

    /// Runs the stages in order and returns the one that rejected the view, if any.
    pub fn first_rejection(view: &RegionView<'_>, config: &DetectorConfig) -> Option<FilterStage> {
        Self::ORDER
            .into_iter()
            .find(|stage| !stage.passes(view, config))
    }
}

pub struct RegionDetector {
    config: DetectorConfig,
}

impl RegionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Binary leaf mask: HSV range selection, opening then closing with a square element,
    /// then a Gaussian blur to soften the edges.
    pub fn leaf_mask(&self, hsv: &HsvImage) -> GrayImage {
        let mut mask = hsv.in_range(self.config.mask_lower, self.config.mask_upper);

        let radius = self.config.kernel_radius();
        if radius > 0 {
            mask = open(&mask, Norm::LInf, radius);
            mask = close(&mask, Norm::LInf, radius);
        }

        gaussian_blur_f32(&mask, self.config.blur_sigma)
    }

    /// Candidate regions of `frame` in contour discovery order. Filtering and cropping
    /// happen as the iterator is consumed.
    pub fn detect<'a>(&'a self, frame: &'a Frame) -> impl Iterator<Item = CandidateRegion> + 'a {
        let hsv = HsvImage::from_rgb(&frame.image);
        let mask = self.leaf_mask(&hsv);
        let contours = find_contours::<i32>(&mask);
        debug!("Frame {}: {} contours in leaf mask", frame.sequence, contours.len());

        contours
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(move |c| self.evaluate(c.points, &hsv, frame))
    }

    fn evaluate(&self, points: Vec<Point<i32>>, hsv: &HsvImage, frame: &Frame) -> Option<CandidateRegion> {
        let metrics = RegionMetrics::from_contour(&points)?;
        let view = RegionView::new(metrics, hsv);

        if let Some(stage) = FilterStage::first_rejection(&view, &self.config) {
            debug!(
                "Rejected contour at {:?} by {} (area {:.0}, perimeter {:.1})",
                metrics.bbox,
                stage.name(),
                metrics.area,
                metrics.perimeter
            );
            return None;
        }

        let mean_color = view.mean_color()?;
        let crop = frame.crop(&metrics.bbox);
        Some(CandidateRegion {
            contour: points,
            metrics,
            mean_color,
            crop,
        })
    }
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    (twice as f64 / 2.0).abs()
}

pub fn closed_length(points: &[Point<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| ((p.x - q.x) as f64).hypot((p.y - q.y) as f64))
        .sum()
}
