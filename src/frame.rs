use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

/// One frame pulled from the source, tagged with its position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self { sequence, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Scales the frame to the canonical resolution. Frames already at that size are
    /// passed through untouched so synthetic inputs keep their exact pixels.
    pub fn into_canonical(self, width: u32, height: u32) -> Self {
        if self.image.dimensions() == (width, height) {
            return self;
        }
        let image = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Self { sequence: self.sequence, image }
    }

    pub fn crop(&self, bbox: &BoundingBox) -> RgbImage {
        imageops::crop_imm(&self.image, bbox.x, bbox.y, bbox.width, bbox.height).to_image()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing every point, inclusive of both extremes.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        let mut iter = points.into_iter();
        let (first_x, first_y) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first_x, first_y, first_x, first_y);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if min_x < 0 || min_y < 0 {
            return None;
        }
        Some(Self {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `width / height`, or `None` for a degenerate box.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(self.width as f64 / self.height as f64)
    }
}

/// A pixel in 8-bit HSV with hue on the half-degree scale `[0, 180]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let diff = max - min;

        let s = if max == 0.0 { 0.0 } else { 255.0 * diff / max };

        let mut h = if diff == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / diff
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / diff
        } else {
            240.0 + 60.0 * (rf - gf) / diff
        };
        if h < 0.0 {
            h += 360.0;
        }

        Self {
            h: (h / 2.0).round().min(180.0) as u8,
            s: s.round() as u8,
            v: max as u8,
        }
    }

    pub fn within(&self, lower: [u8; 3], upper: [u8; 3]) -> bool {
        (lower[0]..=upper[0]).contains(&self.h)
            && (lower[1]..=upper[1]).contains(&self.s)
            && (lower[2]..=upper[2]).contains(&self.v)
    }
}

/// Mean hue, saturation and value over a set of pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvMean {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

#[derive(Debug, Clone)]
pub struct HsvImage {
    width: u32,
    height: u32,
    pixels: Vec<Hsv>,
}

impl HsvImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| Hsv::from_rgb(p[0], p[1], p[2]))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[Hsv] {
        &self.pixels
    }

    /// Binary mask: 255 where the pixel lies inside `[lower, upper]` on every channel.
    pub fn in_range(&self, lower: [u8; 3], upper: [u8; 3]) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let idx = (y * self.width + x) as usize;
            if self.pixels[idx].within(lower, upper) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    pub fn count_in_range(&self, lower: [u8; 3], upper: [u8; 3]) -> usize {
        self.pixels.iter().filter(|p| p.within(lower, upper)).count()
    }

    /// Channel means over the part of `bbox` that lies inside the image.
    pub fn mean_in(&self, bbox: &BoundingBox) -> Option<HsvMean> {
        let x_end = (bbox.x + bbox.width).min(self.width);
        let y_end = (bbox.y + bbox.height).min(self.height);
        let (mut h, mut s, mut v, mut count) = (0u64, 0u64, 0u64, 0u64);

        for y in bbox.y..y_end {
            for x in bbox.x..x_end {
                let p = self.pixels[(y * self.width + x) as usize];
                h += p.h as u64;
                s += p.s as u64;
                v += p.v as u64;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(HsvMean {
            h: h as f64 / n,
            s: s as f64 / n,
            v: v as f64 / n,
        })
    }
}
