//! Context-aware cropping around the winning detection.
//!
//! Padding is tiered by how much of the frame the box covers: small boxes get
//! a lot of surrounding context, large boxes little. The region is always
//! inside the frame and never smaller than `min(min_crop_size, frame side)`.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::{CropSettings, PaddingTier};
use crate::error::EngineError;
use crate::{BBox, FrameDims};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains_within(&self, frame: FrameDims) -> bool {
        self.right() <= frame.width && self.bottom() <= frame.height
    }
}

#[derive(Clone, Debug)]
pub struct ContextCropper {
    tiers: Vec<PaddingTier>,
    base_padding: f64,
    min_crop_size: u32,
}

impl ContextCropper {
    pub fn new(settings: &CropSettings) -> Self {
        let mut tiers = settings.tiers.clone();
        tiers.sort_by(|a, b| a.max_area_ratio.total_cmp(&b.max_area_ratio));
        Self {
            tiers,
            base_padding: settings.base_padding,
            min_crop_size: settings.min_crop_size,
        }
    }

    pub fn padding_factor(&self, area_ratio: f64) -> f64 {
        self.tiers
            .iter()
            .find(|tier| area_ratio < tier.max_area_ratio)
            .map(|tier| tier.factor)
            .unwrap_or(self.base_padding)
            .max(self.base_padding)
    }

    /// Padded, clamped, minimum-size region around `bbox`.
    ///
    /// Fails with `CROP_EXTRACTION_ERROR` when the box is degenerate or lies
    /// entirely outside the frame.
    pub fn crop_region(&self, bbox: &BBox, frame: FrameDims) -> Result<CropRect> {
        if frame.is_empty() {
            return Err(EngineError::crop_extraction("frame has zero area").into());
        }
        if !bbox.is_finite() || bbox.area() <= 0.0 {
            return Err(EngineError::crop_extraction(format!(
                "degenerate bbox {:?}",
                bbox
            ))
            .into());
        }
        let fw = frame.width as f64;
        let fh = frame.height as f64;
        let visible = BBox::new(
            bbox.x1.clamp(0.0, fw),
            bbox.y1.clamp(0.0, fh),
            bbox.x2.clamp(0.0, fw),
            bbox.y2.clamp(0.0, fh),
        );
        if visible.area() <= 0.0 {
            return Err(EngineError::crop_extraction(format!(
                "bbox {:?} lies outside the {}x{} frame",
                bbox, frame.width, frame.height
            ))
            .into());
        }

        let factor = self.padding_factor(bbox.area() / frame.area());
        let pad_x = bbox.width() * factor;
        let pad_y = bbox.height() * factor;
        let (cx, cy) = visible.center();

        let (x, width) = fit_axis(bbox.x1 - pad_x, bbox.x2 + pad_x, cx, frame.width, self.min_crop_size);
        let (y, height) = fit_axis(bbox.y1 - pad_y, bbox.y2 + pad_y, cy, frame.height, self.min_crop_size);
        Ok(CropRect {
            x,
            y,
            width,
            height,
        })
    }

    /// Minimum-size region centered in the frame.
    pub fn center_crop(&self, frame: FrameDims) -> CropRect {
        let width = self.min_crop_size.min(frame.width);
        let height = self.min_crop_size.min(frame.height);
        CropRect {
            x: (frame.width - width) / 2,
            y: (frame.height - height) / 2,
            width,
            height,
        }
    }

    /// `crop_region`, falling back to `center_crop` on failure.
    /// The flag is true when the fallback was used.
    pub fn crop_region_or_center(&self, bbox: &BBox, frame: FrameDims) -> (CropRect, bool) {
        match self.crop_region(bbox, frame) {
            Ok(rect) => (rect, false),
            Err(err) => {
                log::warn!("{}; using center crop", err);
                (self.center_crop(frame), true)
            }
        }
    }

    pub fn extract(&self, frame: &RgbImage, rect: CropRect) -> RgbImage {
        let (fw, fh) = frame.dimensions();
        let x = rect.x.min(fw);
        let y = rect.y.min(fh);
        let width = rect.width.min(fw - x);
        let height = rect.height.min(fh - y);
        image::imageops::crop_imm(frame, x, y, width, height).to_image()
    }
}

/// Clamp `[lo, hi]` to `[0, limit]`, then grow it around `center` up to
/// `min(min_size, limit)` while staying inside the frame.
fn fit_axis(lo: f64, hi: f64, center: f64, limit: u32, min_size: u32) -> (u32, u32) {
    let limit_f = limit as f64;
    let min_len = min_size.min(limit);

    let mut start = lo.clamp(0.0, limit_f).floor();
    let mut end = hi.clamp(0.0, limit_f).ceil();
    if end - start < min_len as f64 {
        let half = min_len as f64 / 2.0;
        start = (center - half).round().clamp(0.0, (limit - min_len) as f64);
        end = start + min_len as f64;
    }
    let start_px = start as u32;
    let len = (end as u32).saturating_sub(start_px).max(min_len);
    let start_px = start_px.min(limit - len);
    (start_px, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    const FRAME: FrameDims = FrameDims {
        width: 640,
        height: 480,
    };

    fn cropper() -> ContextCropper {
        ContextCropper::new(&CropSettings::default())
    }

    fn assert_valid(rect: CropRect, frame: FrameDims, min: u32) {
        assert!(rect.contains_within(frame), "{rect:?} escapes {frame:?}");
        assert!(rect.width >= min.min(frame.width), "{rect:?} too narrow");
        assert!(rect.height >= min.min(frame.height), "{rect:?} too short");
    }

    #[test]
    fn padding_tiers_shrink_with_area() {
        let cropper = cropper();
        assert_eq!(cropper.padding_factor(0.001), 3.0);
        assert_eq!(cropper.padding_factor(0.02), 2.5);
        assert_eq!(cropper.padding_factor(0.1), 2.0);
        assert_eq!(cropper.padding_factor(0.5), 1.5);
    }

    #[test]
    fn small_object_gets_wide_context() {
        let cropper = cropper();
        // 20x20 box: ratio 0.0013 → factor 3.0 → 60px each side → 140x140, below minimum.
        let rect = cropper
            .crop_region(&BBox::new(300.0, 200.0, 320.0, 220.0), FRAME)
            .unwrap();
        assert_eq!(rect.width, 200);
        assert_eq!(rect.height, 200);
        assert_eq!((rect.x, rect.y), (210, 110));
        assert_valid(rect, FRAME, 200);
    }

    #[test]
    fn medium_object_padded_and_clamped() {
        let cropper = cropper();
        // 100x80 box: ratio 0.026 → factor 2.5 → pads 250 / 200.
        let rect = cropper
            .crop_region(&BBox::new(270.0, 200.0, 370.0, 280.0), FRAME)
            .unwrap();
        assert_eq!((rect.x, rect.width), (20, 600));
        assert_eq!((rect.y, rect.height), (0, 480));
        assert_valid(rect, FRAME, 200);
    }

    #[test]
    fn box_in_corner_stays_inside_frame() {
        let cropper = cropper();
        let rect = cropper
            .crop_region(&BBox::new(625.0, 465.0, 640.0, 480.0), FRAME)
            .unwrap();
        assert_eq!(rect.right(), 640);
        assert_eq!(rect.bottom(), 480);
        assert_valid(rect, FRAME, 200);
    }

    #[test]
    fn frame_smaller_than_minimum_uses_full_extent() {
        let cropper = cropper();
        let small = FrameDims::new(160, 120);
        let rect = cropper
            .crop_region(&BBox::new(70.0, 50.0, 90.0, 70.0), small)
            .unwrap();
        assert_eq!(rect, CropRect { x: 0, y: 0, width: 160, height: 120 });
    }

    #[test]
    fn containment_and_minimum_hold_across_positions() {
        let cropper = cropper();
        for x in (0..640).step_by(37) {
            for y in (0..480).step_by(41) {
                for size in [11.0, 48.0, 150.0, 400.0] {
                    let bbox = BBox::new(x as f64, y as f64, x as f64 + size, y as f64 + size);
                    let (rect, _) = cropper.crop_region_or_center(&bbox, FRAME);
                    assert_valid(rect, FRAME, 200);
                }
            }
        }
    }

    #[test]
    fn degenerate_or_outside_box_is_crop_error() {
        let cropper = cropper();
        let err = cropper
            .crop_region(&BBox::new(10.0, 10.0, 10.0, 40.0), FRAME)
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::CropExtraction));

        let outside = BBox::new(700.0, 500.0, 760.0, 560.0);
        assert!(cropper.crop_region(&outside, FRAME).is_err());
        let (rect, fallback) = cropper.crop_region_or_center(&outside, FRAME);
        assert!(fallback);
        assert_eq!(rect, CropRect { x: 220, y: 140, width: 200, height: 200 });
    }

    #[test]
    fn extract_returns_region_pixels() {
        let cropper = cropper();
        let mut frame = RgbImage::new(640, 480);
        frame.put_pixel(300, 200, image::Rgb([255, 0, 0]));
        let rect = CropRect {
            x: 250,
            y: 150,
            width: 200,
            height: 200,
        };
        let crop = cropper.extract(&frame, rect);
        assert_eq!(crop.dimensions(), (200, 200));
        assert_eq!(crop.get_pixel(50, 50), &image::Rgb([255, 0, 0]));
    }
}
