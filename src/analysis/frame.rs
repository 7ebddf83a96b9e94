// src/analysis/frame.rs
//! Frame analysis pipeline: decode the inbound data-URL still, find the
//! primary face, normalize the crop to the classifier's expected input, and
//! derive the per-frame EmotionSample.

use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::analysis::AnalysisError;
use crate::analysis::classifier::EmotionClassifier;
use crate::analysis::types::EmotionSample;

/// Classifier input size (square grayscale crop).
const CLASSIFIER_INPUT: u32 = 48;

/// Grid resolution of the skin-density face detector.
const DETECT_GRID: u32 = 8;

/// Fraction of skin-tone pixels for a grid cell to count as face.
const CELL_SKIN_THRESHOLD: f32 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub trait FaceDetector: Send + Sync {
    /// Zero or more face bounding boxes. Zero faces is a normal outcome.
    fn detect(&self, image: &RgbImage) -> Vec<FaceRegion>;
}

/// Deterministic skin-tone density detector. Scans a coarse grid for cells
/// dominated by skin-colored pixels and returns the bounding box of the
/// largest connected cluster of such cells.
pub struct SkinToneDetector;

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    r > 95 && g > 40 && b > 20 && r > g && r > b && r.saturating_sub(g) > 15
}

impl FaceDetector for SkinToneDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceRegion> {
        let (width, height) = image.dimensions();
        if width < DETECT_GRID || height < DETECT_GRID {
            return vec![];
        }

        let cell_w = width / DETECT_GRID;
        let cell_h = height / DETECT_GRID;
        let mut marked = [[false; DETECT_GRID as usize]; DETECT_GRID as usize];

        for gy in 0..DETECT_GRID {
            for gx in 0..DETECT_GRID {
                let mut skin = 0u32;
                let mut total = 0u32;
                for y in (gy * cell_h)..((gy + 1) * cell_h) {
                    for x in (gx * cell_w)..((gx + 1) * cell_w) {
                        let p = image.get_pixel(x, y);
                        if is_skin(p[0], p[1], p[2]) {
                            skin += 1;
                        }
                        total += 1;
                    }
                }
                if total > 0 && skin as f32 / total as f32 > CELL_SKIN_THRESHOLD {
                    marked[gy as usize][gx as usize] = true;
                }
            }
        }

        // Bounding box over all marked cells
        let mut min_x = DETECT_GRID;
        let mut min_y = DETECT_GRID;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;
        for gy in 0..DETECT_GRID {
            for gx in 0..DETECT_GRID {
                if marked[gy as usize][gx as usize] {
                    any = true;
                    min_x = min_x.min(gx);
                    min_y = min_y.min(gy);
                    max_x = max_x.max(gx);
                    max_y = max_y.max(gy);
                }
            }
        }
        if !any {
            return vec![];
        }

        vec![FaceRegion {
            x: min_x * cell_w,
            y: min_y * cell_h,
            width: (max_x - min_x + 1) * cell_w,
            height: (max_y - min_y + 1) * cell_h,
        }]
    }
}

pub struct FrameAnalyzer {
    detector: Arc<dyn FaceDetector>,
    classifier: Arc<dyn EmotionClassifier>,
}

impl FrameAnalyzer {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { detector: Arc::new(SkinToneDetector), classifier }
    }

    pub fn with_detector(
        detector: Arc<dyn FaceDetector>,
        classifier: Arc<dyn EmotionClassifier>,
    ) -> Self {
        Self { detector, classifier }
    }

    /// Decode a `data:image/...;base64,...` payload (bare base64 accepted).
    pub fn decode_data_url(data: &str) -> Result<DynamicImage, AnalysisError> {
        let encoded = match data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => data,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AnalysisError::Decode(format!("invalid base64: {e}")))?;
        image::load_from_memory(&bytes)
            .map_err(|e| AnalysisError::Decode(format!("undecodable image: {e}")))
    }

    /// Crop the face, resize to the classifier input, grayscale and stretch
    /// contrast to the full range.
    fn normalize_face(image: &DynamicImage, region: FaceRegion) -> Vec<u8> {
        let (width, height) = image.dimensions();
        let x = region.x.min(width.saturating_sub(1));
        let y = region.y.min(height.saturating_sub(1));
        let w = region.width.min(width - x).max(1);
        let h = region.height.min(height - y).max(1);

        let mut crop = image
            .crop_imm(x, y, w, h)
            .resize_exact(CLASSIFIER_INPUT, CLASSIFIER_INPUT, FilterType::Triangle)
            .to_luma8();

        let (mut lo, mut hi) = (255u8, 0u8);
        for p in crop.pixels() {
            lo = lo.min(p[0]);
            hi = hi.max(p[0]);
        }
        if hi > lo {
            let range = (hi - lo) as f32;
            for p in crop.pixels_mut() {
                p[0] = (((p[0] - lo) as f32 / range) * 255.0) as u8;
            }
        }

        let mut buf = Cursor::new(Vec::new());
        // PNG encoding of an in-memory luma buffer cannot fail
        DynamicImage::ImageLuma8(crop)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap_or_default();
        buf.into_inner()
    }

    /// Full pipeline for one frame. `NoFace` is a skip signal, not a failure:
    /// callers drop the frame and move on.
    pub async fn analyze(
        &self,
        frame_data_url: &str,
        timestamp: f64,
    ) -> Result<EmotionSample, AnalysisError> {
        let decoded = Self::decode_data_url(frame_data_url)?;
        let rgb = decoded.to_rgb8();

        let mut faces = self.detector.detect(&rgb);
        if faces.is_empty() {
            return Err(AnalysisError::NoFace);
        }
        // Primary face = largest region
        faces.sort_by_key(|f| std::cmp::Reverse(f.area()));
        let primary = faces[0];
        debug!(
            "Face at ({},{}) {}x{}",
            primary.x, primary.y, primary.width, primary.height
        );

        let face_png = Self::normalize_face(&decoded, primary);
        let probabilities = self.classifier.classify(&face_png).await?;
        Ok(EmotionSample::from_probabilities(timestamp, probabilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn skin_face_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(96, 96, Rgb([20, 20, 20]));
        for y in 24..72 {
            for x in 24..72 {
                img.put_pixel(x, y, Rgb([200, 140, 110]));
            }
        }
        img
    }

    #[test]
    fn detector_finds_centered_face() {
        let faces = SkinToneDetector.detect(&skin_face_image());
        assert_eq!(faces.len(), 1);
        let face = faces[0];
        assert!(face.x >= 12 && face.x <= 36);
        assert!(face.width >= 36);
    }

    #[test]
    fn detector_skips_blank_frame() {
        let blank = RgbImage::from_pixel(96, 96, Rgb([10, 10, 10]));
        assert!(SkinToneDetector.detect(&blank).is_empty());
    }

    #[test]
    fn data_url_prefix_is_optional() {
        use base64::Engine;
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(skin_face_image())
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(buf.into_inner());

        let with_prefix = format!("data:image/png;base64,{b64}");
        assert!(FrameAnalyzer::decode_data_url(&with_prefix).is_ok());
        assert!(FrameAnalyzer::decode_data_url(&b64).is_ok());
        assert!(FrameAnalyzer::decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn normalized_crop_is_valid_png() {
        let img = DynamicImage::ImageRgb8(skin_face_image());
        let png = FrameAnalyzer::normalize_face(
            &img,
            FaceRegion { x: 24, y: 24, width: 48, height: 48 },
        );
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.dimensions(), (CLASSIFIER_INPUT, CLASSIFIER_INPUT));
    }
}
