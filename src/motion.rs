use crate::config::MotionConfig;
use image::{GrayImage, Luma, RgbImage};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::dilate,
    region_labelling::{connected_components, Connectivity},
};
use std::time::Instant;
use tracing::{debug, trace};

/// Cheap frame-differencing motion detector
///
/// Holds the previous analyzed frame as its reference and a cooldown window
/// that suppresses repeat reports. The reference is replaced on every call,
/// including during cooldown, so motion is always measured against the
/// immediately preceding analyzed frame rather than a stale one.
pub struct MotionDetector {
    config: MotionConfig,
    reference: Option<GrayImage>,
    cooldown_until: Option<Instant>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            reference: None,
            cooldown_until: None,
        }
    }

    /// Convert a color frame into the blurred grayscale form the detector consumes
    pub fn prepare(&self, image: &RgbImage) -> GrayImage {
        let gray = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();
        gaussian_blur_f32(&gray, self.config.blur_sigma)
    }

    /// Analyze one prepared frame; returns the triggering region area on motion
    ///
    /// `now` is injected so the cooldown window is testable without sleeping.
    pub fn detect(&mut self, current: GrayImage, now: Instant) -> Option<u32> {
        let reference = match self.reference.take() {
            Some(reference) => reference,
            None => {
                trace!("Motion detector cold start, storing reference frame");
                self.reference = Some(current);
                return None;
            }
        };

        if self.in_cooldown(now) {
            trace!("Motion cooldown active, refreshing reference only");
            self.reference = Some(current);
            return None;
        }

        let area = self.largest_changed_area(&reference, &current);
        self.reference = Some(current);

        if area > self.config.min_area {
            debug!("Motion detected: area = {} pixels", area);
            self.cooldown_until = Some(now + self.config.cooldown());
            Some(area)
        } else {
            None
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }

    /// Area of the largest connected foreground region in the frame delta
    fn largest_changed_area(&self, reference: &GrayImage, current: &GrayImage) -> u32 {
        if reference.dimensions() != current.dimensions() {
            // Resolution changed mid-stream; nothing meaningful to diff
            debug!(
                "Frame dimensions changed from {:?} to {:?}, skipping diff",
                reference.dimensions(),
                current.dimensions()
            );
            return 0;
        }

        let (width, height) = reference.dimensions();
        let mut delta = GrayImage::new(width, height);
        for (x, y, ref_pixel) in reference.enumerate_pixels() {
            let curr_pixel = current.get_pixel(x, y);
            let diff = (ref_pixel[0] as i16 - curr_pixel[0] as i16).unsigned_abs() as u8;
            delta.put_pixel(x, y, Luma([diff]));
        }

        let mask = threshold(&delta, self.config.delta_threshold);
        let merged = dilate(&mask, Norm::LInf, 2);
        let components = connected_components(&merged, Connectivity::Eight, Luma([0u8]));

        let mut areas = std::collections::HashMap::new();
        for pixel in components.pixels() {
            if pixel[0] > 0 {
                *areas.entry(pixel[0]).or_insert(0u32) += 1;
            }
        }
        areas.values().max().copied().unwrap_or(0)
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }
}
