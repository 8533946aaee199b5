//! Crop window selection and rendering.
//!
//! The window is fixed once for the whole video and validated before any
//! frame is rendered. How it is placed in each frame depends on the
//! [`CropPolicy`]:
//!
//! - `Static`: the same rectangle from every frame
//! - `Translate`: the rectangle moved by the rounded corrective translation
//! - `Warp`: each output pixel sampled through the full corrective transform

use crate::config::{CropConfig, CropPolicy, CropWindow};
use crate::error::{StabError, StabResult};
use crate::progress::ProgressReporter;
use crate::video::Video;
use image::{Rgb, RgbImage};
use std::time::Instant;
use tracing::{debug, info};
use vstab_models::{AffineTransform, CropRect, FrameSize, Stage};

/// Bisection steps when searching for the largest containable window.
const LARGEST_WINDOW_STEPS: usize = 30;

/// Containment slack for solver round-off, in pixels.
const CONTAINMENT_TOLERANCE: f64 = 1e-6;

/// Rendered output frames.
#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub frames: Vec<RgbImage>,
    pub fps: f64,
}

impl RenderedVideo {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Size of the output frames, if any.
    pub fn frame_size(&self) -> Option<FrameSize> {
        self.frames
            .first()
            .map(|f| FrameSize::new(f.width(), f.height()))
    }
}

/// Reject windows that are empty or reach outside the frame.
pub fn validate_window(window: CropRect, frame: FrameSize) -> StabResult<()> {
    let inside = !window.is_empty()
        && window.x.checked_add(window.width).is_some_and(|x2| x2 <= frame.width)
        && window.y.checked_add(window.height).is_some_and(|y2| y2 <= frame.height);
    if inside {
        Ok(())
    } else {
        Err(StabError::InvalidCropWindow { window, frame })
    }
}

/// The window the path optimizer must keep contained.
pub fn resolve_window(window: &CropWindow, frame: FrameSize) -> StabResult<CropRect> {
    let rect = match *window {
        CropWindow::Centered { ratio } => CropRect::centered(frame, ratio),
        CropWindow::Explicit(rect) => rect,
        CropWindow::Largest { min_ratio } => CropRect::centered(frame, min_ratio),
    };
    validate_window(rect, frame)?;
    Ok(rect)
}

/// True if every corner of `window`, mapped by every update, stays inside the frame.
pub fn contained_under(window: CropRect, updates: &[AffineTransform], frame: FrameSize) -> bool {
    if validate_window(window, frame).is_err() {
        return false;
    }
    let max_x = frame.width as f64 - 1.0 + CONTAINMENT_TOLERANCE;
    let max_y = frame.height as f64 - 1.0 + CONTAINMENT_TOLERANCE;
    updates.iter().all(|b| {
        window.corners().iter().all(|c| {
            let p = b.apply(c);
            p.x >= -CONTAINMENT_TOLERANCE && p.x <= max_x && p.y >= -CONTAINMENT_TOLERANCE && p.y <= max_y
        })
    })
}

/// Largest centred window, of at least `min_ratio`, that every update keeps inside the frame.
pub fn largest_containable(frame: FrameSize, updates: &[AffineTransform], min_ratio: f64) -> CropRect {
    let fallback = CropRect::centered(frame, min_ratio);
    if contained_under(CropRect::centered(frame, 1.0), updates, frame) {
        return CropRect::centered(frame, 1.0);
    }
    let mut lo = min_ratio;
    let mut hi = 1.0;
    for _ in 0..LARGEST_WINDOW_STEPS {
        let mid = 0.5 * (lo + hi);
        if contained_under(CropRect::centered(frame, mid), updates, frame) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let best = CropRect::centered(frame, lo);
    if contained_under(best, updates, frame) {
        best
    } else {
        fallback
    }
}

/// Bilinear RGB sample with coordinates clamped to the image.
fn sample_rgb(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);
    Rgb(std::array::from_fn(|ch| {
        let v = (1.0 - fx) * (1.0 - fy) * p00[ch] as f64
            + fx * (1.0 - fy) * p10[ch] as f64
            + (1.0 - fx) * fy * p01[ch] as f64
            + fx * fy * p11[ch] as f64;
        v.round().clamp(0.0, 255.0) as u8
    }))
}

/// Cuts the stabilized window out of every frame.
#[derive(Debug, Clone, Default)]
pub struct CropRenderer {
    config: CropConfig,
}

impl CropRenderer {
    pub fn new(config: CropConfig) -> Self {
        Self { config }
    }

    pub fn policy(&self) -> CropPolicy {
        self.config.policy
    }

    /// The window used for rendering, given the solved updates.
    ///
    /// `Largest` grows the window as far as the updates allow; the other
    /// modes render with the window the path was solved for.
    pub fn final_window(&self, frame: FrameSize, updates: &[AffineTransform]) -> StabResult<CropRect> {
        let solved = resolve_window(&self.config.window, frame)?;
        match self.config.window {
            CropWindow::Largest { min_ratio } => Ok(largest_containable(frame, updates, min_ratio)),
            _ => Ok(solved),
        }
    }

    fn place_translated(window: CropRect, update: &AffineTransform, frame: FrameSize) -> CropRect {
        let (tx, ty) = update.translation_part();
        let max_x = (frame.width - window.width) as f64;
        let max_y = (frame.height - window.height) as f64;
        let x = (window.x as f64 + tx).round().clamp(0.0, max_x) as u32;
        let y = (window.y as f64 + ty).round().clamp(0.0, max_y) as u32;
        CropRect::new(x, y, window.width, window.height)
    }

    fn warp(image: &RgbImage, window: CropRect, update: &AffineTransform) -> RgbImage {
        RgbImage::from_fn(window.width, window.height, |x, y| {
            let p = update.apply(&vstab_models::Point2::new(
                (x + window.x) as f64,
                (y + window.y) as f64,
            ));
            sample_rgb(image, p.x, p.y)
        })
    }

    /// Render one frame.
    pub fn render_frame(&self, image: &RgbImage, window: CropRect, update: &AffineTransform) -> RgbImage {
        let frame = FrameSize::new(image.width(), image.height());
        match self.config.policy {
            CropPolicy::Static => {
                image::imageops::crop_imm(image, window.x, window.y, window.width, window.height).to_image()
            }
            CropPolicy::Translate => {
                let placed = Self::place_translated(window, update, frame);
                image::imageops::crop_imm(image, placed.x, placed.y, placed.width, placed.height).to_image()
            }
            CropPolicy::Warp => Self::warp(image, window, update),
        }
    }

    /// Render every frame of `video` with the fixed `window`.
    ///
    /// The window is validated up front; frames without an update render
    /// with the identity.
    pub fn render(&self, video: &Video, window: CropRect, reporter: &ProgressReporter) -> StabResult<RenderedVideo> {
        let start = Instant::now();
        validate_window(window, video.size())?;

        reporter.stage_started(Stage::CropTransform);
        let total = video.len();
        let mut frames = Vec::with_capacity(total);
        for (index, frame) in video.frames().iter().enumerate() {
            reporter.check_cancelled(Stage::CropTransform)?;
            let update = frame.update().copied().unwrap_or_default();
            frames.push(self.render_frame(frame.image(), window, &update));
            reporter.progress(Stage::CropTransform, index + 1, total);
        }
        reporter.stage_finished(Stage::CropTransform);

        debug!("[CROP] Window {:?} with {:?} policy", window, self.config.policy);
        info!(
            "[CROP] Rendered {} frames at {}x{} in {:.2}s",
            frames.len(),
            window.width,
            window.height,
            start.elapsed().as_secs_f64()
        );
        Ok(RenderedVideo {
            frames,
            fps: video.fps(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 0]))
    }

    #[test]
    fn test_validate_window() {
        let frame = FrameSize::new(64, 48);
        assert!(validate_window(CropRect::new(0, 0, 64, 48), frame).is_ok());
        assert!(matches!(
            validate_window(CropRect::new(10, 0, 60, 48), frame),
            Err(StabError::InvalidCropWindow { .. })
        ));
        assert!(validate_window(CropRect::new(0, 0, 0, 10), frame).is_err());
        assert!(validate_window(CropRect::new(u32::MAX, 0, 2, 2), frame).is_err());
    }

    #[test]
    fn test_resolve_window_modes() {
        let frame = FrameSize::new(64, 48);
        let centered = resolve_window(&CropWindow::Centered { ratio: 0.5 }, frame).unwrap();
        assert_eq!(centered, CropRect::new(16, 12, 32, 24));
        let explicit = resolve_window(&CropWindow::Explicit(CropRect::new(1, 2, 10, 10)), frame).unwrap();
        assert_eq!(explicit, CropRect::new(1, 2, 10, 10));
        assert!(resolve_window(&CropWindow::Explicit(CropRect::new(60, 0, 10, 10)), frame).is_err());
    }

    #[test]
    fn test_largest_containable() {
        let frame = FrameSize::new(100, 100);
        assert_eq!(
            largest_containable(frame, &[AffineTransform::identity()], 0.5),
            CropRect::centered(frame, 1.0)
        );

        // a 10px shift leaves room for roughly 80% of the frame
        let updates = [AffineTransform::identity(), AffineTransform::translation(10.0, 0.0)];
        let window = largest_containable(frame, &updates, 0.5);
        assert!(contained_under(window, &updates, frame));
        assert!(window.width >= 78 && window.width <= 80, "{window:?}");
        assert!(!contained_under(CropRect::centered(frame, 0.9), &updates, frame));
    }

    #[test]
    fn test_policies_keep_window_shape() {
        let image = gradient_frame(40, 30);
        let window = CropRect::new(5, 5, 30, 20);
        let update = AffineTransform::translation(3.0, -2.0);
        for policy in [CropPolicy::Static, CropPolicy::Translate, CropPolicy::Warp] {
            let renderer = CropRenderer::new(CropConfig {
                window: CropWindow::Explicit(window),
                policy,
            });
            let out = renderer.render_frame(&image, window, &update);
            assert_eq!((out.width(), out.height()), (30, 20), "{policy:?}");
        }
    }

    #[test]
    fn test_policy_placement() {
        let image = gradient_frame(40, 30);
        let window = CropRect::new(5, 5, 30, 20);
        let update = AffineTransform::translation(3.0, -2.0);

        let render = |policy| {
            CropRenderer::new(CropConfig {
                window: CropWindow::Explicit(window),
                policy,
            })
            .render_frame(&image, window, &update)
        };

        // static ignores the update
        assert_eq!(render(CropPolicy::Static).get_pixel(0, 0), image.get_pixel(5, 5));
        // translate moves the window by the correction
        assert_eq!(render(CropPolicy::Translate).get_pixel(0, 0), image.get_pixel(8, 3));
        // warp samples through the transform
        assert_eq!(render(CropPolicy::Warp).get_pixel(0, 0), image.get_pixel(8, 3));
        assert_eq!(render(CropPolicy::Warp).get_pixel(4, 6), image.get_pixel(12, 9));
    }

    #[test]
    fn test_translate_clamps_to_frame() {
        let window = CropRect::new(5, 5, 30, 20);
        let placed = CropRenderer::place_translated(
            window,
            &AffineTransform::translation(50.0, -50.0),
            FrameSize::new(40, 30),
        );
        assert_eq!(placed, CropRect::new(10, 0, 30, 20));
    }

    #[test]
    fn test_render_shape_law() {
        let frames: Vec<RgbImage> = (0..4).map(|_| gradient_frame(40, 30)).collect();
        let video = Video::from_frames(frames, 30.0).unwrap();
        let window = CropRect::new(4, 2, 20, 16);
        let renderer = CropRenderer::default();
        let rendered = renderer.render(&video, window, &ProgressReporter::silent()).unwrap();
        assert_eq!(rendered.len(), video.len());
        assert_eq!(rendered.frame_size(), Some(FrameSize::new(20, 16)));
        assert_eq!(rendered.fps, 30.0);

        let err = renderer
            .render(&video, CropRect::new(30, 0, 20, 16), &ProgressReporter::silent())
            .unwrap_err();
        assert!(matches!(err, StabError::InvalidCropWindow { .. }));
    }
}
