//! Capture adapter - write whatever a rendering surface currently shows to disk
//!
//! Surfaces advertise what they can do rather than what they are. A GPU
//! window reads back its pixels, a plotting figure exports itself, and a
//! raw-frame video surface hands over its last frame. [`capture`] asks for
//! each capability in turn and uses the first one present.

use image::{RgbImage, RgbaImage};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{HarnessError, Result};

/// GPU-backed window that can read back its framebuffer
pub trait WindowReadback {
    fn read_pixels(&self) -> Result<RgbaImage>;
}

/// Plotting-library figure that renders itself to an image file
pub trait FigureExport {
    fn save_figure(&mut self, path: &Path) -> Result<()>;
    /// Called after a successful export
    fn close(&mut self) {}
}

/// Raw-frame video surface holding the most recently shown frame
pub trait FrameSource {
    fn last_frame(&self) -> Option<&RgbImage>;
}

/// Anything a program renders into. Implement whichever capability applies.
pub trait Surface {
    fn window(&self) -> Option<&dyn WindowReadback> {
        None
    }

    fn figure(&mut self) -> Option<&mut dyn FigureExport> {
        None
    }

    fn frames(&self) -> Option<&dyn FrameSource> {
        None
    }
}

/// Write the surface's current contents to `destination`.
///
/// No-op when there is no surface. Parent directories are created.
pub fn capture(surface: Option<&mut dyn Surface>, destination: &Path) -> Result<()> {
    let Some(surface) = surface else {
        debug!("No surface to capture for {}", destination.display());
        return Ok(());
    };

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if let Some(window) = surface.window() {
        window.read_pixels()?.save(destination)?;
        return Ok(());
    }

    if let Some(figure) = surface.figure() {
        figure.save_figure(destination)?;
        figure.close();
        return Ok(());
    }

    if let Some(frames) = surface.frames() {
        let frame = frames.last_frame().ok_or_else(|| {
            HarnessError::Failed("raw-frame surface has not shown a frame yet".to_string())
        })?;
        frame.save(destination)?;
        return Ok(());
    }

    Err(HarnessError::Failed(
        "surface exposes no capture capability".to_string(),
    ))
}

/// Software framebuffer shown once per tick
#[derive(Debug, Clone)]
pub struct FrameSurface {
    current: Option<RgbImage>,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Replace the displayed frame
    pub fn show(&mut self, frame: &RgbImage) {
        match &mut self.current {
            Some(current) if current.dimensions() == frame.dimensions() => {
                current.copy_from_slice(frame);
            }
            _ => self.current = Some(frame.clone()),
        }
    }
}

impl Default for FrameSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FrameSurface {
    fn last_frame(&self) -> Option<&RgbImage> {
        self.current.as_ref()
    }
}

impl Surface for FrameSurface {
    fn frames(&self) -> Option<&dyn FrameSource> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    struct FakeWindow(RgbaImage);

    impl WindowReadback for FakeWindow {
        fn read_pixels(&self) -> Result<RgbaImage> {
            Ok(self.0.clone())
        }
    }

    impl Surface for FakeWindow {
        fn window(&self) -> Option<&dyn WindowReadback> {
            Some(self)
        }
    }

    #[derive(Default)]
    struct FakeFigure {
        closed: bool,
    }

    impl FigureExport for FakeFigure {
        fn save_figure(&mut self, path: &Path) -> Result<()> {
            RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])).save(path)?;
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    impl Surface for FakeFigure {
        fn figure(&mut self) -> Option<&mut dyn FigureExport> {
            Some(self)
        }
    }

    struct Blank;

    impl Surface for Blank {}

    #[test]
    fn test_no_surface_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("none.png");
        capture(None, &dest).unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn test_window_capture() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub").join("window.png");
        let mut window = FakeWindow(RgbaImage::from_pixel(4, 3, Rgba([9, 8, 7, 255])));
        capture(Some(&mut window), &dest).unwrap();
        let img = image::open(&dest).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }

    #[test]
    fn test_figure_capture_closes_figure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("figure.png");
        let mut figure = FakeFigure::default();
        capture(Some(&mut figure), &dest).unwrap();
        assert!(dest.exists());
        assert!(figure.closed);
    }

    #[test]
    fn test_frame_surface_capture() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("frame.png");
        let mut surface = FrameSurface::new();
        assert!(capture(Some(&mut surface), &dest).is_err());

        surface.show(&RgbImage::from_pixel(5, 5, Rgb([255, 0, 0])));
        capture(Some(&mut surface), &dest).unwrap();
        let img = image::open(&dest).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(2, 2), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_surface_without_capability_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(capture(Some(&mut Blank), &dir.path().join("x.png")).is_err());
    }
}
