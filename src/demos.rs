//! Built-in demo programs
//!
//! Small software-rendered programs that exercise the whole pipeline: they
//! read input through the host, draw with `imageproc`, and show each frame on
//! a [`FrameSurface`] the capture adapter can read back.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use rand::Rng;

use crate::capture::FrameSurface;
use crate::error::Result;
use crate::host::RenderLoopHost;
use crate::input::{EventTag, LMB, RMB};
use crate::program::{Program, ProgramCatalog, ProgramContext};

pub const PAINT: &str = "demos/paint";
pub const BOUNCE: &str = "demos/bounce";

const DEFAULT_SIZE: u32 = 64;
const DEFAULT_FRAMES: u64 = 600;
const BACKGROUND: Rgb<u8> = Rgb([16, 16, 24]);

/// Map a normalized cursor position onto pixel coordinates
fn to_pixel(pos: (f64, f64), width: u32, height: u32) -> (i32, i32) {
    let x = pos.0 * width.saturating_sub(1) as f64;
    let y = pos.1 * height.saturating_sub(1) as f64;
    (x.round() as i32, y.round() as i32)
}

/// Finger painting: hold LMB to draw, RMB to erase, `c` clears the canvas
pub struct PaintDemo {
    surface: FrameSurface,
    canvas: RgbImage,
}

impl PaintDemo {
    pub fn new() -> Self {
        Self {
            surface: FrameSurface::new(),
            canvas: RgbImage::from_pixel(DEFAULT_SIZE, DEFAULT_SIZE, BACKGROUND),
        }
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }
}

impl Default for PaintDemo {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for PaintDemo {
    fn run(&mut self, host: &mut dyn RenderLoopHost, ctx: &mut ProgramContext) -> Result<()> {
        let size = ctx.arg::<u32>("size")?.unwrap_or(DEFAULT_SIZE).max(1);
        let frames = ctx.arg::<u64>("frames")?.unwrap_or(DEFAULT_FRAMES);
        let brush = ctx.arg::<i32>("brush")?.unwrap_or(3);
        self.canvas = RgbImage::from_pixel(size, size, BACKGROUND);

        let ink = Rgb([
            ctx.rng.gen_range(128..=255),
            ctx.rng.gen_range(128..=255),
            ctx.rng.gen_range(128..=255),
        ]);

        for frame in 0..frames {
            while host.has_pending_input() {
                let event = host.poll_event()?;
                match (event.tag, event.key.as_str()) {
                    (EventTag::Press, "c") => {
                        self.canvas = RgbImage::from_pixel(size, size, BACKGROUND);
                    }
                    // A click shorter than a frame still leaves a dot
                    (EventTag::Press, LMB) => {
                        let dot = to_pixel(event.position, size, size);
                        draw_filled_circle_mut(&mut self.canvas, dot, brush, ink);
                    }
                    _ => {}
                }
            }

            let center = to_pixel(host.cursor_position(), size, size);
            if host.is_pressed(&[LMB]) {
                draw_filled_circle_mut(&mut self.canvas, center, brush, ink);
            } else if host.is_pressed(&[RMB]) {
                draw_filled_circle_mut(&mut self.canvas, center, brush, BACKGROUND);
            }

            self.surface.show(&self.canvas);
            if host.on_tick(frame, Some(&mut self.surface))?.is_stop() {
                break;
            }
        }
        Ok(())
    }
}

/// A ball bouncing inside the frame; `space` pauses and resumes
pub struct BounceDemo {
    surface: FrameSurface,
}

impl BounceDemo {
    pub fn new() -> Self {
        Self {
            surface: FrameSurface::new(),
        }
    }

    pub fn last_frame(&self) -> Option<&RgbImage> {
        use crate::capture::FrameSource;
        self.surface.last_frame()
    }
}

impl Default for BounceDemo {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for BounceDemo {
    fn run(&mut self, host: &mut dyn RenderLoopHost, ctx: &mut ProgramContext) -> Result<()> {
        let size = ctx.arg::<u32>("size")?.unwrap_or(DEFAULT_SIZE).max(8);
        let frames = ctx.arg::<u64>("frames")?.unwrap_or(DEFAULT_FRAMES);
        let radius = (size / 10).max(1) as i32;
        let limit = (size as i32 - 1 - radius) as f32;

        let mut pos = (
            ctx.rng.gen_range(radius as f32..limit),
            ctx.rng.gen_range(radius as f32..limit),
        );
        let mut vel = (ctx.rng.gen_range(-2.0f32..2.0), ctx.rng.gen_range(-2.0f32..2.0));
        let color = Rgb([
            ctx.rng.gen_range(64..=255),
            ctx.rng.gen_range(64..=255),
            ctx.rng.gen_range(64..=255),
        ]);
        let mut paused = false;

        for frame in 0..frames {
            while host.has_pending_input() {
                let event = host.poll_event()?;
                if event.tag == EventTag::Press && event.key == "space" {
                    paused = !paused;
                }
            }

            if !paused {
                pos.0 += vel.0;
                pos.1 += vel.1;
                if pos.0 < radius as f32 || pos.0 > limit {
                    vel.0 = -vel.0;
                    pos.0 = pos.0.clamp(radius as f32, limit);
                }
                if pos.1 < radius as f32 || pos.1 > limit {
                    vel.1 = -vel.1;
                    pos.1 = pos.1.clamp(radius as f32, limit);
                }
            }

            let mut img = RgbImage::from_pixel(size, size, BACKGROUND);
            draw_filled_circle_mut(
                &mut img,
                (pos.0.round() as i32, pos.1.round() as i32),
                radius,
                color,
            );
            self.surface.show(&img);
            if host.on_tick(frame, Some(&mut self.surface))?.is_stop() {
                break;
            }
        }
        Ok(())
    }
}

/// Catalog of every built-in demo
pub fn catalog() -> ProgramCatalog {
    let mut catalog = ProgramCatalog::new();
    catalog.register(PAINT, || Box::new(PaintDemo::new()));
    catalog.register(BOUNCE, || Box::new(BounceDemo::new()));
    catalog
}
