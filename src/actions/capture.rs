//! `capture-and-compare` - the visual oracle

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ActionContext, ActionHandler, ActionOutcome, ParamSpec, Params, SURFACE_PARAM};
use crate::capture::{Surface, capture};
use crate::compare::{CompareMethod, PixelBuffer, Threshold, check_shape, compare_images};
use crate::error::{HarnessError, Result};

/// Where captures go and what happens to them
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Write captures over the ground truth instead of comparing
    pub generate: bool,
    /// Receives truth/capture pairs of failed comparisons
    pub save_compare_dir: PathBuf,
    /// Relative ground-truth paths resolve against this directory
    pub baseline_root: PathBuf,
    /// Scratch space for in-flight captures
    pub temp_dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            generate: false,
            save_compare_dir: PathBuf::from("bad-compare"),
            baseline_root: PathBuf::from("."),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl CaptureSettings {
    pub fn truth_path(&self, ground_truth: &str) -> PathBuf {
        let path = Path::new(ground_truth);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.baseline_root.join(path)
        }
    }

    /// Artifact directory for `truth`. Baselines under `baseline_root` keep
    /// their subdirectory so equal file names from different tests never clash.
    fn artifact_dir(&self, truth: &Path) -> PathBuf {
        let relative = truth
            .strip_prefix(&self.baseline_root)
            .ok()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .filter(|p| p.components().all(|c| matches!(c, Component::Normal(_))));
        match relative {
            Some(sub) => self.save_compare_dir.join(sub),
            None => self.save_compare_dir.clone(),
        }
    }

    /// Copy the truth and move the capture into the artifact directory
    fn save_bad_compare(&self, truth: &Path, captured: &Path) -> Result<PathBuf> {
        let dir = self.artifact_dir(truth);
        fs::create_dir_all(&dir)?;
        let basename = truth
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());
        let ext = truth
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());

        fs::copy(truth, dir.join(format!("{}.truth.{}", basename, ext)))?;
        let capture_dest = dir.join(format!("{}.capture.png", basename));
        if fs::rename(captured, &capture_dest).is_err() {
            // Scratch and artifact dirs may sit on different filesystems
            fs::copy(captured, &capture_dest)?;
        }
        Ok(dir)
    }
}

pub struct CaptureAndCompare;

impl CaptureAndCompare {
    fn compare_in(
        settings: &CaptureSettings,
        scratch: &Path,
        truth_path: &Path,
        method: CompareMethod,
        threshold: Threshold,
    ) -> Result<()> {
        let captured_path = scratch.join("capture.png");
        if !captured_path.exists() {
            return Err(HarnessError::Failed(
                "capture-and-compare: nothing was captured (no surface)".to_string(),
            ));
        }

        let captured = PixelBuffer::load(&captured_path)?;
        let truth = PixelBuffer::load(truth_path)?;

        if let Err(HarnessError::ShapeMismatch {
            capture: capture_dims,
            truth: truth_dims,
            ..
        }) = check_shape(&captured, &truth)
        {
            let artifacts = settings.save_bad_compare(truth_path, &captured_path)?;
            warn!(
                "Shape mismatch against {}, artifacts in {}",
                truth_path.display(),
                artifacts.display()
            );
            return Err(HarnessError::ShapeMismatch {
                capture: capture_dims,
                truth: truth_dims,
                artifacts,
            });
        }

        let comparison = compare_images(&captured, &truth, method, threshold)?;
        if !comparison.passed() {
            let artifacts = settings.save_bad_compare(truth_path, &captured_path)?;
            warn!(
                "{} {} > {} against {}, artifacts in {}",
                method,
                comparison.diff,
                comparison.threshold,
                truth_path.display(),
                artifacts.display()
            );
            return Err(HarnessError::ThresholdExceeded {
                method: method.name().to_string(),
                diff: comparison.diff,
                threshold: comparison.threshold,
                artifacts,
            });
        }
        Ok(())
    }
}

impl ActionHandler for CaptureAndCompare {
    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::context(SURFACE_PARAM),
            ParamSpec::required("compare"),
            ParamSpec::required("ground_truth"),
            ParamSpec::required("threshold"),
        ];
        PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let method: CompareMethod = params.str("compare")?.parse()?;
        let threshold = Threshold::from_toml(params.require("threshold")?)?;
        let truth_path = ctx.capture.truth_path(params.str("ground_truth")?);
        if ctx.dry {
            return Ok(ActionOutcome::Continue);
        }

        let settings = ctx.capture;
        let surface = ctx.surface.as_mut().map(|s| &mut **s as &mut dyn Surface);

        if settings.generate {
            info!("Generating {}", truth_path.display());
            capture(surface, &truth_path)?;
            return Ok(ActionOutcome::Continue);
        }

        let scratch = settings
            .temp_dir
            .join(format!("framecheck-{}", Uuid::new_v4()));
        fs::create_dir_all(&scratch)?;

        let result = capture(surface, &scratch.join("capture.png"))
            .and_then(|_| Self::compare_in(settings, &scratch, &truth_path, method, threshold));

        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!("Could not remove {}: {}", scratch.display(), e);
        }
        result.map(|_| ActionOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::capture::FrameSurface;
    use crate::input::InputState;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    struct Scratch {
        _dir: tempfile::TempDir,
        settings: CaptureSettings,
    }

    fn scratch(generate: bool) -> Scratch {
        let dir = tempfile::tempdir().unwrap();
        let settings = CaptureSettings {
            generate,
            save_compare_dir: dir.path().join("bad"),
            baseline_root: dir.path().join("truth"),
            temp_dir: dir.path().join("tmp"),
        };
        Scratch { _dir: dir, settings }
    }

    fn params(method: &str, truth: &str, threshold: toml::Value) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert("compare".to_string(), method.into());
        table.insert("ground_truth".to_string(), truth.into());
        table.insert("threshold".to_string(), threshold);
        table
    }

    fn run(
        settings: &CaptureSettings,
        surface: &mut FrameSurface,
        table: &toml::Table,
    ) -> Result<ActionOutcome> {
        let registry = ActionRegistry::with_builtins();
        let mut input = InputState::new();
        let mut ctx = ActionContext {
            input: &mut input,
            surface: Some(surface),
            test: None,
            capture: settings,
            dry: false,
        };
        registry.dispatch("capture-and-compare", table, &mut ctx)
    }

    fn black() -> RgbImage {
        RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]))
    }

    #[test]
    fn test_generate_then_compare_identical() {
        let gen_env = scratch(true);
        let mut surface = FrameSurface::new();
        surface.show(&black());
        let table = params("sum-difference", "black.png", "1%".into());

        run(&gen_env.settings, &mut surface, &table).unwrap();
        let truth = gen_env.settings.baseline_root.join("black.png");
        assert!(truth.exists());

        let mut settings = gen_env.settings.clone();
        settings.generate = false;
        run(&settings, &mut surface, &table).unwrap();
        assert!(!settings.save_compare_dir.exists());
        // Scratch directories are removed after each comparison
        let leftovers = fs::read_dir(&settings.temp_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_small_difference_passes_percent_threshold() {
        let env = scratch(false);
        fs::create_dir_all(&env.settings.baseline_root).unwrap();
        black()
            .save(env.settings.baseline_root.join("black.png"))
            .unwrap();

        let mut frame = black();
        frame.put_pixel(3, 3, Rgb([10, 10, 10]));
        let mut surface = FrameSurface::new();
        surface.show(&frame);

        let table = params("sum-difference", "black.png", "1%".into());
        run(&env.settings, &mut surface, &table).unwrap();
    }

    #[test]
    fn test_large_difference_fails_and_writes_artifacts() {
        let env = scratch(false);
        fs::create_dir_all(&env.settings.baseline_root).unwrap();
        black()
            .save(env.settings.baseline_root.join("black.png"))
            .unwrap();

        // 30 white pixels: 30 * 765 = 22950 > 765
        let mut frame = black();
        draw_filled_rect_mut(&mut frame, Rect::at(0, 0).of_size(10, 3), Rgb([255, 255, 255]));
        let mut surface = FrameSurface::new();
        surface.show(&frame);

        let table = params("sum-difference", "black.png", "1%".into());
        let err = run(&env.settings, &mut surface, &table).unwrap_err();
        match err {
            HarnessError::ThresholdExceeded {
                diff,
                threshold,
                artifacts,
                ..
            } => {
                assert_eq!(diff, 22950.0);
                assert_eq!(threshold, 765.0);
                assert!(artifacts.join("black.truth.png").exists());
                assert!(artifacts.join("black.capture.png").exists());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_artifacts_keep_baseline_subdirectory() {
        let env = scratch(false);
        for dir in ["paint", "bounce"] {
            let truth_dir = env.settings.baseline_root.join(dir);
            fs::create_dir_all(&truth_dir).unwrap();
            black().save(truth_dir.join("frame.png")).unwrap();
        }

        let white = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let mut surface = FrameSurface::new();
        surface.show(&white);

        let mut dirs = Vec::new();
        for truth in ["paint/frame.png", "bounce/frame.png"] {
            let table = params("pixel-count", truth, toml::Value::Integer(0));
            match run(&env.settings, &mut surface, &table).unwrap_err() {
                HarnessError::ThresholdExceeded { artifacts, .. } => dirs.push(artifacts),
                other => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(dirs[0], env.settings.save_compare_dir.join("paint"));
        assert_eq!(dirs[1], env.settings.save_compare_dir.join("bounce"));
        for dir in &dirs {
            assert!(dir.join("frame.truth.png").exists());
            assert!(dir.join("frame.capture.png").exists());
        }
    }

    #[test]
    fn test_shape_mismatch_writes_artifacts() {
        let env = scratch(false);
        fs::create_dir_all(&env.settings.baseline_root).unwrap();
        black()
            .save(env.settings.baseline_root.join("black.png"))
            .unwrap();

        let mut surface = FrameSurface::new();
        surface.show(&RgbImage::new(12, 10));

        let table = params("rmse", "black.png", toml::Value::Float(1.0));
        let err = run(&env.settings, &mut surface, &table).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ShapeMismatch {
                capture: (12, 10),
                truth: (10, 10),
                ..
            }
        ));
        assert!(env.settings.save_compare_dir.join("black.capture.png").exists());
    }

    #[test]
    fn test_dry_run_validates_method_and_threshold() {
        let env = scratch(false);
        let registry = ActionRegistry::with_builtins();
        let mut input = InputState::new();
        let mut ctx = ActionContext::dry(&mut input, &env.settings);

        let ok = params("pixel-count", "a.png", "0.5%".into());
        registry
            .dispatch("capture-and-compare", &ok, &mut ctx)
            .unwrap();

        let bad_method = params("psnr", "a.png", "1%".into());
        assert!(registry
            .dispatch("capture-and-compare", &bad_method, &mut ctx)
            .is_err());

        let bad_threshold = params("rmse", "a.png", "lots".into());
        assert!(registry
            .dispatch("capture-and-compare", &bad_threshold, &mut ctx)
            .is_err());
        assert!(!env.settings.temp_dir.exists());
    }
}
