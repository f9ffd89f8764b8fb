//! Score two images with every comparison metric.
//!
//! Handy for picking a `threshold` when writing a `capture-and-compare` step:
//!
//!   imgdiff bad-compare/paint.truth.png bad-compare/paint.capture.png

use clap::Parser;
use std::path::{Path, PathBuf};

use framecheck::compare::{CompareMethod, PixelBuffer, check_shape};

#[derive(Parser)]
#[command(name = "imgdiff", about = "Compare two images with every framecheck metric")]
struct Args {
    /// First image
    a: PathBuf,

    /// Second image
    b: PathBuf,
}

fn load(path: &Path) -> PixelBuffer {
    match PixelBuffer::load(path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error loading image '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let args = Args::parse();
    let a = load(&args.a);
    let b = load(&args.b);

    if let Err(e) = check_shape(&a, &b) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let pixels = a.pixels();
    for method in [
        CompareMethod::Rmse,
        CompareMethod::SumDifference,
        CompareMethod::PixelCount,
        CompareMethod::BlurSumDifference,
    ] {
        let diff = match method.score(&a, &b) {
            Ok(diff) => diff,
            Err(e) => {
                eprintln!("{}: {}", method, e);
                std::process::exit(1);
            }
        };
        match method {
            // Already on a 0-255 scale
            CompareMethod::Rmse => println!("{}: {:.3}", method, diff),
            _ => {
                let pct = diff / method.full_scale(pixels) * 100.0;
                println!("{}: {}, {:.2}%", method, diff, pct);
            }
        }
    }
}
