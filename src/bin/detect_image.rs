use clap::Parser;
use eye_detection::{load_models, Backend, BoxStyle, DetectorOptions, ModelStore, Overlay};
use log::info;
use opencv::prelude::*;
use opencv::{highgui, imgcodecs};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Draws face and eye boxes on a still image")]
struct Args {
    /// Image to process.
    image: PathBuf,

    /// Write the result here instead of showing it.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Directory holding the model files.
    #[clap(short, long, default_value = "models")]
    models: PathBuf,

    /// Face detection backend.
    #[clap(long, value_enum, default_value_t = Backend::Dnn)]
    backend: Backend,

    /// Minimum confidence of detected faces.
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = Args::parse();

    let frame = imgcodecs::imread_def(&args.image.to_string_lossy())?;
    if frame.size()?.width == 0 {
        anyhow::bail!("Unable to read image {:?}", args.image);
    }

    let mut models = load_models(&ModelStore::new(&args.models), args.backend)?;
    let options = DetectorOptions::SsdMobilenet {
        min_confidence: args.min_confidence,
        max_results: 100,
    };
    let faces = models.face_detector.detect_all(&frame, &options)?;
    info!("faces: {}", faces.len());

    let mut overlay = Overlay::new(frame.size()?, BoxStyle::default())?;
    overlay.draw_detections(&faces)?;

    let mut eyes = Overlay::new(
        frame.size()?,
        BoxStyle {
            color: (0.0, 0.0, 255.0),
            thickness: 1,
        },
    )?;
    for face in &faces {
        if let Some(landmarks) = models.landmark_detector.detect(&frame, face.bbox)? {
            eyes.stroke_rect(landmarks.left_eye)?;
            eyes.stroke_rect(landmarks.right_eye)?;
        }
    }

    let result = eyes.composite(&overlay.composite(&frame)?)?;

    match &args.output {
        Some(path) => {
            let written = imgcodecs::imwrite_def(&path.to_string_lossy(), &result)?;
            if !written {
                anyhow::bail!("Unable to write {:?}", path);
            }
            info!("Wrote {:?}", path);
        }
        None => {
            let window = "detect image";
            highgui::named_window_def(window)?;
            highgui::imshow(window, &result)?;
            highgui::wait_key(0)?;
        }
    }
    Ok(())
}
