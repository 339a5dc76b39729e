use clap::Parser;
use eye_detection::{
    load_models, Backend, CameraSource, ComponentConfig, DetectorOptions, EyeDetection,
    HighguiWindow, ModelStore,
};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(about = "Draws face boxes over a live camera feed and tracks the eyes of the main face")]
struct Args {
    /// Directory holding the model files.
    #[clap(short, long, default_value = "models")]
    models: PathBuf,

    /// Face detection backend.
    #[clap(long, value_enum, default_value_t = Backend::Dnn)]
    backend: Backend,

    /// Camera index.
    #[clap(short, long, default_value_t = 0)]
    camera: i32,

    /// Play a video file instead of the camera.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Milliseconds between face detection passes.
    #[clap(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Minimum confidence of faces drawn on the overlay.
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Input size of the eye tracking face detector, multiple of 32.
    #[clap(long, default_value_t = 128)]
    input_size: i32,

    /// Minimum score of the face used for eye tracking.
    #[clap(long, default_value_t = 0.5)]
    score_threshold: f32,

    /// Window title.
    #[clap(long, default_value = "eye detection")]
    window: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = Args::parse();

    let interval = Duration::from_millis(args.interval_ms);
    let config = ComponentConfig {
        detection_interval: interval,
        eye_interval: interval,
        overlay_options: DetectorOptions::SsdMobilenet {
            min_confidence: args.min_confidence,
            max_results: 100,
        },
        eye_options: DetectorOptions::TinyFace {
            input_size: args.input_size,
            score_threshold: args.score_threshold,
        },
        ..Default::default()
    };

    let source = match &args.input {
        Some(path) => CameraSource::open_file(path),
        None => CameraSource::open(args.camera),
    };
    let source = match source {
        Ok(source) => source,
        Err(err) => {
            error!("{:?}", err);
            return Err(err);
        }
    };
    let window = HighguiWindow::new(&args.window)?;

    let (sender, mut receiver) = mpsc::channel(32);
    let mut component = EyeDetection::new(source, window, config)?.with_observations(sender);

    tokio::spawn(async move {
        while let Some(observation) = receiver.recv().await {
            let left = observation.landmarks.left_eye_center();
            let right = observation.landmarks.right_eye_center();
            info!(
                "face {:?} score {:.2} left eye ({:.0}, {:.0}) right eye ({:.0}, {:.0})",
                observation.face.bbox, observation.face.score, left.x, left.y, right.x, right.y
            );
        }
    });

    let store = ModelStore::new(args.models);
    let backend = args.backend;
    info!("Loading models from {:?}", store.dir());
    let models = async move {
        tokio::task::spawn_blocking(move || load_models(&store, backend)).await?
    };

    component.run(models).await
}
