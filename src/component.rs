use crate::camera::{FrameRead, FrameSource};
use crate::detector::{DetectorOptions, FaceDetection};
use crate::display::{KeyCommand, Surface};
use crate::error::EyeDetectionError;
use crate::geometry::{aspect_ratio, display_size, VideoDimensions};
use crate::landmarks::FaceLandmarks;
use crate::models::Models;
use crate::overlay::{BoxStyle, Overlay};
use log::{debug, error, info, warn};
use opencv::core::Size;
use opencv::prelude::*;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct ComponentConfig {
    /// How often a frame is read and shown.
    pub frame_interval: Duration,
    /// How often all faces are detected and the overlay redrawn.
    pub detection_interval: Duration,
    /// How often the single face eye pass runs.
    pub eye_interval: Duration,
    pub overlay_options: DetectorOptions,
    pub eye_options: DetectorOptions,
    pub style: BoxStyle,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            detection_interval: Duration::from_millis(100),
            eye_interval: Duration::from_millis(100),
            overlay_options: DetectorOptions::ssd_mobilenet(),
            eye_options: DetectorOptions::tiny_face(),
            style: BoxStyle::default(),
        }
    }
}

impl ComponentConfig {
    pub fn validate(&self) -> Result<(), EyeDetectionError> {
        let intervals = [
            ("frame", self.frame_interval),
            ("detection", self.detection_interval),
            ("eye", self.eye_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(EyeDetectionError::InvalidOptions(format!(
                    "{name} interval must be non-zero"
                )));
            }
        }
        self.overlay_options.validate()?;
        self.eye_options.validate()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeObservation {
    pub face: FaceDetection,
    pub landmarks: FaceLandmarks,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Playback {
    /// No frame received yet.
    Waiting,
    Playing,
    Paused,
    Ended,
}

/// Shows a video source with face boxes drawn on an overlay and publishes
/// eye positions of the main face.
pub struct EyeDetection<S, W> {
    source: S,
    surface: W,
    config: ComponentConfig,
    overlay: Overlay,
    observations: Option<mpsc::Sender<EyeObservation>>,
    models: Option<Models>,
    playback: Playback,
    eye_tracking: bool,
    latest_frame: Option<Mat>,
    video: VideoDimensions,
    client_width: Option<i32>,
}

impl<S: FrameSource, W: Surface> EyeDetection<S, W> {
    pub fn new(source: S, surface: W, config: ComponentConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let overlay = Overlay::new(Size::default(), config.style)?;
        Ok(Self {
            source,
            surface,
            config,
            overlay,
            observations: None,
            models: None,
            playback: Playback::Waiting,
            eye_tracking: false,
            latest_frame: None,
            video: VideoDimensions::default(),
            client_width: None,
        })
    }

    /// Eye observations are sent here. Observations are dropped while the
    /// channel is full.
    pub fn with_observations(mut self, sender: mpsc::Sender<EyeObservation>) -> Self {
        self.observations = Some(sender);
        self
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    /// Runs until the source ends or the user quits. `models` resolves once
    /// the detection models are loaded; the video plays in the meantime.
    ///
    /// Frame reads and inference run inline on the calling task, so the
    /// future should own its thread (the main task of `#[tokio::main]`).
    pub async fn run<F>(&mut self, models: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<Models>>,
    {
        tokio::pin!(models);
        let mut loading = true;

        let mut frame_tick = time::interval(self.config.frame_interval);
        frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut detection_tick = time::interval(self.config.detection_interval);
        detection_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut eye_tick = time::interval(self.config.eye_interval);
        eye_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.on_resize()?;

        loop {
            tokio::select! {
                loaded = &mut models, if loading => {
                    loading = false;
                    self.on_models_loaded(loaded);
                }
                _ = frame_tick.tick() => {
                    if !self.on_frame_tick()? {
                        break;
                    }
                }
                _ = detection_tick.tick() => {
                    if let Err(err) = self.detect_faces() {
                        warn!("Face detection failed: {:?}", err);
                    }
                }
                _ = eye_tick.tick(), if self.eye_tracking => {
                    if let Err(err) = self.track_eyes() {
                        warn!("Eye detection failed: {:?}", err);
                    }
                }
            }
        }
        Ok(())
    }

    fn on_models_loaded(&mut self, loaded: anyhow::Result<Models>) {
        match loaded {
            Ok(models) => {
                info!("Models loaded");
                self.models = Some(models);
                self.start_eye_tracking();
            }
            Err(err) => error!("Failed to load models: {:?}", err),
        }
    }

    /// Returns false once the component should stop.
    fn on_frame_tick(&mut self) -> anyhow::Result<bool> {
        if matches!(self.playback, Playback::Waiting | Playback::Playing) {
            match self.source.next_frame()? {
                FrameRead::Frame(frame) => {
                    let dimensions = VideoDimensions::from(frame.size()?);
                    self.latest_frame = Some(frame);
                    if self.playback == Playback::Waiting || dimensions != self.video {
                        self.video = dimensions;
                        self.on_play()?;
                    }
                }
                FrameRead::Pending => {}
                FrameRead::Ended => {
                    info!("Video ended");
                    self.playback = Playback::Ended;
                    self.eye_tracking = false;
                    return Ok(false);
                }
            }
        }

        let client_width = self.surface.client_size()?.map(|size| size.width);
        if client_width.is_some() && client_width != self.client_width {
            self.client_width = client_width;
            self.on_resize()?;
        }

        if let Some(frame) = &self.latest_frame {
            let composed = self.overlay.composite(frame)?;
            self.surface.present(&composed)?;
        }

        match self.surface.poll_key()? {
            Some(KeyCommand::Quit) => return Ok(false),
            Some(KeyCommand::TogglePause) => self.toggle_pause()?,
            None => {}
        }
        Ok(true)
    }

    /// Video started playing or its intrinsic size changed.
    fn on_play(&mut self) -> anyhow::Result<()> {
        debug!("Playing at {}x{}", self.video.width, self.video.height);
        self.overlay.resize(self.video.as_size())?;
        self.update_display_size()?;
        self.playback = Playback::Playing;
        self.start_eye_tracking();
        Ok(())
    }

    fn on_resize(&mut self) -> anyhow::Result<()> {
        if let Some(frame) = &self.latest_frame {
            self.video = VideoDimensions::from(frame.size()?);
        }
        self.update_display_size()
    }

    fn update_display_size(&mut self) -> anyhow::Result<()> {
        let Some(client_width) = self.client_width else {
            return Ok(());
        };
        let Some(aspect) = aspect_ratio(self.source.aspect_ratio(), self.video) else {
            return Ok(());
        };
        if let Some(size) = display_size(aspect, client_width) {
            debug!("Display size {}x{}", size.width, size.height);
            self.surface.set_display_size(size)?;
        }
        Ok(())
    }

    fn toggle_pause(&mut self) -> anyhow::Result<()> {
        match self.playback {
            Playback::Waiting | Playback::Playing => {
                info!("Paused");
                self.playback = Playback::Paused;
                self.eye_tracking = false;
            }
            Playback::Paused if self.latest_frame.is_some() => {
                info!("Resumed");
                self.on_play()?;
            }
            Playback::Paused => self.playback = Playback::Waiting,
            Playback::Ended => {}
        }
        Ok(())
    }

    fn start_eye_tracking(&mut self) {
        if self.models.is_some() && self.playback == Playback::Playing && !self.eye_tracking {
            debug!("Eye tracking started");
            self.eye_tracking = true;
        }
    }

    fn detect_faces(&mut self) -> anyhow::Result<()> {
        let (Some(models), Some(frame)) = (self.models.as_mut(), self.latest_frame.as_ref()) else {
            return Ok(());
        };
        let detections = models
            .face_detector
            .detect_all(frame, &self.config.overlay_options)?;
        self.overlay.draw_detections(&detections)
    }

    fn track_eyes(&mut self) -> anyhow::Result<()> {
        let (Some(models), Some(frame)) = (self.models.as_mut(), self.latest_frame.as_ref()) else {
            return Ok(());
        };
        let Some(face) = models
            .face_detector
            .detect_single(frame, &self.config.eye_options)?
        else {
            return Ok(());
        };
        let Some(landmarks) = models.landmark_detector.detect(frame, face.bbox)? else {
            return Ok(());
        };

        let left = landmarks.left_eye_center();
        let right = landmarks.right_eye_center();
        debug!(
            "Eyes at ({:.1}, {:.1}) and ({:.1}, {:.1})",
            left.x, left.y, right.x, right.y
        );
        if let Some(sender) = &self.observations {
            if sender.try_send(EyeObservation { face, landmarks }).is_err() {
                debug!("Dropped eye observation");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceDetector;
    use crate::landmarks::LandmarkDetector;
    use opencv::core::{self, Rect, Scalar, Vec3b};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FACE: Rect = Rect {
        x: 10,
        y: 10,
        width: 30,
        height: 20,
    };

    fn frame(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::new(0.0, 255.0, 0.0, 0.0))
            .unwrap()
    }

    struct FakeSource {
        frames: VecDeque<FrameRead>,
        reads: usize,
        aspect: Option<f64>,
    }

    impl FakeSource {
        fn new(count: usize, width: i32, height: i32) -> Self {
            Self {
                frames: (0..count)
                    .map(|_| FrameRead::Frame(frame(width, height)))
                    .collect(),
                reads: 0,
                aspect: None,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> anyhow::Result<FrameRead> {
            self.reads += 1;
            Ok(self.frames.pop_front().unwrap_or(FrameRead::Ended))
        }

        fn aspect_ratio(&self) -> Option<f64> {
            self.aspect
        }
    }

    #[derive(Default)]
    struct FakeSurface {
        presented: usize,
        last: Option<Mat>,
        client: Option<Size>,
        display_sizes: Vec<Size>,
        polls: usize,
        keys: HashMap<usize, KeyCommand>,
        /// Client size applied right after the given key poll.
        resizes: HashMap<usize, Size>,
    }

    impl Surface for FakeSurface {
        fn present(&mut self, image: &Mat) -> anyhow::Result<()> {
            self.presented += 1;
            self.last = Some(image.clone());
            Ok(())
        }

        fn client_size(&self) -> anyhow::Result<Option<Size>> {
            Ok(self.client)
        }

        fn set_display_size(&mut self, size: Size) -> anyhow::Result<()> {
            self.display_sizes.push(size);
            Ok(())
        }

        fn poll_key(&mut self) -> anyhow::Result<Option<KeyCommand>> {
            self.polls += 1;
            if let Some(size) = self.resizes.get(&self.polls) {
                self.client = Some(*size);
            }
            Ok(self.keys.get(&self.polls).copied())
        }
    }

    struct FakeDetector {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FaceDetector for FakeDetector {
        fn detect_all(
            &mut self,
            _frame: &Mat,
            _options: &DetectorOptions,
        ) -> anyhow::Result<Vec<FaceDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("inference failed");
            }
            Ok(vec![FaceDetection::new(FACE, 0.9)])
        }
    }

    struct FakeLandmarks;

    impl LandmarkDetector for FakeLandmarks {
        fn detect(&mut self, _frame: &Mat, face: Rect) -> anyhow::Result<Option<FaceLandmarks>> {
            Ok(Some(FaceLandmarks {
                left_eye: Rect::new(face.x, face.y, 5, 5),
                right_eye: Rect::new(face.x + 20, face.y, 5, 5),
            }))
        }
    }

    fn models(calls: &Arc<AtomicUsize>, fail: bool) -> Models {
        Models {
            face_detector: Box::new(FakeDetector {
                calls: calls.clone(),
                fail,
            }),
            landmark_detector: Box::new(FakeLandmarks),
        }
    }

    fn component(source: FakeSource, surface: FakeSurface) -> EyeDetection<FakeSource, FakeSurface> {
        EyeDetection::new(source, surface, ComponentConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_draws_detected_faces_over_video() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut component = component(FakeSource::new(10, 100, 80), FakeSurface::default());
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert_eq!(component.playback(), Playback::Ended);
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(component.surface.presented, 10);
        let shown = component.surface.last.as_ref().unwrap();
        assert_eq!(*shown.at_2d::<Vec3b>(10, 20).unwrap(), Vec3b::from([255, 0, 0]));
        assert_eq!(*shown.at_2d::<Vec3b>(20, 25).unwrap(), Vec3b::from([0, 255, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_eye_observations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (sender, mut receiver) = mpsc::channel(16);
        let mut component =
            component(FakeSource::new(10, 100, 80), FakeSurface::default()).with_observations(sender);
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        let observation = receiver.try_recv().unwrap();
        assert_eq!(observation.face.bbox, FACE);
        assert_eq!(observation.landmarks.left_eye, Rect::new(10, 10, 5, 5));
        assert_eq!(observation.landmarks.right_eye, Rect::new(30, 10, 5, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_models_before_detecting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (sender, mut receiver) = mpsc::channel(16);
        let mut component =
            component(FakeSource::new(10, 100, 80), FakeSurface::default()).with_observations(sender);
        let loaded = models(&calls, false);

        component
            .run(async {
                time::sleep(Duration::from_secs(5)).await;
                Ok(loaded)
            })
            .await
            .unwrap();

        assert!(!component.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(receiver.try_recv().is_err());
        assert_eq!(component.surface.presented, 10);
        let shown = component.surface.last.as_ref().unwrap();
        assert_eq!(*shown.at_2d::<Vec3b>(10, 20).unwrap(), Vec3b::from([0, 255, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_load_failure_keeps_video_playing() {
        let mut component = component(FakeSource::new(5, 100, 80), FakeSurface::default());

        component
            .run(async { Err(anyhow::anyhow!("missing weights")) })
            .await
            .unwrap();

        assert!(!component.is_loaded());
        assert_eq!(component.surface.presented, 5);
        assert_eq!(component.playback(), Playback::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_errors_do_not_stop_the_video() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut component = component(FakeSource::new(10, 100, 80), FakeSurface::default());
        let loaded = models(&calls, true);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(component.surface.presented, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_reading_frames_and_eye_tracking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let surface = FakeSurface {
            keys: HashMap::from([(2, KeyCommand::TogglePause), (20, KeyCommand::Quit)]),
            ..Default::default()
        };
        let mut component = component(FakeSource::new(10, 100, 80), surface);
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert_eq!(component.source.reads, 2);
        assert_eq!(component.surface.presented, 20);
        assert_eq!(component.playback(), Playback::Paused);
        assert!(!component.eye_tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_restarts_playback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let surface = FakeSurface {
            keys: HashMap::from([(2, KeyCommand::TogglePause), (5, KeyCommand::TogglePause)]),
            ..Default::default()
        };
        let mut component = component(FakeSource::new(6, 100, 80), surface);
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert_eq!(component.source.reads, 7);
        assert_eq!(component.playback(), Playback::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_size_follows_window_width_and_aspect_ratio() {
        let surface = FakeSurface {
            client: Some(Size::new(800, 700)),
            ..Default::default()
        };
        let mut component = component(FakeSource::new(3, 64, 48), surface);

        component
            .run(async { Err(anyhow::anyhow!("no models")) })
            .await
            .unwrap();

        assert_eq!(component.surface.display_sizes.last(), Some(&Size::new(800, 600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_aspect_ratio_wins_over_frame_size() {
        let surface = FakeSurface {
            client: Some(Size::new(800, 700)),
            ..Default::default()
        };
        let mut source = FakeSource::new(3, 64, 48);
        source.aspect = Some(16.0 / 9.0);
        let mut component = component(source, surface);

        component
            .run(async { Err(anyhow::anyhow!("no models")) })
            .await
            .unwrap();

        assert_eq!(component.surface.display_sizes.last(), Some(&Size::new(800, 450)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_follows_video_size() {
        let mut source = FakeSource::new(2, 64, 48);
        source.frames.push_back(FrameRead::Frame(frame(32, 24)));
        let mut component = component(source, FakeSurface::default());

        component
            .run(async { Err(anyhow::anyhow!("no models")) })
            .await
            .unwrap();

        assert_eq!(component.overlay.size().unwrap(), Size::new(32, 24));
        assert_eq!(component.video, VideoDimensions::new(32, 24));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_camera_stays_idle_until_first_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (sender, mut receiver) = mpsc::channel(16);
        let mut source = FakeSource::new(0, 100, 80);
        source.frames = (0..20).map(|_| FrameRead::Pending).collect();
        let mut component = component(source, FakeSurface::default()).with_observations(sender);
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert_eq!(component.source.reads, 21);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(receiver.try_recv().is_err());
        assert_eq!(component.surface.presented, 0);
        assert_eq!(component.playback(), Playback::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_once_pending_camera_delivers_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = FakeSource::new(0, 100, 80);
        source.frames = (0..6).map(|_| FrameRead::Pending).collect();
        source
            .frames
            .extend((0..6).map(|_| FrameRead::Frame(frame(100, 80))));
        let mut component = component(source, FakeSurface::default());
        let loaded = models(&calls, false);

        component.run(async { Ok(loaded) }).await.unwrap();

        assert_eq!(component.source.reads, 13);
        assert_eq!(component.surface.presented, 6);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        let shown = component.surface.last.as_ref().unwrap();
        assert_eq!(*shown.at_2d::<Vec3b>(10, 20).unwrap(), Vec3b::from([255, 0, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_width_changes_resize_the_display() {
        let surface = FakeSurface {
            client: Some(Size::new(800, 700)),
            resizes: HashMap::from([(3, Size::new(800, 500)), (5, Size::new(640, 500))]),
            ..Default::default()
        };
        let mut component = component(FakeSource::new(8, 64, 48), surface);

        component
            .run(async { Err(anyhow::anyhow!("no models")) })
            .await
            .unwrap();

        assert_eq!(
            component.surface.display_sizes,
            vec![Size::new(800, 600), Size::new(640, 480)]
        );
    }

    #[rstest::rstest]
    #[case::frame(ComponentConfig { frame_interval: Duration::ZERO, ..Default::default() })]
    #[case::detection(ComponentConfig { detection_interval: Duration::ZERO, ..Default::default() })]
    #[case::eye(ComponentConfig { eye_interval: Duration::ZERO, ..Default::default() })]
    fn test_rejects_zero_intervals(#[case] config: ComponentConfig) {
        let source = FakeSource::new(0, 1, 1);
        let result = EyeDetection::new(source, FakeSurface::default(), config);
        assert!(matches!(
            result.err().and_then(|err| err.downcast::<EyeDetectionError>().ok()),
            Some(EyeDetectionError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_options() {
        let config = ComponentConfig {
            eye_options: DetectorOptions::TinyFace {
                input_size: 100,
                score_threshold: 0.5,
            },
            ..Default::default()
        };
        let source = FakeSource::new(0, 1, 1);
        assert!(EyeDetection::new(source, FakeSurface::default(), config).is_err());
    }
}
