//! Demo pipeline: synthetic camera frames and overlay payloads are published on an
//! in-process bus, composited at the configured rate and optionally saved as PNGs.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use overlay_compositor::build_info::BuildInfo;
use overlay_compositor::config::{OverlayEntry, PipelineSettings, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};
use overlay_compositor::image_source::{parse_topic_text, ImageTransport};
use overlay_compositor::layers::{
    self, encode_rle, Detection, Detections, PathPayload, RleMaskPayload, DETECTIONS_TYPE, PATH_TYPE,
    RLE_MASK_TYPE,
};
use overlay_compositor::logging;
use overlay_compositor::{Compositor, Frame, ImageSource, LocalBus, OverlayRegistry, PixelFormat, RawImage};

const APP_NAME: &str = "overlay-compositor";
const DEMO_BASE_TOPIC: &str = "/camera/image";
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about = "Composite live overlays onto an image stream")]
struct Args {
    /// Settings file (YAML). Defaults to the per-user settings path.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output rate in hertz, overriding the settings file
    #[arg(long)]
    frequency: Option<f32>,

    /// Stop after this many composed frames
    #[arg(long, default_value_t = 90)]
    frames: u32,

    /// Directory to write numbered PNG frames into
    #[arg(long)]
    output: Option<PathBuf>,

    /// Use this image file as the base frame instead of a synthetic gradient
    #[arg(long)]
    image: Option<PathBuf>,

    /// Synthetic frame width
    #[arg(long, default_value_t = DEFAULT_FRAME_WIDTH)]
    width: u32,

    /// Synthetic frame height
    #[arg(long, default_value_t = DEFAULT_FRAME_HEIGHT)]
    height: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match logging::setup_logger() {
        Ok(log_buffer) => logging::setup_panic_hook(APP_NAME, log_buffer),
        Err(e) => eprintln!("Logger already installed: {e}"),
    }
    info!("{} {}", APP_NAME, BuildInfo::display_version());

    let mut settings = PipelineSettings::load(args.config.as_deref());
    if let Some(frequency) = args.frequency {
        settings.frequency_hz = frequency;
    }
    settings.validate()?;
    if settings.base_topic.trim().is_empty() {
        settings.base_topic = DEMO_BASE_TOPIC.to_string();
    }
    if settings.overlays.is_empty() {
        settings.overlays = demo_overlays();
    }

    let base_image = match &args.image {
        Some(path) => Some(
            image::open(path)
                .with_context(|| format!("could not open base image {}", path.display()))?
                .to_rgba8(),
        ),
        None => None,
    };
    let (width, height) = base_image.as_ref().map_or((args.width, args.height), |image| image.dimensions());
    if width == 0 || height == 0 {
        bail!("frame size must be non-zero, got {}x{}", width, height);
    }

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir).with_context(|| format!("could not create {}", dir.display()))?;
    }

    let bus = Arc::new(LocalBus::new());
    let source = Arc::new(ImageSource::new(bus.clone()));
    let registry = Arc::new(OverlayRegistry::new(Arc::new(layers::builtin_catalog()), bus.clone()));

    source.set_topic(&settings.base_topic)?;
    for failure in registry.restore(&settings.overlays) {
        warn!("Skipping overlay: {}", failure);
    }
    for row in registry.rows() {
        info!("Overlay {} on '{}' ({}): {}", row.plugin_class, row.topic, row.payload_type, row.status);
    }

    let Some((base_topic, transport)) = parse_topic_text(&settings.base_topic)? else {
        bail!("no base topic configured");
    };
    let producer = Producer {
        bus: bus.clone(),
        base_topic,
        transport,
        base_image,
        width,
        height,
        overlays: registry.entries(),
        period: Duration::from_secs_f64(0.5 / f64::from(settings.frequency_hz)),
    };
    let stop = Arc::new(AtomicBool::new(false));
    let producer_thread = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("demo-producer".to_string())
            .spawn(move || producer.run(&stop))?
    };

    let compositor = Compositor::new(source.clone(), registry.clone(), settings.frequency_hz)?;
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    let result = runtime.block_on(collect_frames(&compositor, args.frames, args.output.as_deref()));

    compositor.shutdown();
    registry.shutdown_all();
    source.shutdown();
    stop.store(true, Ordering::Release);
    if producer_thread.join().is_err() {
        error!("Producer thread panicked");
    }

    let stats = compositor.stats();
    info!(
        "Done: {} ticks, {} frames delivered, {} skipped, {:.2}ms average compose time",
        stats.ticks, stats.delivered, stats.skipped, stats.mean_render_ms()
    );
    result
}

async fn collect_frames(compositor: &Compositor, frames: u32, output: Option<&Path>) -> Result<()> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Frame>();
    compositor.set_output_sink(move |frame| {
        // The receiver only goes away once enough frames were collected.
        let _ = sender.send(frame);
    });
    compositor.start(&Handle::current());

    for index in 0..frames {
        let frame = match tokio::time::timeout(FRAME_TIMEOUT, receiver.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => bail!("output sink closed"),
            Err(_) => bail!("no frame composed within {:?}", FRAME_TIMEOUT),
        };
        if let Some(dir) = output {
            let path = dir.join(format!("frame_{index:05}.png"));
            frame
                .as_image()
                .save(&path)
                .with_context(|| format!("could not write {}", path.display()))?;
            debug!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn demo_overlays() -> Vec<OverlayEntry> {
    [
        (layers::RLE_MASK_CLASS, "/segmentation"),
        (layers::DETECTION_BOXES_CLASS, "/detections"),
        (layers::POLYLINE_CLASS, "/planned_path"),
    ]
    .into_iter()
    .map(|(plugin_class, topic)| OverlayEntry {
        plugin_class: plugin_class.to_string(),
        topic: topic.to_string(),
        enabled: true,
    })
    .collect()
}

/// Publishes a moving synthetic scene until told to stop.
struct Producer {
    bus: Arc<LocalBus>,
    base_topic: String,
    transport: ImageTransport,
    base_image: Option<RgbaImage>,
    width: u32,
    height: u32,
    overlays: Vec<OverlayEntry>,
    period: Duration,
}

impl Producer {
    fn run(&self, stop: &AtomicBool) {
        let mut tick = 0u32;
        while !stop.load(Ordering::Acquire) {
            match self.base_payload(tick) {
                Ok(payload) => {
                    self.bus.publish(&self.base_topic, self.transport.type_name(), payload);
                }
                Err(e) => warn!("Could not encode base frame: {:#}", e),
            }
            for entry in self.overlays.iter().filter(|entry| !entry.topic.is_empty()) {
                if let Some((type_name, payload)) = self.overlay_payload(&entry.plugin_class, tick) {
                    self.bus.publish(&entry.topic, type_name, payload);
                }
            }
            tick = tick.wrapping_add(1);
            thread::sleep(self.period);
        }
        debug!("Producer stopped after {} frames", tick);
    }

    fn base_payload(&self, tick: u32) -> Result<Vec<u8>> {
        let pixels = match &self.base_image {
            Some(image) => image.clone(),
            None => RgbaImage::from_fn(self.width, self.height, |x, y| {
                Rgba([x.wrapping_add(tick) as u8, y as u8, 96, 255])
            }),
        };
        Ok(match self.transport {
            ImageTransport::Raw => {
                RawImage::packed(self.width, self.height, PixelFormat::Rgba8, pixels.into_raw()).encode()
            }
            ImageTransport::Compressed => {
                let mut encoded = Cursor::new(Vec::new());
                pixels.write_to(&mut encoded, ImageFormat::Png)?;
                encoded.into_inner()
            }
        })
    }

    fn overlay_payload(&self, plugin_class: &str, tick: u32) -> Option<(&'static str, Vec<u8>)> {
        let (w, h) = (self.width as f32, self.height as f32);
        let phase = tick as f32 * 0.05;

        let encoded = match plugin_class {
            layers::DETECTION_BOXES_CLASS => {
                let x = (phase.sin() * 0.5 + 0.5) * w * 0.7;
                let detections = Detections {
                    detections: vec![
                        Detection::new([x, h * 0.3, w * 0.2, h * 0.25], 1),
                        Detection::new([w * 0.6, h * 0.6, w * 0.15, h * 0.2], 3),
                    ],
                };
                serde_json::to_vec(&detections).map(|payload| (DETECTIONS_TYPE, payload))
            }
            layers::RLE_MASK_CLASS => {
                let (mw, mh) = (self.width as usize, self.height as usize);
                let (cx, cy) = (w * (0.5 + 0.3 * phase.cos()), h * 0.5);
                let radius = h.min(w) * 0.15;
                let mask: Vec<u8> = (0..mw * mh)
                    .map(|i| {
                        let (x, y) = ((i % mw) as f32, (i / mw) as f32);
                        u8::from((x - cx).powi(2) + (y - cy).powi(2) <= radius * radius)
                    })
                    .collect();
                let payload = RleMaskPayload {
                    size: vec![self.height, self.width],
                    counts: encode_rle(&mask, mw, mh),
                    category_id: 10,
                };
                serde_json::to_vec(&payload).map(|payload| (RLE_MASK_TYPE, payload))
            }
            layers::POLYLINE_CLASS => {
                let points = (0..=32)
                    .map(|i| {
                        let t = i as f32 / 32.0;
                        [t * (w - 1.0), h * (0.8 + 0.1 * (t * 6.0 + phase).sin())]
                    })
                    .collect();
                let path = PathPayload { points, closed: false, color: Some([255, 255, 0, 255]) };
                serde_json::to_vec(&path).map(|payload| (PATH_TYPE, payload))
            }
            other => {
                debug!("No demo payload for {}", other);
                return None;
            }
        };

        match encoded {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Could not encode {} payload: {}", plugin_class, e);
                None
            }
        }
    }
}
