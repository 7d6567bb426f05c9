//! Periodic composition of the base image and the enabled overlays.
//!
//! Each tick copies the current base frame, lets every enabled overlay draw onto the
//! copy in registry order and hands the result to the output sink. Ticks never overlap,
//! whether they come from the timer task or from a direct [`Compositor::tick`] call.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[allow(unused_imports)]
use log::{debug, info, trace, warn, error};

use crate::config::validate_frequency;
use crate::error::ConfigError;
use crate::frame::Frame;
use crate::image_source::ImageSource;
use crate::latest::Latest;
use crate::registry::OverlayRegistry;
use crate::utils::timing::TickStats;

/// Receives one finished frame per successful tick. A panicking sink loses that frame
/// and is logged; ticking carries on.
pub type OutputSink = Box<dyn Fn(Frame) + Send + Sync>;

/// State shared between the compositor handle and its timer task.
struct Pipeline {
    source: Arc<ImageSource>,
    registry: Arc<OverlayRegistry>,
    sink: Latest<OutputSink>,
    stopped: AtomicBool,
    ticking: Mutex<()>,
    stats: Mutex<TickStats>,
}

impl Pipeline {
    fn tick(&self) -> bool {
        let _ticking = self.ticking.lock();

        let Some(image) = self.source.current_image() else {
            trace!("No base image yet, skipping tick");
            self.stats.lock().record_skip();
            return false;
        };

        let started = Instant::now();
        let mut output = Frame::clone(&image);
        drop(image);

        // Edits made from here on show up next tick.
        let overlays = self.registry.list();
        for overlay in overlays.iter().filter(|overlay| overlay.is_enabled()) {
            overlay.render(&mut output);
        }
        let render_time = started.elapsed();

        match self.sink.load() {
            Some(sink) => {
                if panic::catch_unwind(AssertUnwindSafe(|| (*sink)(output))).is_err() {
                    error!("Output sink panicked, frame dropped");
                }
            }
            None => trace!("No output sink, dropping composed frame"),
        }
        self.stats.lock().record_delivery(render_time);
        true
    }
}

pub struct Compositor {
    pipeline: Arc<Pipeline>,
    frequency_hz: f32,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Compositor {
    pub fn new(
        source: Arc<ImageSource>,
        registry: Arc<OverlayRegistry>,
        frequency_hz: f32,
    ) -> Result<Self, ConfigError> {
        validate_frequency(frequency_hz)?;
        Ok(Self {
            pipeline: Arc::new(Pipeline {
                source,
                registry,
                sink: Latest::empty(),
                stopped: AtomicBool::new(false),
                ticking: Mutex::new(()),
                stats: Mutex::new(TickStats::default()),
            }),
            frequency_hz,
            timer: Mutex::new(None),
        })
    }

    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frequency_hz))
    }

    /// Replace the delivery target. Takes effect from the next tick.
    pub fn set_output_sink<F>(&self, sink: F)
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        self.pipeline.sink.store(Box::new(sink));
    }

    /// Run one composition now. Returns `false` when there was no base image and
    /// nothing was produced.
    pub fn tick(&self) -> bool {
        self.pipeline.tick()
    }

    /// Start ticking at the configured frequency on `handle`. Missed ticks are
    /// skipped rather than bunched up. Does nothing if the timer already runs.
    pub fn start(&self, handle: &Handle) {
        let mut timer = self.timer.lock();
        if timer.as_ref().map_or(false, |task| !task.is_finished()) {
            debug!("Compositor timer already running");
            return;
        }

        self.pipeline.stopped.store(false, Ordering::Release);
        let pipeline = Arc::clone(&self.pipeline);
        let period = self.period();
        *timer = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if pipeline.stopped.load(Ordering::Acquire) {
                    break;
                }
                pipeline.tick();
            }
        }));
        info!("Compositor started at {} Hz", self.frequency_hz);
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop the timer. A tick already in progress finishes; no new one starts.
    /// Idempotent, and fine to call when the timer never ran.
    pub fn shutdown(&self) {
        self.pipeline.stopped.store(true, Ordering::Release);
        if let Some(task) = self.timer.lock().take() {
            task.abort();
            info!("Compositor stopped");
        }
    }

    pub fn stats(&self) -> TickStats {
        self.pipeline.stats.lock().clone()
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
