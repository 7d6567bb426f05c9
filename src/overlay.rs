//! One overlay: a plugin bound to a subscribed topic.
//!
//! The receive path only swaps the latest raw payload into a lock-free cell. Decoding
//! happens lazily on the render context when the compositor asks for the current
//! annotation, so a slow plugin never delays delivery and a disabled overlay costs
//! nothing beyond the swap.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::error::TransportError;
use crate::frame::Frame;
use crate::latest::Latest;
use crate::plugin::{Annotation, ErasedPlugin};
use crate::transport::{Message, MessageCallback, Subscription, Transport};

/// The most recent raw payload received by an overlay.
#[derive(Debug, Clone)]
pub struct PayloadSnapshot {
    pub bytes: Arc<[u8]>,
    pub received_at: Instant,
    /// Arrival counter, unique per overlay.
    sequence: u64,
    /// Topic binding the payload arrived under.
    generation: u64,
}

/// Something went wrong with one particular payload.
#[derive(Debug, Clone)]
struct Failure {
    sequence: u64,
    reason: String,
}

/// Human-readable overlay state, shown in the status column.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayStatus {
    NoTopic,
    TransportError(String),
    NoData,
    Receiving { age: Duration },
    DecodeError(String),
    DrawError(String),
    ShutDown,
}

impl fmt::Display for OverlayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayStatus::NoTopic => write!(f, "no topic"),
            OverlayStatus::TransportError(reason) => write!(f, "transport error: {}", reason),
            OverlayStatus::NoData => write!(f, "no data yet"),
            OverlayStatus::Receiving { age } => write!(f, "receiving ({:.1}s ago)", age.as_secs_f32()),
            OverlayStatus::DecodeError(reason) => write!(f, "decode error: {}", reason),
            OverlayStatus::DrawError(reason) => write!(f, "draw error: {}", reason),
            OverlayStatus::ShutDown => write!(f, "shut down"),
        }
    }
}

/// Shared with the receive callback.
struct Inbox {
    generation: AtomicU64,
    sequence: AtomicU64,
    latest: Latest<PayloadSnapshot>,
}

impl Inbox {
    fn receive(&self, generation: u64, message: Message) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.latest.store(PayloadSnapshot {
            bytes: message.payload,
            received_at: Instant::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            generation,
        });
    }

    fn current(&self) -> Option<Arc<PayloadSnapshot>> {
        let snapshot = self.latest.load()?;
        if snapshot.generation != self.generation.load(Ordering::Acquire) {
            return None;
        }
        Some(snapshot)
    }
}

/// Cold-path state, touched only by topic changes, shutdown and status queries.
struct Binding {
    topic: String,
    subscription: Option<Subscription>,
    error: Option<TransportError>,
    shut_down: bool,
}

pub struct Overlay {
    plugin_class: String,
    plugin: Box<dyn ErasedPlugin>,
    payload_type: String,
    transport: Arc<dyn Transport>,
    enabled: AtomicBool,
    binding: Mutex<Binding>,
    inbox: Arc<Inbox>,
    last_decoded_at: Latest<Instant>,
    decode_failure: Latest<Failure>,
    draw_failure: Latest<Failure>,
}

impl Overlay {
    /// A new, enabled overlay with no topic.
    pub fn new(plugin_class: &str, plugin: Box<dyn ErasedPlugin>, transport: Arc<dyn Transport>) -> Self {
        let payload_type = plugin.type_name().to_string();
        Self {
            plugin_class: plugin_class.to_string(),
            plugin,
            payload_type,
            transport,
            enabled: AtomicBool::new(true),
            binding: Mutex::new(Binding { topic: String::new(), subscription: None, error: None, shut_down: false }),
            inbox: Arc::new(Inbox {
                generation: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                latest: Latest::empty(),
            }),
            last_decoded_at: Latest::empty(),
            decode_failure: Latest::empty(),
            draw_failure: Latest::empty(),
        }
    }

    pub fn plugin_class(&self) -> &str {
        &self.plugin_class
    }

    pub fn payload_type_name(&self) -> &str {
        &self.payload_type
    }

    pub fn topic(&self) -> String {
        self.binding.lock().topic.clone()
    }

    /// Replace the subscription. The old one is torn down before the new one is
    /// installed and any payload received so far is discarded. Never waits for data.
    /// A failed subscription leaves the overlay without one; the error shows in
    /// [`Overlay::status`].
    pub fn set_topic(&self, topic: &str) {
        let mut binding = self.binding.lock();
        // Dropping the previous subscription unsubscribes it.
        binding.subscription = None;
        binding.error = None;
        binding.shut_down = false;
        binding.topic = topic.to_string();

        let generation = self.inbox.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inbox.latest.clear();
        self.decode_failure.clear();
        self.draw_failure.clear();

        if topic.is_empty() {
            debug!("Overlay {} unbound", self.plugin_class);
            return;
        }

        let inbox = Arc::clone(&self.inbox);
        let on_message: MessageCallback = Arc::new(move |message| inbox.receive(generation, message));
        match Subscription::open(&self.transport, topic, &self.payload_type, on_message) {
            Ok(subscription) => {
                info!("Overlay {} subscribed to '{}'", self.plugin_class, topic);
                binding.subscription = Some(subscription);
            }
            Err(e) => {
                warn!("Overlay {} failed to subscribe to '{}': {}", self.plugin_class, topic, e);
                binding.error = Some(e);
            }
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.binding.lock().subscription.is_some()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The raw payload received under the current topic, if any.
    pub fn latest_payload(&self) -> Option<Arc<PayloadSnapshot>> {
        self.inbox.current()
    }

    pub fn last_received_at(&self) -> Option<Instant> {
        self.inbox.current().map(|snapshot| snapshot.received_at)
    }

    /// Time of the last successful decode, kept across later decode failures.
    pub fn last_decoded_at(&self) -> Option<Instant> {
        self.last_decoded_at.load().map(|at| *at)
    }

    /// Decode the latest payload. `None` if nothing arrived under the current topic or
    /// the plugin rejected the payload; a rejection is recorded for [`Overlay::status`].
    pub fn current_annotation(&self) -> Option<Annotation> {
        let snapshot = self.inbox.current()?;
        self.decode(&snapshot)
    }

    fn decode(&self, snapshot: &PayloadSnapshot) -> Option<Annotation> {
        // A payload that failed once fails again; skip it until the next one arrives.
        if failed_on(&self.decode_failure, snapshot.sequence) {
            return None;
        }
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| self.plugin.decode_erased(&snapshot.bytes)));
        let reason = match decoded {
            Ok(Ok(annotation)) => {
                self.last_decoded_at.store(Instant::now());
                return Some(annotation);
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        warn!("Overlay {} could not decode payload: {}", self.plugin_class, reason);
        self.decode_failure.store(Failure { sequence: snapshot.sequence, reason });
        None
    }

    /// Decode and draw onto `canvas`. A plugin panicking in either step is contained
    /// here and only marks this overlay as failed until its next payload. Returns whether anything
    /// was drawn.
    pub fn render(&self, canvas: &mut Frame) -> bool {
        let Some(snapshot) = self.inbox.current() else {
            return false;
        };
        if failed_on(&self.draw_failure, snapshot.sequence) {
            return false;
        }
        let Some(annotation) = self.decode(&snapshot) else {
            return false;
        };

        let drawn = panic::catch_unwind(AssertUnwindSafe(|| self.plugin.draw_erased(canvas, &annotation)));
        let reason = match drawn {
            Ok(true) => return true,
            Ok(false) => "annotation type does not match plugin".to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        warn!("Overlay {} failed to draw: {}", self.plugin_class, reason);
        self.draw_failure.store(Failure { sequence: snapshot.sequence, reason });
        false
    }

    pub fn status(&self) -> OverlayStatus {
        {
            let binding = self.binding.lock();
            if binding.shut_down {
                return OverlayStatus::ShutDown;
            }
            if let Some(error) = &binding.error {
                return OverlayStatus::TransportError(error.to_string());
            }
            if binding.topic.is_empty() {
                return OverlayStatus::NoTopic;
            }
        }
        let Some(snapshot) = self.inbox.current() else {
            return OverlayStatus::NoData;
        };
        // Failures recorded against an older payload no longer apply.
        if let Some(failure) = self.decode_failure.load().filter(|f| f.sequence == snapshot.sequence) {
            return OverlayStatus::DecodeError(failure.reason.clone());
        }
        if let Some(failure) = self.draw_failure.load().filter(|f| f.sequence == snapshot.sequence) {
            return OverlayStatus::DrawError(failure.reason.clone());
        }
        OverlayStatus::Receiving { age: snapshot.received_at.elapsed() }
    }

    /// Tear down the subscription. The last payload stays readable. Idempotent.
    pub fn shutdown(&self) {
        let mut binding = self.binding.lock();
        if binding.shut_down {
            return;
        }
        binding.shut_down = true;
        if binding.subscription.take().is_some() {
            debug!("Overlay {} shut down", self.plugin_class);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.binding.lock().shut_down
    }
}

fn failed_on(failure: &Latest<Failure>, sequence: u64) -> bool {
    failure.load().map_or(false, |f| f.sequence == sequence)
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("plugin_class", &self.plugin_class)
            .field("payload_type", &self.payload_type)
            .field("topic", &self.topic())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("plugin panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("plugin panicked: {}", message)
    } else {
        "plugin panicked".to_string()
    }
}
