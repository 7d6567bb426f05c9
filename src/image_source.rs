/// Base image source
///
/// Holds the latest base frame behind a lock-free cell. Frames are converted to RGBA on
/// the delivery thread, then published with one pointer swap; the compositor reads
/// whatever is current without ever blocking the publisher.
use std::sync::Arc;

use parking_lot::Mutex;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::error::{FrameError, TransportError};
use crate::frame::{Frame, RawImage};
use crate::latest::Latest;
use crate::transport::{Message, MessageCallback, Subscription, Transport};

pub const RAW_IMAGE_TYPE: &str = "sensor_msgs/msg/Image";
pub const COMPRESSED_IMAGE_TYPE: &str = "sensor_msgs/msg/CompressedImage";

/// How base images are carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTransport {
    Raw,
    Compressed,
}

impl ImageTransport {
    pub fn parse(name: &str) -> Result<Self, TransportError> {
        match name {
            "raw" => Ok(ImageTransport::Raw),
            "compressed" => Ok(ImageTransport::Compressed),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ImageTransport::Raw => RAW_IMAGE_TYPE,
            ImageTransport::Compressed => COMPRESSED_IMAGE_TYPE,
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Frame, FrameError> {
        match self {
            ImageTransport::Raw => RawImage::decode(payload)?.to_frame(),
            ImageTransport::Compressed => Frame::decode_encoded(payload),
        }
    }
}

/// Split `"<topic> [transport]"` as typed in the topic picker.
pub fn parse_topic_text(text: &str) -> Result<Option<(String, ImageTransport)>, TransportError> {
    let mut parts = text.split_whitespace();
    let Some(topic) = parts.next() else {
        return Ok(None);
    };
    let transport = match parts.next() {
        Some(name) => ImageTransport::parse(name)?,
        None => ImageTransport::Raw,
    };
    if let Some(extra) = parts.next() {
        return Err(TransportError::InvalidTopic(format!("{} (unexpected '{}')", text.trim(), extra)));
    }
    Ok(Some((topic.to_string(), transport)))
}

struct Binding {
    text: String,
    subscription: Option<Subscription>,
}

pub struct ImageSource {
    latest: Arc<Latest<Frame>>,
    transport: Arc<dyn Transport>,
    binding: Mutex<Binding>,
}

impl ImageSource {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            latest: Arc::new(Latest::empty()),
            transport,
            binding: Mutex::new(Binding { text: String::new(), subscription: None }),
        }
    }

    /// Replace the current frame. Never blocks.
    pub fn publish(&self, image: Frame) {
        self.latest.store(image);
    }

    /// The most recent frame, shared, or `None` if nothing arrived since the last reset.
    pub fn current_image(&self) -> Option<Arc<Frame>> {
        self.latest.load()
    }

    pub fn reset(&self) {
        self.latest.clear();
    }

    /// Topic text as last passed to [`ImageSource::set_topic`].
    pub fn topic(&self) -> String {
        self.binding.lock().text.clone()
    }

    /// Switch to another base topic, given as `"<topic>"` or `"<topic> <transport>"`.
    /// The current frame is dropped first. An empty text only resets.
    pub fn set_topic(&self, text: &str) -> Result<(), TransportError> {
        let mut binding = self.binding.lock();
        binding.subscription = None;
        binding.text = text.trim().to_string();
        self.reset();

        let Some((topic, transport)) = parse_topic_text(text)? else {
            return Ok(());
        };

        let latest = Arc::clone(&self.latest);
        let on_message: MessageCallback = Arc::new(move |message: Message| {
            match transport.decode(&message.payload) {
                Ok(frame) => latest.store(frame),
                Err(e) => warn!("Dropping undecodable {} frame: {}", message.type_name, e),
            }
        });
        let subscription = Subscription::open(&self.transport, &topic, transport.type_name(), on_message)
            .map_err(|e| {
                warn!("Loading image transport for '{}' failed: {}", topic, e);
                e
            })?;
        info!("Image source bound to '{}' ({:?})", topic, transport);
        binding.subscription = Some(subscription);
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.binding.lock().subscription.is_some()
    }

    /// Stop receiving. The last frame stays available until [`ImageSource::reset`].
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.binding.lock().subscription.take().is_some() {
            debug!("Image source shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::transport::LocalBus;
    use image::Rgba;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn raw_payload(width: u32, height: u32, value: u8) -> Vec<u8> {
        RawImage::packed(width, height, PixelFormat::Mono8, vec![value; (width * height) as usize]).encode()
    }

    #[test]
    fn test_parse_topic_text() {
        assert_eq!(parse_topic_text("").unwrap(), None);
        assert_eq!(parse_topic_text("/cam").unwrap(), Some(("/cam".to_string(), ImageTransport::Raw)));
        assert_eq!(
            parse_topic_text("/cam compressed").unwrap(),
            Some(("/cam".to_string(), ImageTransport::Compressed))
        );
        assert!(matches!(parse_topic_text("/cam theora"), Err(TransportError::UnknownTransport(_))));
        assert!(parse_topic_text("/cam raw extra").is_err());
    }

    #[test]
    fn test_publish_reset_shutdown() {
        let bus = Arc::new(LocalBus::new());
        let source = ImageSource::new(bus.clone());
        assert!(source.current_image().is_none());

        source.set_topic("/cam").unwrap();
        assert_eq!(source.topic(), "/cam");
        bus.publish("/cam", RAW_IMAGE_TYPE, raw_payload(2, 2, 255));
        let frame = source.current_image().unwrap();
        assert_eq!(frame.pixel(1, 1), Some(Rgba([255, 255, 255, 255])));

        // Garbage keeps the previous frame.
        bus.publish("/cam", RAW_IMAGE_TYPE, vec![1u8, 2, 3]);
        assert!(Arc::ptr_eq(&frame, &source.current_image().unwrap()));

        source.shutdown();
        source.shutdown();
        assert!(!source.is_subscribed());
        assert_eq!(bus.total_subscribers(), 0);
        assert!(source.current_image().is_some());

        source.reset();
        assert!(source.current_image().is_none());
    }

    #[test]
    fn test_topic_change_resets_image() {
        let bus = Arc::new(LocalBus::new());
        let source = ImageSource::new(bus.clone());
        source.publish(Frame::new(1, 1));
        source.set_topic("/other compressed").unwrap();
        assert!(source.current_image().is_none());
        assert_eq!(bus.subscriber_count("/other"), 1);

        source.set_topic("").unwrap();
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn test_failed_subscription_surfaces_error() {
        let bus = Arc::new(LocalBus::new());
        bus.advertise("/cam", COMPRESSED_IMAGE_TYPE);
        let source = ImageSource::new(bus.clone());
        assert!(matches!(source.set_topic("/cam"), Err(TransportError::TypeMismatch { .. })));
        assert!(!source.is_subscribed());
        assert!(source.set_topic("/cam compressed").is_ok());
    }

    #[test]
    fn test_oversized_raw_frame_is_dropped() {
        let bus = Arc::new(LocalBus::new());
        let source = ImageSource::new(bus.clone());
        source.set_topic("/cam").unwrap();
        bus.publish("/cam", RAW_IMAGE_TYPE, raw_payload(1, 1, 7));
        let frame = source.current_image().unwrap();

        let oversized = RawImage { width: 0x4000_0000, height: 1, step: 0, format: PixelFormat::Rgba8, data: vec![0; 16] };
        assert_eq!(bus.publish("/cam", RAW_IMAGE_TYPE, oversized.encode()), 1);
        assert!(Arc::ptr_eq(&frame, &source.current_image().unwrap()));
    }

    #[test]
    fn test_no_frame_after_shutdown_returns() {
        let bus = Arc::new(LocalBus::new());
        let source = ImageSource::new(bus.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let publisher = {
            let bus = Arc::clone(&bus);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut value = 0u8;
                while !stop.load(Ordering::Acquire) {
                    bus.publish("/cam", RAW_IMAGE_TYPE, raw_payload(4, 4, value));
                    value = value.wrapping_add(1);
                }
            })
        };
        let wait_for_frame = |source: &ImageSource| {
            while source.current_image().is_none() {
                thread::yield_now();
            }
        };

        for _ in 0..20 {
            source.set_topic("/cam").unwrap();
            wait_for_frame(&source);
            source.set_topic("/quiet").unwrap();
            thread::sleep(Duration::from_millis(1));
            assert!(source.current_image().is_none());
        }

        source.set_topic("/cam").unwrap();
        wait_for_frame(&source);
        source.shutdown();
        let frozen = source.current_image().unwrap();
        thread::sleep(Duration::from_millis(5));
        assert!(Arc::ptr_eq(&frozen, &source.current_image().unwrap()));

        stop.store(true, Ordering::Release);
        publisher.join().unwrap();
    }

    #[test]
    fn test_reader_only_sees_published_frames() {
        // Every published frame is uniform; a torn read would mix two values.
        let source = Arc::new(ImageSource::new(Arc::new(LocalBus::new())));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let source = Arc::clone(&source);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for value in 0..=200u8 {
                    source.publish(Frame::filled(16, 16, Rgba([value, value, value, 255])));
                }
                done.store(true, Ordering::Release);
            })
        };

        while !done.load(Ordering::Acquire) {
            if let Some(frame) = source.current_image() {
                let first = frame.pixel(0, 0).unwrap();
                assert!(frame.as_image().pixels().all(|p| *p == first));
            }
        }
        writer.join().unwrap();
        assert_eq!(source.current_image().unwrap().pixel(0, 0), Some(Rgba([200, 200, 200, 255])));
    }
}
