//! Live image compositor: a base image stream with any number of plugin-drawn overlays
//! layered on top, composed at a fixed rate and handed to an output sink.
//!
//! Producers (the base image feed and each overlay's topic) write into lock-free
//! latest-value cells; the compositor reads them once per tick without ever blocking
//! the producers.

pub mod build_info;
pub mod compositor;
pub mod config;
pub mod error;
pub mod frame;
pub mod image_source;
pub mod latest;
pub mod layers;
pub mod logging;
pub mod overlay;
pub mod paint;
pub mod plugin;
pub mod registry;
pub mod transport;
pub mod utils;

pub use compositor::{Compositor, OutputSink};
pub use error::{ConfigError, DecodeError, FrameError, IndexError, PluginLoadError, TransportError};
pub use frame::{Frame, PixelFormat, RawImage};
pub use image_source::{ImageSource, ImageTransport};
pub use latest::Latest;
pub use overlay::{Overlay, OverlayStatus, PayloadSnapshot};
pub use plugin::{Annotation, ErasedPlugin, OverlayPlugin, PluginCatalog, PluginLoader};
pub use registry::{OverlayRegistry, OverlayRow};
pub use transport::{LocalBus, Message, Subscription, Transport};
