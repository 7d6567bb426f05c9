//! Overlay plugins and the catalog that instantiates them by class name.
//!
//! A plugin turns an opaque payload into a drawable [`OverlayPlugin::Annotation`] and
//! draws it onto a frame. Plugin authors implement [`OverlayPlugin`]; the pipeline only
//! ever sees the type-erased [`ErasedPlugin`] produced by the blanket impl.
//!
//! Plugins run on the render context, so `decode` and `draw` must not block.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[allow(unused_imports)]
use log::{debug, warn};

use crate::error::{DecodeError, PluginLoadError};
use crate::frame::Frame;

pub trait OverlayPlugin: Send + Sync + 'static {
    type Annotation: Send + 'static;

    /// Wire type of the payloads this plugin understands.
    fn payload_type_name(&self) -> &str;

    fn decode(&self, raw: &[u8]) -> Result<Self::Annotation, DecodeError>;

    /// Composite `annotation` onto `canvas`. Must not keep any reference to `canvas`.
    fn draw(&self, canvas: &mut Frame, annotation: &Self::Annotation);
}

/// A decoded annotation of whatever type the producing plugin uses.
pub struct Annotation {
    value: Box<dyn Any + Send>,
}

impl Annotation {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self { value: Box::new(value) }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Annotation { .. }")
    }
}

/// Object-safe view of an [`OverlayPlugin`].
pub trait ErasedPlugin: Send + Sync {
    fn type_name(&self) -> &str;

    fn decode_erased(&self, raw: &[u8]) -> Result<Annotation, DecodeError>;

    /// Returns `false` if `annotation` was not produced by this plugin.
    fn draw_erased(&self, canvas: &mut Frame, annotation: &Annotation) -> bool;
}

impl<P: OverlayPlugin> ErasedPlugin for P {
    fn type_name(&self) -> &str {
        self.payload_type_name()
    }

    fn decode_erased(&self, raw: &[u8]) -> Result<Annotation, DecodeError> {
        self.decode(raw).map(Annotation::new)
    }

    fn draw_erased(&self, canvas: &mut Frame, annotation: &Annotation) -> bool {
        match annotation.downcast_ref::<P::Annotation>() {
            Some(annotation) => {
                self.draw(canvas, annotation);
                true
            }
            None => false,
        }
    }
}

/// Plugin-loading collaborator.
pub trait PluginLoader: Send + Sync {
    fn instantiate(&self, class: &str) -> Result<Box<dyn ErasedPlugin>, PluginLoadError>;

    /// Class names that `instantiate` accepts, in display order.
    fn available_classes(&self) -> Vec<String>;
}

pub type PluginFactory = Box<dyn Fn() -> Result<Box<dyn ErasedPlugin>, String> + Send + Sync>;

/// Maps class names to factories. Adding a plugin type only needs a `register` call.
#[derive(Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: OverlayPlugin + Default>(&mut self, class: &str) -> &mut Self {
        self.register_factory(class, || Ok(Box::new(P::default()) as Box<dyn ErasedPlugin>))
    }

    pub fn register_factory<F>(&mut self, class: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn ErasedPlugin>, String> + Send + Sync + 'static,
    {
        if self.factories.insert(class.to_string(), Box::new(factory)).is_some() {
            warn!("Plugin class {} registered twice, keeping the latest factory", class);
        }
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl PluginLoader for PluginCatalog {
    fn instantiate(&self, class: &str) -> Result<Box<dyn ErasedPlugin>, PluginLoadError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| PluginLoadError::UnknownClass(class.to_string()))?;

        let instantiate_error = |reason: String| PluginLoadError::Instantiate { class: class.to_string(), reason };
        match panic::catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(plugin)) => {
                debug!("Instantiated plugin {} for {}", class, plugin.type_name());
                Ok(plugin)
            }
            Ok(Err(reason)) => Err(instantiate_error(reason)),
            Err(_) => Err(instantiate_error("factory panicked".to_string())),
        }
    }

    fn available_classes(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}
