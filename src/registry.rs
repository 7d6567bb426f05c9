//! Ordered overlay collection.
//!
//! Membership is a copy-on-write list behind a [`Latest`] cell: structural edits build a
//! new list and swap it in, readers (the compositor, a table view) take a snapshot that
//! stays stable however the registry changes afterwards. Registry order is both row
//! order and draw order, bottom first.

use std::sync::Arc;

use parking_lot::Mutex;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::config::OverlayEntry;
use crate::error::{IndexError, PluginLoadError};
use crate::latest::Latest;
use crate::overlay::{Overlay, OverlayStatus};
use crate::plugin::PluginLoader;
use crate::transport::Transport;

/// A stable view of the registry at one point in time.
pub type OverlayList = Arc<Vec<Arc<Overlay>>>;

/// Columns shown by a passive table view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Topic,
    Type,
    Status,
}

impl Column {
    pub const ALL: [Column; 3] = [Column::Topic, Column::Type, Column::Status];

    pub fn header(&self) -> &'static str {
        match self {
            Column::Topic => "Topic",
            Column::Type => "Type",
            Column::Status => "Status",
        }
    }
}

/// Display data for one registry row.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRow {
    pub plugin_class: String,
    pub topic: String,
    pub payload_type: String,
    pub status: OverlayStatus,
    pub enabled: bool,
}

impl OverlayRow {
    pub fn cell(&self, column: Column) -> String {
        match column {
            Column::Topic => self.topic.clone(),
            Column::Type => self.payload_type.clone(),
            Column::Status => self.status.to_string(),
        }
    }
}

pub struct OverlayRegistry {
    loader: Arc<dyn PluginLoader>,
    transport: Arc<dyn Transport>,
    overlays: Latest<Vec<Arc<Overlay>>>,
    /// Serialises structural edits; readers never take it.
    edit: Mutex<()>,
}

impl OverlayRegistry {
    pub fn new(loader: Arc<dyn PluginLoader>, transport: Arc<dyn Transport>) -> Self {
        Self {
            loader,
            transport,
            overlays: Latest::new(Vec::new()),
            edit: Mutex::new(()),
        }
    }

    /// Class names the plugin loader can instantiate, for building an "add" menu.
    pub fn available_classes(&self) -> Vec<String> {
        self.loader.available_classes()
    }

    /// Instantiate `plugin_class` and append it as a new, enabled, unbound overlay.
    /// Returns its position. On failure the registry is unchanged.
    pub fn add(&self, plugin_class: &str) -> Result<usize, PluginLoadError> {
        self.add_overlay(plugin_class, |_| {}).map(|(position, _)| position)
    }

    /// Instantiate, let `configure` set up the overlay before any tick can see it, then
    /// append it.
    fn add_overlay<F>(&self, plugin_class: &str, configure: F) -> Result<(usize, Arc<Overlay>), PluginLoadError>
    where
        F: FnOnce(&Overlay),
    {
        let plugin = self.loader.instantiate(plugin_class).map_err(|e| {
            warn!("Could not add overlay: {}", e);
            e
        })?;
        let overlay = Arc::new(Overlay::new(plugin_class, plugin, Arc::clone(&self.transport)));
        configure(&overlay);

        let _edit = self.edit.lock();
        let mut next = Vec::clone(&self.list());
        next.push(Arc::clone(&overlay));
        let position = next.len() - 1;
        self.overlays.store(next);
        info!("Added overlay {} at position {}", plugin_class, position);
        Ok((position, overlay))
    }

    /// Tear down and remove the overlay at `position`; later entries shift down by one.
    pub fn remove(&self, position: usize) -> Result<(), IndexError> {
        let removed = {
            let _edit = self.edit.lock();
            let current = self.list();
            if position >= current.len() {
                return Err(IndexError { position, len: current.len() });
            }
            let mut next = Vec::clone(&current);
            let removed = next.remove(position);
            self.overlays.store(next);
            removed
        };
        removed.shutdown();
        info!("Removed overlay {} from position {}", removed.plugin_class(), position);
        Ok(())
    }

    /// Snapshot of the current overlays in registry order.
    pub fn list(&self) -> OverlayList {
        self.overlays.load().unwrap_or_default()
    }

    pub fn get(&self, position: usize) -> Result<Arc<Overlay>, IndexError> {
        let list = self.list();
        list.get(position).cloned().ok_or(IndexError { position, len: list.len() })
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    pub fn set_topic(&self, position: usize, topic: &str) -> Result<(), IndexError> {
        self.get(position)?.set_topic(topic);
        Ok(())
    }

    pub fn set_enabled(&self, position: usize, enabled: bool) -> Result<(), IndexError> {
        self.get(position)?.set_enabled(enabled);
        Ok(())
    }

    pub fn rows(&self) -> Vec<OverlayRow> {
        self.list()
            .iter()
            .map(|overlay| OverlayRow {
                plugin_class: overlay.plugin_class().to_string(),
                topic: overlay.topic(),
                payload_type: overlay.payload_type_name().to_string(),
                status: overlay.status(),
                enabled: overlay.is_enabled(),
            })
            .collect()
    }

    /// Current state in the form the settings collaborator persists.
    pub fn entries(&self) -> Vec<OverlayEntry> {
        self.list()
            .iter()
            .map(|overlay| OverlayEntry {
                plugin_class: overlay.plugin_class().to_string(),
                topic: overlay.topic(),
                enabled: overlay.is_enabled(),
            })
            .collect()
    }

    /// Append overlays from persisted entries. Entries whose plugin cannot be loaded
    /// are skipped; their errors are returned.
    pub fn restore(&self, entries: &[OverlayEntry]) -> Vec<PluginLoadError> {
        let mut failures = Vec::new();
        for entry in entries {
            let configured = self.add_overlay(&entry.plugin_class, |overlay| {
                overlay.set_topic(&entry.topic);
                overlay.set_enabled(entry.enabled);
            });
            if let Err(e) = configured {
                failures.push(e);
            }
        }
        failures
    }

    /// Tear down every overlay's subscription. Entries stay listed.
    pub fn shutdown_all(&self) {
        for overlay in self.list().iter() {
            overlay.shutdown();
        }
        debug!("All overlay subscriptions shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::frame::Frame;
    use crate::plugin::{OverlayPlugin, PluginCatalog};
    use crate::transport::LocalBus;

    #[derive(Default)]
    struct Noop;

    impl OverlayPlugin for Noop {
        type Annotation = ();

        fn payload_type_name(&self) -> &str {
            "test/Noop"
        }

        fn decode(&self, _raw: &[u8]) -> Result<(), DecodeError> {
            Ok(())
        }

        fn draw(&self, _canvas: &mut Frame, _annotation: &()) {}
    }

    fn registry() -> (Arc<LocalBus>, OverlayRegistry) {
        let mut catalog = PluginCatalog::new();
        catalog.register::<Noop>("test/Noop");
        let bus = Arc::new(LocalBus::new());
        (bus.clone(), OverlayRegistry::new(Arc::new(catalog), bus))
    }

    fn topics(registry: &OverlayRegistry) -> Vec<String> {
        registry.list().iter().map(|overlay| overlay.topic()).collect()
    }

    #[test]
    fn test_add_appends_in_order() {
        let (_bus, registry) = registry();
        assert!(registry.is_empty());
        assert_eq!(registry.add("test/Noop"), Ok(0));
        assert_eq!(registry.add("test/Noop"), Ok(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.available_classes(), vec!["test/Noop"]);

        let overlay = registry.get(1).unwrap();
        assert!(overlay.is_enabled());
        assert_eq!(overlay.status(), OverlayStatus::NoTopic);
    }

    #[test]
    fn test_unknown_plugin_leaves_registry_unchanged() {
        let (_bus, registry) = registry();
        registry.add("test/Noop").unwrap();
        assert_eq!(
            registry.add("UnknownPlugin"),
            Err(PluginLoadError::UnknownClass("UnknownPlugin".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_keeps_relative_order() {
        let (bus, registry) = registry();
        for topic in ["/a", "/b", "/c", "/d"] {
            let position = registry.add("test/Noop").unwrap();
            registry.set_topic(position, topic).unwrap();
        }
        assert_eq!(bus.total_subscribers(), 4);

        registry.remove(1).unwrap();
        assert_eq!(topics(&registry), vec!["/a", "/c", "/d"]);
        assert_eq!(bus.subscriber_count("/b"), 0);
        assert_eq!(bus.total_subscribers(), 3);

        assert_eq!(registry.remove(3), Err(IndexError { position: 3, len: 3 }));
        assert_eq!(registry.len(), 3);
        assert!(registry.set_enabled(7, false).is_err());
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let (_bus, registry) = registry();
        registry.add("test/Noop").unwrap();
        let snapshot = registry.list();
        registry.add("test/Noop").unwrap();
        registry.remove(0).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&snapshot[0], &registry.list()[0]));
    }

    #[test]
    fn test_entries_restore_and_rows() {
        let (bus, registry) = registry();
        let entries = vec![
            OverlayEntry { plugin_class: "test/Noop".into(), topic: "/x".into(), enabled: false },
            OverlayEntry { plugin_class: "test/Gone".into(), topic: "/y".into(), enabled: true },
            OverlayEntry { plugin_class: "test/Noop".into(), topic: String::new(), enabled: true },
        ];
        let failures = registry.restore(&entries);
        assert_eq!(failures, vec![PluginLoadError::UnknownClass("test/Gone".into())]);
        assert_eq!(registry.entries(), vec![entries[0].clone(), entries[2].clone()]);
        assert_eq!(bus.subscriber_count("/x"), 1);

        let rows = registry.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cell(Column::Topic), "/x");
        assert_eq!(rows[0].cell(Column::Type), "test/Noop");
        assert_eq!(rows[0].cell(Column::Status), "no data yet");
        assert!(!rows[0].enabled);
        assert_eq!(rows[1].cell(Column::Status), "no topic");
        assert_eq!(Column::ALL.map(|c| c.header()), ["Topic", "Type", "Status"]);
    }

    #[test]
    fn test_restore_configures_its_own_overlays_under_concurrent_removal() {
        let (_bus, registry) = registry();
        let registry = Arc::new(registry);
        let entries: Vec<OverlayEntry> = (0..200)
            .map(|i| OverlayEntry { plugin_class: "test/Noop".into(), topic: format!("/t{}", i), enabled: i % 2 == 0 })
            .collect();

        let remover = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    while registry.remove(0).is_err() {
                        std::thread::yield_now();
                    }
                }
            })
        };
        assert!(registry.restore(&entries).is_empty());
        remover.join().unwrap();

        assert_eq!(registry.len(), 100);
        for overlay in registry.list().iter() {
            let topic = overlay.topic();
            let index: usize = topic.trim_start_matches("/t").parse().unwrap();
            assert_eq!(overlay.is_enabled(), index % 2 == 0, "overlay on {}", topic);
        }
    }

    #[test]
    fn test_shutdown_all() {
        let (bus, registry) = registry();
        for topic in ["/a", "/b"] {
            let position = registry.add("test/Noop").unwrap();
            registry.set_topic(position, topic).unwrap();
        }
        registry.shutdown_all();
        registry.shutdown_all();
        assert_eq!(bus.total_subscribers(), 0);
        assert_eq!(registry.len(), 2);
        assert!(registry.list().iter().all(|overlay| overlay.is_shut_down()));
    }
}
