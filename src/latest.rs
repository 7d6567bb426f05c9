//! Lock-free "latest value" cell.
//!
//! Producers replace the whole value with a single atomic pointer swap, consumers get a
//! cloned `Arc` of whatever value was current at load time. Nothing is ever mutated in
//! place, so a reader sees either the previous complete value or the new complete value.
//! Retired values are reclaimed through crossbeam's epoch GC once no pinned reader can
//! still observe them.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Owned, Shared};

pub struct Latest<T> {
    slot: Atomic<Arc<T>>,
}

impl<T> Latest<T> {
    /// A cell holding nothing.
    pub fn empty() -> Self {
        Self { slot: Atomic::null() }
    }

    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(value: Arc<T>) -> Self {
        Self { slot: Atomic::new(value) }
    }

    /// Returns the current value without blocking, or `None` if the cell is empty.
    pub fn load(&self) -> Option<Arc<T>> {
        let guard = epoch::pin();
        let current = self.slot.load(Ordering::Acquire, &guard);
        // SAFETY: every non-null pointer in `slot` was installed by `replace` and is only
        // destroyed through `defer_destroy` after being unlinked, which cannot run while
        // `guard` keeps this thread pinned.
        unsafe { current.as_ref() }.map(Arc::clone)
    }

    pub fn store(&self, value: T) {
        self.replace(Some(Arc::new(value)));
    }

    pub fn store_arc(&self, value: Arc<T>) {
        self.replace(Some(value));
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.slot.load(Ordering::Acquire, &guard).is_null()
    }

    fn replace(&self, next: Option<Arc<T>>) {
        let guard = epoch::pin();
        let next = match next {
            Some(value) => Owned::new(value).into_shared(&guard),
            None => Shared::null(),
        };
        let previous = self.slot.swap(next, Ordering::AcqRel, &guard);
        if !previous.is_null() {
            // SAFETY: `previous` is no longer reachable from `slot`; readers that loaded it
            // are pinned, so destruction is deferred until they unpin.
            unsafe { guard.defer_destroy(previous) };
        }
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for Latest<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the cell any more.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.slot.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Latest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Latest").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    #[test]
    fn test_empty_then_store() {
        let cell = Latest::empty();
        assert!(cell.is_empty());
        assert!(cell.load().is_none());

        cell.store(7u32);
        assert_eq!(cell.load().as_deref(), Some(&7));

        cell.store(9u32);
        assert_eq!(cell.load().as_deref(), Some(&9));

        cell.clear();
        assert!(cell.load().is_none());
    }

    #[test]
    fn test_loaded_value_outlives_replacement() {
        let cell = Latest::new(String::from("first"));
        let held = cell.load().unwrap();
        cell.store(String::from("second"));
        assert_eq!(held.as_str(), "first");
        assert_eq!(cell.load().unwrap().as_str(), "second");
    }

    #[test]
    fn test_drop_releases_value() {
        let value = Arc::new(5u8);
        {
            let cell = Latest::from_arc(Arc::clone(&value));
            assert_eq!(Arc::strong_count(&value), 2);
            drop(cell);
        }
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_concurrent_reads_never_tear() {
        // Each published value is internally consistent: every element equals the first.
        let cell = Arc::new(Latest::<Vec<u64>>::empty());
        let done = Arc::new(AtomicBool::new(false));
        let iterations = 5_000u64;

        let writer = {
            let cell = Arc::clone(&cell);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..iterations {
                    cell.store(vec![i; 64]);
                }
                done.store(true, Ordering::Release);
            })
        };

        let observed = Arc::new(AtomicUsize::new(0));
        let reader = {
            let cell = Arc::clone(&cell);
            let done = Arc::clone(&done);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                let mut last_seen = 0u64;
                while !done.load(Ordering::Acquire) {
                    if let Some(value) = cell.load() {
                        let first = value[0];
                        assert!(value.iter().all(|&v| v == first));
                        assert!(first < iterations);
                        // The writer only moves forward.
                        assert!(first >= last_seen);
                        last_seen = first;
                        observed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(cell.load().unwrap()[0], iterations - 1);
    }
}
