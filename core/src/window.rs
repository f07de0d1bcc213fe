//! Keyed store of 32 KiB decompression-history windows (spec.md §4.G),
//! grounded on `WindowMap.hpp`: a `BTreeMap` keyed by compressed bit offset,
//! idempotent-on-equal-value insertion, and range eviction behind a cursor.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// A window is either `None` (the offset is a stream boundary — no history
/// needed) or `Some` 32 KiB of decoded bytes preceding that offset.
pub type Window = Option<Arc<[u8]>>;

/// Thread-safe map from compressed bit offset to the window needed to decode
/// the chunk starting there (spec.md §4.G, §9 "cyclic ownership... model as
/// dataflow; windows are immutable values keyed by offset; publication is
/// one-shot").
pub struct WindowMap {
    windows: Mutex<BTreeMap<u64, Window>>,
}

impl WindowMap {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Publishes the window for `encoded_offset_bits`. Reinserting the same
    /// key with an equal window is a no-op; reinserting with a *different*
    /// window is an error (spec.md §4.G: "errors on unequal re-insertion").
    pub fn insert(&self, encoded_offset_bits: u64, window: Window) -> Result<()> {
        let mut windows = self.windows.lock().expect("window map mutex poisoned");
        match windows.get(&encoded_offset_bits) {
            None => {
                windows.insert(encoded_offset_bits, window);
                Ok(())
            }
            Some(existing) => {
                if windows_equal(existing, &window) {
                    Ok(())
                } else {
                    Err(Error::WindowConflict {
                        offset: encoded_offset_bits,
                    })
                }
            }
        }
    }

    pub fn get(&self, encoded_offset_bits: u64) -> Option<Window> {
        self.windows
            .lock()
            .expect("window map mutex poisoned")
            .get(&encoded_offset_bits)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().expect("window map mutex poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().expect("window map mutex poisoned").len()
    }

    /// Drops every entry with a key strictly below `encoded_offset_bits`
    /// (spec.md §4.F eviction, `releaseUpTo` in the reference map).
    pub fn release_up_to(&self, encoded_offset_bits: u64) {
        let mut windows = self.windows.lock().expect("window map mutex poisoned");
        let tail = windows.split_off(&encoded_offset_bits);
        *windows = tail;
    }
}

impl Default for WindowMap {
    fn default() -> Self {
        Self::new()
    }
}

fn windows_equal(a: &Window, b: &Window) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x.as_ref() == y.as_ref(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let map = WindowMap::new();
        let window: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        map.insert(100, Some(window.clone())).unwrap();
        let got = map.get(100).unwrap();
        assert_eq!(got.unwrap().as_ref(), window.as_ref());
    }

    #[test]
    fn reinserting_equal_window_is_a_no_op() {
        let map = WindowMap::new();
        let window: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        map.insert(100, Some(window.clone())).unwrap();
        assert!(map.insert(100, Some(window)).is_ok());
    }

    #[test]
    fn reinserting_different_window_errors() {
        let map = WindowMap::new();
        map.insert(100, Some(Arc::from(vec![1u8]))).unwrap();
        let err = map.insert(100, Some(Arc::from(vec![2u8]))).unwrap_err();
        assert!(matches!(err, Error::WindowConflict { offset: 100 }));
    }

    #[test]
    fn stream_boundary_is_a_none_window() {
        let map = WindowMap::new();
        map.insert(0, None).unwrap();
        assert_eq!(map.get(0), Some(None));
    }

    #[test]
    fn missing_key_returns_none() {
        let map = WindowMap::new();
        assert!(map.get(42).is_none());
    }

    #[test]
    fn release_up_to_drops_earlier_entries_only() {
        let map = WindowMap::new();
        map.insert(0, None).unwrap();
        map.insert(100, None).unwrap();
        map.insert(200, None).unwrap();
        map.release_up_to(150);
        assert!(map.get(0).is_none());
        assert!(map.get(100).is_none());
        assert!(map.get(200).is_some());
        assert_eq!(map.len(), 1);
    }
}
