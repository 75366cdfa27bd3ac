// THEORY:
// The `progress` module folds the stream of partial, file-keyed download
// events emitted during a backend load into one coherent picture. The
// external runtime reports per-file events where any field may be missing
// (a later event for a file often omits the total it reported earlier), so
// the tracker's whole job is careful merging: never forget a value a previous
// event taught us, and only derive an overall percentage once at least one
// file has reported a real size.

use std::collections::HashMap;

/// Lifecycle stage reported for a single file during a backend load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// The runtime has announced the file but not started transferring it.
    Initiate,
    /// Bytes are being transferred.
    Download,
    /// The file finished transferring.
    Done,
    /// The transfer failed.
    Error,
}

/// One partial progress report for one file. Fields other than `file` and
/// `status` may be absent on any given event.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Identifier of the file this event describes.
    pub file: String,
    /// Lifecycle stage; always present, always overwrites.
    pub status: ProgressStatus,
    /// Bytes transferred so far, if the event carried them.
    pub loaded: Option<u64>,
    /// Total size of the file, if the event carried it.
    pub total: Option<u64>,
}

/// Merges file-keyed progress events and derives the overall percentage.
///
/// The owning loader clears the tracker at the end of every load attempt,
/// so outside a load the entry set is empty.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: HashMap<String, ProgressEvent>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one event. New files are inserted as-is; for known files the
    /// status always overwrites while `loaded`/`total` only overwrite when
    /// the incoming event actually carries them, preserving previously known
    /// values when a later event omits them.
    pub fn on_event(&mut self, event: ProgressEvent) {
        if event.file.is_empty() {
            return;
        }
        match self.entries.get_mut(&event.file) {
            Some(known) => {
                known.status = event.status;
                if event.loaded.is_some() {
                    known.loaded = event.loaded;
                }
                if event.total.is_some() {
                    known.total = event.total;
                }
            }
            None => {
                self.entries.insert(event.file.clone(), event);
            }
        }
    }

    /// Overall percentage across all tracked files, 0.0 to 100.0.
    ///
    /// `None` until at least one file has reported a nonzero total; once all
    /// files reach `loaded == total` this is exactly 100.
    pub fn overall(&self) -> Option<f32> {
        let total: u64 = self.entries.values().filter_map(|p| p.total).sum();
        if total == 0 {
            return None;
        }
        let loaded: u64 = self.entries.values().filter_map(|p| p.loaded).sum();
        Some(loaded as f32 * 100.0 / total as f32)
    }

    /// Snapshot of the current per-file entries.
    pub fn entries(&self) -> Vec<ProgressEvent> {
        self.entries.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all entries. Called by the loader when a load attempt ends,
    /// regardless of outcome.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(file: &str, status: ProgressStatus, loaded: Option<u64>, total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            file: file.to_string(),
            status,
            loaded,
            total,
        }
    }

    #[test]
    fn overall_is_undefined_before_any_total_is_known() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.overall(), None);

        tracker.on_event(event("model.onnx", ProgressStatus::Initiate, None, None));
        assert_eq!(tracker.overall(), None);
    }

    #[test]
    fn overall_reaches_exactly_100_when_all_files_complete() {
        let mut tracker = ProgressTracker::new();
        tracker.on_event(event("model.onnx", ProgressStatus::Download, Some(0), Some(400)));
        tracker.on_event(event("config.json", ProgressStatus::Download, Some(0), Some(100)));

        tracker.on_event(event("model.onnx", ProgressStatus::Download, Some(200), None));
        let halfway = tracker.overall().expect("total is known");
        assert!((halfway - 40.0).abs() < f32::EPSILON);

        tracker.on_event(event("model.onnx", ProgressStatus::Done, Some(400), None));
        tracker.on_event(event("config.json", ProgressStatus::Done, Some(100), None));
        assert_eq!(tracker.overall(), Some(100.0));
    }

    #[test]
    fn merge_preserves_totals_when_later_events_omit_them() {
        let mut tracker = ProgressTracker::new();
        tracker.on_event(event("model.onnx", ProgressStatus::Initiate, None, Some(1000)));
        tracker.on_event(event("model.onnx", ProgressStatus::Download, Some(250), None));

        let entries = tracker.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].total, Some(1000));
        assert_eq!(entries[0].loaded, Some(250));
        assert_eq!(entries[0].status, ProgressStatus::Download);
    }

    #[test]
    fn events_without_a_file_identifier_are_ignored() {
        let mut tracker = ProgressTracker::new();
        tracker.on_event(event("", ProgressStatus::Download, Some(10), Some(10)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn clear_empties_the_tracker() {
        let mut tracker = ProgressTracker::new();
        tracker.on_event(event("model.onnx", ProgressStatus::Download, Some(5), Some(10)));
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.overall(), None);
    }
}
