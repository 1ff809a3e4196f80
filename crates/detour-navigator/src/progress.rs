//! Progress reporting while waiting for tile builds

/// Receives progress of a blocking wait, e.g. a loading screen bar.
pub trait Listener {
    fn set_label(&mut self, _label: &str) {}

    fn set_progress_range(&mut self, _range: usize) {}

    fn set_progress(&mut self, _value: usize) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl Listener for NullListener {}

/// What a wait blocks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitConditionType {
    /// Jobs for tiles near the player are done
    #[default]
    RequiredTilesPresent,
    /// Every queued and running job is done
    AllJobsDone,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every call for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingListener {
        pub labels: Vec<String>,
        pub range: Option<usize>,
        pub values: Vec<usize>,
    }

    impl Listener for RecordingListener {
        fn set_label(&mut self, label: &str) {
            self.labels.push(label.to_string());
        }

        fn set_progress_range(&mut self, range: usize) {
            self.range = Some(range);
        }

        fn set_progress(&mut self, value: usize) {
            self.values.push(value);
        }
    }

    #[test]
    fn test_null_listener_accepts_calls() {
        let mut listener = NullListener;
        listener.set_label("building");
        listener.set_progress_range(10);
        listener.set_progress(5);
    }

    #[test]
    fn test_recording_listener() {
        let mut listener = RecordingListener::default();
        listener.set_progress_range(3);
        listener.set_progress(1);
        listener.set_progress(3);
        assert_eq!(listener.range, Some(3));
        assert_eq!(listener.values, vec![1, 3]);
    }
}
