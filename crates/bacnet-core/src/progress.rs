//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline stages that report progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Detection,
    EdgeBuilding,
}

impl Stage {
    /// Short lowercase name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Detection => "detect",
            Stage::EdgeBuilding => "edges",
        }
    }

    /// Stage a log target belongs to, if it is pipeline work at all.
    ///
    /// Tiling and the detector feed detection; overlap, contours and the
    /// network builder feed edge building. Graph storage and editing belong
    /// to neither.
    pub fn of_target(target: &str) -> Option<Stage> {
        let mut parts = target.split("::");
        match (parts.next()?, parts.next()) {
            ("bacnet_tiling", _) | ("bacnet", Some("detector")) => Some(Stage::Detection),
            ("bacnet_segment", _) | ("bacnet_network", Some("builder")) => {
                Some(Stage::EdgeBuilding)
            }
            _ => None,
        }
    }
}

/// Monotone 0..=100 progress reporter around an optional callback.
pub struct Progress<'a> {
    sink: Option<&'a mut dyn FnMut(u8)>,
    last: Option<u8>,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a mut dyn FnMut(u8)) -> Self {
        Self {
            sink: Some(sink),
            last: None,
        }
    }

    /// A reporter that drops every update.
    pub fn none() -> Self {
        Self {
            sink: None,
            last: None,
        }
    }

    /// Report `percent`, clamped to 100. Values not above the last reported
    /// one are swallowed.
    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        if let Some(sink) = self.sink.as_mut() {
            sink(percent);
        }
    }

    /// Report `done / total` as a percentage.
    pub fn fraction(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = (done.min(total) * 100 / total) as u8;
        self.report(percent);
    }

    pub fn finish(&mut self) {
        self.report(100);
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Self::none()
    }
}

/// Error returned by stages that observed a cancellation request.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared flag checked between coarse units of work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
