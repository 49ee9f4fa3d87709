//! Frame loop modes and on-demand frame requests

use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// When the root produces frames
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frameloop {
    /// Render on every host display frame
    #[default]
    Always,
    /// Render only after something invalidated the scene
    Demand,
    /// Render only when the host forces a frame
    Never,
}

/// Coalescing "one more frame, please" flag
///
/// Any number of requests between two frames collapse into a single
/// pending frame.
#[derive(Debug, Default)]
pub struct FrameRequests {
    pending: Cell<bool>,
    /// Total requests received, coalesced or not
    received: Cell<u64>,
}

impl FrameRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a frame
    pub fn request(&self) {
        self.received.set(self.received.get() + 1);
        self.pending.set(true);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Consume the pending request, returning whether there was one
    pub fn take(&self) -> bool {
        self.pending.replace(false)
    }

    pub fn received(&self) -> u64 {
        self.received.get()
    }

    /// Whether a host display frame should render in `mode`
    pub fn should_render(&self, mode: Frameloop) -> bool {
        match mode {
            Frameloop::Always => true,
            Frameloop::Demand => self.is_pending(),
            Frameloop::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce() {
        let requests = FrameRequests::new();
        requests.request();
        requests.request();
        requests.request();

        assert_eq!(requests.received(), 3);
        assert!(requests.take());
        assert!(!requests.take());
    }

    #[test]
    fn test_should_render_per_mode() {
        let requests = FrameRequests::new();
        assert!(requests.should_render(Frameloop::Always));
        assert!(!requests.should_render(Frameloop::Demand));

        requests.request();
        assert!(requests.should_render(Frameloop::Demand));
        assert!(!requests.should_render(Frameloop::Never));
    }
}
