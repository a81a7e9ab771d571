use std::time::Duration;

use tokio::time::Instant;

/// How long the selection affordance stays up without a click.
pub const AFFORDANCE_TIMEOUT: Duration = Duration::from_secs(3);

/// The in-page button next to a selection.
#[derive(Debug, Default)]
pub struct Affordance {
    shown_at: Option<Instant>,
}

impl Affordance {
    pub fn show(&mut self) {
        self.shown_at = Some(Instant::now());
    }

    /// True when it was visible.
    pub fn hide(&mut self) -> bool {
        self.shown_at.take().is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.shown_at.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shown_at.map(|at| at + AFFORDANCE_TIMEOUT)
    }
}
