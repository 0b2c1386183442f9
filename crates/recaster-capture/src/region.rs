//! Interactive rectangle selection.
//!
//! The overlay window itself belongs to the UI toolkit; this type holds the
//! drag state the overlay renders and the region it commits.

use std::time::Duration;

use recaster_ipc::CaptureRegion;

/// How long the committed rectangle stays visible before the overlay closes.
pub const CONFIRM_DELAY: Duration = Duration::from_millis(500);

/// Drag state for selecting a capture region.
#[derive(Debug, Default)]
pub struct RegionSelection {
    anchor: Option<(i32, i32)>,
    cursor: (i32, i32),
    committed: Option<CaptureRegion>,
}

impl RegionSelection {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a drag at the given screen position. Discards any previous commit.
    pub fn press(&mut self, x: i32, y: i32) {
        self.anchor = Some((x, y));
        self.cursor = (x, y);
        self.committed = None;
    }

    /// Move the cursor. Returns the live "W x H" label while dragging.
    pub fn drag(&mut self, x: i32, y: i32) -> Option<String> {
        self.anchor?;
        self.cursor = (x, y);
        self.current().map(|rect| rect.size_label())
    }

    /// Finish the drag. Returns the committed region, or `None` if nothing was dragged.
    pub fn release(&mut self) -> Option<CaptureRegion> {
        let rect = self.current();
        self.anchor = None;
        self.committed = rect.filter(|rect| !rect.is_empty());
        self.committed
    }

    /// Abandon the selection.
    pub fn cancel(&mut self) {
        self.anchor = None;
        self.committed = None;
    }

    /// Rectangle currently being dragged.
    pub fn current(&self) -> Option<CaptureRegion> {
        let (x0, y0) = self.anchor?;
        let (x1, y1) = self.cursor;
        Some(CaptureRegion::from_corners(x0, y0, x1, y1))
    }

    /// Whether a drag is in progress.
    pub fn is_dragging(&self) -> bool {
        self.anchor.is_some()
    }

    /// The committed region, if any.
    pub fn committed(&self) -> Option<CaptureRegion> {
        self.committed
    }
}
