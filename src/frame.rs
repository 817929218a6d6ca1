use crate::types::{Pt, Rect};

/// One column of the page body. Bands are stacked from the top; the column
/// footer area is reserved outside the rectangle.
pub struct ColumnFrame {
    rect: Rect,
    cursor_y: Pt,
    content_start: Pt,
}

impl ColumnFrame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
            content_start: Pt::ZERO,
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.cursor_y).max(Pt::ZERO)
    }

    /// True until something besides headers was placed.
    pub fn is_empty(&self) -> bool {
        self.cursor_y <= self.content_start
    }

    /// Page coordinates of the next band.
    pub fn cursor(&self) -> (Pt, Pt) {
        (self.rect.x, self.rect.y + self.cursor_y)
    }

    /// Height already taken from the top of the column.
    pub fn used_height(&self) -> Pt {
        self.cursor_y
    }

    /// Moves the cursor down to `used` if it is above it.
    pub fn align_to(&mut self, used: Pt) {
        self.cursor_y = self.cursor_y.max(used).min(self.rect.height);
    }

    pub fn advance(&mut self, height: Pt) {
        self.cursor_y = (self.cursor_y + height).min(self.rect.height);
    }

    /// Everything placed so far counts as header space for [`Self::is_empty`].
    pub fn mark_content_start(&mut self) {
        self.content_start = self.cursor_y;
    }
}
