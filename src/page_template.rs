use crate::error::FillError;
use crate::types::{Margins, Pt, Rect, Size};

/// What a fill produces when the data source has no records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhenNoData {
    #[default]
    NoPages,
    /// One page holding only the no-data band.
    NoDataBand,
    /// Every section except details and groups.
    AllSectionsNoDetail,
}

/// Order in which detail bands fill multiple columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintOrder {
    /// Down the first column, then the next.
    #[default]
    Vertical,
    /// Across the columns row by row; a row is as tall as its tallest band.
    Horizontal,
}

#[derive(Debug, Clone)]
pub struct PageFormat {
    pub page_size: Size,
    pub margins: Margins,
    pub columns: usize,
    pub column_spacing: Pt,
    pub print_order: PrintOrder,
    pub when_no_data: WhenNoData,
}

impl PageFormat {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            margins: Margins::all(20.0),
            columns: 1,
            column_spacing: Pt::ZERO,
            print_order: PrintOrder::Vertical,
            when_no_data: WhenNoData::NoPages,
        }
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn with_columns(mut self, columns: usize, spacing: Pt) -> Self {
        self.columns = columns;
        self.column_spacing = spacing;
        self
    }

    pub fn print_order(mut self, order: PrintOrder) -> Self {
        self.print_order = order;
        self
    }

    pub fn when_no_data(mut self, policy: WhenNoData) -> Self {
        self.when_no_data = policy;
        self
    }

    pub fn content_width(&self) -> Pt {
        self.page_size.width - self.margins.left - self.margins.right
    }

    pub fn content_top(&self) -> Pt {
        self.margins.top
    }

    pub fn content_bottom(&self) -> Pt {
        self.page_size.height - self.margins.bottom
    }

    pub fn column_width(&self) -> Pt {
        let columns = self.columns.max(1) as i32;
        (self.content_width() - self.column_spacing * (columns - 1)) / columns
    }

    /// Column rectangles spanning `top..bottom` in page coordinates.
    pub fn column_frames(&self, top: Pt, bottom: Pt) -> Vec<Rect> {
        let width = self.column_width();
        let height = (bottom - top).clamp_non_negative();
        (0..self.columns.max(1))
            .map(|column| {
                let x = self.margins.left + (width + self.column_spacing) * column as i32;
                Rect::new(x, top, width, height)
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), FillError> {
        if self.columns == 0 {
            return Err(FillError::InvalidConfiguration(
                "page format needs at least one column".into(),
            ));
        }
        if self.column_width() <= Pt::ZERO {
            return Err(FillError::InvalidConfiguration(format!(
                "{} column(s) do not fit a content width of {:?}",
                self.columns,
                self.content_width()
            )));
        }
        if self.content_bottom() <= self.content_top() {
            return Err(FillError::InvalidConfiguration(
                "margins leave no vertical space".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PageFormat {
    fn default() -> Self {
        Self::new(Size::a4())
    }
}
