//! Tiling layout: one cell per data record, packed into rows (horizontal) or
//! stacked (vertical), continuing across pages.
//!
//! A horizontal row that cannot finish on the current page is not emitted.
//! Its cells are rewound and refilled at the top of the next page before any
//! new record is pulled, so emission order is preserved and nothing prints
//! twice. A row that keeps overflowing without a new cell being rendered fails
//! the fill once it has used up the configured number of extra pages.

use crate::clone::{CloneContext, NodeId};
use crate::container::ElementContainer;
use crate::doc_context::FillContext;
use crate::element::{FillComponent, FillPrepareResult, PrepareRequest};
use crate::error::FillError;
use crate::evaluator::{DataSource, DataSourceFactory, EvaluationPass, Evaluator, SourceEvaluator};
use crate::print::{ElementStyle, PrintElement, PrintElementKind};
use crate::types::{Pt, Rect};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileDirection {
    #[default]
    Horizontal,
    Vertical,
}

pub struct TileLayout {
    name: String,
    factory: Arc<dyn DataSourceFactory>,
    template: ElementContainer,
    direction: TileDirection,
    ignore_width: bool,
    style: Arc<ElementStyle>,
    cell_origin: NodeId,

    source: Option<Box<dyn DataSource>>,
    cells: Vec<ElementContainer>,
    filling: bool,
    fill_started: bool,
    advanced_to_next: bool,
    /// One-based page of the first overflow without progress; zero when none.
    overflow_start_page: usize,
    /// Number of cells in the overflowed row, the overflowing one included.
    overflow_column_index: usize,
    cell_overflowing: bool,
    rendered: usize,
    prepared: Vec<PrintElement>,
    prepared_columns: usize,
}

impl TileLayout {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn DataSourceFactory>,
        template: ElementContainer,
        style: Arc<ElementStyle>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            template,
            direction: TileDirection::Horizontal,
            ignore_width: false,
            style,
            cell_origin: NodeId::next(),
            source: None,
            cells: Vec::new(),
            filling: false,
            fill_started: false,
            advanced_to_next: false,
            overflow_start_page: 0,
            overflow_column_index: 0,
            cell_overflowing: false,
            rendered: 0,
            prepared: Vec::new(),
            prepared_columns: 0,
        }
    }

    pub fn direction(mut self, direction: TileDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Packs every record into a single row and widens the output to fit.
    pub fn ignore_width(mut self, enabled: bool) -> Self {
        self.ignore_width = enabled;
        self
    }

    /// Cells rendered since the data source was last started.
    pub fn rendered_cells(&self) -> usize {
        self.rendered
    }

    fn reset_markers(&mut self) {
        self.advanced_to_next = false;
        self.overflow_start_page = 0;
        self.overflow_column_index = 0;
        self.cell_overflowing = false;
        self.rendered = 0;
    }

    fn cell(&mut self, column: usize) -> Result<&mut ElementContainer, FillError> {
        while self.cells.len() <= column {
            let clone = self.template.create_clone(&mut CloneContext::new())?;
            self.cells.push(clone);
        }
        Ok(&mut self.cells[column])
    }

    fn evaluate_cell(
        &mut self,
        ctx: &FillContext,
        column: usize,
        source: &dyn DataSource,
    ) -> Result<(), FillError> {
        let evaluator = SourceEvaluator(source);
        self.cell(column)?
            .evaluate(ctx, &evaluator, EvaluationPass::Current)?;
        self.overflow_start_page = 0;
        Ok(())
    }

    /// Pulls the next record unless one was already fetched while probing.
    fn next_record(&mut self, source: &mut dyn DataSource) -> Result<bool, FillError> {
        if self.advanced_to_next {
            self.advanced_to_next = false;
            return Ok(true);
        }
        source.next()
    }

    /// Probes for another record when there is no room left; true means the
    /// layout must continue on the next page.
    fn more_records(&mut self, source: &mut dyn DataSource) -> Result<bool, FillError> {
        if !self.advanced_to_next {
            self.advanced_to_next = source.next()?;
        }
        Ok(self.advanced_to_next)
    }

    fn emit_cell(
        &mut self,
        ctx: &FillContext,
        column: usize,
        x: Pt,
        y: Pt,
        height: Pt,
    ) -> Result<(), FillError> {
        let width = self.template.width();
        let origin = self.cell_origin;
        let style = self.style.clone();
        let cell = &mut self.cells[column];
        cell.stretch_to(height);
        cell.finalize_element_positions();
        let children = cell.fill_elements(ctx)?;
        self.prepared.push(PrintElement::new(
            origin,
            Rect::new(x, y, width, height),
            style,
            PrintElementKind::Frame { children },
        ));
        self.rendered += 1;
        Ok(())
    }

    fn fill_row(&mut self, ctx: &FillContext, count: usize, row_y: Pt) -> Result<Pt, FillError> {
        let row_height = self.cells[..count]
            .iter()
            .map(ElementContainer::printed_height)
            .fold(Pt::ZERO, Pt::max);
        let cell_width = self.template.width();
        for column in 0..count {
            self.emit_cell(ctx, column, cell_width * column as i32, row_y, row_height)?;
        }
        self.prepared_columns = self.prepared_columns.max(count);
        Ok(row_height)
    }

    fn prepare_rows(
        &mut self,
        ctx: &FillContext,
        source: &mut dyn DataSource,
        request: PrepareRequest,
    ) -> Result<(Pt, bool), FillError> {
        let cell_width = self.template.width();
        let cell_height = self.template.height();
        let mut row_y = Pt::ZERO;
        let mut column = 0usize;
        let mut overflow = false;

        loop {
            let refill_overflowed = column < self.overflow_column_index;
            if request.available - row_y < cell_height {
                if refill_overflowed || self.more_records(source)? {
                    overflow = true;
                }
                break;
            }
            ctx.check_cancelled()?;
            if refill_overflowed {
                self.cell(column)?.rewind()?;
            } else {
                if !self.next_record(source)? {
                    break;
                }
                self.evaluate_cell(ctx, column, source)?;
            }
            if self.cell(column)?.prepare(ctx, request.available - row_y, true)? {
                self.overflow_column_index = self.overflow_column_index.max(column + 1);
                log::debug!(
                    "list `{}`: row at {:?} overflows in column {column} on page {}",
                    self.name,
                    row_y,
                    ctx.page_number
                );
                overflow = true;
                break;
            }
            column += 1;
            if !self.ignore_width && cell_width * (column as i32 + 1) > request.width {
                row_y += self.fill_row(ctx, column, row_y)?;
                column = 0;
                self.overflow_column_index = 0;
            }
        }

        if !overflow && column > 0 {
            row_y += self.fill_row(ctx, column, row_y)?;
            self.overflow_column_index = 0;
        }
        Ok((row_y, overflow))
    }

    fn prepare_cells(
        &mut self,
        ctx: &FillContext,
        source: &mut dyn DataSource,
        request: PrepareRequest,
    ) -> Result<(Pt, bool), FillError> {
        let cell_height = self.template.height();
        let mut y = Pt::ZERO;
        loop {
            if !self.cell_overflowing {
                if request.available - y < cell_height {
                    return Ok((y, self.more_records(source)?));
                }
                ctx.check_cancelled()?;
                if !self.next_record(source)? {
                    return Ok((y, false));
                }
                self.evaluate_cell(ctx, 0, source)?;
            }
            let room = request.available - y;
            let cell = self.cell(0)?;
            let overflow = cell.prepare(ctx, room, true)?;
            if !overflow {
                let height = cell.printed_height();
                self.emit_cell(ctx, 0, Pt::ZERO, y, height)?;
                self.cell_overflowing = false;
                y += height;
                continue;
            }
            if cell.has_printed_elements() {
                self.emit_cell(ctx, 0, Pt::ZERO, y, room)?;
                self.overflow_start_page = 0;
                y += room;
            }
            self.cell_overflowing = true;
            self.overflow_column_index = 1;
            return Ok((y, true));
        }
    }

    /// Records the overflow marker and fails once no progress has been made
    /// for more than `overflow_page_limit` extra pages.
    fn check_progress(&mut self, ctx: &FillContext) -> Result<(), FillError> {
        let page = ctx.page_number;
        let fatal = self.overflow_start_page != 0
            && page >= self.overflow_start_page + ctx.overflow_page_limit + 1;
        ctx.trace_event(
            "fill.list_overflow",
            json!({
                "type": "fill.list_overflow",
                "list": self.name,
                "page": page,
                "since": self.overflow_start_page,
                "column": self.overflow_column_index,
                "fatal": fatal,
            }),
        );
        if fatal {
            return Err(FillError::RowOverflow {
                node: self.name.clone(),
                page,
                since: self.overflow_start_page,
                column: self.overflow_column_index,
            });
        }
        if self.overflow_start_page == 0 {
            self.overflow_start_page = page;
        }
        Ok(())
    }

    fn prepare_with(
        &mut self,
        ctx: &FillContext,
        source: &mut dyn DataSource,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        if !self.filling {
            if self.fill_started {
                source.rewind()?;
            }
            self.filling = true;
            self.fill_started = true;
            self.reset_markers();
        }
        self.prepared.clear();
        self.prepared_columns = 0;

        let (height, overflow) = match self.direction {
            TileDirection::Horizontal => self.prepare_rows(ctx, source, request)?,
            TileDirection::Vertical => self.prepare_cells(ctx, source, request)?,
        };
        if overflow {
            self.check_progress(ctx)?;
        } else {
            self.filling = false;
            log::trace!("list `{}` finished with {} cell(s)", self.name, self.rendered);
        }
        if self.prepared.is_empty() {
            return Ok(if overflow {
                FillPrepareResult::no_content_overflow()
            } else {
                FillPrepareResult::no_content()
            });
        }
        Ok(FillPrepareResult::printed(
            request.design_height,
            height,
            overflow,
        ))
    }
}

impl FillComponent for TileLayout {
    fn evaluate(
        &mut self,
        _ctx: &FillContext,
        evaluator: &dyn Evaluator,
        _pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.source = Some(self.factory.create(evaluator)?);
        self.filling = false;
        self.fill_started = false;
        self.prepared.clear();
        self.reset_markers();
        Ok(())
    }

    fn prepare(
        &mut self,
        ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        let Some(mut source) = self.source.take() else {
            return Ok(FillPrepareResult::no_content());
        };
        let result = self.prepare_with(ctx, source.as_mut(), request);
        self.source = Some(source);
        result
    }

    fn fill(
        &mut self,
        _ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        if self.prepared.is_empty() {
            return Ok(None);
        }
        let mut bounds = bounds;
        if self.ignore_width {
            let needed = self.template.width() * self.prepared_columns as i32;
            if needed > bounds.width {
                bounds.width = needed;
            }
        }
        let children = std::mem::take(&mut self.prepared);
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            PrintElementKind::Frame { children },
        )))
    }

    fn rewind(&mut self) -> Result<(), FillError> {
        self.filling = false;
        self.prepared.clear();
        self.reset_markers();
        Ok(())
    }

    fn carries_remainder(&self) -> bool {
        self.filling
    }

    fn create_clone(&self, ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        let template = self.template.create_clone(ctx)?;
        Ok(Box::new(
            TileLayout::new(
                self.name.clone(),
                self.factory.clone(),
                template,
                self.style.clone(),
            )
            .direction(self.direction)
            .ignore_width(self.ignore_width),
        ))
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TileLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayout")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("filling", &self.filling)
            .field("overflow_start_page", &self.overflow_start_page)
            .field("overflow_column_index", &self.overflow_column_index)
            .finish()
    }
}
