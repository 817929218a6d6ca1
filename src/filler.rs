//! Page accumulator: walks the records of a data source through the bands
//! of a [`ReportTemplate`] and stacks the output into pages and columns.

use crate::band::{FillBand, SplitType};
use crate::delayed::{DelayedRegistry, EvaluationTime, TextSource};
use crate::doc_context::{DocContext, FillContext, FillListener};
use crate::document::PrintDocument;
use crate::error::FillError;
use crate::evaluator::{DataSource, EvaluationPass, Evaluator, SourceEvaluator};
use crate::frame::ColumnFrame;
use crate::metrics::{FillMetrics, PageMetrics};
use crate::page_template::{PrintOrder, WhenNoData};
use crate::print::{PrintElement, PrintPage};
use crate::report::{BandSlot, ReportTemplate};
use crate::types::Pt;
use crate::value::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct ReportFiller {
    template: ReportTemplate,
    source: Box<dyn DataSource>,
    document: PrintDocument,
    ctx: FillContext,
    listeners: Vec<Arc<dyn FillListener>>,
    delayed: DelayedRegistry,

    frames: Vec<ColumnFrame>,
    column: usize,
    page_index: usize,
    page_has_content: bool,
    with_sections: bool,
    group_values: Vec<Option<Value>>,

    metrics: FillMetrics,
    page_start: Instant,
    page_bands: usize,
    page_elements: usize,
}

fn delayed_value(
    source: &TextSource,
    page: usize,
    page_count: usize,
    evaluator: &dyn Evaluator,
    pass: EvaluationPass,
) -> Result<Value, FillError> {
    Ok(match source {
        TextSource::Static(text) => Value::Text(text.clone()),
        TextSource::Expression(id) => evaluator.evaluate(*id, pass)?,
        TextSource::PageNumber => Value::Int(page as i64 + 1),
        TextSource::PageCount => Value::Int(page_count as i64),
    })
}

impl ReportFiller {
    pub(crate) fn new(
        template: ReportTemplate,
        source: Box<dyn DataSource>,
        document: PrintDocument,
        ctx: FillContext,
        listeners: Vec<Arc<dyn FillListener>>,
    ) -> Self {
        let groups = template.groups.len();
        Self {
            template,
            source,
            document,
            ctx,
            listeners,
            delayed: DelayedRegistry::new(),
            frames: Vec::new(),
            column: 0,
            page_index: 0,
            page_has_content: false,
            with_sections: true,
            group_values: vec![None; groups],
            metrics: FillMetrics::default(),
            page_start: Instant::now(),
            page_bands: 0,
            page_elements: 0,
        }
    }

    pub(crate) fn fill(mut self) -> Result<(PrintDocument, FillMetrics), FillError> {
        let started = Instant::now();
        self.template.format.validate()?;
        self.ctx.check_cancelled()?;

        if self.source.next()? {
            self.fill_records()?;
        } else {
            match self.template.format.when_no_data {
                WhenNoData::NoPages => {
                    log::debug!("report `{}` has no records; no pages", self.template.name);
                }
                WhenNoData::NoDataBand => self.fill_no_data()?,
                WhenNoData::AllSectionsNoDetail => self.fill_all_sections()?,
            }
        }

        // whatever is still pending is resolved with the final values
        self.resolve_delayed(|_| true, EvaluationPass::Current)?;
        self.metrics.total_fill_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.virtualization = self.document.metrics();
        Ok((self.document, self.metrics))
    }

    fn fill_records(&mut self) -> Result<(), FillError> {
        self.start_page(true)?;
        let mut first = true;
        loop {
            self.ctx.check_cancelled()?;
            if let Some(level) = self.changed_group()? {
                if !first {
                    self.close_groups(level)?;
                }
                self.open_groups(level)?;
            }
            first = false;
            let mut printed = false;
            for index in 0..self.template.details.len() {
                self.evaluate_slot(BandSlot::Detail(index), EvaluationPass::Current)?;
                printed |= self.place_detail(BandSlot::Detail(index))?;
            }
            if printed {
                self.next_detail_column();
            }
            if !self.source.next()? {
                break;
            }
        }
        self.close_groups(0)?;
        self.evaluate_slot(BandSlot::Summary, EvaluationPass::Current)?;
        self.place(BandSlot::Summary)?;
        self.end_page()
    }

    fn fill_no_data(&mut self) -> Result<(), FillError> {
        self.with_sections = false;
        self.start_page(false)?;
        self.evaluate_slot(BandSlot::NoData, EvaluationPass::Current)?;
        self.place(BandSlot::NoData)?;
        self.end_page()
    }

    fn fill_all_sections(&mut self) -> Result<(), FillError> {
        self.start_page(true)?;
        self.evaluate_slot(BandSlot::Summary, EvaluationPass::Current)?;
        self.place(BandSlot::Summary)?;
        self.end_page()
    }

    /// Outermost group whose expression changed since the last record.
    fn changed_group(&mut self) -> Result<Option<usize>, FillError> {
        let evaluator = SourceEvaluator(self.source.as_ref());
        let mut changed = None;
        for (index, group) in self.template.groups.iter().enumerate() {
            let value = evaluator.evaluate_current(group.expression)?;
            if changed.is_none() && self.group_values[index].as_ref() != Some(&value) {
                changed = Some(index);
            }
            self.group_values[index] = Some(value);
        }
        Ok(changed)
    }

    /// Prints footers from the innermost group out to `level`, with the
    /// values of the last record of each closing group.
    fn close_groups(&mut self, level: usize) -> Result<(), FillError> {
        for index in (level..self.template.groups.len()).rev() {
            self.evaluate_slot(BandSlot::GroupFooter(index), EvaluationPass::Old)?;
            self.place(BandSlot::GroupFooter(index))?;
            let name = self.template.groups[index].name.clone();
            self.resolve_delayed(
                |time| matches!(time, EvaluationTime::Group(group) if *group == name),
                EvaluationPass::Old,
            )?;
        }
        Ok(())
    }

    fn open_groups(&mut self, level: usize) -> Result<(), FillError> {
        for index in level..self.template.groups.len() {
            if self.template.groups[index].start_new_page && self.page_has_content {
                let name = self.template.groups[index].name.clone();
                self.log_page_break("group_start_new_page", &name, true);
                self.end_page()?;
                self.start_page(false)?;
            }
            self.evaluate_slot(BandSlot::GroupHeader(index), EvaluationPass::Current)?;
            self.place(BandSlot::GroupHeader(index))?;
        }
        Ok(())
    }

    fn evaluate_slot(&mut self, slot: BandSlot, pass: EvaluationPass) -> Result<(), FillError> {
        let evaluator = SourceEvaluator(self.source.as_ref());
        if let Some(Some(band)) = self.template.slot_mut(slot) {
            band.evaluate(&self.ctx, &evaluator, pass)?;
        }
        Ok(())
    }

    fn take_band(&mut self, slot: BandSlot) -> Option<FillBand> {
        self.template.slot_mut(slot).and_then(Option::take)
    }

    fn put_band(&mut self, slot: BandSlot, band: FillBand) {
        if let Some(place) = self.template.slot_mut(slot) {
            *place = Some(band);
        }
    }

    fn band_height(&mut self, slot: BandSlot) -> Pt {
        match self.template.slot_mut(slot) {
            Some(Some(band)) => band.height(),
            _ => Pt::ZERO,
        }
    }

    fn resolve_delayed(
        &mut self,
        matches: impl Fn(&EvaluationTime) -> bool,
        pass: EvaluationPass,
    ) -> Result<usize, FillError> {
        let page_count = self.document.page_count();
        let evaluator = SourceEvaluator(self.source.as_ref());
        self.delayed.resolve(&mut self.document, matches, |source, page| {
            delayed_value(source, page, page_count, &evaluator, pass)
        })
    }

    fn log_page_break(&self, reason: &str, band: &str, new_page: bool) {
        let from_page = self.ctx.page_number;
        log::debug!("{reason}: `{band}` leaves page {from_page} column {}", self.column);
        self.ctx.trace_event(
            "fill.page_break",
            json!({
                "type": "fill.page_break",
                "reason": reason,
                "band": band,
                "from_page": from_page,
                "to_page": from_page + usize::from(new_page),
                "column": self.column,
            }),
        );
    }

    fn start_page(&mut self, first: bool) -> Result<(), FillError> {
        self.ctx.check_cancelled()?;
        let index = self.document.add_page(PrintPage::new())?;
        self.page_index = index;
        self.ctx.page_number = index + 1;
        self.page_has_content = false;
        self.page_start = Instant::now();
        self.page_bands = 0;
        self.page_elements = 0;
        let page_ctx = DocContext::new(self.ctx.page_number, self.template.name.clone());
        for listener in &self.listeners {
            listener.page_added(&page_ctx);
        }

        let format = &self.template.format;
        let left = format.margins.left;
        let bottom = format.content_bottom();
        let mut y = format.content_top();
        if self.with_sections {
            if first {
                self.evaluate_slot(BandSlot::Title, EvaluationPass::Current)?;
                y += self.place_fixed(BandSlot::Title, left, y, bottom - y)?;
            }
            self.evaluate_slot(BandSlot::PageHeader, EvaluationPass::Current)?;
            y += self.place_fixed(BandSlot::PageHeader, left, y, bottom - y)?;
        }

        let reserved = if self.with_sections {
            self.band_height(BandSlot::PageFooter) + self.band_height(BandSlot::ColumnFooter)
        } else {
            Pt::ZERO
        };
        self.frames = self
            .template
            .format
            .column_frames(y, bottom - reserved)
            .into_iter()
            .map(ColumnFrame::new)
            .collect();
        self.column = 0;
        if self.horizontal() {
            self.start_columns_across()
        } else {
            self.start_column()
        }
    }

    fn start_column(&mut self) -> Result<(), FillError> {
        if !self.with_sections {
            return Ok(());
        }
        self.place_column_header()?;
        self.reprint_group_headers()?;
        self.frame_mut().mark_content_start();
        Ok(())
    }

    /// Column headers of every column, then one row for the reprinted group
    /// headers.
    fn start_columns_across(&mut self) -> Result<(), FillError> {
        if !self.with_sections {
            return Ok(());
        }
        for column in 0..self.frames.len() {
            self.column = column;
            self.place_column_header()?;
        }
        self.close_row();
        self.reprint_group_headers()?;
        for frame in &mut self.frames {
            frame.mark_content_start();
        }
        Ok(())
    }

    fn place_column_header(&mut self) -> Result<(), FillError> {
        let (x, y) = self.frame().cursor();
        let available = self.frame().remaining_height();
        self.evaluate_slot(BandSlot::ColumnHeader, EvaluationPass::Current)?;
        let height = self.place_fixed(BandSlot::ColumnHeader, x, y, available)?;
        self.frame_mut().advance(height);
        Ok(())
    }

    fn reprint_group_headers(&mut self) -> Result<(), FillError> {
        for index in 0..self.template.groups.len() {
            let group = &self.template.groups[index];
            if !group.reprint_header_on_each_page || self.group_values[index].is_none() {
                continue;
            }
            self.evaluate_slot(BandSlot::GroupHeader(index), EvaluationPass::Current)?;
            self.place(BandSlot::GroupHeader(index))?;
        }
        Ok(())
    }

    fn end_column(&mut self) -> Result<(), FillError> {
        if !self.with_sections {
            return Ok(());
        }
        let rect = self.frame().rect();
        let height = self.band_height(BandSlot::ColumnFooter);
        self.evaluate_slot(BandSlot::ColumnFooter, EvaluationPass::Current)?;
        self.place_fixed(BandSlot::ColumnFooter, rect.x, rect.y + rect.height, height)?;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), FillError> {
        if self.horizontal() {
            for column in 0..self.frames.len() {
                self.column = column;
                self.end_column()?;
            }
        } else {
            self.end_column()?;
        }
        if self.with_sections {
            let format = &self.template.format;
            let left = format.margins.left;
            let bottom = format.content_bottom();
            let height = self.band_height(BandSlot::PageFooter);
            self.evaluate_slot(BandSlot::PageFooter, EvaluationPass::Current)?;
            self.place_fixed(BandSlot::PageFooter, left, bottom - height, height)?;
        }
        self.resolve_delayed(|time| *time == EvaluationTime::Page, EvaluationPass::Current)?;

        let page_ctx = DocContext::new(self.ctx.page_number, self.template.name.clone());
        if !self.listeners.is_empty() {
            let page = self.document.page(self.page_index)?;
            for listener in &self.listeners {
                listener.page_finished(&page_ctx, page);
            }
        }
        self.metrics.pages.push(PageMetrics {
            page_number: self.ctx.page_number,
            fill_ms: self.page_start.elapsed().as_secs_f64() * 1000.0,
            band_count: self.page_bands,
            element_count: self.page_elements,
        });
        self.document.finish_page()
    }

    /// Moves to the next column, or to a new page after the last one. Rows
    /// across columns always continue on a new page.
    fn next_column(&mut self, reason: &str, band: &str) -> Result<(), FillError> {
        let last_column = self.horizontal() || self.column + 1 >= self.frames.len();
        self.log_page_break(reason, band, last_column);
        if last_column {
            self.end_page()?;
            self.start_page(false)
        } else {
            self.end_column()?;
            self.column += 1;
            self.start_column()
        }
    }

    fn horizontal(&self) -> bool {
        self.template.format.print_order == PrintOrder::Horizontal && self.frames.len() > 1
    }

    /// Starts the next row at the bottom of the tallest column.
    fn close_row(&mut self) {
        let used = self
            .frames
            .iter()
            .map(ColumnFrame::used_height)
            .fold(Pt::ZERO, Pt::max);
        for frame in &mut self.frames {
            frame.align_to(used);
        }
        self.column = 0;
    }

    /// Steps to the column of the next record; after the last column the row
    /// closes.
    fn next_detail_column(&mut self) {
        if !self.horizontal() {
            return;
        }
        if self.column + 1 < self.frames.len() {
            self.column += 1;
        } else {
            self.close_row();
        }
    }

    fn frame(&self) -> &ColumnFrame {
        &self.frames[self.column]
    }

    fn frame_mut(&mut self) -> &mut ColumnFrame {
        &mut self.frames[self.column]
    }

    /// Places a page-level band at a fixed position; it never splits.
    fn place_fixed(&mut self, slot: BandSlot, x: Pt, y: Pt, available: Pt) -> Result<Pt, FillError> {
        let Some(mut band) = self.take_band(slot) else {
            return Ok(Pt::ZERO);
        };
        let result = if band.is_to_print() {
            band.fill(&self.ctx, available, false)
                .and_then(|printed| {
                    self.emit(printed.elements, x, y)?;
                    Ok(printed.height)
                })
        } else {
            Ok(Pt::ZERO)
        };
        self.put_band(slot, band);
        result
    }

    /// Places a band into the current column, continuing on further columns
    /// and pages while it overflows. Across columns, the band gets a row of
    /// its own.
    fn place(&mut self, slot: BandSlot) -> Result<(), FillError> {
        let Some(mut band) = self.take_band(slot) else {
            return Ok(());
        };
        let horizontal = self.horizontal();
        if horizontal {
            self.close_row();
        }
        let result = self.place_band(&mut band);
        if horizontal {
            self.close_row();
        }
        self.put_band(slot, band);
        result
    }

    /// Returns whether the detail band printed.
    fn place_detail(&mut self, slot: BandSlot) -> Result<bool, FillError> {
        let Some(mut band) = self.take_band(slot) else {
            return Ok(false);
        };
        let printed = band.is_to_print();
        let result = if self.horizontal() {
            self.place_across(&mut band)
        } else {
            self.place_band(&mut band)
        };
        self.put_band(slot, band);
        result.map(|()| printed)
    }

    /// Places a detail band into the current cell of a row. It stretches
    /// within the page but never splits; a band that does not fit starts a
    /// new page.
    fn place_across(&mut self, band: &mut FillBand) -> Result<(), FillError> {
        if !band.is_to_print() {
            return Ok(());
        }
        while band.height() > self.frame().remaining_height() {
            if self.frames.iter().all(ColumnFrame::is_empty) {
                return Err(FillError::UnplaceableBand {
                    band: band.name().to_string(),
                    page: self.ctx.page_number,
                });
            }
            self.log_page_break("band_does_not_fit", band.name(), true);
            self.end_page()?;
            self.start_page(false)?;
        }
        let available = self.frame().remaining_height();
        let printed = band.fill(&self.ctx, available, false)?;
        let (x, y) = self.frame().cursor();
        self.emit(printed.elements, x, y)?;
        self.frame_mut().advance(printed.height);
        self.page_has_content = true;
        Ok(())
    }

    fn place_band(&mut self, band: &mut FillBand) -> Result<(), FillError> {
        if !band.is_to_print() {
            return Ok(());
        }
        let name = band.name().to_string();
        let mut continuing = false;
        let mut split_prevented = false;
        let mut stalled = 0usize;
        loop {
            let frame_empty = self.frame().is_empty();
            let available = self.frame().remaining_height();
            if !continuing && band.break_height() > available {
                if frame_empty {
                    return Err(FillError::UnplaceableBand {
                        band: name,
                        page: self.ctx.page_number,
                    });
                }
                self.next_column("band_does_not_fit", &name)?;
                continue;
            }

            band.prepare(&self.ctx, available, true)?;
            if band.will_overflow()
                && !continuing
                && !split_prevented
                && !frame_empty
                && band.split() == SplitType::Prevent
            {
                band.rewind()?;
                split_prevented = true;
                self.next_column("split_prevented", &name)?;
                continue;
            }

            let printed = band.fill_prepared(&self.ctx, available)?;
            let emitted = !printed.elements.is_empty();
            let (x, y) = self.frame().cursor();
            self.emit(printed.elements, x, y)?;
            self.frame_mut().advance(printed.height);
            self.page_has_content = true;
            if !printed.will_overflow {
                return Ok(());
            }

            continuing = true;
            if emitted || !frame_empty {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled > self.ctx.overflow_page_limit + 1 {
                    return Err(FillError::UnplaceableBand {
                        band: name,
                        page: self.ctx.page_number,
                    });
                }
            }
            self.next_column("band_overflow", &name)?;
        }
    }

    /// Moves band output to page coordinates, assigns document ids and
    /// registers pending delayed values.
    fn emit(&mut self, mut elements: Vec<PrintElement>, x: Pt, y: Pt) -> Result<(), FillError> {
        self.page_bands += 1;
        if elements.is_empty() {
            return Ok(());
        }
        for element in &mut elements {
            element.offset(x, y);
            element.walk_mut(&mut |node: &mut PrintElement| {
                node.id = self.document.allocate_element_id();
            });
            self.delayed.collect(self.page_index, element);
        }
        self.page_elements += elements.len();
        let count = self.document.page_count();
        let page = self
            .document
            .current_page_mut()
            .ok_or(FillError::PageOutOfRange {
                index: self.page_index,
                count,
            })?;
        page.elements.extend(elements);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_context::CancellationToken;
    use crate::element::{FillElement, PositionType, TextComponent};
    use crate::evaluator::{ExpressionId, MemoryDataSource};
    use crate::page_template::PageFormat;
    use crate::print::ElementStyle;
    use crate::report::FillGroup;
    use crate::types::{Margins, Rect, Size};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn style() -> Arc<ElementStyle> {
        Arc::new(ElementStyle::default())
    }

    fn band_of(name: &str, width: i32, text: TextComponent) -> FillBand {
        FillBand::new(
            name,
            Pt::from_i32(width),
            Pt::from_i32(12),
            vec![FillElement::new(
                name,
                Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(width), Pt::from_i32(12)),
                text,
            )],
        )
    }

    fn field_band(name: &str, field: u32) -> FillBand {
        band_of(name, 100, TextComponent::field(name, ExpressionId(field), style()))
    }

    fn label_band(name: &str, text: &str) -> FillBand {
        band_of(name, 100, TextComponent::label(name, text, style()))
    }

    fn format() -> PageFormat {
        PageFormat::new(Size::new(Pt::from_i32(200), Pt::from_i32(100))).with_margins(Margins::all(0.0))
    }

    fn records(values: &[&str]) -> Box<dyn DataSource> {
        Box::new(MemoryDataSource::new(
            values.iter().map(|v| vec![Value::from(*v)]).collect(),
        ))
    }

    fn run(template: ReportTemplate, source: Box<dyn DataSource>) -> Result<Vec<PrintPage>, FillError> {
        let filler = ReportFiller::new(
            template,
            source,
            PrintDocument::new(),
            FillContext::default(),
            Vec::new(),
        );
        let (document, _) = filler.fill()?;
        document.into_pages()
    }

    #[test]
    fn group_footers_see_the_closing_record() {
        let template = ReportTemplate::new("groups", format())
            .group(
                FillGroup::new("key", ExpressionId(0))
                    .header(field_band("header", 0))
                    .footer(field_band("footer", 1)),
            )
            .detail(field_band("detail", 1));
        let source = Box::new(MemoryDataSource::new(vec![
            vec![Value::from("A"), Value::Int(1)],
            vec![Value::from("A"), Value::Int(2)],
            vec![Value::from("B"), Value::Int(3)],
        ]));
        let pages = run(template, source).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].texts(),
            vec!["A", "1", "2", "2", "B", "3", "3"]
        );
    }

    #[test]
    fn pages_carry_headers_footers_and_the_final_page_count() {
        let footer = band_of(
            "footer",
            100,
            TextComponent::new("count", TextSource::PageCount, style())
                .evaluation_time(EvaluationTime::Report),
        );
        let template = ReportTemplate::new("paged", format())
            .page_header(label_band("header", "H"))
            .detail(field_band("detail", 0))
            .page_footer(footer);
        let values: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let pages = run(template, records(&refs)).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(
            pages[0].texts(),
            vec!["H", "1", "2", "3", "4", "5", "6", "2"]
        );
        assert_eq!(pages[1].texts(), vec!["H", "7", "8", "9", "10", "2"]);
        let footer_y = pages[1].elements.last().map(|e| e.bounds.y);
        assert_eq!(footer_y, Some(Pt::from_i32(88)));
    }

    #[test]
    fn columns_fill_left_to_right() {
        let template = ReportTemplate::new(
            "columns",
            format().with_columns(2, Pt::ZERO),
        )
        .detail(field_band("detail", 0));
        let values: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let pages = run(template, records(&refs)).unwrap();
        assert_eq!(pages.len(), 1);
        let second_column: Vec<&str> = pages[0]
            .elements
            .iter()
            .filter(|e| e.bounds.x == Pt::from_i32(100))
            .filter_map(PrintElement::text)
            .collect();
        assert_eq!(second_column, vec!["9", "10"]);
    }

    fn wrapping_template(split: SplitType) -> ReportTemplate {
        let detail = band_of(
            "detail",
            30,
            TextComponent::field("text", ExpressionId(0), style()).stretch_with_overflow(true),
        )
        .split_type(split);
        ReportTemplate::new("split", format()).detail(detail)
    }

    fn wrapping_records() -> Box<dyn DataSource> {
        records(&["x", "x", "x", "x", "x", "x", "x", "aaaa bbbb cccc"])
    }

    #[test]
    fn stretching_band_splits_across_pages() {
        let pages = run(wrapping_template(SplitType::Stretch), wrapping_records()).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].texts().last().map(String::as_str), Some("aaaa"));
        assert_eq!(pages[1].texts(), vec!["bbbb\ncccc"]);
    }

    #[test]
    fn prevented_split_moves_the_band_whole() {
        let pages = run(wrapping_template(SplitType::Prevent), wrapping_records()).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].texts().len(), 7);
        assert_eq!(pages[1].texts(), vec!["aaaa\nbbbb\ncccc"]);
    }

    #[test]
    fn white_space_overflow_keeps_bottom_elements_on_the_page() {
        let detail = FillBand::new(
            "detail",
            Pt::from_i32(100),
            Pt::from_i32(40),
            vec![
                FillElement::new(
                    "text",
                    Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(30), Pt::from_i32(12)),
                    TextComponent::field("text", ExpressionId(0), style()).stretch_with_overflow(true),
                ),
                FillElement::new(
                    "rule",
                    Rect::new(Pt::ZERO, Pt::from_i32(28), Pt::from_i32(100), Pt::from_i32(12)),
                    TextComponent::label("rule", "B", style()),
                )
                .position(PositionType::FixRelativeToBottom),
            ],
        );
        let template = ReportTemplate::new("bottom", format()).detail(detail);
        let pages = run(template, records(&["x", "aaaa bbbb cccc"])).unwrap();

        for page in &pages {
            for element in &page.elements {
                assert!(element.bounds.y + element.bounds.height <= Pt::from_i32(100));
            }
        }
        assert_eq!(pages[0].texts(), vec!["x", "B", "aaaa\nbbbb\ncccc", "B"]);
        let rule = pages[0].elements.last().map(|e| e.bounds.y);
        assert_eq!(rule, Some(Pt::from_i32(88)));
        assert_eq!(pages.len(), 2);
        assert!(pages[1].elements.is_empty());
    }

    fn across(columns: usize) -> PageFormat {
        format()
            .with_columns(columns, Pt::ZERO)
            .print_order(PrintOrder::Horizontal)
    }

    #[test]
    fn horizontal_rows_are_as_tall_as_their_tallest_band() {
        let detail = band_of(
            "detail",
            30,
            TextComponent::field("text", ExpressionId(0), style()).stretch_with_overflow(true),
        );
        let template = ReportTemplate::new("across", across(2)).detail(detail);
        let pages = run(template, records(&["aaaa bbbb", "x", "y"])).unwrap();
        let placed: Vec<(&str, Pt, Pt)> = pages[0]
            .elements
            .iter()
            .filter_map(|e| e.text().map(|text| (text, e.bounds.x, e.bounds.y)))
            .collect();
        assert_eq!(
            placed,
            vec![
                ("aaaa\nbbbb", Pt::ZERO, Pt::ZERO),
                ("x", Pt::from_i32(100), Pt::ZERO),
                ("y", Pt::ZERO, Pt::from_i32(24)),
            ]
        );
    }

    #[test]
    fn horizontal_rows_wrap_onto_new_pages() {
        let template = ReportTemplate::new("across", across(2))
            .detail(field_band("detail", 0))
            .summary(label_band("summary", "S"));
        let values: Vec<String> = (1..=17).map(|n| n.to_string()).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let pages = run(template, records(&refs)).unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].texts().len(), 16);
        let sixteenth = pages[0]
            .elements
            .iter()
            .find(|e| e.text() == Some("16"))
            .map(|e| (e.bounds.x, e.bounds.y));
        assert_eq!(sixteenth, Some((Pt::from_i32(100), Pt::from_i32(84))));
        let second: Vec<(String, Pt, Pt)> = pages[1]
            .elements
            .iter()
            .map(|e| (e.text().unwrap_or_default().to_string(), e.bounds.x, e.bounds.y))
            .collect();
        assert_eq!(
            second,
            vec![
                ("17".to_string(), Pt::ZERO, Pt::ZERO),
                ("S".to_string(), Pt::ZERO, Pt::from_i32(12)),
            ]
        );
    }

    #[test]
    fn immediate_split_starts_in_the_space_left() {
        let layout = |split| {
            let spacer = FillBand::new(
                "spacer",
                Pt::from_i32(100),
                Pt::from_i32(70),
                vec![FillElement::new(
                    "spacer",
                    Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(100), Pt::from_i32(12)),
                    TextComponent::label("spacer", "T", style()),
                )],
            );
            let detail = FillBand::new(
                "detail",
                Pt::from_i32(100),
                Pt::from_i32(48),
                vec![
                    FillElement::new(
                        "top",
                        Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(100), Pt::from_i32(12)),
                        TextComponent::label("top", "top", style()),
                    ),
                    FillElement::new(
                        "bottom",
                        Rect::new(Pt::ZERO, Pt::from_i32(36), Pt::from_i32(100), Pt::from_i32(12)),
                        TextComponent::label("bottom", "bottom", style()),
                    ),
                ],
            )
            .split_type(split);
            let template = ReportTemplate::new("immediate", format())
                .detail(spacer)
                .detail(detail);
            run(template, records(&["a"])).unwrap()
        };

        let pages = layout(SplitType::Immediate);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].texts(), vec!["T", "top"]);
        assert_eq!(pages[0].elements[1].bounds.y, Pt::from_i32(70));
        assert_eq!(pages[1].texts(), vec!["bottom"]);
        assert_eq!(pages[1].elements[0].bounds.y, Pt::ZERO);

        let pages = layout(SplitType::Stretch);
        assert_eq!(pages[0].texts(), vec!["T"]);
        assert_eq!(pages[1].texts(), vec!["top", "bottom"]);
    }

    #[test]
    fn band_taller_than_a_page_is_unplaceable() {
        let tall = FillBand::new("tall", Pt::from_i32(100), Pt::from_i32(150), Vec::new());
        let template = ReportTemplate::new("tall", format()).detail(tall);
        let err = run(template, records(&["a"])).unwrap_err();
        assert!(matches!(err, FillError::UnplaceableBand { page: 1, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_sources_follow_the_no_data_policy() {
        let no_pages = ReportTemplate::new("empty", format()).detail(field_band("detail", 0));
        assert!(run(no_pages, records(&[])).unwrap().is_empty());

        let no_data = ReportTemplate::new("empty", format().when_no_data(WhenNoData::NoDataBand))
            .page_header(label_band("header", "H"))
            .no_data(label_band("none", "nothing to show"));
        let pages = run(no_data, records(&[])).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].texts(), vec!["nothing to show"]);

        let sections = ReportTemplate::new(
            "empty",
            format().when_no_data(WhenNoData::AllSectionsNoDetail),
        )
        .title(label_band("title", "T"))
        .detail(field_band("detail", 0))
        .summary(label_band("summary", "S"));
        let pages = run(sections, records(&[])).unwrap();
        assert_eq!(pages[0].texts(), vec!["T", "S"]);
    }

    #[test]
    fn start_new_page_breaks_between_groups() {
        let template = ReportTemplate::new("breaks", format())
            .group(
                FillGroup::new("key", ExpressionId(0))
                    .start_new_page(true)
                    .header(field_band("header", 0)),
            )
            .detail(field_band("detail", 0));
        let pages = run(template, records(&["A", "A", "B"])).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].texts(), vec!["B", "B"]);
    }

    #[test]
    fn reprinted_group_header_opens_each_page() {
        let template = ReportTemplate::new("reprint", format())
            .group(
                FillGroup::new("key", ExpressionId(0))
                    .reprint_header_on_each_page(true)
                    .header(field_band("header", 0)),
            )
            .detail(field_band("detail", 0));
        let many = vec!["K"; 10];
        let pages = run(template, records(&many)).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].texts().first().map(String::as_str), Some("K"));
        assert_eq!(pages[1].texts().len(), 4);
    }

    #[test]
    fn cancelled_fill_stops_before_the_first_page() {
        let mut ctx = FillContext::default();
        let token = CancellationToken::new();
        ctx.cancel = token.clone();
        token.cancel();
        let filler = ReportFiller::new(
            ReportTemplate::new("cancel", format()).detail(field_band("detail", 0)),
            records(&["a"]),
            PrintDocument::new(),
            ctx,
            Vec::new(),
        );
        assert!(matches!(
            filler.fill().map(|_| ()),
            Err(FillError::Cancelled { page: 1 })
        ));
    }

    #[test]
    fn listeners_observe_every_page() {
        #[derive(Default)]
        struct Counter {
            added: AtomicUsize,
            finished: AtomicUsize,
        }
        impl FillListener for Counter {
            fn page_added(&self, _ctx: &DocContext) {
                self.added.fetch_add(1, Ordering::SeqCst);
            }
            fn page_finished(&self, ctx: &DocContext, page: &PrintPage) {
                assert!(!page.is_empty(), "page {} empty", ctx.page_number);
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter::default());
        let values: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let filler = ReportFiller::new(
            ReportTemplate::new("listen", format()).detail(field_band("detail", 0)),
            records(&refs),
            PrintDocument::new(),
            FillContext::default(),
            vec![counter.clone() as Arc<dyn FillListener>],
        );
        let (_, metrics) = filler.fill().unwrap();
        assert_eq!(counter.added.load(Ordering::SeqCst), 3);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.pages.len(), 3);
        assert_eq!(metrics.pages[2].element_count, 4);
    }
}
