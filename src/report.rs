use crate::band::FillBand;
use crate::evaluator::ExpressionId;
use crate::page_template::PageFormat;

/// A grouping level. The group breaks whenever its expression changes
/// between consecutive records.
pub struct FillGroup {
    pub(crate) name: String,
    pub(crate) expression: ExpressionId,
    pub(crate) header: Option<FillBand>,
    pub(crate) footer: Option<FillBand>,
    pub(crate) start_new_page: bool,
    pub(crate) reprint_header_on_each_page: bool,
}

impl FillGroup {
    pub fn new(name: impl Into<String>, expression: ExpressionId) -> Self {
        Self {
            name: name.into(),
            expression,
            header: None,
            footer: None,
            start_new_page: false,
            reprint_header_on_each_page: false,
        }
    }

    pub fn header(mut self, band: FillBand) -> Self {
        self.header = Some(band);
        self
    }

    pub fn footer(mut self, band: FillBand) -> Self {
        self.footer = Some(band);
        self
    }

    pub fn start_new_page(mut self, enabled: bool) -> Self {
        self.start_new_page = enabled;
        self
    }

    pub fn reprint_header_on_each_page(mut self, enabled: bool) -> Self {
        self.reprint_header_on_each_page = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Band layout of a report. Bands are `None` when the section is absent.
pub struct ReportTemplate {
    pub(crate) name: String,
    pub(crate) format: PageFormat,
    pub(crate) title: Option<FillBand>,
    pub(crate) page_header: Option<FillBand>,
    pub(crate) column_header: Option<FillBand>,
    pub(crate) groups: Vec<FillGroup>,
    pub(crate) details: Vec<Option<FillBand>>,
    pub(crate) column_footer: Option<FillBand>,
    pub(crate) page_footer: Option<FillBand>,
    pub(crate) summary: Option<FillBand>,
    pub(crate) no_data: Option<FillBand>,
}

impl ReportTemplate {
    pub fn new(name: impl Into<String>, format: PageFormat) -> Self {
        Self {
            name: name.into(),
            format,
            title: None,
            page_header: None,
            column_header: None,
            groups: Vec::new(),
            details: Vec::new(),
            column_footer: None,
            page_footer: None,
            summary: None,
            no_data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &PageFormat {
        &self.format
    }

    pub fn title(mut self, band: FillBand) -> Self {
        self.title = Some(band);
        self
    }

    pub fn page_header(mut self, band: FillBand) -> Self {
        self.page_header = Some(band);
        self
    }

    pub fn column_header(mut self, band: FillBand) -> Self {
        self.column_header = Some(band);
        self
    }

    /// Groups nest in the order they are added, outermost first.
    pub fn group(mut self, group: FillGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn detail(mut self, band: FillBand) -> Self {
        self.details.push(Some(band));
        self
    }

    pub fn column_footer(mut self, band: FillBand) -> Self {
        self.column_footer = Some(band);
        self
    }

    pub fn page_footer(mut self, band: FillBand) -> Self {
        self.page_footer = Some(band);
        self
    }

    pub fn summary(mut self, band: FillBand) -> Self {
        self.summary = Some(band);
        self
    }

    pub fn no_data(mut self, band: FillBand) -> Self {
        self.no_data = Some(band);
        self
    }

    /// Identifies where a band lives so the filler can take it out while it
    /// is being placed.
    pub(crate) fn slot_mut(&mut self, slot: BandSlot) -> Option<&mut Option<FillBand>> {
        match slot {
            BandSlot::Title => Some(&mut self.title),
            BandSlot::PageHeader => Some(&mut self.page_header),
            BandSlot::ColumnHeader => Some(&mut self.column_header),
            BandSlot::ColumnFooter => Some(&mut self.column_footer),
            BandSlot::PageFooter => Some(&mut self.page_footer),
            BandSlot::Summary => Some(&mut self.summary),
            BandSlot::NoData => Some(&mut self.no_data),
            BandSlot::Detail(index) => self.details.get_mut(index),
            BandSlot::GroupHeader(index) => self.groups.get_mut(index).map(|group| &mut group.header),
            BandSlot::GroupFooter(index) => self.groups.get_mut(index).map(|group| &mut group.footer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BandSlot {
    Title,
    PageHeader,
    ColumnHeader,
    ColumnFooter,
    PageFooter,
    Summary,
    NoData,
    Detail(usize),
    GroupHeader(usize),
    GroupFooter(usize),
}
