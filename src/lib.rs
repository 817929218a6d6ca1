mod band;
mod clone;
mod container;
mod debug;
mod delayed;
mod doc_context;
mod document;
mod element;
mod error;
mod evaluator;
mod filler;
mod font;
mod frame;
mod frame_element;
mod list;
mod metrics;
mod page_template;
mod print;
mod rank;
mod report;
mod spill;
mod text;
mod types;
mod value;
pub mod virtualization;

pub use band::{FillBand, PrintBand, SplitType};
pub use clone::{CloneContext, NodeId};
pub use container::ElementContainer;
use debug::FillTrace;
pub use delayed::{DelayedRegistry, DelayedText, EvaluationTime, TextSource};
pub use doc_context::{CancellationToken, DocContext, FillContext, FillListener};
pub use document::PrintDocument;
pub use element::{
    FillComponent, FillElement, FillPrepareResult, GenericComponent, GraphicComponent,
    GraphicShape, ImageComponent, ImageSource, PositionType, PrepareOutcome, PrepareRequest,
    StretchType, TextComponent,
};
pub use error::{ErrorClass, FillError};
pub use evaluator::{
    DataSource, DataSourceFactory, EvaluationPass, Evaluator, ExpressionId, MemoryDataSource,
    NestedDataSourceFactory, NullEvaluator, RecordView, StaticDataSourceFactory,
};
use filler::ReportFiller;
pub use font::FontRegistry;
pub use frame::ColumnFrame;
pub use frame_element::FrameComponent;
pub use list::{TileDirection, TileLayout};
pub use metrics::{FillMetrics, PageMetrics, VirtualizationMetrics};
pub use page_template::{PageFormat, PrintOrder, WhenNoData};
pub use print::{
    ElementStyle, FontDescriptor, HAlign, ImageData, LineDirection, PrintElement,
    PrintElementKind, PrintPage, ScaleImage,
};
pub use rank::ArbitraryRankComparator;
pub use report::{FillGroup, ReportTemplate};
pub use spill::{SpillStore, SwapFileStore};
pub use types::{Color, Margins, Pt, Rect, Size};
pub use value::{Value, ValueKey, ValueOrder};
use std::path::PathBuf;
use std::sync::Arc;
use virtualization::{ReadHook, VirtualizationContext, Virtualizer};

const DEFAULT_MAX_RESIDENT_PAGES: usize = 4;

/// Where finished pages go once more than `max_resident_pages` are in memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Virtualization {
    #[default]
    Off,
    InMemory {
        max_resident_pages: usize,
    },
    /// One file per swapped page under `dir`.
    Directory {
        dir: PathBuf,
        max_resident_pages: usize,
    },
    /// A single append-only swap file created in `dir`.
    SwapFile {
        dir: PathBuf,
        max_resident_pages: usize,
    },
}

impl Virtualization {
    fn max_resident_pages(&self) -> Option<usize> {
        match self {
            Virtualization::Off => None,
            Virtualization::InMemory { max_resident_pages }
            | Virtualization::Directory {
                max_resident_pages, ..
            }
            | Virtualization::SwapFile {
                max_resident_pages, ..
            } => Some(*max_resident_pages),
        }
    }
}

/// Per-call fill options.
#[derive(Clone, Default)]
pub struct FillOptions {
    pub cancel: CancellationToken,
    pub listeners: Vec<Arc<dyn FillListener>>,
}

pub struct ReportFill {
    default_format: PageFormat,
    font_registry: Arc<FontRegistry>,
    overflow_page_limit: usize,
    virtualization: Virtualization,
    trace: Option<Arc<FillTrace>>,
}

#[derive(Clone)]
pub struct ReportFillBuilder {
    page_size: Size,
    margins: Margins,
    columns: usize,
    column_spacing: Pt,
    print_order: PrintOrder,
    when_no_data: WhenNoData,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    unicode_metrics: bool,
    overflow_page_limit: usize,
    virtualization: Virtualization,
    debug_path: Option<PathBuf>,
}

impl ReportFill {
    pub fn builder() -> ReportFillBuilder {
        ReportFillBuilder::new()
    }

    pub fn fonts(&self) -> &Arc<FontRegistry> {
        &self.font_registry
    }

    pub fn virtualization(&self) -> &Virtualization {
        &self.virtualization
    }

    /// Empty template using the configured page format.
    pub fn template(&self, name: impl Into<String>) -> ReportTemplate {
        ReportTemplate::new(name, self.default_format.clone())
    }

    pub fn fill(
        &self,
        template: ReportTemplate,
        source: Box<dyn DataSource>,
    ) -> Result<PrintDocument, FillError> {
        self.fill_with_options(template, source, FillOptions::default())
            .map(|(document, _)| document)
    }

    pub fn fill_with_metrics(
        &self,
        template: ReportTemplate,
        source: Box<dyn DataSource>,
    ) -> Result<(PrintDocument, FillMetrics), FillError> {
        self.fill_with_options(template, source, FillOptions::default())
    }

    pub fn fill_with_options(
        &self,
        template: ReportTemplate,
        source: Box<dyn DataSource>,
        options: FillOptions,
    ) -> Result<(PrintDocument, FillMetrics), FillError> {
        let mut ctx = FillContext::new(self.font_registry.clone());
        ctx.overflow_page_limit = self.overflow_page_limit;
        ctx.cancel = options.cancel;
        ctx.trace = self.trace.clone();

        let document = self
            .new_document()?
            .with_page_size(template.format().page_size);
        let report_name = template.name().to_string();
        let result = ReportFiller::new(template, source, document, ctx, options.listeners).fill();
        match &result {
            Ok((document, metrics)) => log::debug!(
                "filled `{report_name}`: {} page(s) in {:.1} ms",
                document.page_count(),
                metrics.total_fill_ms
            ),
            Err(err) => log::debug!("fill of `{report_name}` failed: {err}"),
        }
        self.emit_trace_summary("fill");
        result
    }

    /// Fills independent reports in parallel. Results keep the job order; the
    /// first failure in that order is returned.
    pub fn fill_many_parallel(
        &self,
        jobs: Vec<(ReportTemplate, Box<dyn DataSource>)>,
    ) -> Result<Vec<PrintDocument>, FillError> {
        use rayon::prelude::*;

        let mut results: Vec<(usize, Result<PrintDocument, FillError>)> = jobs
            .into_par_iter()
            .enumerate()
            .map(|(idx, (template, source))| (idx, self.fill(template, source)))
            .collect();
        results.sort_by_key(|(idx, _)| *idx);

        let mut documents = Vec::with_capacity(results.len());
        for (_, res) in results {
            documents.push(res?);
        }
        Ok(documents)
    }

    fn new_document(&self) -> Result<PrintDocument, FillError> {
        let context = match &self.virtualization {
            Virtualization::Off => return Ok(PrintDocument::new()),
            Virtualization::InMemory { .. } => VirtualizationContext::in_memory(),
            Virtualization::Directory { dir, .. } => {
                VirtualizationContext::new(Box::new(SpillStore::new(dir)?))
            }
            Virtualization::SwapFile { dir, .. } => {
                VirtualizationContext::new(Box::new(SwapFileStore::create_in(dir)?))
            }
        };
        let max_resident = self
            .virtualization
            .max_resident_pages()
            .unwrap_or(DEFAULT_MAX_RESIDENT_PAGES);
        let hook: Arc<dyn ReadHook> = self.font_registry.clone();
        let virtualizer = Virtualizer::new(context, max_resident)
            .with_read_hook(hook)
            .with_trace(self.trace.clone());
        Ok(PrintDocument::virtualized(virtualizer))
    }

    fn emit_trace_summary(&self, context: &str) {
        if let Some(trace) = self.trace.as_deref() {
            trace.emit_summary(context);
            trace.flush();
        }
    }
}

impl ReportFillBuilder {
    pub fn new() -> Self {
        let format = PageFormat::default();
        Self {
            page_size: format.page_size,
            margins: format.margins,
            columns: format.columns,
            column_spacing: format.column_spacing,
            print_order: format.print_order,
            when_no_data: format.when_no_data,
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            unicode_metrics: true,
            overflow_page_limit: 1,
            virtualization: Virtualization::Off,
            debug_path: None,
        }
    }

    /// Builder with `REPORTFILL_SPILL_DIR`, `REPORTFILL_MAX_RESIDENT_PAGES` and
    /// `REPORTFILL_DEBUG_LOG` applied.
    pub fn from_env() -> Self {
        Self::new().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_resident = lookup("REPORTFILL_MAX_RESIDENT_PAGES").and_then(|raw| {
            match raw.trim().parse::<usize>() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("ignoring REPORTFILL_MAX_RESIDENT_PAGES={raw:?}: not a page count");
                    None
                }
            }
        });
        let spill_dir = lookup("REPORTFILL_SPILL_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        self.virtualization = match (spill_dir, max_resident) {
            (Some(dir), max) => Virtualization::Directory {
                dir,
                max_resident_pages: max.unwrap_or(DEFAULT_MAX_RESIDENT_PAGES),
            },
            (None, Some(max)) => Virtualization::InMemory {
                max_resident_pages: max,
            },
            (None, None) => self.virtualization,
        };
        if let Some(path) = lookup("REPORTFILL_DEBUG_LOG").filter(|path| !path.trim().is_empty()) {
            self.debug_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.margins = Margins::all(value);
        self
    }

    pub fn columns(mut self, columns: usize, spacing: Pt) -> Self {
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

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn unicode_metrics(mut self, enabled: bool) -> Self {
        self.unicode_metrics = enabled;
        self
    }

    /// Pages a list row may overflow without progress before the fill fails.
    pub fn overflow_page_limit(mut self, pages: usize) -> Self {
        self.overflow_page_limit = pages;
        self
    }

    pub fn virtualization(mut self, virtualization: Virtualization) -> Self {
        self.virtualization = virtualization;
        self
    }

    pub fn in_memory(self, max_resident_pages: usize) -> Self {
        self.virtualization(Virtualization::InMemory { max_resident_pages })
    }

    pub fn to_dir(self, dir: impl Into<PathBuf>, max_resident_pages: usize) -> Self {
        self.virtualization(Virtualization::Directory {
            dir: dir.into(),
            max_resident_pages,
        })
    }

    pub fn to_swap_file(self, dir: impl Into<PathBuf>, max_resident_pages: usize) -> Self {
        self.virtualization(Virtualization::SwapFile {
            dir: dir.into(),
            max_resident_pages,
        })
    }

    // Write fill events and counters to a JSON-lines file.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ReportFill, FillError> {
        let default_format = PageFormat::new(self.page_size)
            .with_margins(self.margins)
            .with_columns(self.columns, self.column_spacing)
            .print_order(self.print_order)
            .when_no_data(self.when_no_data);
        default_format.validate()?;
        if self.virtualization.max_resident_pages() == Some(0) {
            return Err(FillError::InvalidConfiguration(
                "virtualization requires max_resident_pages >= 1".to_string(),
            ));
        }
        if let Virtualization::Directory { dir, .. } | Virtualization::SwapFile { dir, .. } =
            &self.virtualization
        {
            if dir.as_os_str().is_empty() {
                return Err(FillError::InvalidConfiguration(
                    "virtualization directory must not be empty".to_string(),
                ));
            }
        }

        let mut registry = FontRegistry::new();
        registry.set_use_full_unicode_metrics(self.unicode_metrics);
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        let trace = match self.debug_path {
            Some(path) => Some(Arc::new(FillTrace::new(path)?)),
            None => None,
        };
        Ok(ReportFill {
            default_format,
            font_registry: Arc::new(registry),
            overflow_page_limit: self.overflow_page_limit,
            virtualization: self.virtualization,
            trace,
        })
    }
}

impl Default for ReportFillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn environment_selects_virtualization() {
        let builder = ReportFillBuilder::new().apply_env(env(&[
            ("REPORTFILL_SPILL_DIR", "/tmp/pages"),
            ("REPORTFILL_MAX_RESIDENT_PAGES", "2"),
        ]));
        assert_eq!(
            builder.virtualization,
            Virtualization::Directory {
                dir: PathBuf::from("/tmp/pages"),
                max_resident_pages: 2,
            }
        );

        let builder =
            ReportFillBuilder::new().apply_env(env(&[("REPORTFILL_MAX_RESIDENT_PAGES", "3")]));
        assert_eq!(
            builder.virtualization,
            Virtualization::InMemory {
                max_resident_pages: 3
            }
        );
    }

    #[test]
    fn malformed_environment_values_are_ignored() {
        let builder = ReportFillBuilder::new()
            .apply_env(env(&[("REPORTFILL_MAX_RESIDENT_PAGES", "lots")]));
        assert_eq!(builder.virtualization, Virtualization::Off);
        assert!(builder.debug_path.is_none());
    }

    #[test]
    fn build_rejects_invalid_settings() {
        assert!(matches!(
            ReportFill::builder().in_memory(0).build(),
            Err(FillError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReportFill::builder().columns(0, Pt::ZERO).build(),
            Err(FillError::InvalidConfiguration(_))
        ));
        assert!(ReportFill::builder().in_memory(1).build().is_ok());
    }

    #[test]
    fn templates_inherit_the_configured_format() {
        let fill = ReportFill::builder()
            .page_size(Size::letter())
            .columns(2, Pt::from_i32(10))
            .print_order(PrintOrder::Horizontal)
            .build()
            .unwrap();
        let template = fill.template("invoice");
        assert_eq!(template.name(), "invoice");
        assert_eq!(template.format().columns, 2);
        assert_eq!(template.format().print_order, PrintOrder::Horizontal);
        assert_eq!(template.format().page_size, Size::letter());
    }

    #[test]
    fn parallel_fills_keep_job_order() {
        let fill = ReportFill::builder().build().unwrap();
        let jobs: Vec<(ReportTemplate, Box<dyn DataSource>)> = (0..4)
            .map(|n| {
                let style = Arc::new(ElementStyle::default());
                let band = FillBand::new(
                    "detail",
                    Pt::from_i32(200),
                    Pt::from_i32(12),
                    vec![FillElement::new(
                        "value",
                        Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(200), Pt::from_i32(12)),
                        TextComponent::field("value", ExpressionId(0), style),
                    )],
                );
                let source: Box<dyn DataSource> =
                    Box::new(MemoryDataSource::new(vec![vec![Value::Int(n)]]));
                (fill.template(format!("job {n}")).detail(band), source)
            })
            .collect();
        let documents = fill.fill_many_parallel(jobs).unwrap();
        let texts: Vec<String> = documents
            .into_iter()
            .flat_map(|document| document.into_pages().unwrap())
            .flat_map(|page| page.texts())
            .collect();
        assert_eq!(texts, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn debug_log_records_page_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("fill.jsonl");
        let fill = ReportFill::builder()
            .page_size(Size::new(Pt::from_i32(200), Pt::from_i32(100)))
            .margin_all(0.0)
            .in_memory(1)
            .debug_log(&log_path)
            .build()
            .unwrap();
        let style = Arc::new(ElementStyle::default());
        let band = FillBand::new(
            "detail",
            Pt::from_i32(200),
            Pt::from_i32(40),
            vec![FillElement::new(
                "value",
                Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(200), Pt::from_i32(12)),
                TextComponent::field("value", ExpressionId(0), style),
            )],
        );
        let records = (0..6).map(|n| vec![Value::Int(n)]).collect();
        let document = fill
            .fill(
                fill.template("traced").detail(band),
                Box::new(MemoryDataSource::new(records)),
            )
            .unwrap();
        assert_eq!(document.page_count(), 3);
        drop(document);

        let log = std::fs::read_to_string(&log_path).unwrap();
        let breaks = log.lines().filter(|line| line.contains("fill.page_break")).count();
        assert!(breaks >= 2);
        assert!(log.lines().any(|line| line.contains("debug.summary")));
        assert!(log.contains("virt.evict"));
    }
}
