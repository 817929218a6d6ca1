use reportfill::{
    CancellationToken, DataSource, DataSourceFactory, DocContext, ElementContainer, ElementStyle,
    ErrorClass, EvaluationTime, ExpressionId, FillBand, FillElement, FillError, FillListener,
    FillOptions, MemoryDataSource, PrintPage, Pt, Rect, ReportFill, Size, StaticDataSourceFactory,
    TextComponent, TextSource, TileLayout, Value,
};
use std::sync::Arc;

fn pt(value: i32) -> Pt {
    Pt::from_i32(value)
}

fn style() -> Arc<ElementStyle> {
    Arc::new(ElementStyle::default())
}

fn one_record() -> Box<dyn DataSource> {
    Box::new(MemoryDataSource::new(vec![vec![Value::Null]]))
}

fn tile_band(values: &[&str]) -> FillBand {
    let cell = ElementContainer::new(
        "cell",
        pt(30),
        pt(12),
        vec![FillElement::new(
            "value",
            Rect::new(Pt::ZERO, Pt::ZERO, pt(30), pt(12)),
            TextComponent::field("value", ExpressionId(0), style()).stretch_with_overflow(true),
        )],
    );
    let factory: Arc<dyn DataSourceFactory> = Arc::new(StaticDataSourceFactory::new(
        values.iter().map(|v| vec![Value::from(*v)]).collect(),
    ));
    let list = TileLayout::new("tiles", factory, cell, style());
    FillBand::new(
        "detail",
        pt(90),
        pt(12),
        vec![FillElement::new(
            "tiles",
            Rect::new(Pt::ZERO, Pt::ZERO, pt(90), pt(12)),
            list,
        )],
    )
}

fn cells(page: &PrintPage) -> Vec<String> {
    page.elements
        .iter()
        .flat_map(|list| list.children())
        .map(|cell| {
            cell.children()
                .iter()
                .filter_map(|element| element.text())
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect()
}

fn small_pages() -> ReportFill {
    ReportFill::builder()
        .page_size(Size::new(pt(90), pt(40)))
        .margin_all(0.0)
        .build()
        .unwrap()
}

#[test]
fn overflowing_row_is_reprinted_whole_on_the_next_page() {
    let fill = small_pages();
    let template = fill
        .template("tiles")
        .detail(tile_band(&["1", "2", "3", "4", "5", "6", "aaaa bbbb"]));
    let pages = fill
        .fill(template, one_record())
        .unwrap()
        .into_pages()
        .unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(cells(&pages[0]), vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(cells(&pages[1]), vec!["aaaa\nbbbb"]);
    let reprinted = &pages[1].elements[0].children()[0];
    assert_eq!(reprinted.bounds.y, Pt::ZERO);
    assert_eq!(reprinted.bounds.height, pt(24));
}

#[test]
fn row_that_never_fits_terminates_with_row_overflow() {
    let fill = small_pages();
    let template = fill
        .template("runaway")
        .detail(tile_band(&["a b c d e f g h i j k l"]));
    let err = fill.fill(template, one_record()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
    match err {
        FillError::RowOverflow { page, since, .. } => assert_eq!((page, since), (3, 1)),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn page_numbers_resolve_across_swapped_pages() {
    let dir = tempfile::tempdir().unwrap();
    let fill = ReportFill::builder()
        .page_size(Size::new(pt(120), pt(48)))
        .margin_all(0.0)
        .to_swap_file(dir.path(), 1)
        .build()
        .unwrap();
    let detail = FillBand::new(
        "detail",
        pt(120),
        pt(12),
        vec![FillElement::new(
            "value",
            Rect::new(Pt::ZERO, Pt::ZERO, pt(120), pt(12)),
            TextComponent::field("value", ExpressionId(0), style()),
        )],
    );
    let footer = FillBand::new(
        "footer",
        pt(120),
        pt(12),
        vec![
            FillElement::new(
                "page",
                Rect::new(Pt::ZERO, Pt::ZERO, pt(60), pt(12)),
                TextComponent::new("page", TextSource::PageNumber, style())
                    .evaluation_time(EvaluationTime::Page),
            ),
            FillElement::new(
                "count",
                Rect::new(pt(60), Pt::ZERO, pt(60), pt(12)),
                TextComponent::new("count", TextSource::PageCount, style())
                    .evaluation_time(EvaluationTime::Report),
            ),
        ],
    );
    let template = fill.template("numbered").detail(detail).page_footer(footer);
    let records = (1..=30).map(|n| vec![Value::Int(n)]).collect();
    let (document, metrics) = fill
        .fill_with_metrics(template, Box::new(MemoryDataSource::new(records)))
        .unwrap();

    assert_eq!(document.page_count(), 10);
    assert!(metrics.virtualization.pages_evicted >= 8);
    assert!(metrics.virtualization.pages_loaded > 0);
    assert_eq!(metrics.pages.len(), 10);

    let pages = document.into_pages().unwrap();
    for (index, page) in pages.iter().enumerate() {
        let texts = page.texts();
        let footer = &texts[texts.len() - 2..];
        assert_eq!(footer, [(index + 1).to_string(), "10".to_string()]);
    }
    assert_eq!(pages[9].texts()[0], "28");
}

struct CancelAfter {
    page: usize,
    token: CancellationToken,
}

impl FillListener for CancelAfter {
    fn page_finished(&self, ctx: &DocContext, _page: &PrintPage) {
        if ctx.page_number == self.page {
            self.token.cancel();
        }
    }
}

#[test]
fn cancelled_fill_releases_spilled_pages() {
    let dir = tempfile::tempdir().unwrap();
    let fill = ReportFill::builder()
        .page_size(Size::new(pt(90), pt(24)))
        .margin_all(0.0)
        .to_dir(dir.path(), 1)
        .build()
        .unwrap();
    let detail = FillBand::new(
        "detail",
        pt(90),
        pt(12),
        vec![FillElement::new(
            "value",
            Rect::new(Pt::ZERO, Pt::ZERO, pt(90), pt(12)),
            TextComponent::field("value", ExpressionId(0), style()),
        )],
    );
    let token = CancellationToken::new();
    let listener: Arc<dyn FillListener> = Arc::new(CancelAfter {
        page: 4,
        token: token.clone(),
    });
    let options = FillOptions {
        cancel: token,
        listeners: vec![listener],
    };
    let records = (0..40).map(|n| vec![Value::Int(n)]).collect();
    let err = fill
        .fill_with_options(
            fill.template("cancelled").detail(detail),
            Box::new(MemoryDataSource::new(records)),
            options,
        )
        .map(|_| ())
        .unwrap_err();

    assert!(matches!(err, FillError::Cancelled { page: 4 }));
    assert_eq!(err.class(), ErrorClass::Cancelled);
    let leftover = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftover, 0);
}
