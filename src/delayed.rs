use crate::document::PrintDocument;
use crate::error::FillError;
use crate::evaluator::ExpressionId;
use crate::print::{PrintElement, PrintElementKind};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum TextSource {
    Static(String),
    Expression(ExpressionId),
    PageNumber,
    PageCount,
}

/// When a text value is computed. Anything but `Now` leaves a placeholder on
/// the page and a slot in the [`DelayedRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationTime {
    Now,
    Page,
    Group(String),
    Report,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayedText {
    pub source: TextSource,
    pub time: EvaluationTime,
}

#[derive(Debug)]
struct DelayedSlot {
    page: usize,
    element: u64,
    delayed: DelayedText,
}

#[derive(Debug, Default)]
pub struct DelayedRegistry {
    slots: Vec<DelayedSlot>,
    resolved: usize,
}

impl DelayedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every pending placeholder in `element` and its frame children.
    pub fn collect(&mut self, page: usize, element: &PrintElement) {
        if let PrintElementKind::Text {
            delayed: Some(delayed),
            ..
        } = &element.kind
        {
            self.slots.push(DelayedSlot {
                page,
                element: element.id,
                delayed: delayed.clone(),
            });
        }
        for child in element.children() {
            self.collect(page, child);
        }
    }

    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn pending_times(&self) -> Vec<EvaluationTime> {
        self.slots.iter().map(|slot| slot.delayed.time.clone()).collect()
    }

    /// Resolves every pending slot whose time matches, computing each value with
    /// `value_of(source, page_index)`. Pages are reloaded from the store when
    /// virtualized.
    pub fn resolve(
        &mut self,
        document: &mut PrintDocument,
        matches: impl Fn(&EvaluationTime) -> bool,
        mut value_of: impl FnMut(&TextSource, usize) -> Result<Value, FillError>,
    ) -> Result<usize, FillError> {
        let mut count = 0usize;
        let mut index = 0usize;
        while index < self.slots.len() {
            if !matches(&self.slots[index].delayed.time) {
                index += 1;
                continue;
            }
            let slot = self.slots.swap_remove(index);
            let value = value_of(&slot.delayed.source, slot.page)?;
            resolve_element(document, slot.page, slot.element, value)?;
            count += 1;
        }
        self.resolved += count;
        if count > 0 {
            log::trace!("resolved {count} delayed text slot(s)");
        }
        Ok(count)
    }
}

/// Writes `value` into a pending placeholder. A placeholder is resolved exactly
/// once; a second attempt is an invariant violation.
pub(crate) fn resolve_element(
    document: &mut PrintDocument,
    page: usize,
    element: u64,
    value: Value,
) -> Result<(), FillError> {
    let page_ref = document.page_mut(page)?;
    let Some(target) = page_ref.find_mut(element) else {
        return Err(FillError::DelayedElementMissing { page, element });
    };
    match &mut target.kind {
        PrintElementKind::Text { text, delayed } => {
            if delayed.is_none() {
                return Err(FillError::DelayedAlreadyResolved { page, element });
            }
            *text = value.display_string();
            *delayed = None;
            Ok(())
        }
        _ => Err(FillError::DelayedElementMissing { page, element }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::NodeId;
    use crate::print::{ElementStyle, PrintPage};
    use crate::types::{Pt, Rect};
    use std::sync::Arc;

    fn placeholder(id: u64, time: EvaluationTime) -> PrintElement {
        let mut element = PrintElement::new(
            NodeId::next(),
            Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(50), Pt::from_i32(12)),
            Arc::new(ElementStyle::default()),
            PrintElementKind::Text {
                text: String::new(),
                delayed: Some(DelayedText {
                    source: TextSource::PageCount,
                    time,
                }),
            },
        );
        element.id = id;
        element
    }

    #[test]
    fn slots_resolve_once_by_time() {
        let mut document = PrintDocument::new();
        let mut page = PrintPage::new();
        page.push(placeholder(1, EvaluationTime::Page));
        page.push(placeholder(2, EvaluationTime::Report));
        let index = document.add_page(page).unwrap();
        let mut registry = DelayedRegistry::new();
        for element in document.page(index).unwrap().elements.clone() {
            registry.collect(index, &element);
        }
        assert_eq!(registry.pending(), 2);

        let resolved = registry
            .resolve(
                &mut document,
                |time| *time == EvaluationTime::Page,
                |_, page| Ok(Value::Int(page as i64 + 1)),
            )
            .unwrap();
        assert_eq!(resolved, 1);
        assert_eq!(registry.pending(), 1);
        registry
            .resolve(&mut document, |_| true, |_, _| Ok(Value::Int(9)))
            .unwrap();
        assert_eq!(registry.pending(), 0);
        assert_eq!(document.page(index).unwrap().texts(), vec!["1", "9"]);
    }

    #[test]
    fn double_resolution_is_fatal() {
        let mut document = PrintDocument::new();
        let mut page = PrintPage::new();
        page.push(placeholder(5, EvaluationTime::Report));
        document.add_page(page).unwrap();
        resolve_element(&mut document, 0, 5, Value::Int(1)).unwrap();
        let err = resolve_element(&mut document, 0, 5, Value::Int(2)).unwrap_err();
        assert!(matches!(
            err,
            FillError::DelayedAlreadyResolved { page: 0, element: 5 }
        ));
        assert!(err.is_fatal());
        let missing = resolve_element(&mut document, 0, 77, Value::Null).unwrap_err();
        assert!(matches!(missing, FillError::DelayedElementMissing { .. }));
    }
}
