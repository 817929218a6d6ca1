//! Element container layout: the state machine shared by bands, frames and
//! list cells.
//!
//! Coordinates are container-relative. During an overflow continuation the
//! container remembers `first_y`, the design y of the first element that still
//! prints, and shifts output up by it so continued content starts at the top.

use crate::clone::{CloneContext, NodeId};
use crate::doc_context::FillContext;
use crate::element::{FillElement, PositionType, StretchType};
use crate::error::FillError;
use crate::evaluator::{EvaluationPass, Evaluator};
use crate::print::PrintElement;
use crate::types::Pt;
use std::collections::HashMap;

pub struct ElementContainer {
    name: String,
    width: Pt,
    height: Pt,
    elements: Vec<FillElement>,
    positions: HashMap<NodeId, usize>,

    stretch_height: Pt,
    first_y: Pt,
    will_overflow: bool,
    is_overflow: bool,
    /// Overflowed without being allowed to; the excess is cut off.
    truncated: bool,
    total_collapsed: Pt,
}

impl ElementContainer {
    pub fn new(name: impl Into<String>, width: Pt, height: Pt, mut elements: Vec<FillElement>) -> Self {
        elements.sort_by(|a, b| a.y.cmp(&b.y).then(a.x.cmp(&b.x)));
        link_dependants(&mut elements);
        Self::from_sorted(name.into(), width, height, elements)
    }

    fn from_sorted(name: String, width: Pt, height: Pt, elements: Vec<FillElement>) -> Self {
        let positions = elements
            .iter()
            .enumerate()
            .map(|(index, element)| (element.id(), index))
            .collect();
        Self {
            name,
            width,
            height,
            elements,
            positions,
            stretch_height: height,
            first_y: Pt::ZERO,
            will_overflow: false,
            is_overflow: false,
            truncated: false,
            total_collapsed: Pt::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> Pt {
        self.width
    }

    pub fn height(&self) -> Pt {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[FillElement] {
        &self.elements
    }

    pub fn will_overflow(&self) -> bool {
        self.will_overflow
    }

    pub fn is_overflow(&self) -> bool {
        self.is_overflow
    }

    pub fn stretch_height(&self) -> Pt {
        self.stretch_height
    }

    /// Height this pass actually occupies.
    pub fn printed_height(&self) -> Pt {
        (self.stretch_height - self.first_y).clamp_non_negative()
    }

    pub fn has_printed_elements(&self) -> bool {
        self.elements.iter().any(|element| element.to_print)
    }

    pub fn evaluate(
        &mut self,
        ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        for element in &mut self.elements {
            element.evaluate(ctx, evaluator, pass)?;
        }
        self.will_overflow = false;
        self.is_overflow = false;
        self.truncated = false;
        Ok(())
    }

    fn init_fill(&mut self) {
        self.is_overflow = self.will_overflow;
        self.total_collapsed = Pt::ZERO;
        self.first_y = Pt::ZERO;
        self.stretch_height = self.height;
    }

    fn reset_elements(&mut self) {
        let is_overflow = self.is_overflow;
        for element in &mut self.elements {
            element.reset(is_overflow);
        }
    }

    /// Lays out every element into `available` and returns whether the
    /// container continues on the next page.
    pub fn prepare(
        &mut self,
        ctx: &FillContext,
        available: Pt,
        overflow_allowed: bool,
    ) -> Result<bool, FillError> {
        self.init_fill();
        self.reset_elements();
        let will_overflow = self.prepare_elements(ctx, available)?;
        if will_overflow && !overflow_allowed {
            log::debug!(
                "container `{}` does not fit {:?} and may not overflow; truncating",
                self.name,
                available
            );
        }
        self.will_overflow = will_overflow && overflow_allowed;
        self.truncated = will_overflow && !overflow_allowed;
        Ok(self.will_overflow)
    }

    fn prepare_elements(&mut self, ctx: &FillContext, available: Pt) -> Result<bool, FillError> {
        let is_overflow = self.is_overflow;
        let mut will_overflow = false;
        let mut first_y = if is_overflow { self.height } else { Pt::ZERO };
        let mut first_y_found = false;

        for index in 0..self.elements.len() {
            let element_y = self.elements[index].y;
            let element_first_y = if !is_overflow {
                Pt::ZERO
            } else if first_y_found && element_y >= first_y {
                first_y
            } else {
                element_y
            };
            let element = &mut self.elements[index];
            will_overflow |= element.prepare(ctx, available + element_first_y, is_overflow)?;
            if is_overflow && element.to_print {
                if element.reprinted {
                    first_y = Pt::ZERO;
                    first_y_found = true;
                } else if !first_y_found {
                    first_y = element.y;
                    first_y_found = true;
                }
            }
            self.move_dependants(index);
        }

        self.first_y = first_y;
        let mut white_space = self.prepare_stretch_height(available, will_overflow);
        self.remove_blank_elements();
        white_space |= self.prepare_stretch_height(available, will_overflow || white_space);
        self.move_bottom_elements();
        self.stretch_elements_to_container();
        Ok(will_overflow || white_space)
    }

    /// Sets the stretch height and returns whether the content plus its space
    /// to the bottom exceeds `available`. An overflowing container takes
    /// exactly the offered space.
    fn prepare_stretch_height(&mut self, available: Pt, overflowing: bool) -> bool {
        let limit = available + self.first_y;
        let calculated = self.calculate_stretch_height();
        let white_space = calculated > limit;
        self.stretch_height = if overflowing || white_space {
            limit
        } else {
            calculated
        };
        white_space
    }

    /// Pushes floating elements below `index` down by however much it grew,
    /// keeping the design gap.
    fn move_dependants(&mut self, index: usize) {
        let element = &self.elements[index];
        if element.dependants.is_empty() {
            return;
        }
        let design_bottom = element.y + element.height;
        let actual_bottom = element.relative_y + element.stretch_height;
        let dependants: Vec<usize> = element
            .dependants
            .iter()
            .filter_map(|id| self.positions.get(id).copied())
            .collect();
        for position in dependants {
            let dependant = &mut self.elements[position];
            if dependant.position_type != PositionType::Float {
                continue;
            }
            let moved = actual_bottom + (dependant.y - design_bottom);
            if moved > dependant.relative_y {
                dependant.relative_y = moved;
            }
        }
    }

    /// Collapses vertical bands occupied only by blank elements flagged
    /// `remove_line_when_blank`.
    fn remove_blank_elements(&mut self) {
        let mut removable: Vec<(Pt, Pt)> = self
            .elements
            .iter()
            .filter(|element| !element.to_print && element.remove_line_when_blank)
            .map(|element| (element.y, element.y + element.height))
            .collect();
        if removable.is_empty() {
            return;
        }
        removable = merge_ranges(removable);
        for element in &self.elements {
            if element.to_print || !element.remove_line_when_blank {
                removable = subtract_range(removable, (element.y, element.y + element.height));
            }
        }
        if removable.is_empty() {
            return;
        }

        let mut total = Pt::ZERO;
        for (start, end) in &removable {
            total += *end - *start;
        }
        self.total_collapsed = total;
        for element in &mut self.elements {
            let top = element.y;
            let bottom = element.y + element.height;
            let above: Pt = removable
                .iter()
                .filter(|(_, end)| *end <= top)
                .map(|(start, end)| *end - *start)
                .sum();
            let below: Pt = removable
                .iter()
                .filter(|(start, _)| *start >= bottom)
                .map(|(start, end)| *end - *start)
                .sum();
            element.collapsed_above = above;
            element.collapsed_below = below;
            element.relative_y -= above;
        }
    }

    fn calculate_stretch_height(&self) -> Pt {
        let mut stretch = (self.height - self.total_collapsed).clamp_non_negative();
        for element in self.elements.iter().filter(|element| element.to_print) {
            let bottom = element.relative_y + element.stretch_height
                + element.space_to_bottom(self.height)
                - element.collapsed_below;
            stretch = stretch.max(bottom);
        }
        stretch
    }

    fn growth(&self) -> Pt {
        self.stretch_height - (self.height - self.total_collapsed)
    }

    fn move_bottom_elements(&mut self) {
        let growth = self.growth();
        for element in &mut self.elements {
            if !element.to_print || element.position_type != PositionType::FixRelativeToBottom {
                continue;
            }
            let moved = element.y - element.collapsed_above + growth;
            if moved > element.relative_y {
                element.relative_y = moved;
            }
        }
    }

    fn stretch_elements_to_container(&mut self) {
        let growth = self.growth();
        let container_height = self.height;
        let stretch_height = self.stretch_height;
        for element in &mut self.elements {
            if !element.to_print {
                continue;
            }
            let target = match element.stretch_type {
                StretchType::NoStretch => continue,
                StretchType::ContainerHeight => element.height + growth,
                StretchType::ContainerBottom => {
                    stretch_height - element.relative_y - element.space_to_bottom(container_height)
                        + element.collapsed_below
                }
            };
            if target > element.stretch_height {
                element.stretch_height = target;
            }
        }
    }

    /// Forces the printed height, e.g. to the tallest cell of a list row or the
    /// space left on the page.
    pub fn stretch_to(&mut self, height: Pt) {
        self.stretch_height = self.first_y + height;
    }

    pub fn finalize_element_positions(&mut self) {
        self.move_bottom_elements();
        self.stretch_elements_to_container();
    }

    /// Emits the prepared elements with bounds relative to the container top.
    pub fn fill_elements(&mut self, ctx: &FillContext) -> Result<Vec<PrintElement>, FillError> {
        let first_y = self.first_y;
        let limit = self.stretch_height;
        let cut = self.will_overflow || self.truncated;
        let mut printed = Vec::new();
        for element in &mut self.elements {
            if !element.to_print {
                continue;
            }
            if cut && element.relative_y + element.stretch_height > limit {
                // stays unprinted and is picked up by the continuation
                log::trace!("`{}` does not fit the stretched container", element.key());
                continue;
            }
            if let Some(output) = element.fill(ctx, first_y)? {
                printed.push(output);
            }
        }
        Ok(printed)
    }

    pub fn rewind(&mut self) -> Result<(), FillError> {
        self.will_overflow = false;
        self.is_overflow = false;
        self.truncated = false;
        for element in &mut self.elements {
            element.rewind()?;
        }
        Ok(())
    }

    pub fn create_clone(&self, ctx: &mut CloneContext) -> Result<ElementContainer, FillError> {
        let elements = self
            .elements
            .iter()
            .map(|element| element.create_clone(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_sorted(
            self.name.clone(),
            self.width,
            self.height,
            elements,
        ))
    }
}

impl std::fmt::Debug for ElementContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementContainer")
            .field("name", &self.name)
            .field("elements", &self.elements.len())
            .field("stretch_height", &self.stretch_height)
            .field("first_y", &self.first_y)
            .field("will_overflow", &self.will_overflow)
            .finish()
    }
}

/// Floating elements that start below another element and overlap it
/// horizontally move down when it stretches.
fn link_dependants(elements: &mut [FillElement]) {
    let links: Vec<Vec<NodeId>> = elements
        .iter()
        .map(|upper| {
            elements
                .iter()
                .filter(|lower| {
                    lower.id() != upper.id()
                        && lower.position_type == PositionType::Float
                        && lower.y >= upper.y + upper.height
                        && lower.x < upper.x + upper.width
                        && upper.x < lower.x + lower.width
                })
                .map(|lower| lower.id())
                .collect()
        })
        .collect();
    for (element, dependants) in elements.iter_mut().zip(links) {
        element.dependants = dependants;
    }
}

fn merge_ranges(mut ranges: Vec<(Pt, Pt)>) -> Vec<(Pt, Pt)> {
    ranges.sort();
    let mut merged: Vec<(Pt, Pt)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn subtract_range(ranges: Vec<(Pt, Pt)>, (cut_start, cut_end): (Pt, Pt)) -> Vec<(Pt, Pt)> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for (start, end) in ranges {
        if cut_end <= start || cut_start >= end {
            out.push((start, end));
            continue;
        }
        if start < cut_start {
            out.push((start, cut_start));
        }
        if cut_end < end {
            out.push((cut_end, end));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::TextComponent;
    use crate::evaluator::{DataSource, ExpressionId, MemoryDataSource, NullEvaluator};
    use crate::print::ElementStyle;
    use crate::types::Rect;
    use crate::value::Value;
    use std::sync::Arc;

    fn pt(value: i32) -> Pt {
        Pt::from_i32(value)
    }

    fn rect(x: i32, y: i32, width: i32, height: i32) -> Rect {
        Rect::new(pt(x), pt(y), pt(width), pt(height))
    }

    fn label(key: &str, bounds: Rect, text: &str) -> FillElement {
        FillElement::new(
            key,
            bounds,
            TextComponent::label(key, text, Arc::new(ElementStyle::default())),
        )
    }

    fn body(key: &str, bounds: Rect, text: &str) -> FillElement {
        FillElement::new(
            key,
            bounds,
            TextComponent::label(key, text, Arc::new(ElementStyle::default()))
                .stretch_with_overflow(true),
        )
    }

    fn by_key<'a>(printed: &'a [PrintElement], container: &ElementContainer, key: &str) -> &'a PrintElement {
        let origin = container
            .elements()
            .iter()
            .find(|element| element.key() == key)
            .map(|element| element.id())
            .unwrap();
        printed.iter().find(|element| element.origin == origin).unwrap()
    }

    #[test]
    fn stretch_pushes_floating_dependants_and_bottom_elements() {
        let ctx = FillContext::default();
        let mut container = ElementContainer::new(
            "detail",
            pt(100),
            pt(40),
            vec![
                body("body", rect(0, 0, 30, 12), "aaaa bbbb cccc"),
                label("below", rect(0, 20, 30, 12), "x"),
                label("rule", rect(0, 38, 100, 2), "-")
                    .position(PositionType::FixRelativeToBottom),
            ],
        );
        container
            .evaluate(&ctx, &NullEvaluator, EvaluationPass::Current)
            .unwrap();
        assert!(!container.prepare(&ctx, pt(200), true).unwrap());
        assert_eq!(container.printed_height(), pt(64));
        let printed = container.fill_elements(&ctx).unwrap();
        assert_eq!(by_key(&printed, &container, "body").bounds.height, pt(36));
        assert_eq!(by_key(&printed, &container, "below").bounds.y, pt(44));
        assert_eq!(by_key(&printed, &container, "rule").bounds.y, pt(62));
    }

    #[test]
    fn blank_lines_collapse() {
        let ctx = FillContext::default();
        let mut source = MemoryDataSource::new(vec![vec![Value::Null]]);
        source.next().unwrap();
        let mut container = ElementContainer::new(
            "detail",
            pt(100),
            pt(20),
            vec![
                FillElement::new(
                    "optional",
                    rect(0, 0, 50, 10),
                    TextComponent::field("optional", ExpressionId(0), Arc::new(ElementStyle::default())),
                )
                .remove_line_when_blank(true),
                label("fixed", rect(0, 10, 50, 10), "kept"),
            ],
        );
        container
            .evaluate(&ctx, &source, EvaluationPass::Current)
            .unwrap();
        container.prepare(&ctx, pt(100), true).unwrap();
        assert_eq!(container.printed_height(), pt(10));
        let printed = container.fill_elements(&ctx).unwrap();
        assert_eq!(printed.len(), 1);
        assert_eq!(printed[0].bounds.y, Pt::ZERO);
    }

    #[test]
    fn blank_line_shared_with_printing_element_is_kept() {
        let ctx = FillContext::default();
        let mut source = MemoryDataSource::new(vec![vec![Value::Null]]);
        source.next().unwrap();
        let mut container = ElementContainer::new(
            "detail",
            pt(100),
            pt(20),
            vec![
                FillElement::new(
                    "optional",
                    rect(0, 0, 50, 10),
                    TextComponent::field("optional", ExpressionId(0), Arc::new(ElementStyle::default())),
                )
                .remove_line_when_blank(true),
                label("side", rect(50, 0, 50, 10), "side"),
                label("fixed", rect(0, 10, 50, 10), "kept"),
            ],
        );
        container
            .evaluate(&ctx, &source, EvaluationPass::Current)
            .unwrap();
        container.prepare(&ctx, pt(100), true).unwrap();
        assert_eq!(container.printed_height(), pt(20));
    }

    #[test]
    fn overflow_continues_at_the_top() {
        let ctx = FillContext::default();
        let mut container = ElementContainer::new(
            "detail",
            pt(100),
            pt(24),
            vec![
                label("head", rect(0, 0, 30, 12), "head"),
                body("body", rect(0, 12, 30, 12), "aaaa bbbb cccc dddd"),
            ],
        );
        container
            .evaluate(&ctx, &NullEvaluator, EvaluationPass::Current)
            .unwrap();
        assert!(container.prepare(&ctx, pt(36), true).unwrap());
        assert_eq!(container.printed_height(), pt(36));
        let first = container.fill_elements(&ctx).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(by_key(&first, &container, "body").text(), Some("aaaa\nbbbb"));

        assert!(!container.prepare(&ctx, pt(100), true).unwrap());
        assert!(container.is_overflow());
        assert_eq!(container.printed_height(), pt(24));
        let second = container.fill_elements(&ctx).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].bounds.y, Pt::ZERO);
        assert_eq!(second[0].text(), Some("cccc\ndddd"));
    }

    #[test]
    fn white_space_below_stretched_content_overflows() {
        let ctx = FillContext::default();
        let mut container = ElementContainer::new(
            "detail",
            pt(100),
            pt(40),
            vec![
                body("body", rect(0, 0, 30, 12), "aaaa bbbb cccc"),
                label("total", rect(0, 28, 100, 12), "B")
                    .position(PositionType::FixRelativeToBottom),
            ],
        );
        container
            .evaluate(&ctx, &NullEvaluator, EvaluationPass::Current)
            .unwrap();
        assert!(container.prepare(&ctx, pt(60), true).unwrap());
        assert_eq!(container.printed_height(), pt(60));
        let printed = container.fill_elements(&ctx).unwrap();
        assert_eq!(printed.len(), 2);
        assert_eq!(by_key(&printed, &container, "body").bounds.height, pt(36));
        let total = by_key(&printed, &container, "total");
        assert_eq!(total.bounds.y + total.bounds.height, pt(60));

        assert!(!container.prepare(&ctx, pt(100), true).unwrap());
        assert_eq!(container.printed_height(), Pt::ZERO);
        assert!(container.fill_elements(&ctx).unwrap().is_empty());
    }

    #[test]
    fn overflow_is_dropped_when_not_allowed() {
        let ctx = FillContext::default();
        let mut container = ElementContainer::new(
            "page header",
            pt(100),
            pt(12),
            vec![body("body", rect(0, 0, 30, 12), "aaaa bbbb cccc")],
        );
        container
            .evaluate(&ctx, &NullEvaluator, EvaluationPass::Current)
            .unwrap();
        assert!(!container.prepare(&ctx, pt(24), false).unwrap());
        assert!(!container.will_overflow());
        assert_eq!(container.printed_height(), pt(24));
        let printed = container.fill_elements(&ctx).unwrap();
        assert_eq!(printed[0].text(), Some("aaaa\nbbbb"));
    }

    #[test]
    fn ranges_merge_and_subtract() {
        let merged = merge_ranges(vec![(pt(5), pt(8)), (pt(0), pt(4)), (pt(4), pt(6))]);
        assert_eq!(merged, vec![(pt(0), pt(8))]);
        let cut = subtract_range(merged, (pt(2), pt(3)));
        assert_eq!(cut, vec![(pt(0), pt(2)), (pt(3), pt(8))]);
    }

    #[test]
    fn clones_get_fresh_ids_and_remapped_dependants() {
        let container = ElementContainer::new(
            "cell",
            pt(50),
            pt(30),
            vec![
                body("top", rect(0, 0, 50, 12), "x"),
                label("under", rect(0, 15, 50, 12), "y"),
            ],
        );
        let mut ctx = CloneContext::new();
        let clone = container.create_clone(&mut ctx).unwrap();
        assert_eq!(ctx.len(), 2);
        let original_under = container.elements()[1].id();
        let clone_under = clone.elements()[1].id();
        assert_ne!(original_under, clone_under);
        assert_eq!(clone.elements()[0].dependants, vec![clone_under]);
    }
}
