use crate::clone::{CloneContext, NodeId};
use crate::container::ElementContainer;
use crate::doc_context::FillContext;
use crate::element::{FillComponent, FillPrepareResult, PrepareRequest};
use crate::error::FillError;
use crate::evaluator::{EvaluationPass, Evaluator};
use crate::print::{ElementStyle, PrintElement, PrintElementKind};
use crate::types::Rect;
use std::sync::Arc;

/// A nested element container that can itself overflow across pages.
#[derive(Debug)]
pub struct FrameComponent {
    container: ElementContainer,
    style: Arc<ElementStyle>,
}

impl FrameComponent {
    pub fn new(container: ElementContainer, style: Arc<ElementStyle>) -> Self {
        Self { container, style }
    }
}

impl FillComponent for FrameComponent {
    fn evaluate(
        &mut self,
        ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.container.evaluate(ctx, evaluator, pass)
    }

    fn prepare(
        &mut self,
        ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        let continuing = self.container.will_overflow();
        let overflow = self.container.prepare(ctx, request.available, true)?;
        if continuing && !self.container.has_printed_elements() {
            return Ok(if overflow {
                FillPrepareResult::no_content_overflow()
            } else {
                FillPrepareResult::no_content()
            });
        }
        let mut height = self.container.printed_height();
        if overflow {
            height = height.min(request.available);
        }
        Ok(FillPrepareResult::printed(
            request.design_height,
            height,
            overflow,
        ))
    }

    fn fill(
        &mut self,
        ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        self.container.stretch_to(bounds.height);
        self.container.finalize_element_positions();
        let children = self.container.fill_elements(ctx)?;
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            PrintElementKind::Frame { children },
        )))
    }

    fn rewind(&mut self) -> Result<(), FillError> {
        self.container.rewind()
    }

    fn carries_remainder(&self) -> bool {
        self.container.will_overflow()
    }

    fn create_clone(&self, ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        Ok(Box::new(FrameComponent {
            container: self.container.create_clone(ctx)?,
            style: self.style.clone(),
        }))
    }

    fn debug_name(&self) -> &str {
        self.container.name()
    }
}
