//! Element fill units.
//!
//! A [`FillComponent`] is the smallest thing that can be asked how much of
//! itself fits into a given height. [`FillElement`] wraps one with template
//! geometry and the per-element print rules, and is what containers lay out.

use crate::clone::{CloneContext, NodeId};
use crate::delayed::{DelayedText, EvaluationTime, TextSource};
use crate::doc_context::FillContext;
use crate::error::FillError;
use crate::evaluator::{EvaluationPass, Evaluator, ExpressionId};
use crate::print::{
    ElementStyle, ImageData, LineDirection, PrintElement, PrintElementKind, ScaleImage,
};
use crate::text::{lines_fitting, lines_height, wrap_lines};
use crate::types::{Pt, Rect};
use crate::value::Value;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    NoContent,
    FitsNoStretch,
    FitsStretched,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillPrepareResult {
    pub outcome: PrepareOutcome,
    pub overflow: bool,
    pub stretch_height: Pt,
}

impl FillPrepareResult {
    pub fn no_content() -> Self {
        Self {
            outcome: PrepareOutcome::NoContent,
            overflow: false,
            stretch_height: Pt::ZERO,
        }
    }

    /// Nothing printable here; the unit continues on the next page.
    pub fn no_content_overflow() -> Self {
        Self {
            overflow: true,
            ..Self::no_content()
        }
    }

    pub fn fits(design_height: Pt) -> Self {
        Self {
            outcome: PrepareOutcome::FitsNoStretch,
            overflow: false,
            stretch_height: design_height,
        }
    }

    /// Prints at `height`, which counts as stretched only when it exceeds the
    /// design height.
    pub fn printed(design_height: Pt, height: Pt, overflow: bool) -> Self {
        let outcome = if height > design_height {
            PrepareOutcome::FitsStretched
        } else {
            PrepareOutcome::FitsNoStretch
        };
        Self {
            outcome,
            overflow,
            stretch_height: height.max(design_height),
        }
    }

    pub fn is_to_print(&self) -> bool {
        self.outcome != PrepareOutcome::NoContent
    }
}

/// What a component is asked to fit into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareRequest {
    pub width: Pt,
    pub design_height: Pt,
    /// Height from the element's top to the end of the available space.
    pub available: Pt,
    pub is_overflow: bool,
}

/// Capability interface of every fill unit, built-in or supplied by a
/// third party (charts, barcodes).
pub trait FillComponent: Send {
    fn evaluate(
        &mut self,
        ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError>;

    fn prepare(
        &mut self,
        ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError>;

    /// Commits the prepared chunk.
    fn fill(
        &mut self,
        ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError>;

    /// Restarts content for a reprint.
    fn rewind(&mut self) -> Result<(), FillError> {
        Ok(())
    }

    /// True while part of the content is still to be printed.
    fn carries_remainder(&self) -> bool {
        false
    }

    fn create_clone(&self, _ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        Err(FillError::component(
            self.debug_name(),
            "component does not support horizontal replication",
        ))
    }

    fn debug_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionType {
    Float,
    FixRelativeToTop,
    FixRelativeToBottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StretchType {
    NoStretch,
    ContainerHeight,
    ContainerBottom,
}

pub struct FillElement {
    id: NodeId,
    key: String,
    pub(crate) x: Pt,
    pub(crate) y: Pt,
    pub(crate) width: Pt,
    pub(crate) height: Pt,
    pub(crate) position_type: PositionType,
    pub(crate) stretch_type: StretchType,
    print_when: Option<ExpressionId>,
    pub(crate) remove_line_when_blank: bool,
    print_when_detail_overflows: bool,
    component: Box<dyn FillComponent>,

    print_when_value: bool,
    pub(crate) relative_y: Pt,
    pub(crate) stretch_height: Pt,
    pub(crate) to_print: bool,
    pub(crate) reprinted: bool,
    pub(crate) already_printed: bool,
    pub(crate) collapsed_above: Pt,
    pub(crate) collapsed_below: Pt,
    pub(crate) dependants: Vec<NodeId>,
}

impl FillElement {
    pub fn new(key: impl Into<String>, bounds: Rect, component: impl FillComponent + 'static) -> Self {
        Self::boxed(key, bounds, Box::new(component))
    }

    pub fn boxed(key: impl Into<String>, bounds: Rect, component: Box<dyn FillComponent>) -> Self {
        Self {
            id: NodeId::next(),
            key: key.into(),
            x: bounds.x,
            y: bounds.y,
            width: bounds.width,
            height: bounds.height,
            position_type: PositionType::Float,
            stretch_type: StretchType::NoStretch,
            print_when: None,
            remove_line_when_blank: false,
            print_when_detail_overflows: false,
            component,
            print_when_value: true,
            relative_y: bounds.y,
            stretch_height: bounds.height,
            to_print: false,
            reprinted: false,
            already_printed: false,
            collapsed_above: Pt::ZERO,
            collapsed_below: Pt::ZERO,
            dependants: Vec::new(),
        }
    }

    pub fn position(mut self, position_type: PositionType) -> Self {
        self.position_type = position_type;
        self
    }

    pub fn stretch(mut self, stretch_type: StretchType) -> Self {
        self.stretch_type = stretch_type;
        self
    }

    pub fn print_when(mut self, expression: ExpressionId) -> Self {
        self.print_when = Some(expression);
        self
    }

    pub fn remove_line_when_blank(mut self, enabled: bool) -> Self {
        self.remove_line_when_blank = enabled;
        self
    }

    pub fn print_when_detail_overflows(mut self, enabled: bool) -> Self {
        self.print_when_detail_overflows = enabled;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub(crate) fn space_to_bottom(&self, container_height: Pt) -> Pt {
        (container_height - self.y - self.height).clamp_non_negative()
    }

    pub(crate) fn carries_remainder(&self) -> bool {
        self.component.carries_remainder()
    }

    pub(crate) fn evaluate(
        &mut self,
        ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.print_when_value = match self.print_when {
            Some(expression) => evaluator.evaluate(expression, pass)?.is_truthy(),
            None => true,
        };
        if self.print_when_value {
            self.component.evaluate(ctx, evaluator, pass)?;
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self, is_overflow: bool) {
        self.relative_y = self.y;
        self.stretch_height = self.height;
        self.collapsed_above = Pt::ZERO;
        self.collapsed_below = Pt::ZERO;
        self.to_print = false;
        self.reprinted = false;
        if !is_overflow {
            self.already_printed = false;
        }
    }

    /// Returns whether the element overflows. `available` is measured in the
    /// container's coordinates, i.e. comparable with `relative_y`.
    pub(crate) fn prepare(
        &mut self,
        ctx: &FillContext,
        available: Pt,
        is_overflow: bool,
    ) -> Result<bool, FillError> {
        self.to_print = false;
        self.reprinted = false;
        if !self.print_when_value {
            return Ok(false);
        }
        if is_overflow && self.already_printed && !self.component.carries_remainder() {
            if !self.print_when_detail_overflows {
                return Ok(false);
            }
            self.component.rewind()?;
            self.reprinted = true;
        }
        if self.relative_y + self.height > available {
            return Ok(true);
        }
        let result = self.component.prepare(
            ctx,
            PrepareRequest {
                width: self.width,
                design_height: self.height,
                available: available - self.relative_y,
                is_overflow: is_overflow && !self.reprinted,
            },
        )?;
        if result.is_to_print() {
            self.to_print = true;
            if result.outcome == PrepareOutcome::FitsStretched {
                self.stretch_height = result.stretch_height.max(self.height);
            }
        }
        Ok(result.overflow)
    }

    pub(crate) fn fill(
        &mut self,
        ctx: &FillContext,
        first_y: Pt,
    ) -> Result<Option<PrintElement>, FillError> {
        let bounds = Rect::new(
            self.x,
            self.relative_y - first_y,
            self.width,
            self.stretch_height,
        );
        let printed = self.component.fill(ctx, self.id, bounds)?;
        self.already_printed = true;
        Ok(printed)
    }

    pub(crate) fn rewind(&mut self) -> Result<(), FillError> {
        self.already_printed = false;
        self.component.rewind()
    }

    pub(crate) fn create_clone(&self, ctx: &mut CloneContext) -> Result<FillElement, FillError> {
        let id = ctx.map(self.id);
        let component = self.component.create_clone(ctx)?;
        let mut clone = FillElement::boxed(self.key.clone(), self.bounds(), component);
        clone.id = id;
        clone.position_type = self.position_type;
        clone.stretch_type = self.stretch_type;
        clone.print_when = self.print_when;
        clone.remove_line_when_blank = self.remove_line_when_blank;
        clone.print_when_detail_overflows = self.print_when_detail_overflows;
        clone.print_when_value = self.print_when_value;
        clone.dependants = self.dependants.iter().map(|dep| ctx.map(*dep)).collect();
        Ok(clone)
    }
}

impl std::fmt::Debug for FillElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillElement")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("component", &self.component.debug_name())
            .field("relative_y", &self.relative_y)
            .field("stretch_height", &self.stretch_height)
            .field("to_print", &self.to_print)
            .finish()
    }
}

/// Static text, text fields and page counters.
#[derive(Debug, Clone)]
pub struct TextComponent {
    name: String,
    source: TextSource,
    time: EvaluationTime,
    style: Arc<ElementStyle>,
    stretch_with_overflow: bool,

    text: String,
    lines: Vec<String>,
    wrapped_width: Option<Pt>,
    line_cursor: usize,
    chunk: Range<usize>,
    consume_all: bool,
}

impl TextComponent {
    pub fn new(name: impl Into<String>, source: TextSource, style: Arc<ElementStyle>) -> Self {
        Self {
            name: name.into(),
            source,
            time: EvaluationTime::Now,
            style,
            stretch_with_overflow: false,
            text: String::new(),
            lines: Vec::new(),
            wrapped_width: None,
            line_cursor: 0,
            chunk: 0..0,
            consume_all: false,
        }
    }

    pub fn label(name: impl Into<String>, text: impl Into<String>, style: Arc<ElementStyle>) -> Self {
        Self::new(name, TextSource::Static(text.into()), style)
    }

    pub fn field(name: impl Into<String>, expression: ExpressionId, style: Arc<ElementStyle>) -> Self {
        Self::new(name, TextSource::Expression(expression), style)
    }

    pub fn evaluation_time(mut self, time: EvaluationTime) -> Self {
        self.time = time;
        self
    }

    pub fn stretch_with_overflow(mut self, enabled: bool) -> Self {
        self.stretch_with_overflow = enabled;
        self
    }

    fn is_delayed(&self) -> bool {
        self.time != EvaluationTime::Now
    }

    fn ensure_wrapped(&mut self, ctx: &FillContext, width: Pt) {
        if self.wrapped_width == Some(width) {
            return;
        }
        let text_width = (width - self.style.padding * 2).clamp_non_negative();
        self.lines = if self.text.is_empty() {
            Vec::new()
        } else {
            wrap_lines(&ctx.fonts, &self.style.font, &self.text, text_width)
        };
        self.wrapped_width = Some(width);
        self.line_cursor = self.line_cursor.min(self.lines.len());
    }
}

impl FillComponent for TextComponent {
    fn evaluate(
        &mut self,
        ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.text = if self.is_delayed() {
            String::new()
        } else {
            match &self.source {
                TextSource::Static(text) => text.clone(),
                TextSource::Expression(id) => evaluator.evaluate(*id, pass)?.display_string(),
                TextSource::PageNumber | TextSource::PageCount => ctx.page_number.to_string(),
            }
        };
        self.wrapped_width = None;
        self.line_cursor = 0;
        self.chunk = 0..0;
        Ok(())
    }

    fn prepare(
        &mut self,
        ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        self.consume_all = false;
        if self.is_delayed() {
            return Ok(FillPrepareResult::fits(request.design_height));
        }
        self.ensure_wrapped(ctx, request.width);
        if self.line_cursor >= self.lines.len() {
            self.chunk = self.line_cursor..self.line_cursor;
            return Ok(FillPrepareResult::no_content());
        }
        let line_height = ctx.fonts.line_height(&self.style.font);
        let spacing = self.style.line_spacing;
        let padding = self.style.padding * 2;
        let remaining = self.lines.len() - self.line_cursor;
        let needed = lines_height(line_height, spacing, remaining) + padding;

        if needed <= request.design_height {
            self.chunk = self.line_cursor..self.lines.len();
            return Ok(FillPrepareResult::fits(request.design_height));
        }
        if !self.stretch_with_overflow {
            let fit = lines_fitting(line_height, spacing, request.design_height - padding);
            self.chunk = self.line_cursor..self.line_cursor + fit.min(remaining);
            self.consume_all = true;
            return Ok(FillPrepareResult::fits(request.design_height));
        }
        if needed <= request.available {
            self.chunk = self.line_cursor..self.lines.len();
            return Ok(FillPrepareResult::printed(
                request.design_height,
                needed,
                false,
            ));
        }
        let fit = lines_fitting(line_height, spacing, request.available - padding).min(remaining);
        if fit == 0 {
            self.chunk = self.line_cursor..self.line_cursor;
            return Ok(FillPrepareResult::no_content_overflow());
        }
        self.chunk = self.line_cursor..self.line_cursor + fit;
        let height = lines_height(line_height, spacing, fit) + padding;
        Ok(FillPrepareResult::printed(
            request.design_height,
            height,
            true,
        ))
    }

    fn fill(
        &mut self,
        _ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        let kind = if self.is_delayed() {
            PrintElementKind::Text {
                text: String::new(),
                delayed: Some(DelayedText {
                    source: self.source.clone(),
                    time: self.time.clone(),
                }),
            }
        } else {
            let text = self
                .lines
                .get(self.chunk.clone())
                .map(|lines| lines.join("\n"))
                .unwrap_or_default();
            self.line_cursor = if self.consume_all {
                self.lines.len()
            } else {
                self.chunk.end
            };
            PrintElementKind::Text {
                text,
                delayed: None,
            }
        };
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            kind,
        )))
    }

    fn rewind(&mut self) -> Result<(), FillError> {
        self.line_cursor = 0;
        self.chunk = 0..0;
        Ok(())
    }

    fn carries_remainder(&self) -> bool {
        self.line_cursor > 0 && self.line_cursor < self.lines.len()
    }

    fn create_clone(&self, _ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        let mut clone = self.clone();
        clone.text.clear();
        clone.lines.clear();
        clone.wrapped_width = None;
        clone.line_cursor = 0;
        clone.chunk = 0..0;
        Ok(Box::new(clone))
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Static(Arc<ImageData>),
    Expression(ExpressionId),
}

#[derive(Debug, Clone)]
pub struct ImageComponent {
    name: String,
    source: ImageSource,
    scale: ScaleImage,
    style: Arc<ElementStyle>,

    data: Option<Arc<ImageData>>,
    moved: bool,
}

impl ImageComponent {
    pub fn new(
        name: impl Into<String>,
        source: ImageSource,
        scale: ScaleImage,
        style: Arc<ElementStyle>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            scale,
            style,
            data: None,
            moved: false,
        }
    }

    /// Height the image wants at `width`. Pixels map to points one to one.
    fn natural_height(&self, data: &ImageData, width: Pt, design_height: Pt) -> Result<Pt, FillError> {
        match self.scale {
            ScaleImage::RealHeight | ScaleImage::RealSize => {
                let (px_width, px_height) = image_dimensions(data)
                    .map_err(|err| FillError::component(&self.name, err.to_string()))?;
                if px_width == 0 || px_height == 0 {
                    return Ok(design_height);
                }
                Ok(match self.scale {
                    ScaleImage::RealSize => Pt::from_i32(px_height as i32),
                    _ => width.mul_ratio(px_height as i64, px_width as i64),
                })
            }
            _ => Ok(design_height),
        }
    }
}

pub(crate) fn image_dimensions(data: &ImageData) -> Result<(u32, u32), image::ImageError> {
    image::ImageReader::new(std::io::Cursor::new(&data.bytes))
        .with_guessed_format()?
        .into_dimensions()
}

impl FillComponent for ImageComponent {
    fn evaluate(
        &mut self,
        _ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.data = match &self.source {
            ImageSource::Static(data) => Some(data.clone()),
            ImageSource::Expression(id) => match evaluator.evaluate(*id, pass)? {
                Value::Null => None,
                Value::Bytes(bytes) => Some(Arc::new(ImageData::new(bytes))),
                other => {
                    return Err(FillError::evaluation(
                        id.0,
                        format!("image expression produced {other:?}"),
                    ));
                }
            },
        };
        self.moved = false;
        Ok(())
    }

    fn prepare(
        &mut self,
        _ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        let Some(data) = self.data.clone() else {
            return Ok(FillPrepareResult::no_content());
        };
        let natural = self.natural_height(&data, request.width, request.design_height)?;
        if natural <= request.design_height {
            return Ok(FillPrepareResult::fits(request.design_height));
        }
        if natural <= request.available {
            self.moved = false;
            return Ok(FillPrepareResult::printed(
                request.design_height,
                natural,
                false,
            ));
        }
        if request.is_overflow && self.moved {
            // already moved once: clip to what is left
            self.moved = false;
            return Ok(FillPrepareResult::printed(
                request.design_height,
                request.available,
                false,
            ));
        }
        self.moved = true;
        Ok(FillPrepareResult::no_content_overflow())
    }

    fn fill(
        &mut self,
        _ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        let Some(data) = self.data.clone() else {
            return Ok(None);
        };
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            PrintElementKind::Image {
                data,
                scale: self.scale,
            },
        )))
    }

    fn carries_remainder(&self) -> bool {
        self.moved
    }

    fn rewind(&mut self) -> Result<(), FillError> {
        self.moved = false;
        Ok(())
    }

    fn create_clone(&self, _ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        let mut clone = self.clone();
        clone.data = None;
        clone.moved = false;
        Ok(Box::new(clone))
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphicShape {
    Line(LineDirection),
    Rectangle { radius: Pt },
    Ellipse,
}

/// Lines and shapes. They never stretch on their own; container stretch
/// applies through the element's stretch type.
#[derive(Debug, Clone)]
pub struct GraphicComponent {
    name: String,
    shape: GraphicShape,
    style: Arc<ElementStyle>,
}

impl GraphicComponent {
    pub fn new(name: impl Into<String>, shape: GraphicShape, style: Arc<ElementStyle>) -> Self {
        Self {
            name: name.into(),
            shape,
            style,
        }
    }
}

impl FillComponent for GraphicComponent {
    fn evaluate(
        &mut self,
        _ctx: &FillContext,
        _evaluator: &dyn Evaluator,
        _pass: EvaluationPass,
    ) -> Result<(), FillError> {
        Ok(())
    }

    fn prepare(
        &mut self,
        _ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        Ok(FillPrepareResult::fits(request.design_height))
    }

    fn fill(
        &mut self,
        _ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        let kind = match self.shape {
            GraphicShape::Line(direction) => PrintElementKind::Line { direction },
            GraphicShape::Rectangle { radius } => PrintElementKind::Rectangle { radius },
            GraphicShape::Ellipse => PrintElementKind::Ellipse,
        };
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            kind,
        )))
    }

    fn create_clone(&self, _ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        Ok(Box::new(self.clone()))
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

/// Opaque element handed to exporters by type name, with evaluated parameters.
#[derive(Debug, Clone)]
pub struct GenericComponent {
    name: String,
    type_name: String,
    parameters: Vec<(String, ExpressionId)>,
    style: Arc<ElementStyle>,
    values: Vec<(String, Value)>,
}

impl GenericComponent {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        parameters: Vec<(String, ExpressionId)>,
        style: Arc<ElementStyle>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            parameters,
            style,
            values: Vec::new(),
        }
    }
}

impl FillComponent for GenericComponent {
    fn evaluate(
        &mut self,
        _ctx: &FillContext,
        evaluator: &dyn Evaluator,
        pass: EvaluationPass,
    ) -> Result<(), FillError> {
        self.values = self
            .parameters
            .iter()
            .map(|(name, id)| Ok((name.clone(), evaluator.evaluate(*id, pass)?)))
            .collect::<Result<_, FillError>>()?;
        Ok(())
    }

    fn prepare(
        &mut self,
        _ctx: &FillContext,
        request: PrepareRequest,
    ) -> Result<FillPrepareResult, FillError> {
        Ok(FillPrepareResult::fits(request.design_height))
    }

    fn fill(
        &mut self,
        _ctx: &FillContext,
        origin: NodeId,
        bounds: Rect,
    ) -> Result<Option<PrintElement>, FillError> {
        Ok(Some(PrintElement::new(
            origin,
            bounds,
            self.style.clone(),
            PrintElementKind::Generic {
                type_name: self.type_name.clone(),
                parameters: self.values.clone(),
            },
        )))
    }

    fn create_clone(&self, _ctx: &mut CloneContext) -> Result<Box<dyn FillComponent>, FillError> {
        let mut clone = self.clone();
        clone.values.clear();
        Ok(Box::new(clone))
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}
