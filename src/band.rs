use crate::container::ElementContainer;
use crate::doc_context::FillContext;
use crate::element::FillElement;
use crate::error::FillError;
use crate::evaluator::{EvaluationPass, Evaluator, ExpressionId};
use crate::print::PrintElement;
use crate::types::Pt;

/// How a band may be split across pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitType {
    #[default]
    Stretch,
    /// Moves to the next page instead of splitting, unless it already starts
    /// on an empty frame.
    Prevent,
    /// May start as soon as its first element fits; the rest continues on
    /// the next page.
    Immediate,
}

/// Laid-out content of one band pass, relative to the band top.
#[derive(Debug, Clone)]
pub struct PrintBand {
    pub height: Pt,
    pub elements: Vec<PrintElement>,
    pub will_overflow: bool,
}

#[derive(Debug)]
pub struct FillBand {
    container: ElementContainer,
    print_when: Option<ExpressionId>,
    split_type: SplitType,
    print_when_value: bool,
}

impl FillBand {
    pub fn new(name: impl Into<String>, width: Pt, height: Pt, elements: Vec<FillElement>) -> Self {
        Self {
            container: ElementContainer::new(name, width, height, elements),
            print_when: None,
            split_type: SplitType::Stretch,
            print_when_value: true,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Pt::ZERO, Pt::ZERO, Vec::new())
    }

    pub fn print_when(mut self, expression: ExpressionId) -> Self {
        self.print_when = Some(expression);
        self
    }

    pub fn split_type(mut self, split_type: SplitType) -> Self {
        self.split_type = split_type;
        self
    }

    pub fn name(&self) -> &str {
        self.container.name()
    }

    pub fn height(&self) -> Pt {
        self.container.height()
    }

    pub fn split(&self) -> SplitType {
        self.split_type
    }

    /// Space the band needs before it may start in a column.
    pub fn break_height(&self) -> Pt {
        let height = self.height();
        if self.split_type != SplitType::Immediate {
            return height;
        }
        self.container
            .elements()
            .iter()
            .map(|element| element.y + element.height)
            .fold(height, Pt::min)
    }

    pub fn is_to_print(&self) -> bool {
        self.print_when_value && (self.height() > Pt::ZERO || !self.container.is_empty())
    }

    pub fn will_overflow(&self) -> bool {
        self.container.will_overflow()
    }

    pub fn evaluate(
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
            self.container.evaluate(ctx, evaluator, pass)?;
        }
        Ok(())
    }

    /// Lays the band out into `available` and returns the height it needs,
    /// without committing any content.
    pub fn prepare(
        &mut self,
        ctx: &FillContext,
        available: Pt,
        overflow_allowed: bool,
    ) -> Result<Pt, FillError> {
        ctx.check_cancelled()?;
        self.container.prepare(ctx, available, overflow_allowed)?;
        Ok(self.container.printed_height())
    }

    /// Commits the last preparation. An overflowing band takes exactly the
    /// space that was offered.
    pub fn fill_prepared(&mut self, ctx: &FillContext, available: Pt) -> Result<PrintBand, FillError> {
        let will_overflow = self.container.will_overflow();
        let height = if will_overflow {
            available
        } else {
            self.container.printed_height()
        };
        self.container.stretch_to(height);
        self.container.finalize_element_positions();
        let elements = self.container.fill_elements(ctx)?;
        Ok(PrintBand {
            height,
            elements,
            will_overflow,
        })
    }

    pub fn fill(
        &mut self,
        ctx: &FillContext,
        available: Pt,
        overflow_allowed: bool,
    ) -> Result<PrintBand, FillError> {
        self.prepare(ctx, available, overflow_allowed)?;
        self.fill_prepared(ctx, available)
    }

    /// Discards any partial progress so the band fills again from the start.
    pub fn rewind(&mut self) -> Result<(), FillError> {
        self.container.rewind()
    }
}
