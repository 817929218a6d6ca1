use crate::debug::FillTrace;
use crate::error::FillError;
use crate::font::FontRegistry;
use crate::print::PrintPage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Page identity handed to listeners.
#[derive(Debug, Clone)]
pub struct DocContext {
    pub page_number: usize,
    pub report_name: String,
}

impl DocContext {
    pub fn new(page_number: usize, report_name: impl Into<String>) -> Self {
        Self {
            page_number,
            report_name: report_name.into(),
        }
    }
}

/// Parent/child channel for nested fills and progress observers.
pub trait FillListener: Send + Sync {
    fn page_added(&self, _ctx: &DocContext) {}

    fn page_finished(&self, _ctx: &DocContext, _page: &PrintPage) {}
}

/// Externally settable interrupt flag, checked between bands and records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State shared by every fill unit during one document fill.
#[derive(Clone)]
pub struct FillContext {
    pub fonts: Arc<FontRegistry>,
    /// One-based number of the page being filled.
    pub page_number: usize,
    /// Extra pages a tiling row may overflow without progress before failing.
    pub overflow_page_limit: usize,
    pub cancel: CancellationToken,
    pub(crate) trace: Option<Arc<FillTrace>>,
}

impl FillContext {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self {
            fonts,
            page_number: 1,
            overflow_page_limit: 1,
            cancel: CancellationToken::new(),
            trace: None,
        }
    }

    pub fn check_cancelled(&self) -> Result<(), FillError> {
        if self.cancel.is_cancelled() {
            return Err(FillError::Cancelled {
                page: self.page_number,
            });
        }
        Ok(())
    }

    pub(crate) fn trace_event(&self, counter: &str, event: serde_json::Value) {
        if let Some(trace) = self.trace.as_deref() {
            trace.log_event(event);
            trace.increment(counter, 1);
        }
    }
}

impl Default for FillContext {
    fn default() -> Self {
        Self::new(Arc::new(FontRegistry::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_observed_with_page() {
        let mut ctx = FillContext::default();
        ctx.page_number = 4;
        assert!(ctx.check_cancelled().is_ok());
        let token = ctx.cancel.clone();
        token.cancel();
        let err = ctx.check_cancelled().unwrap_err();
        assert!(matches!(err, FillError::Cancelled { page: 4 }));
    }
}
