use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMetrics {
    pub page_number: usize,
    pub fill_ms: f64,
    pub band_count: usize,
    pub element_count: usize,
}

/// Counters of one virtualization context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VirtualizationMetrics {
    pub pages_evicted: u64,
    pub pages_loaded: u64,
    /// Reloaded pages released again without rewriting.
    pub clean_drops: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FillMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_fill_ms: f64,
    pub virtualization: VirtualizationMetrics,
}
