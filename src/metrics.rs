#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub prepare_ms: f64,
    pub band_count: usize,
    pub object_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepareMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_prepare_ms: f64,
    pub passes: usize,
    pub rows_processed: usize,
    pub band_breaks: usize,
}

impl PrepareMetrics {
    pub fn total_objects(&self) -> usize {
        self.pages.iter().map(|page| page.object_count).sum()
    }
}
