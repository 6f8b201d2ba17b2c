use std::fmt;

/// Notebook number parsed from a photo caption ("libro 3" -> 3).
/// Used only as a grouping key; the archive folder is named after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotebookId(pub u32);

impl NotebookId {
    pub fn folder_name(&self) -> String {
        format!("Libro {}", self.0)
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound photo: the file id of its largest resolution variant.
/// Bytes are fetched lazily by the processor and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoItem {
    pub file_id: String,
}

/// Accumulator for photos delivered as one media group. Holds the items in
/// arrival order and at most one caption (first non-empty caption wins).
#[derive(Debug, Default)]
pub struct PhotoGroup {
    pub items: Vec<PhotoItem>,
    pub caption: Option<String>,
}

/// Outcome of one processed photo. Failures are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    Success { title: String },
    Failure { error: String },
}

impl ProcessingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingResult::Success { .. })
    }
}

/// Aggregate of a batch run: success titles in order, failures numbered by
/// the item's position within the batch (1-based).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub titles: Vec<String>,
    pub failures: Vec<(usize, String)>,
}

impl BatchSummary {
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for (idx, result) in results.iter().enumerate() {
            match result {
                ProcessingResult::Success { title } => summary.titles.push(title.clone()),
                ProcessingResult::Failure { error } => {
                    summary.failures.push((idx + 1, error.clone()))
                }
            }
        }
        summary
    }

    pub fn successful(&self) -> usize {
        self.titles.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}
