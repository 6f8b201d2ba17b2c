use crate::model::NotebookId;
use once_cell::sync::Lazy;
use regex::Regex;

static NOTEBOOK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)libro\s*(\d+)").expect("valid notebook regex"));

/// Extract the notebook number from a caption. Matches the first
/// case-insensitive `libro <digits>` occurrence anywhere in the text.
pub fn parse_notebook(caption: Option<&str>) -> Option<NotebookId> {
    let caption = caption?;
    let caps = NOTEBOOK_RE.captures(caption)?;
    caps[1].parse::<u32>().ok().map(NotebookId)
}
