use crate::archive::ArchiveStore;
use crate::caption;
use crate::imageproc;
use crate::model::{BatchSummary, NotebookId, PhotoItem, ProcessingResult};
use crate::telegram::{is_instance_conflict, MediaFetcher, MessageRef, Reporter};
use crate::transcribe::{usable, Transcriber};
use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Transcript preview bound inside a batch run.
pub const BATCH_PREVIEW_LIMIT: usize = 1000;
/// Transcript preview bound for a standalone photo.
pub const SINGLE_PREVIEW_LIMIT: usize = 3800;

/// Placeholder title for transcripts with no non-blank line.
pub const UNTITLED: &str = "poema_sin_titulo";

const TRUNCATION_NOTICE: &str = "\n\n...(continúa en Drive)";

const MISSING_NOTEBOOK_MSG: &str =
    "❌ Please include the notebook number in the caption (e.g., \"libro 1\", \"libro 2\")";

const CONFLICT_ADVISORY: &str = "⚠️ Bot is experiencing API conflicts.\n\n\
This happens when another bot process is using the same bot token.\n\n\
Possible causes:\n\
• A stale bot process from a previous session\n\
• The bot running on another machine\n\n\
If this continues, wait 30 seconds for Telegram to resolve.";

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z_\s\-áéíóúñÁÉÍÓÚÑ]").expect("valid sanitizer regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Why one photo failed. Converted into a short user-facing message; the
/// underlying detail goes to tracing, never to the chat.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("failed to download photo: {0}")]
    Download(String),
    #[error("failed to preprocess image: {0}")]
    Normalize(String),
    #[error("transcription returned no usable text")]
    EmptyTranscript,
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("status update failed: {0}")]
    Report(String),
    #[error("another process is polling with the same bot token")]
    Conflict,
}

impl ItemError {
    pub fn user_message(&self) -> String {
        match self {
            ItemError::EmptyTranscript | ItemError::Transcription(_) => {
                "❌ Could not read text from this image. Please try with a clearer photo."
                    .to_string()
            }
            ItemError::Conflict => CONFLICT_ADVISORY.to_string(),
            other => format!("❌ Error: {}", other),
        }
    }
}

/// Where an item sits in its run; decides progress wording and the preview
/// bound.
#[derive(Debug, Clone, Copy)]
enum ItemSlot {
    Standalone,
    Batch { index: usize, total: usize },
}

impl ItemSlot {
    fn success_heading(&self) -> String {
        match self {
            ItemSlot::Standalone => "✅ Done!".to_string(),
            ItemSlot::Batch { index, total } => format!("✅ Poema {}/{}!", index, total),
        }
    }
}

pub struct ProcessorOptions {
    pub root_folder_id: String,
    pub language: String,
    pub batch_preview_limit: usize,
    pub single_preview_limit: usize,
}

impl ProcessorOptions {
    pub fn new(root_folder_id: String, language: String) -> Self {
        Self {
            root_folder_id,
            language,
            batch_preview_limit: BATCH_PREVIEW_LIMIT,
            single_preview_limit: SINGLE_PREVIEW_LIMIT,
        }
    }
}

/// Drives one photo at a time through fetch, normalize, folder resolution,
/// transcription, persistence, and reporting. Failures are caught here and
/// converted into results; nothing escapes to take the process down.
pub struct Processor {
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: Arc<dyn Transcriber>,
    store: Arc<dyn ArchiveStore>,
    opts: ProcessorOptions,
}

impl Processor {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn ArchiveStore>,
        opts: ProcessorOptions,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            store,
            opts,
        }
    }

    /// Process a photo that arrived on its own. Returns `None` when no
    /// notebook number could be parsed (the user is told how to caption).
    #[instrument(skip_all)]
    pub async fn process_standalone(
        &self,
        reporter: &dyn Reporter,
        caption: Option<&str>,
        item: &PhotoItem,
    ) -> Result<Option<ProcessingResult>> {
        let Some(notebook) = caption::parse_notebook(caption) else {
            reporter.send(MISSING_NOTEBOOK_MSG).await?;
            return Ok(None);
        };
        let status = reporter
            .send(&format!("📚 Processing photo for Libro {}...", notebook))
            .await?;
        let result = self
            .run_reported(reporter, status, notebook, item, ItemSlot::Standalone)
            .await;
        Ok(Some(result))
    }

    /// Process a collected media group sequentially, sharing one status
    /// message, and emit one summary. Returns `None` when the group caption
    /// has no notebook number; no item is attempted in that case.
    #[instrument(skip_all, fields(total = items.len()))]
    pub async fn process_batch(
        &self,
        reporter: &dyn Reporter,
        caption: Option<&str>,
        items: &[PhotoItem],
    ) -> Result<Option<BatchSummary>> {
        let Some(notebook) = caption::parse_notebook(caption) else {
            reporter.send(MISSING_NOTEBOOK_MSG).await?;
            return Ok(None);
        };
        let total = items.len();
        let status = reporter
            .send(&format!(
                "📚 Starting batch process for Libro {}...\n\n📸 Processing {} photo(s)...",
                notebook, total
            ))
            .await?;
        info!(%notebook, total, "processing photo batch");

        let mut results = Vec::with_capacity(total);
        for (idx, item) in items.iter().enumerate() {
            let slot = ItemSlot::Batch {
                index: idx + 1,
                total,
            };
            results.push(self.run_reported(reporter, status, notebook, item, slot).await);
        }

        let summary = BatchSummary::from_results(&results);
        info!(
            successful = summary.successful(),
            failed = summary.failed(),
            "batch complete"
        );
        reporter.send(&render_summary(notebook, &summary)).await?;
        Ok(Some(summary))
    }

    async fn run_reported(
        &self,
        reporter: &dyn Reporter,
        status: MessageRef,
        notebook: NotebookId,
        item: &PhotoItem,
        slot: ItemSlot,
    ) -> ProcessingResult {
        match self.run_item(reporter, status, notebook, item, slot).await {
            Ok(title) => ProcessingResult::Success { title },
            Err(err) => {
                warn!(%err, "photo processing failed");
                if let Err(send_err) = reporter.send(&err.user_message()).await {
                    warn!(?send_err, "failed to report processing error");
                }
                ProcessingResult::Failure {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn run_item(
        &self,
        reporter: &dyn Reporter,
        status: MessageRef,
        notebook: NotebookId,
        item: &PhotoItem,
        slot: ItemSlot,
    ) -> Result<String, ItemError> {
        if let ItemSlot::Batch { index, total } = slot {
            let progress = format!(
                "📚 Processing photo {}/{} for Libro {}...",
                index, total, notebook
            );
            reporter
                .edit(status, &progress)
                .await
                .map_err(|err| classify_transport(err, ItemError::Report))?;
        }

        let original = self
            .fetcher
            .fetch(&item.file_id)
            .await
            .map_err(|err| classify_transport(err, ItemError::Download))?;

        let normalized =
            imageproc::normalize(&original).map_err(|err| ItemError::Normalize(format!("{err:#}")))?;

        let folder_id = self
            .store
            .find_or_create_folder(&notebook.folder_name(), &self.opts.root_folder_id)
            .await
            .map_err(|err| ItemError::Storage(format!("{err:#}")))?;

        let text = self
            .transcriber
            .transcribe(&normalized)
            .await
            .map_err(|err| ItemError::Transcription(format!("{err:#}")))?;
        if usable(&text).is_none() {
            return Err(ItemError::EmptyTranscript);
        }

        let title = derive_title(&text);
        let image_name = format!("{}.jpg", title);
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let markdown = render_transcript(
            &title,
            notebook,
            &date,
            &self.opts.language,
            &image_name,
            &text,
        );

        let transcript_name = format!("{}.md", sanitize_title(&title));
        let transcript_id = self
            .store
            .create_object(&folder_id, &transcript_name, markdown.into_bytes(), "text/markdown")
            .await
            .map_err(|err| ItemError::Storage(format!("{err:#}")))?;
        let image_id = self
            .store
            .create_object(&folder_id, &image_name, original, "image/jpeg")
            .await
            .map_err(|err| ItemError::Storage(format!("{err:#}")))?;
        self.store
            .make_public(&transcript_id)
            .await
            .map_err(|err| ItemError::Storage(format!("{err:#}")))?;
        self.store
            .make_public(&image_id)
            .await
            .map_err(|err| ItemError::Storage(format!("{err:#}")))?;

        let limit = match slot {
            ItemSlot::Standalone => self.opts.single_preview_limit,
            ItemSlot::Batch { .. } => self.opts.batch_preview_limit,
        };
        let preview = truncate_preview(&text, limit);
        let final_text = format!(
            "{}\n\n📁 Libro: {}\n📝 Título: \"{}\"\n\n📄 Poema:\n\n{}\n\n\
             📄 Texto guardado en Google Drive\n🖼️ Imagen guardada en Google Drive",
            slot.success_heading(),
            notebook,
            title,
            preview
        );
        reporter
            .send(&final_text)
            .await
            .map_err(|err| classify_transport(err, ItemError::Report))?;

        info!(%notebook, title = %title, "photo archived");
        Ok(title)
    }
}

fn classify_transport(err: anyhow::Error, wrap: fn(String) -> ItemError) -> ItemError {
    if is_instance_conflict(&err) {
        ItemError::Conflict
    } else {
        wrap(format!("{err:#}"))
    }
}

/// First non-blank transcript line, trimmed; placeholder when there is none.
pub fn derive_title(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(UNTITLED)
        .to_string()
}

/// Filename stem from a title: first 50 characters, stripped of everything
/// outside word characters, whitespace, hyphens, and Spanish accented
/// letters, then trimmed with internal whitespace collapsed.
pub fn sanitize_title(title: &str) -> String {
    let truncated: String = title.chars().take(50).collect();
    let stripped = DISALLOWED_CHARS.replace_all(&truncated, "");
    WHITESPACE_RUN
        .replace_all(stripped.trim(), " ")
        .into_owned()
}

/// Bound the transcript shown in chat, with a continuation notice when cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}{}", cut, TRUNCATION_NOTICE)
}

/// Markdown transcript with a YAML frontmatter header, mirroring what gets
/// archived next to the photo.
pub fn render_transcript(
    title: &str,
    notebook: NotebookId,
    date: &str,
    language: &str,
    image_file: &str,
    body: &str,
) -> String {
    format!(
        "---\ntitle: \"{}\"\nbook: \"{}\"\ndate: \"{}\"\nlanguage: \"{}\"\nimage_file: \"{}\"\n---\n\n{}\n",
        title,
        notebook.folder_name(),
        date,
        language,
        image_file,
        body
    )
}

pub fn render_summary(notebook: NotebookId, summary: &BatchSummary) -> String {
    let mut text = format!(
        "🎉 Batch complete for Libro {}!\n\n📊 {}/{} successful",
        notebook,
        summary.successful(),
        summary.total
    );
    if summary.failed() > 0 {
        text.push_str(&format!("\n⚠️ {} failed", summary.failed()));
    }
    if !summary.titles.is_empty() {
        text.push_str("\n\n📝 Poemas procesados:\n");
        let titles: Vec<String> = summary
            .titles
            .iter()
            .map(|title| format!("✅ {}", title))
            .collect();
        text.push_str(&titles.join("\n"));
    }
    if !summary.failures.is_empty() {
        text.push_str("\n\n❌ Errores:\n");
        let failures: Vec<String> = summary
            .failures
            .iter()
            .map(|(index, error)| format!("❌ {}. {}", index, error))
            .collect();
        text.push_str(&failures.join("\n"));
    }
    text
}
