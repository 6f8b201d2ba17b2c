use crate::batch::GroupCollector;
use crate::model::PhotoItem;
use crate::pipeline::Processor;
use crate::telegram::ChatReporter;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, instrument};

const START_TEXT: &str = "👋 ¡Hola! I'm your poetry digitizer.\n\n\
📚 Send me a photo of a handwritten poem with the notebook number in the caption.\n\n\
Example caption: \"libro 1\"\n\n\
Features:\n\
• Transcribes the handwriting and saves it as Markdown with metadata\n\
• Stores the original photo in Google Drive\n\
• Supports batch processing (send multiple photos at once!)\n\n\
Ready when you are! 🖋️";

const HELP_TEXT: &str = "📖 Help\n\n\
Send a photo with caption \"libro X\" where X is the notebook number.\n\n\
• Single photo: send one photo\n\
• Batch: send multiple photos at once (the caption on any of them counts)\n\n\
I'll organize everything into folders on Google Drive.";

pub struct AppState {
    pub processor: Processor,
    pub collector: GroupCollector,
}

#[instrument(skip_all)]
pub async fn handle_update(bot: &Bot, state: &Arc<AppState>, msg: &Message) -> Result<()> {
    if let Some(text) = msg.text() {
        return handle_command(bot, msg, text).await;
    }

    let Some(sizes) = msg.photo() else {
        return Ok(());
    };
    // Variants are ordered smallest to largest; take the largest.
    let Some(largest) = sizes.last() else {
        return Ok(());
    };
    let item = PhotoItem {
        file_id: largest.file.id.clone(),
    };
    let reporter = ChatReporter::new(bot.clone(), msg.chat.id);

    match msg.media_group_id() {
        Some(group_id) => {
            let opened = state.collector.push(group_id, item, msg.caption());
            if opened {
                let state = Arc::clone(state);
                let group_id = group_id.to_string();
                tokio::spawn(async move {
                    let Some(group) = state.collector.take_after_window(&group_id).await else {
                        return;
                    };
                    let run = if group.items.len() > 1 {
                        state
                            .processor
                            .process_batch(&reporter, group.caption.as_deref(), &group.items)
                            .await
                            .map(|_| ())
                    } else {
                        state
                            .processor
                            .process_standalone(&reporter, group.caption.as_deref(), &group.items[0])
                            .await
                            .map(|_| ())
                    };
                    if let Err(err) = run {
                        error!(?err, %group_id, "failed to process media group");
                    }
                });
            }
        }
        None => {
            state
                .processor
                .process_standalone(&reporter, msg.caption(), &item)
                .await?;
        }
    }

    Ok(())
}

async fn handle_command(bot: &Bot, msg: &Message, text: &str) -> Result<()> {
    match text.trim() {
        "/start" => {
            bot.send_message(msg.chat.id, START_TEXT).await?;
        }
        "/help" => {
            bot.send_message(msg.chat.id, HELP_TEXT).await?;
        }
        "/ping" => {
            bot.send_message(msg.chat.id, "PONG").await?;
        }
        command if command.starts_with('/') => {
            bot.send_message(msg.chat.id, "Unknown command.").await?;
        }
        _ => {}
    }
    Ok(())
}
