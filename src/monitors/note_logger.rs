// src/monitors/note_logger.rs
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use super::note::Note;
use super::timeline::NoteHandler;

const PREVIEW_CHARS: usize = 50;

/// Logs a short preview of every note it sees.
#[derive(Debug, Default)]
pub struct NoteLogger {
    seen: AtomicU64,
}

impl NoteLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[async_trait]
impl NoteHandler for NoteLogger {
    fn name(&self) -> &str {
        "NoteLogger"
    }

    async fn handle_note(&self, note: &Note) -> Result<()> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        info!(
            "Note {} by @{}: {}",
            note.id,
            note.author_username(),
            preview(note.text.as_deref().unwrap_or_default())
        );
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        info!("NoteLogger saw {} note(s)", self.seen());
        Ok(())
    }
}
