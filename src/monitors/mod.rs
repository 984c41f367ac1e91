// src/monitors/mod.rs
mod note;
mod note_logger;
mod timeline;

pub use note::{Note, NoteUser};
pub use note_logger::NoteLogger;
pub use timeline::{NoteHandler, NotePipeline, TimelineMonitor, HOME_TIMELINE};
