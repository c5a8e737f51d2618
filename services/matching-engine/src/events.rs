//! Outbound stream events of a book
//!
//! The book's task pushes these onto a per-book queue after each intent;
//! the book's stream dispatcher drains the queue in order and fans events
//! out to listeners. Trades and retired orders travel separately, on the
//! sink queue (`sink::SinkRecord`).

use types::ids::BookKey;

use crate::delta::BookDelta;

#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Level changes of one intent
    Delta(BookDelta),
    /// The book stopped accepting intents after `sequence`
    Closed { key: BookKey, sequence: u64 },
}

impl BookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BookEvent::Delta(_) => "delta",
            BookEvent::Closed { .. } => "closed",
        }
    }
}
