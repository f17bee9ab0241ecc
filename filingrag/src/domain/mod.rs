//! Domain model: conversations, messages with source citations, and
//! document references.
//!
//! Relations form a diamond (`Conversation ↔ Message ↔ Source → Document`);
//! only forward references are stored and reverse navigation is a repository
//! query, never a pointer chase.

mod conversation;
mod document;
mod message;

pub use conversation::{CompanyRef, Conversation};
pub use document::{DocumentRef, DocumentScope};
pub use message::{Message, MessageRole, Source};
