//! Process-wide state shared across requests: the file cache mirroring the
//! active sandbox and the conversation history.

pub mod cache;
pub mod conversation;

pub use cache::{CachedFile, FileCache, FileCacheSnapshot};
pub use conversation::{Conversation, ConversationState, EditKind};
