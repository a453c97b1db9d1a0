//! In-memory data model: message and mbox descriptors.

pub mod mbox;
pub mod message;

pub use mbox::{Checksum, MboxEntry, MboxMessage};
pub use message::{maildir_flags_from_path, MessageEntry, MessageFlags, MessageSource};
