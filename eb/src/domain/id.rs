//! Identifier generation
//!
//! All IDs use the format: `{kind}-{uuid-v7-hex}`
//! Example: `session-0192f5e4b7c97d2a8f1e3c0b5a6d7e8f`
//!
//! UUIDv7 keeps IDs of the same kind roughly sortable by creation time.

/// Generate an identifier for the given kind (`session`, `event`, `cmd`, ...)
pub fn generate_id(kind: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    format!("{}-{}", kind, uuid.simple())
}

/// Extract the kind portion of an ID produced by [`generate_id`]
pub fn id_kind(id: &str) -> Option<&str> {
    id.rsplit_once('-').map(|(kind, _)| kind).filter(|k| !k.is_empty())
}
