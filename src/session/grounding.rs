//! Grounding files — cited source snippets returned by tool invocations.
//!
//! [`GroundingStore`] is an append-only, monotonically growing collection.
//! Duplicate ids may arrive (the same source cited by two tool calls) and are
//! kept; lookup-by-id always returns the first occurrence so duplicates never
//! change what an existing id resolves to.

/// A cited source snippet, mapped from one entry of a tool result's
/// `sources` list (`chunk_id → id`, `title → name`, `chunk → content`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingFile {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Append-only collection of [`GroundingFile`]s, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct GroundingStore {
    files: Vec<GroundingFile>,
}

impl GroundingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single file.  Duplicate ids are allowed.
    pub fn push(&mut self, file: GroundingFile) {
        self.files.push(file);
    }

    /// Append a batch of files in order.
    pub fn extend(&mut self, files: impl IntoIterator<Item = GroundingFile>) {
        self.files.extend(files);
    }

    /// Look up a file by id.  Returns the **first** occurrence, so a later
    /// duplicate can never change the result of an existing lookup.
    pub fn get(&self, id: &str) -> Option<&GroundingFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn files(&self) -> &[GroundingFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
