//! JSON persistence for conversation memory between runs.

use std::path::Path;

use anyhow::{Context, Result};
use docqa_rag::ConversationMemory;
use tracing::debug;

/// Load memory from `path`, or start empty if the file does not exist.
pub fn load(path: &Path) -> Result<ConversationMemory> {
    if !path.exists() {
        return Ok(ConversationMemory::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history {}", path.display()))?;
    let memory: ConversationMemory = serde_json::from_str(&text)
        .with_context(|| format!("invalid history file {}", path.display()))?;
    debug!(path = %path.display(), turns = memory.len(), "loaded conversation history");
    Ok(memory)
}

/// Write memory to `path`, replacing the previous file only once the new
/// contents are fully written.
pub fn save(path: &Path, memory: &ConversationMemory) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, serde_json::to_vec_pretty(memory)?)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("failed to replace history {}", path.display()))?;
    debug!(path = %path.display(), turns = memory.len(), "saved conversation history");
    Ok(())
}
