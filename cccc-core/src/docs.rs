//! Reference-document boundary for the task/blueprint data model (spec
//! §1 "Explicitly out of scope... Task/blueprint data model"). The core
//! exposes raw file content peers' SYSTEM-refresh prompts can embed; it
//! never parses or validates the YAML schema `orchestrator/task_manager.py`
//! implements upstream (SUPPLEMENTED FEATURES in SPEC_FULL.md — this
//! stays a read-only pass-through by design, not an oversight).

use std::path::Path;

/// Reads a reference document (e.g. `PROJECT.md`, a tasks YAML file) as
/// raw text for embedding into a composed SYSTEM message. Returns
/// `None` if the file is absent or unreadable — callers treat a missing
/// reference doc as "nothing to embed", not an error.
pub fn read_reference_doc(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_existing_doc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("PROJECT.md");
        std::fs::write(&path, "# Project\ngoal text").unwrap();
        assert_eq!(read_reference_doc(&path).unwrap(), "# Project\ngoal text");
    }

    #[test]
    fn missing_doc_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_reference_doc(&dir.path().join("absent.yaml")).is_none());
    }
}
