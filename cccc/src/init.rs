//! Stamps a fresh (or upgraded) settings skeleton into a session's home
//! directory (spec §6 CLI surface: `init`/`upgrade`). Both subcommands
//! share this: a file already present is left untouched, so `upgrade`
//! only fills in gaps left by an older skeleton rather than clobbering
//! an operator's edits.

use anyhow::Result;
use std::path::Path;

const AGENTS_YAML: &str = "\
peer_a: claude
peer_b: null
aux: null
foreman: null
";

const POLICIES_YAML: &str = "\
handoff_filter_enabled: true
min_chars: 40
min_words: 8
cooldown_seconds: 20
ack_timeout_seconds: 45
resend_attempts: 2
self_check_every_k: 12
system_refresh_every_n: 6
auto_compact_enabled: false
protected_paths: []
max_patch_lines: 400
";

const CLI_PROFILES_YAML: &str = "\
claude:
  command: claude
  args: [\"--print\"]
  compact_command: \"/compact\"
";

const FOREMAN_YAML: &str = "\
enabled: false
interval_seconds: 900
command: \"\"
args: []
max_run_seconds: 900
kill_grace_seconds: 5
prompt_path: FOREMAN_TASK.md
";

const FOREMAN_TASK_MD: &str = "\
Title: Foreman Task Brief

Purpose
- Describe what matters to this session right now.

Current objectives
- 1)
- 2)
- 3)
";

fn write_if_absent(path: &Path, contents: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(true)
}

/// Stamps `settings/*.yaml`, the session directory skeleton
/// (`state/`, `mailbox/`, `work/`, `rules/`), and a default
/// `FOREMAN_TASK.md`. Returns the number of files actually written.
pub fn stamp_skeleton(home: &Path) -> Result<usize> {
    let mut written = 0;
    for dir in ["state", "mailbox/peerA", "mailbox/peerB", "mailbox/foreman", "work", "rules", "rfd"] {
        std::fs::create_dir_all(home.join(dir))?;
    }
    for (rel, contents) in [
        ("settings/agents.yaml", AGENTS_YAML),
        ("settings/policies.yaml", POLICIES_YAML),
        ("settings/cli_profiles.yaml", CLI_PROFILES_YAML),
        ("settings/foreman.yaml", FOREMAN_YAML),
        ("FOREMAN_TASK.md", FOREMAN_TASK_MD),
    ] {
        if write_if_absent(&home.join(rel), contents)? {
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stamps_every_file_into_an_empty_directory() {
        let dir = tempdir().unwrap();
        let written = stamp_skeleton(dir.path()).unwrap();
        assert_eq!(written, 5);
        assert!(dir.path().join("settings/agents.yaml").exists());
        assert!(dir.path().join("mailbox/peerA").is_dir());
    }

    #[test]
    fn rerunning_does_not_overwrite_edited_files() {
        let dir = tempdir().unwrap();
        stamp_skeleton(dir.path()).unwrap();
        let agents_path = dir.path().join("settings/agents.yaml");
        std::fs::write(&agents_path, "peer_a: codex\n").unwrap();
        let written = stamp_skeleton(dir.path()).unwrap();
        assert_eq!(written, 0);
        assert_eq!(std::fs::read_to_string(&agents_path).unwrap(), "peer_a: codex\n");
    }
}
