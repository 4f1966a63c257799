//! C6 patch normalization and gating (spec §4.6, §7 category 7): turns a
//! peer's raw `patch.diff` capture into a clean unified diff and decides
//! whether it may be handed to the external patch applier.

use regex::Regex;
use sha1::{Digest, Sha1};
use std::path::Path;
use std::sync::OnceLock;

/// One `---`/`+++` file header pair from a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPatch {
    pub diff: String,
    pub files: Vec<PatchFile>,
    pub added_lines: usize,
    pub removed_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchVerdict {
    Commit,
    Reject(String),
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:patch|diff)\s*\n(.*?)\n```").unwrap())
}

fn diff_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^--- (?:a/)?(\S+).*\n\+\+\+ (?:b/)?(\S+).*$").unwrap())
}

/// Strips an enclosing ```patch```/```diff``` fence (if any) and any
/// chrome before the first diff header, down to a clean unified diff
/// (spec §4.6 "strip chrome/banners/fences"). Returns `None` when no
/// recognizable `---`/`+++` header pair is found — not a valid patch.
pub fn normalize_patch(raw: &str) -> Option<NormalizedPatch> {
    let fenced = fence_regex().captures(raw).map(|c| c[1].to_string());
    let body = fenced.unwrap_or_else(|| raw.to_string());
    let start = body.find("diff --git").or_else(|| body.find("--- "))?;
    let diff = body[start..].trim_end().to_string();

    let files: Vec<PatchFile> = diff_header_regex()
        .captures_iter(&diff)
        .map(|c| PatchFile {
            old_path: c[1].to_string(),
            new_path: c[2].to_string(),
        })
        .collect();
    if files.is_empty() {
        return None;
    }

    let mut added_lines = 0usize;
    let mut removed_lines = 0usize;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added_lines += 1;
        } else if line.starts_with('-') {
            removed_lines += 1;
        }
    }

    Some(NormalizedPatch { diff, files, added_lines, removed_lines })
}

/// Short content digest used to correlate a patch with an RFD approval
/// record, in the same `sha8` shape as the mailbox sentinel's hash.
pub fn patch_digest(diff: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(diff.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

fn touches_protected_path(patch: &NormalizedPatch, protected_paths: &[String]) -> Option<String> {
    for file in &patch.files {
        for prefix in protected_paths {
            if file.new_path.starts_with(prefix.as_str()) || file.old_path.starts_with(prefix.as_str()) {
                return Some(file.new_path.clone());
            }
        }
    }
    None
}

/// An RFD is approved for this patch when `rfd_dir` holds a file whose
/// text contains `status: approved` and `applies_to: <digest>` (the
/// frontmatter shape `/rfd show` renders from `rfd/<id>.md`).
pub fn has_approved_rfd(rfd_dir: &Path, digest: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(rfd_dir) else {
        return false;
    };
    let marker = format!("applies_to: {digest}");
    for entry in entries.flatten() {
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if text.contains("status: approved") && text.contains(&marker) {
            return true;
        }
    }
    false
}

/// Applies gating (spec §4.6, §8 scenario 7): a diff over the line
/// budget is a hard reject; a diff touching a protected path requires a
/// matching approved RFD.
pub fn gate_patch(patch: &NormalizedPatch, protected_paths: &[String], max_patch_lines: usize, rfd_dir: &Path) -> PatchVerdict {
    let total_lines = patch.added_lines + patch.removed_lines;
    if total_lines > max_patch_lines {
        return PatchVerdict::Reject(format!("exceeds max patch lines ({total_lines} > {max_patch_lines})"));
    }
    if let Some(path) = touches_protected_path(patch, protected_paths) {
        let digest = patch_digest(&patch.diff);
        if !has_approved_rfd(rfd_dir, &digest) {
            return PatchVerdict::Reject(format!("{path} is a protected path and has no approved RFD"));
        }
    }
    PatchVerdict::Commit
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,3 @@\n fn a() {}\n+fn b() {}\n-fn old() {}\n";

    #[test]
    fn strips_fence_and_banner_chrome() {
        let raw = format!("Here is my patch:\n```patch\n{DIFF}```\n\nLet me know what you think!");
        let normalized = normalize_patch(&raw).unwrap();
        assert!(normalized.diff.starts_with("diff --git"));
        assert_eq!(normalized.files[0].new_path, "src/lib.rs");
        assert_eq!(normalized.added_lines, 1);
        assert_eq!(normalized.removed_lines, 1);
    }

    #[test]
    fn rejects_text_with_no_diff_header() {
        assert!(normalize_patch("just some prose, no diff here").is_none());
    }

    #[test]
    fn gate_rejects_over_budget_patch() {
        let normalized = normalize_patch(DIFF).unwrap();
        let dir = tempdir().unwrap();
        let verdict = gate_patch(&normalized, &[], 1, dir.path());
        assert!(matches!(verdict, PatchVerdict::Reject(_)));
    }

    #[test]
    fn gate_rejects_protected_path_without_rfd() {
        let normalized = normalize_patch(DIFF).unwrap();
        let dir = tempdir().unwrap();
        let verdict = gate_patch(&normalized, &["src/".to_string()], 100, dir.path());
        assert!(matches!(verdict, PatchVerdict::Reject(reason) if reason.contains("protected path")));
    }

    #[test]
    fn gate_commits_protected_path_with_matching_approved_rfd() {
        let normalized = normalize_patch(DIFF).unwrap();
        let digest = patch_digest(&normalized.diff);
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("1.md"), format!("status: approved\napplies_to: {digest}\n")).unwrap();
        let verdict = gate_patch(&normalized, &["src/".to_string()], 100, dir.path());
        assert_eq!(verdict, PatchVerdict::Commit);
    }

    #[test]
    fn gate_commits_unprotected_patch_within_budget() {
        let normalized = normalize_patch(DIFF).unwrap();
        let dir = tempdir().unwrap();
        let verdict = gate_patch(&normalized, &[], 100, dir.path());
        assert_eq!(verdict, PatchVerdict::Commit);
    }
}
