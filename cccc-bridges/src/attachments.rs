//! Inbound attachment storage (spec §4.11): downloaded files land under
//! `work/upload/inbound/YYYYMMDD/` with a `.meta.json` sidecar; the
//! inbound text message embeds a reference to the saved path.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub platform: String,
    pub original_filename: String,
    pub mime: String,
    pub size_bytes: u64,
    pub saved_at: String,
}

/// Writes `bytes` under `work/upload/inbound/YYYYMMDD/<uuid>-<filename>`,
/// plus a `.meta.json` sidecar alongside it, returning the saved file's
/// path. `platform` and `mime` are recorded as-received from the
/// caller's adapter, not sniffed from content.
pub fn save_attachment(
    home: &Path,
    platform: &str,
    filename: &str,
    mime: &str,
    bytes: &[u8],
) -> io::Result<PathBuf> {
    let now = OffsetDateTime::now_utc();
    let day = now
        .format(&time::format_description::parse("[year][month][day]").unwrap())
        .unwrap_or_else(|_| "19700101".to_string());
    let dir = home.join("work").join("upload").join("inbound").join(day);
    std::fs::create_dir_all(&dir)?;

    let sanitized = sanitize_filename(filename);
    let stem = format!("{}-{}", uuid::Uuid::new_v4(), sanitized);
    let path = dir.join(&stem);
    std::fs::write(&path, bytes)?;

    let meta = AttachmentMeta {
        platform: platform.to_string(),
        original_filename: filename.to_string(),
        mime: mime.to_string(),
        size_bytes: bytes.len() as u64,
        saved_at: now.format(&Rfc3339).unwrap_or_default(),
    };
    let meta_path = path.with_extension(append_ext(&path, "meta.json"));
    std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;

    Ok(path)
}

/// Keeps only the final path component of `name`, so a hostile filename
/// (`../../etc/passwd`) can't escape the per-day attachment directory,
/// then strips leading dots so it can't collide with a hidden file.
fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let trimmed = base.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

fn append_ext(path: &Path, ext: &str) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(existing) => format!("{existing}.{ext}"),
        None => ext.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saves_attachment_with_meta_sidecar() {
        let dir = tempdir().unwrap();
        let path = save_attachment(dir.path(), "telegram", "photo.jpg", "image/jpeg", b"fakebytes").unwrap();
        assert!(path.exists());
        assert!(path.starts_with(dir.path().join("work").join("upload").join("inbound")));

        let meta_path = path.with_extension(append_ext(&path, "meta.json"));
        let meta: AttachmentMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        assert_eq!(meta.platform, "telegram");
        assert_eq!(meta.original_filename, "photo.jpg");
        assert_eq!(meta.size_bytes, 9);
    }

    #[test]
    fn sanitizes_path_traversal_in_filename() {
        let dir = tempdir().unwrap();
        let path = save_attachment(dir.path(), "slack", "../../etc/passwd", "text/plain", b"x").unwrap();
        assert!(path.starts_with(dir.path().join("work").join("upload").join("inbound")));
        assert!(!path.to_string_lossy().contains(".."));
    }
}
