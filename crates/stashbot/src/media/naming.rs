//! File naming for downloads.

use std::path::{Path, PathBuf};

const MAX_NAME_CHARS: usize = 120;

/// Reduce an untrusted file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Build `<dir>/<stem>_<8 hex chars><.ext>` for a sanitized name.
///
/// The random component keeps attempts from colliding with stale partial
/// files left behind by an earlier transfer of the same name.
pub fn unique_target_path(dir: &Path, name: &str) -> PathBuf {
    let name = sanitize_file_name(name);
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name.as_str(), ""),
    };
    let suffix: u32 = rand::random();
    dir.join(format!("{}_{:08x}{}", stem, suffix, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\clip.mp4"), "clip.mp4");
    }

    #[test]
    fn sanitize_strips_control_and_leading_dots() {
        assert_eq!(sanitize_file_name("..hidden\0.jpg"), "hidden.jpg");
        assert_eq!(sanitize_file_name("  \n "), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn sanitize_limits_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_file_name(&long).chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn unique_target_keeps_extension() {
        let path = unique_target_path(Path::new("/tmp/dl"), "holiday.mp4");
        let name = path.file_name().unwrap().to_str().unwrap();

        assert!(path.starts_with("/tmp/dl"));
        assert!(name.starts_with("holiday_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "holiday_".len() + 8 + ".mp4".len());
    }

    #[test]
    fn unique_target_without_extension() {
        let path = unique_target_path(Path::new("dl"), "README");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("README_"));
        assert_eq!(name.len(), "README_".len() + 8);
    }

    #[test]
    fn unique_targets_differ() {
        let a = unique_target_path(Path::new("dl"), "x.jpg");
        let b = unique_target_path(Path::new("dl"), "x.jpg");
        assert_ne!(a, b);
    }
}
