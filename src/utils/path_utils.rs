use std::collections::HashSet;
use std::path::{Component, Path};

/// Longest link name the activator will create. Windows path limits leave
/// plenty of headroom at this length even under deep Mods folders.
const MAX_LINK_NAME_LEN: usize = 64;

/// Sanitizes a mod display name into a symlink-safe directory name:
/// every character outside `[A-Za-z0-9_-]` becomes `_`, runs of `_` are
/// collapsed, leading/trailing `_` are trimmed and the result is capped at
/// a fixed length. Idempotent. An empty result falls back to `"mod"`.
pub fn sanitize_link_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }

    let trimmed: String = out.trim_matches('_').chars().take(MAX_LINK_NAME_LEN).collect();
    let trimmed = trimmed.trim_matches('_').to_string();

    if trimmed.is_empty() {
        "mod".to_string()
    } else {
        trimmed
    }
}

/// Resolves a sanitized name against the set of names already taken within
/// one profile. On collision the first characters of the fingerprint are
/// appended.
pub fn dedupe_link_name(sanitized: &str, fingerprint: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(sanitized) {
        return sanitized.to_string();
    }
    let prefix: String = fingerprint.chars().take(8).collect();
    format!("{}_{}", sanitized, prefix)
}

/// Checks whether a relative archive entry path stays inside the extraction
/// root. Rejects absolute paths, drive/prefix components, parent traversal
/// and NUL bytes.
pub fn is_safe_archive_path(raw: &str) -> bool {
    if raw.is_empty() || raw.contains('\0') {
        return false;
    }
    // Windows-style separators and drive letters can arrive in zip entries
    // produced by arbitrary tools; normalize before inspecting.
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return false;
    }
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        return false;
    }

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_link_name("Fancy Hair (v2.1)!"), "Fancy_Hair_v2_1");
        assert_eq!(sanitize_link_name("a///b"), "a_b");
        assert_eq!(sanitize_link_name("__edges__"), "edges");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in ["Patreon Mod 3000", "ünïcode näme", "--ok--", ""] {
            let once = sanitize_link_name(name);
            assert_eq!(sanitize_link_name(&once), once);
        }
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_link_name("!!!"), "mod");
        assert_eq!(sanitize_link_name(""), "mod");
    }

    #[test]
    fn dedupe_appends_fingerprint_prefix() {
        let mut taken = HashSet::new();
        assert_eq!(dedupe_link_name("Hair", "abcdef1234", &taken), "Hair");
        taken.insert("Hair".to_string());
        assert_eq!(dedupe_link_name("Hair", "abcdef1234", &taken), "Hair_abcdef12");
    }

    #[test]
    fn archive_path_safety() {
        assert!(is_safe_archive_path("Mods/foo.package"));
        assert!(is_safe_archive_path("deep/nested/dir/file.ts4script"));
        assert!(!is_safe_archive_path("../escape.package"));
        assert!(!is_safe_archive_path("a/../../escape"));
        assert!(!is_safe_archive_path("/abs/path"));
        assert!(!is_safe_archive_path("C:/windows/system32"));
        assert!(!is_safe_archive_path("C:\\windows"));
        assert!(!is_safe_archive_path("nul\0byte"));
        assert!(!is_safe_archive_path(""));
    }
}
