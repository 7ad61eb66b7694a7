//! Whitelist gate.
//!
//! Everything a command can act on — services, command strings, log
//! paths — passes through here first. Denials are ordinary errors
//! surfaced to the caller; the gate never panics and never touches the
//! OS beyond the filesystem checks it needs.
//!
//! Normalization rules, stated once: service names compare byte-for-byte
//! case-sensitively; command strings compare after collapsing whitespace
//! runs; paths compare after `canonicalize` (symlinks resolved) on every
//! platform, with only the deny-list check lowercasing its input.

use std::path::{Component, Path, PathBuf};

/// Substrings that disqualify a log path regardless of the whitelist.
/// Matched case-insensitively.
const DENY_SUBSTRINGS: &[&str] = &[
    "..",
    "system32",
    "\\windows\\",
    "\\program files\\",
    "sam",
    ".exe",
    ".dll",
    ".sys",
];

/// Exact byte-for-byte match. Empty names never pass.
pub fn service_allowed(name: &str, allowed: &[String]) -> bool {
    !name.is_empty() && allowed.iter().any(|entry| entry == name)
}

/// Collapse internal whitespace runs to single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A command is allowed when its normalized form equals the normalized
/// form of a whitelist entry, or when it names a script resolvable in
/// the scripts directory.
pub fn command_allowed(command: &str, allowed: &[String], scripts_dir: &Path) -> bool {
    let normalized = normalize_whitespace(command);
    if normalized.is_empty() {
        return false;
    }
    if allowed
        .iter()
        .any(|entry| normalize_whitespace(entry) == normalized)
    {
        return true;
    }
    is_script(command) && resolve_script(command, scripts_dir).is_some()
}

/// Scripts carry the platform shell's extension: `.sh` on Unix, `.ps1`
/// on Windows.
pub fn is_script(command: &str) -> bool {
    let ext = if cfg!(windows) { "ps1" } else { "sh" };
    Path::new(command)
        .file_name()
        .map(Path::new)
        .and_then(|p| p.extension())
        .is_some_and(|e| e == ext)
}

/// Resolve a script reference (only its basename is honored) to a
/// regular file directly inside the scripts directory. The resolved
/// path must stay inside the directory after canonicalization, which
/// also rejects symlinks that escape it.
pub fn resolve_script(command: &str, scripts_dir: &Path) -> Option<PathBuf> {
    if !is_script(command) {
        return None;
    }
    let file_name = Path::new(command).file_name()?;
    let dir = scripts_dir.canonicalize().ok()?;
    let resolved = dir.join(file_name).canonicalize().ok()?;
    if !resolved.starts_with(&dir) {
        return None;
    }
    resolved.is_file().then_some(resolved)
}

/// A log path is allowed when it is absolute, clean of parent-directory
/// segments and deny-listed substrings, and equals one of the paths an
/// allowed glob pattern expands to — with the expansion still under the
/// pattern's literal base.
pub fn log_path_allowed(requested: &str, patterns: &[String]) -> bool {
    if requested.is_empty() {
        return false;
    }
    let requested_path = Path::new(requested);
    if !requested_path.is_absolute() {
        return false;
    }
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }
    let lower = requested.to_ascii_lowercase();
    if DENY_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return false;
    }

    let Ok(canonical) = requested_path.canonicalize() else {
        return false;
    };

    for pattern in patterns {
        // Literal prefix before the first wildcard; expansions must not
        // escape it.
        let base_len = pattern
            .find(['*', '?', '['])
            .unwrap_or(pattern.len());
        let base = &pattern[..base_len];

        let Ok(entries) = glob::glob(pattern) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(entry_canonical) = entry.canonicalize() else {
                continue;
            };
            if entry_canonical == canonical && entry.to_string_lossy().starts_with(base) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn service_matching_is_exact_and_case_sensitive() {
        let allowed = vec!["nginx".to_string(), "postgresql".to_string()];
        assert!(service_allowed("nginx", &allowed));
        assert!(!service_allowed("Nginx", &allowed));
        assert!(!service_allowed("nginx ", &allowed));
        assert!(!service_allowed("", &allowed));
        assert!(!service_allowed("redis", &allowed));
    }

    #[test]
    fn command_matching_normalizes_whitespace() {
        let allowed = vec!["systemctl   status  nginx".to_string()];
        let dir = std::env::temp_dir();
        assert!(command_allowed("systemctl status nginx", &allowed, &dir));
        assert!(command_allowed("  systemctl\tstatus   nginx  ", &allowed, &dir));
        assert!(!command_allowed("systemctl status apache", &allowed, &dir));
        assert!(!command_allowed("", &allowed, &dir));
    }

    #[cfg(unix)]
    #[test]
    fn scripts_resolve_from_the_scripts_directory() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("backup.sh");
        fs::write(&script, "#!/bin/sh\necho ok\n").unwrap();

        let allowed: Vec<String> = Vec::new();
        assert!(command_allowed("backup.sh", &allowed, dir.path()));
        // only the basename is honored, so traversal prefixes are inert
        assert!(command_allowed("../../backup.sh", &allowed, dir.path()));
        assert!(!command_allowed("missing.sh", &allowed, dir.path()));
        assert!(!command_allowed("backup.txt", &allowed, dir.path()));

        let resolved = resolve_script("backup.sh", dir.path()).unwrap();
        assert!(resolved.ends_with("backup.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn script_directories_are_not_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("fake.sh")).unwrap();
        assert!(resolve_script("fake.sh", dir.path()).is_none());
    }

    #[test]
    fn log_paths_with_traversal_or_denied_substrings_fail() {
        let patterns = vec!["/var/log/*.log".to_string()];
        assert!(!log_path_allowed("/var/log/../etc/passwd", &patterns));
        assert!(!log_path_allowed("relative/app.log", &patterns));
        assert!(!log_path_allowed("", &patterns));
        assert!(!log_path_allowed("/var/log/installer.exe", &patterns));
        assert!(!log_path_allowed("/var/log/driver.sys", &patterns));
        assert!(!log_path_allowed(r"C:\Windows\System32\config\app.log", &patterns));
    }

    #[cfg(unix)]
    #[test]
    fn log_paths_must_match_an_expanded_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "hello\n").unwrap();
        let other = dir.path().join("app.txt");
        fs::write(&other, "hello\n").unwrap();

        let patterns = vec![format!("{}/*.log", dir.path().display())];
        assert!(log_path_allowed(log.to_str().unwrap(), &patterns));
        assert!(!log_path_allowed(other.to_str().unwrap(), &patterns));
        // absent files expand to nothing
        let missing = dir.path().join("missing.log");
        assert!(!log_path_allowed(missing.to_str().unwrap(), &patterns));
        // unrelated existing file under a different directory
        assert!(!log_path_allowed("/etc/hostname", &patterns));
    }

    #[cfg(unix)]
    #[test]
    fn exact_pattern_without_wildcards_matches_itself_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "x\n").unwrap();
        let patterns = vec![log.display().to_string()];
        assert!(log_path_allowed(log.to_str().unwrap(), &patterns));
        let sibling = dir.path().join("bpp.log");
        fs::write(&sibling, "x\n").unwrap();
        assert!(!log_path_allowed(sibling.to_str().unwrap(), &patterns));
    }
}
