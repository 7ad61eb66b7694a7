//! Bounded log tails.
//!
//! Small files are scanned front to back; anything at or above 1 MiB is
//! read end-first in 4 KiB blocks so the whole file never sits in
//! memory. Line order is preserved and `\r` is stripped.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use crate::{gate, TaskError};

pub const MAX_LOG_LINES: usize = 10_000;
const SMALL_FILE_BYTES: u64 = 1024 * 1024;
const BLOCK_SIZE: usize = 4096;

/// Return the trailing `lines` lines of a whitelisted file.
pub fn fetch_log_lines(
    path: &str,
    lines: usize,
    allowed_patterns: &[String],
) -> Result<Vec<String>, TaskError> {
    if !gate::log_path_allowed(path, allowed_patterns) {
        return Err(TaskError::LogPathNotAllowed(path.to_string()));
    }
    if lines == 0 {
        return Err(TaskError::ZeroLines);
    }
    if lines > MAX_LOG_LINES {
        return Err(TaskError::TooManyLines(MAX_LOG_LINES));
    }

    let file = File::open(path)?;
    let size = file.metadata()?.len();
    if size < SMALL_FILE_BYTES {
        tail_small(file, lines)
    } else {
        tail_blocks(file, size, lines)
    }
}

fn tail_small(file: File, n: usize) -> Result<Vec<String>, TaskError> {
    let reader = BufReader::new(file);
    let mut lines: Vec<String> = Vec::new();
    for line in reader.lines() {
        let mut line = line?;
        if line.ends_with('\r') {
            line.pop();
        }
        lines.push(line);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines.split_off(skip))
}

/// Read backwards in fixed blocks until enough newlines are seen, then
/// slice the tail out of the collected bytes.
fn tail_blocks(mut file: File, size: u64, n: usize) -> Result<Vec<String>, TaskError> {
    let mut pos = size;
    let mut collected: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; BLOCK_SIZE];
    let mut newlines = 0usize;

    while pos > 0 && newlines <= n {
        let read_size = BLOCK_SIZE.min(pos as usize);
        pos -= read_size as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut chunk[..read_size])?;
        newlines += chunk[..read_size].iter().filter(|&&b| b == b'\n').count();

        let mut head = chunk[..read_size].to_vec();
        head.extend_from_slice(&collected);
        collected = head;
    }

    let text = String::from_utf8_lossy(&collected);
    let mut lines: Vec<String> = text
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();

    // When the scan stopped mid-file the earliest line is partial.
    if pos > 0 && !lines.is_empty() {
        lines.remove(0);
    }

    let skip = lines.len().saturating_sub(n);
    Ok(lines.split_off(skip))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        path: String,
        patterns: Vec<String>,
    }

    fn write_lines(count: usize, width: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut file = File::create(&path).unwrap();
        for i in 0..count {
            writeln!(file, "line-{i:06} {}", "x".repeat(width)).unwrap();
        }
        let patterns = vec![format!("{}/*.log", dir.path().display())];
        Fixture {
            path: path.display().to_string(),
            _dir: dir,
            patterns,
        }
    }

    #[test]
    fn small_file_returns_trailing_lines_in_order() {
        let fx = write_lines(1234, 10);
        let lines = fetch_log_lines(&fx.path, 100, &fx.patterns).unwrap();
        assert_eq!(lines.len(), 100);
        assert!(lines[0].starts_with("line-001134"));
        assert!(lines[99].starts_with("line-001233"));
    }

    #[test]
    fn requesting_more_than_available_returns_all() {
        let fx = write_lines(7, 5);
        let lines = fetch_log_lines(&fx.path, 100, &fx.patterns).unwrap();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("line-000000"));
    }

    #[test]
    fn large_file_uses_block_scan_and_preserves_order() {
        // ~1.8 MiB: forces the end-first path
        let fx = write_lines(20_000, 80);
        let lines = fetch_log_lines(&fx.path, 50, &fx.patterns).unwrap();
        assert_eq!(lines.len(), 50);
        assert!(lines[0].starts_with("line-019950"));
        assert!(lines[49].starts_with("line-019999"));
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crlf.log");
        std::fs::write(&path, "one\r\ntwo\r\nthree\r\n").unwrap();
        let patterns = vec![format!("{}/*.log", dir.path().display())];
        let lines = fetch_log_lines(path.to_str().unwrap(), 2, &patterns).unwrap();
        assert_eq!(lines, vec!["two", "three"]);
    }

    #[test]
    fn line_count_bounds_are_enforced() {
        let fx = write_lines(3, 5);
        assert!(matches!(
            fetch_log_lines(&fx.path, 0, &fx.patterns),
            Err(TaskError::ZeroLines)
        ));
        assert!(matches!(
            fetch_log_lines(&fx.path, MAX_LOG_LINES + 1, &fx.patterns),
            Err(TaskError::TooManyLines(_))
        ));
    }

    #[test]
    fn unlisted_path_is_denied_before_io() {
        let fx = write_lines(3, 5);
        let err = fetch_log_lines(&fx.path, 10, &[]).unwrap_err();
        assert!(matches!(err, TaskError::LogPathNotAllowed(_)));
    }
}
