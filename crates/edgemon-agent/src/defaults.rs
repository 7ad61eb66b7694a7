//! Platform-default paths and endpoints, used when the configuration
//! leaves them out.

use std::path::PathBuf;

pub fn config_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\edgemon\config.toml")
    } else if cfg!(target_os = "freebsd") {
        PathBuf::from("/usr/local/etc/edgemon/config.toml")
    } else {
        PathBuf::from("/etc/edgemon/config.toml")
    }
}

pub fn log_file() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\edgemon\edgemon.log")
    } else {
        PathBuf::from("/var/log/edgemon/edgemon.log")
    }
}

pub fn scripts_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\edgemon\scripts")
    } else if cfg!(target_os = "freebsd") {
        PathBuf::from("/usr/local/etc/edgemon/scripts")
    } else {
        PathBuf::from("/opt/edgemon/scripts")
    }
}

/// windows_exporter on Windows, node_exporter elsewhere.
pub fn exporter_url() -> String {
    if cfg!(windows) {
        "http://localhost:9182/metrics".to_string()
    } else {
        "http://localhost:9100/metrics".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_absolute() {
        assert!(config_path().is_absolute());
        assert!(log_file().is_absolute());
        assert!(scripts_dir().is_absolute());
        assert!(exporter_url().starts_with("http://localhost:"));
    }
}
