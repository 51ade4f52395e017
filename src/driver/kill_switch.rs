//! Filesystem kill switch.

use std::path::{Path, PathBuf};

/// Trading stops once a marker file exists at this path.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    path: PathBuf,
}

impl KillSwitch {
    /// Watch `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the marker file is present.
    pub fn is_engaged(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn engages_when_marker_exists() {
        let path = std::env::temp_dir().join(format!("polymarket-trend-stop-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let switch = KillSwitch::new(&path);
        assert!(!switch.is_engaged());

        fs::write(&path, b"").unwrap();
        assert!(switch.is_engaged());

        fs::remove_file(&path).unwrap();
        assert!(!switch.is_engaged());
    }
}
