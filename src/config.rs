//! Monitor configuration
//!
//! Everything has a working default; a TOML file may override any field.
//!
//! ```toml
//! symbol_search_paths = ["D:\\symbols\\images"]
//! kernel_image = "C:\\Windows\\system32\\ntoskrnl.exe"
//! call_name_type = "_SKSERVICE"
//!
//! [[path_rewrites]]
//! prefix = "\\SystemRoot"
//! replacement = "C:\\Windows"
//! ```

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Rewrite of an NT path prefix into a path the symbol backend can open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    pub prefix: String,
    pub replacement: String,
}

impl PathRewrite {
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Extra directories searched for module images by file name
    pub symbol_search_paths: Vec<PathBuf>,

    /// Applied in order; the first matching prefix wins
    pub path_rewrites: Vec<PathRewrite>,

    /// Normalized path of the kernel image whose base anchors call-name lookup
    pub kernel_image: String,

    /// Enumerated type listing the secure call names
    pub call_name_type: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol_search_paths: Vec::new(),
            path_rewrites: vec![
                PathRewrite::new("\\SystemRoot", "C:\\Windows"),
                PathRewrite::new("\\Device\\HarddiskVolume3", "C:\\Windows"),
            ],
            kernel_image: "C:\\Windows\\system32\\ntoskrnl.exe".to_string(),
            call_name_type: "_SKSERVICE".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MonitorError::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MonitorError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Rewrite an NT path using the first matching prefix (ASCII
    /// case-insensitive); unmatched paths pass through unchanged
    pub fn normalize_path(&self, nt_path: &str) -> String {
        for rewrite in &self.path_rewrites {
            let len = rewrite.prefix.len();
            let matches = nt_path
                .get(..len)
                .is_some_and(|head| head.eq_ignore_ascii_case(&rewrite.prefix));
            if matches {
                return format!("{}{}", rewrite.replacement, &nt_path[len..]);
            }
        }
        nt_path.to_string()
    }

    pub fn is_kernel_image(&self, normalized_path: &str) -> bool {
        normalized_path.eq_ignore_ascii_case(&self.kernel_image)
    }
}
