use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(stripped) = text.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    if text == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

/// `path` with `~` expanded, joined onto `base` when still relative.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_relative() {
        base.join(expanded)
    } else {
        expanded
    }
}
