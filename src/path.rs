//! Path display helpers shared by logging and error messages.

use std::path::{Path, PathBuf};

/// Format a filesystem path for user-facing output.
///
/// Replaces the home directory prefix with `~` (e.g. `/home/alex/work` -> `~/work`).
/// Paths outside home are returned unchanged.
pub fn format_path_for_display(path: &Path) -> String {
    if let Some(home) = dirs::home_dir()
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        if stripped.as_os_str().is_empty() {
            return "~".to_string();
        }

        let mut display_path = PathBuf::from("~");
        display_path.push(stripped);
        return display_path.display().to_string();
    }

    path.display().to_string()
}
