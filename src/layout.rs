//! Filesystem layout of the simulation output tree.
//!
//! ```text
//! output_root/
//! └── pid_574/                     # one directory per persona
//!     ├── pid_574_sim001/          # one directory per run, 1-based ordinal
//!     │   ├── pid_574_sim001_response.json
//!     │   └── ...
//!     └── pid_574_sim002/
//! ```
//!
//! Ordinals are zero-padded to three digits and grow wider past 999.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Token marking a run as poisoned when it appears in any file name.
pub const ERROR_MARKER: &str = "error";

static RUN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<persona>.+)_sim(?P<ordinal>\d+)$").expect("run name regex is valid")
});

/// Directory holding every run of a persona.
pub fn persona_dir(output_root: &Path, persona_id: &str) -> PathBuf {
    output_root.join(persona_id)
}

/// Directory name of run `ordinal` for `persona_id`.
pub fn run_dir_name(persona_id: &str, ordinal: u32) -> String {
    format!("{}_sim{:03}", persona_id, ordinal)
}

/// Parse the ordinal out of a run directory name belonging to `persona_id`.
///
/// Returns `None` for names that do not follow `<persona_id>_sim<digits>`,
/// including directories of some other persona and a zero ordinal.
pub fn parse_run_ordinal(persona_id: &str, name: &str) -> Option<u32> {
    let caps = RUN_NAME_RE.captures(name)?;
    if &caps["persona"] != persona_id {
        return None;
    }
    match caps["ordinal"].parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

/// Whether a file name marks its run as failed mid-write.
///
/// Case-insensitive substring match on [`ERROR_MARKER`]. Keep this the only
/// implementation of the rule so it can be swapped for a structured status
/// file later.
pub fn is_error_marker(file_name: &str) -> bool {
    file_name.to_lowercase().contains(ERROR_MARKER)
}

/// Rewrite a file name carrying the `old_run` prefix to carry `new_run`.
///
/// Only `<old_run>_...` and `<old_run>.<ext>` are rewritten; anything else
/// returns `None`.
pub fn rewrite_run_prefix(file_name: &str, old_run: &str, new_run: &str) -> Option<String> {
    let rest = file_name.strip_prefix(old_run)?;
    if rest.starts_with('_') || rest.starts_with('.') {
        Some(format!("{}{}", new_run, rest))
    } else {
        None
    }
}
