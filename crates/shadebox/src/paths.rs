use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use directories_next::ProjectDirs;
use shadersrc::PathResolver;

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "shadebox";
const APPLICATION: &str = "shadebox";
pub const CONFIG_FILE: &str = "shadebox.toml";

/// Picks the session file: an explicit path wins (with `~` and `$VAR`
/// expanded, since it may come from `SHADEBOX_CONFIG`), then
/// `./shadebox.toml`, then `<config dir>/shadebox/shadebox.toml`.
pub fn resolve_config(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return PathResolver::new()?.resolve(&path.to_string_lossy());
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return Ok(local);
    }
    let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
        .ok_or_else(|| anyhow!("failed to determine user directories"))?;
    let candidate = project_dirs.config_dir().join(CONFIG_FILE);
    if candidate.is_file() {
        tracing::debug!(path = %candidate.display(), "using user config");
        return Ok(candidate);
    }
    bail!(
        "no {CONFIG_FILE} in the current directory or {}; pass a config path",
        project_dirs.config_dir().display()
    )
}
