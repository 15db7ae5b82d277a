//! Expansion rules for user-supplied paths (CLI arguments, console commands,
//! config entries) so every entry point agrees on what `~/shaders/$SCENE.frag`
//! means.
//!
//! - `PathResolver::expand` performs `$VAR`, `${VAR}` and `~` expansion.
//! - `PathResolver::resolve` additionally anchors relative paths on a base
//!   directory (the working directory unless one is given).
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::BaseDirs;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    /// Resolver anchored on the process working directory.
    pub fn new() -> Result<Self> {
        let base = env::current_dir().context("failed to resolve current working directory")?;
        Ok(Self { base })
    }

    pub fn with_base<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn expand(&self, input: &str) -> Result<PathBuf> {
        let with_env = expand_env_vars(input)?;
        let expanded = PathBuf::from(expand_home(&with_env)?);
        if expanded.as_os_str() != input {
            debug!(original = %input, expanded = %expanded.display(), "expanded path");
        }
        Ok(expanded)
    }

    pub fn resolve(&self, input: &str) -> Result<PathBuf> {
        if input.trim().is_empty() {
            anyhow::bail!("path must not be empty");
        }
        let expanded = self.expand(input)?;
        if expanded.is_absolute() {
            return Ok(expanded);
        }
        Ok(self.base.join(expanded))
    }
}

fn expand_home(input: &str) -> Result<String> {
    let Some(rest) = input.strip_prefix('~') else {
        return Ok(input.to_string());
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        anyhow::bail!("'~user' paths are not supported: {input}");
    }
    let home = BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("no home directory to expand '~' in {input}"))?;
    let joined = match rest.trim_start_matches('/') {
        "" => home,
        tail => home.join(tail),
    };
    Ok(joined.to_string_lossy().into_owned())
}

/// Replaces `$NAME` and `${NAME}` with the variable's value. A backslash
/// escapes the next character; a `$` not followed by a name stays literal.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(['$', '\\']) {
        output.push_str(&rest[..pos]);
        let marker = &rest[pos..];
        if let Some(escaped) = marker.strip_prefix('\\') {
            let mut chars = escaped.chars();
            output.push(chars.next().unwrap_or('\\'));
            rest = chars.as_str();
            continue;
        }

        let after = &marker[1..];
        let (name, remaining) = if let Some(braced) = after.strip_prefix('{') {
            let close = braced
                .find('}')
                .ok_or_else(|| anyhow!("unterminated '${{' in {input}"))?;
            if close == 0 {
                anyhow::bail!("empty variable name in {input}");
            }
            (&braced[..close], &braced[close + 1..])
        } else {
            let len = after
                .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
                .unwrap_or(after.len());
            (&after[..len], &after[len..])
        };
        if name.is_empty() {
            output.push('$');
        } else {
            let value =
                env::var(name).map_err(|_| anyhow!("environment variable '{name}' is not set"))?;
            output.push_str(&value);
        }
        rest = remaining;
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_environment_variables() {
        env::set_var("SHADEBOX_PATH_TEST", "scene");
        let resolver = PathResolver::with_base("/");
        let path = resolver.expand("/tmp/${SHADEBOX_PATH_TEST}.frag").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/scene.frag"));
        env::remove_var("SHADEBOX_PATH_TEST");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let resolver = PathResolver::with_base("/");
        let err = resolver.expand("/tmp/$SHADEBOX_UNSET_FOR_TEST").unwrap_err();
        assert!(err.to_string().contains("SHADEBOX_UNSET_FOR_TEST"));
    }

    #[test]
    fn lone_dollar_is_kept() {
        let resolver = PathResolver::with_base("/");
        assert_eq!(resolver.expand("a$/b").unwrap(), PathBuf::from("a$/b"));
    }

    #[test]
    fn backslash_escapes_dollar() {
        let resolver = PathResolver::with_base("/");
        assert_eq!(resolver.expand("price\\$5").unwrap(), PathBuf::from("price$5"));
    }

    #[test]
    fn expands_home_prefix() {
        let resolver = PathResolver::with_base("/");
        assert!(resolver.expand("~").unwrap().is_absolute());
    }

    #[test]
    fn resolve_anchors_relative_paths() {
        let resolver = PathResolver::with_base("/work");
        assert_eq!(
            resolver.resolve("shaders/a.frag").unwrap(),
            PathBuf::from("/work/shaders/a.frag")
        );
        assert_eq!(
            resolver.resolve("/abs/a.frag").unwrap(),
            PathBuf::from("/abs/a.frag")
        );
        assert!(resolver.resolve("  ").is_err());
    }
}
