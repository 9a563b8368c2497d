use std::path::{Component, Path};

use anyhow::{anyhow, Result};

/// Accepts only non-empty relative paths made of normal components.
pub fn validated_relative_path(path: &str) -> Result<&Path> {
    if path.trim().is_empty() {
        return Err(anyhow!("relative path must not be empty"));
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(anyhow!("path must be relative: {path}"));
    }
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(anyhow!(
            "path must not contain traversal or root components: {path}"
        ));
    }
    Ok(candidate)
}
