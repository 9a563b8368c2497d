use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use fleetward_core::ArchiveType;
use tracing::debug;

use crate::fs_utils::{move_entry_or_copy, remove_entry_if_exists};

/// Unpacks a runner asset into `dst`. Runner tarballs and zips carry the
/// installation tree at their root, so no prefix stripping is needed.
pub(crate) fn extract_archive(archive_path: &Path, dst: &Path, archive_type: ArchiveType) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    let mut command = extraction_command(archive_path, dst, archive_type);
    run_command(
        &mut command,
        &format!(
            "failed to extract {} archive {}",
            archive_type.extension(),
            archive_path.display()
        ),
    )
}

pub(crate) fn extraction_command(archive_path: &Path, dst: &Path, archive_type: ArchiveType) -> Command {
    match archive_type {
        ArchiveType::TarGz => {
            let mut command = Command::new("tar");
            command.arg("-xzf").arg(archive_path).arg("-C").arg(dst);
            command
        }
        ArchiveType::Zip if cfg!(windows) => {
            let mut command = Command::new("powershell");
            command.args(["-NoProfile", "-NonInteractive", "-Command"]).arg(format!(
                "Expand-Archive -LiteralPath {} -DestinationPath {} -Force",
                powershell_literal(archive_path),
                powershell_literal(dst)
            ));
            command
        }
        ArchiveType::Zip => {
            let mut command = Command::new("unzip");
            command.arg("-q").arg("-o").arg(archive_path).arg("-d").arg(dst);
            command
        }
    }
}

/// Moves each top-level staged entry over the installation, replacing the
/// existing entry of the same name. Entries named in `preserve` are never
/// touched; anything the archive does not ship is left in place.
pub(crate) fn replace_installation_contents(
    staged_dir: &Path,
    install_dir: &Path,
    preserve: &[String],
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(staged_dir)
        .with_context(|| format!("failed to read {}", staged_dir.display()))?
    {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .map_err(|raw| anyhow!("staged entry has a non UTF-8 name: {raw:?}"))?;
        names.push(name);
    }
    names.sort();

    if names.is_empty() {
        return Err(anyhow!(
            "extracted archive is empty: {}",
            staged_dir.display()
        ));
    }

    let mut replaced = Vec::new();
    for name in names {
        if preserve.iter().any(|kept| kept == &name) {
            debug!(entry = %name, "archive ships a preserved state entry; keeping installed copy");
            continue;
        }
        let src = staged_dir.join(&name);
        let dst = install_dir.join(&name);
        remove_entry_if_exists(&dst)?;
        move_entry_or_copy(&src, &dst)?;
        replaced.push(name);
    }
    Ok(replaced)
}

/// Runs a command to completion; a non-zero exit carries both output streams.
pub fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn powershell_literal(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}
