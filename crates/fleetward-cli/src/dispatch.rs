use anyhow::Result;
use fleetward_installer::RunnerLayout;

use crate::commands::{
    build_upgrade_plan, load_config, resolve_install_path, run_backups_command,
    run_doctor_command, run_rollback_command, run_status_command, run_upgrade_command,
    RUNNER_PATH_ENV,
};
use crate::completion::write_completions_script;
use crate::render::current_output_style;
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)?;
            return Ok(0);
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    let install_dir = resolve_install_path(cli.path, std::env::var_os(RUNNER_PATH_ENV))?;
    let layout = RunnerLayout::from_config(install_dir, &config)?;
    let output_style = current_output_style();

    match cli.command {
        Commands::Upgrade {
            target_version,
            force,
            skip_backup,
            dry_run,
            max_wait_minutes,
        } => {
            let plan = build_upgrade_plan(
                target_version.as_deref(),
                force,
                skip_backup,
                dry_run,
                max_wait_minutes,
            )?;
            run_upgrade_command(&layout, &config, &plan, output_style)
        }
        Commands::Status => run_status_command(&layout, &config, output_style),
        Commands::Doctor => run_doctor_command(&layout, &config, output_style),
        Commands::Backups => run_backups_command(&layout, output_style),
        Commands::Rollback { backup_id, dry_run } => run_rollback_command(
            &layout,
            &config,
            backup_id.as_deref(),
            dry_run,
            output_style,
        ),
        Commands::Version | Commands::Completions { .. } => Ok(0),
    }
}
