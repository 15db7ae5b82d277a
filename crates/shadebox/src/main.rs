mod check;
mod cli;
mod console;
mod paths;
mod run;

use std::process::ExitCode;

use anyhow::Result;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config_path = paths::resolve_config(cli.config.as_deref())?;
    if cli.check {
        return check::run_check(&config_path);
    }
    run::run(&config_path, cli.run)?;
    Ok(ExitCode::SUCCESS)
}
