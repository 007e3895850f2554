mod programs;
mod shell;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pennos_kernel::{BootConfig, boot};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pennos", about = "Boot PennOS on a PennFAT image")]
struct Arguments {
    /// PennFAT image to mount as the root volume.
    fatfs_image: PathBuf,
    /// Scheduler event log, truncated at each boot.
    #[arg(default_value = "log/log.txt")]
    logfile: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Arguments::parse();
    if let Some(parent) = args.logfile.parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut config = BootConfig::new(&args.fatfs_image, shell::shell_main);
    config.log_path = Some(&args.logfile);

    match boot(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pennos: {err}");
            ExitCode::FAILURE
        }
    }
}
