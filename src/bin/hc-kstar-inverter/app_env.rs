use std::path::{Path, PathBuf};

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use hc_kstar_inverter::settings::LogSettings;
use tracing_error::ErrorLayer;
use tracing_subscriber::{self, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer};

const LOG_FILE: &str = concat!(env!("CARGO_PKG_NAME"), ".log");

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "homecontrol", env!("CARGO_PKG_NAME"))
}

pub fn initialize_panic_handler() -> Result<()> {
    color_eyre::install()?;

    std::panic::set_hook(Box::new(move |panic_info| {
        #[cfg(not(debug_assertions))]
        {
            use human_panic::{handle_dump, print_msg, Metadata};
            let meta = Metadata::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

            let file_path = handle_dump(&meta, panic_info);
            if let Err(err) = print_msg(file_path, &meta) {
                eprintln!("human-panic: failed to print error message to console: {}", err);
            }
        }

        log::error!("Panic occurred: {}", panic_info);

        #[cfg(debug_assertions)]
        {
            better_panic::Settings::auto()
                .most_recent_first(false)
                .lineno_suffix(true)
                .verbosity(better_panic::Verbosity::Full)
                .create_panic_handler()(panic_info);
        }

        std::process::exit(1);
    }));

    Ok(())
}

/// Holds the log file and the persisted config record.
pub fn get_data_dir(data_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = data_dir {
        dir.to_path_buf()
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn initialize_logging(log: &LogSettings, data_dir: Option<&Path>) -> Result<()> {
    let crate_name = env!("CARGO_CRATE_NAME");
    if std::env::var("RUST_LOG").is_err() {
        let level = log.level.as_deref().unwrap_or("info");
        std::env::set_var("RUST_LOG", format!("{}={}", crate_name, level));
    }
    let env_subscriber = tracing_subscriber::fmt::layer()
        .with_file(log.source_files)
        .with_line_number(log.source_files)
        .with_target(false)
        .with_ansi(log.color)
        .with_filter(tracing_subscriber::filter::EnvFilter::from_default_env());
    let registry = tracing_subscriber::registry()
        .with(env_subscriber)
        .with(ErrorLayer::default());
    if log.to_file {
        let directory = get_data_dir(data_dir);
        std::fs::create_dir_all(&directory)?;
        let log_file = std::fs::File::create(directory.join(LOG_FILE))?;
        let file_subscriber = tracing_subscriber::fmt::layer()
            .with_file(log.source_files)
            .with_line_number(log.source_files)
            .with_writer(log_file)
            .with_target(false)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::EnvFilter::from_default_env());
        registry.with(file_subscriber).init();
    } else {
        registry.init();
    }
    Ok(())
}
