/*!
Pool autobackup daemon: backs up ZFS pools when their disks are plugged in and
beeps until they are unplugged again
*/

use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Arg, ArgAction, Command, crate_version};
use tracing::{error, info};

mod daemon;
mod logging;

use daemon::config::AutobackupConfig;
use daemon::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("pool-autobackup")
        .version(crate_version!())
        .about("Backs up ZFS pools when their disks are plugged in")
        .arg(
            Arg::new("config")
                .help("Path to the TOML config file")
                .value_name("CONFIG")
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .help("Log filter, e.g. debug or pool_autobackup=trace")
                .value_name("LEVEL")
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the config, print the pools and exit")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let Some(config_path) = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .or_else(AutobackupConfig::default_path)
    else {
        eprintln!("No config file given and no config directory found");
        return ExitCode::FAILURE;
    };

    let config = match AutobackupConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Cannot load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if matches.get_flag("check") {
        println!("{} is valid", config_path.display());
        for (label, pool) in &config.pools {
            println!("  {}: {}", label, pool);
        }
        return ExitCode::SUCCESS;
    }

    let level_override = matches.get_one::<String>("log-level").map(String::as_str);
    let _log_guard = match logging::init(&config.logging, level_override) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Started pool-autobackup with {}", config_path.display());
    info!("General configuration:");
    info!("  ingestion: {:?}", config.ingestion);
    info!("  connectivity: {:?}", config.connectivity);
    info!("  alert: {:?}", config.alert);
    info!("  backup: {:?}", config.backup);
    info!("Pools lookup table:");
    for (label, pool) in &config.pools {
        info!("  {}: {}", label, pool);
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
async fn run(config: &AutobackupConfig) -> Result<()> {
    use daemon::error::AutobackupError;
    use daemon::orchestrator::Daemon;
    use daemon::udev_monitor::UdevSubscription;
    use tracing::warn;

    let Daemon {
        tracker,
        orchestrator,
        ingestion,
    } = Daemon::from_config(config)?;
    let mut subscription = UdevSubscription::start(&config.ingestion, ingestion)?;

    let outcome = tokio::select! {
        result = orchestrator.run() => result,
        result = subscription.closed() => result.and(Err(AutobackupError::EventSource(
            "udev listener stopped unexpectedly".to_string(),
        ))),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("🛑 Received interrupt");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    if !tracker.is_idle().unwrap_or(true) {
        warn!("Devices still in flight; their state is lost on exit");
    }
    info!("Stopping udev monitor and shutting down...");
    subscription.stop().await;
    outcome
}

#[cfg(not(target_os = "linux"))]
async fn run(_config: &AutobackupConfig) -> Result<()> {
    Err(daemon::error::AutobackupError::EventSource(
        "udev device events are only available on Linux".to_string(),
    ))
}
