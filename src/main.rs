use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use smart_response::{
    cli,
    config::Config,
    console::ConsoleHandle,
    logging,
    transport::{Inbound, Outbound, SerialTransport, SimulatedTransport, TransportKind},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, error, info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Forward stdin lines to the target transport.
/// Lines starting with `<` are fed to the console as if the device had sent them.
async fn forward_stdin(console: ConsoleHandle, target: TransportKind, hex: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let result = if let Some(inbound) = line.strip_prefix('<') {
            console
                .receive(target, Inbound::Text(inbound.trim_start().to_owned()))
                .await
                .map(|outcome| debug!(?outcome, "Injected"))
        } else if hex {
            console.send(target, Outbound::Hex(line.to_owned())).await
        } else {
            console.send(target, Outbound::Text(line.to_owned())).await
        };

        if let Err(e) = result {
            warn!(%e, "Could not handle input line");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        println!("{}", cli::handle_command(command)?);

        return Ok(());
    }

    let mut config = if let Some(config_path) = &cli.config {
        Config::new_from_path(config_path)?
    } else {
        Config::default()
    };

    if cli.rules.is_some() {
        config.rules = cli.rules.clone();
    }
    config.engine_enabled |= cli.enable_engine;
    config.validate()?;

    logging::init(
        cli.log_level.into(),
        config.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    debug!(?config, "Using config");

    let console = ConsoleHandle::new(&config);

    let mut entries = BroadcastStream::new(console.subscribe_to_logs().await?);
    tokio::spawn(async move {
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(entry) => println!("{entry}"),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Printer fell behind")
                }
            }
        }
    });

    for kind in &config.simulated {
        console.connect(SimulatedTransport::running(*kind)).await?;
    }

    if let Some(settings) = &config.serial {
        let port = SerialTransport::open(
            settings,
            Duration::from_millis(config.framing_delay_ms),
            console.clone(),
        )?;
        console.connect(port).await?;
    }

    if let Some(rules) = &config.rules {
        let json = std::fs::read_to_string(rules)?;
        let report = console
            .import_rules(json, config.activate_imported)
            .await?;
        info!(?rules, accepted = report.accepted, rejected = report.rejected, "Rules file imported");
    }

    let target = if config.serial.is_some() {
        TransportKind::Serial
    } else {
        *config
            .simulated
            .first()
            .ok_or_else(|| eyre!("Nothing to talk to, configure a serial port or a simulated transport"))?
    };

    info!(%target, "Console ready");

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hung_up = hangup.recv();

    #[cfg(not(unix))]
    let hung_up = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hung_up => {
            info!("Told to hang up, quitting")
        }
        result = forward_stdin(console.clone(), target, cli.hex) => {
            match result {
                Ok(()) => info!("Stdin closed, quitting"),
                Err(e) => error!(%e, "Stdin failed"),
            }
        }
    }

    logging::shutdown();

    Ok(())
}
