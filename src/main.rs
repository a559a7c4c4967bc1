#![warn(missing_docs)]

//! Display power and brightness manager for Linux backlights

mod armaf;
mod config;
mod control;
mod external;
mod system;
mod util;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use control::display_power_server::{DisplayPowerClient, DisplayPowerServer};
use external::{
    brightness_store::BrightnessStore,
    dependency_provider::DependencyProvider,
    screen_action::{DisplayState, ScreenAction},
};
use flexi_logger::Logger;
use std::{path::PathBuf, time::Duration};
use system::screen_controller::DisplayEvent;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

// Reason reported for state changes requested from the command line
const CLI_REASON: u32 = 0;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// TOML configuration file, built-in defaults are used without one
    #[clap(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log specification, e.g. "debug" or "info,lucerna::system=trace"
    #[clap(short, long, default_value = "info")]
    log_level: String,

    /// Drive in-memory displays instead of the backlight
    #[clap(long)]
    mock: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore the last brightness, turn the main display on and report
    /// display events until interrupted
    Run,
    /// Change the power state of the main display
    State {
        /// One of on, off, dim, suspend
        state: DisplayState,
    },
    /// Set the brightness of the main display
    Brightness {
        value: u32,
        /// Move to the new value gradually over this many milliseconds
        #[clap(short, long, default_value = "0")]
        duration: u64,
    },
    /// Raise the main display to full brightness for a while
    Boost {
        /// How long the boost lasts, in milliseconds
        timeout: u64,
    },
    /// Print the state of every display
    Dump,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = Logger::try_with_env_or_str(&cli.log_level)?.start()?;
    log_panics::init();

    let config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => {
            log::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if cli.mock {
        let provider = DependencyProvider::make_mock(&config)?;
        execute(cli.command, config, provider).await
    } else {
        let provider = DependencyProvider::make_system(&config)
            .await
            .context("Couldn't access the backlight, try --mock")?;
        execute(cli.command, config, provider).await
    }
}

async fn execute<A: ScreenAction, S: BrightnessStore>(
    command: Command,
    config: Config,
    provider: DependencyProvider<A, S>,
) -> Result<()> {
    let port = DisplayPowerServer::new(config, provider).spawn().await?;
    let client = DisplayPowerClient::new(port);
    let main_display = client.get_main_display_id().await?;
    let result = match command {
        Command::Run => run(&client, main_display).await,
        Command::State { state } => {
            if !client
                .set_display_state(main_display, state, CLI_REASON)
                .await?
            {
                bail!("Display {} refused to switch to {}", main_display, state);
            }
            println!("Display {} is {}", main_display, state);
            Ok(())
        }
        Command::Brightness { value, duration } => {
            set_brightness(&client, main_display, value, Duration::from_millis(duration)).await
        }
        Command::Boost { timeout } => boost(&client, main_display, Duration::from_millis(timeout)).await,
        Command::Dump => {
            print!("{}", client.dump().await?);
            Ok(())
        }
    };
    client.shutdown().await;
    result
}

async fn run(client: &DisplayPowerClient, main_display: u32) -> Result<()> {
    let mut events = BroadcastStream::new(client.register_observer().await?);
    if !client
        .set_display_state(main_display, DisplayState::On, CLI_REASON)
        .await?
    {
        log::warn!("Couldn't turn display {} on", main_display);
    }
    let brightness = client.get_brightness(main_display).await?;
    log::info!("Display {} on at brightness {}", main_display, brightness);
    log::info!("Running, press Ctrl-C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Couldn't listen for Ctrl-C")?;
                log::info!("Interrupted, shutting down");
                return Ok(());
            }
            event = events.next() => match event {
                Some(Ok(event)) => log_event(&event),
                Some(Err(e)) => log::warn!("Observer fell behind: {}", e),
                None => bail!("Display events ended unexpectedly"),
            },
        }
    }
}

fn log_event(event: &DisplayEvent) {
    match event {
        DisplayEvent::StateChanged {
            display,
            state,
            reason,
        } => log::info!("Display {} is now {} (reason {})", display, state, reason),
        DisplayEvent::BrightnessChanged { display, value } => {
            log::debug!("Display {} brightness {}", display, value)
        }
        DisplayEvent::BrightnessSettled { display, value } => {
            log::info!("Display {} settled at brightness {}", display, value)
        }
    }
}

async fn set_brightness(
    client: &DisplayPowerClient,
    display: u32,
    value: u32,
    duration: Duration,
) -> Result<()> {
    let mut events = BroadcastStream::new(client.register_observer().await?);
    if !client.set_brightness(display, value, duration).await? {
        bail!("Display {} refused brightness {}", display, value);
    }
    if !duration.is_zero() {
        // Animations can take longer than requested, one step per tick at worst
        let deadline = duration * 2 + Duration::from_secs(5);
        let settled = tokio::time::timeout(deadline, async {
            while let Some(event) = events.next().await {
                if let Ok(DisplayEvent::BrightnessSettled { display: d, .. }) = event {
                    if d == display {
                        return true;
                    }
                }
            }
            false
        })
        .await;
        if !matches!(settled, Ok(true)) {
            log::warn!("Brightness of display {} didn't settle in {:?}", display, deadline);
        }
    }
    println!(
        "Display {} brightness {} (device {})",
        display,
        client.get_brightness(display).await?,
        client.get_device_brightness(display).await?
    );
    Ok(())
}

async fn boost(client: &DisplayPowerClient, display: u32, timeout: Duration) -> Result<()> {
    if !client.boost_brightness(display, timeout, Duration::ZERO).await? {
        bail!("Display {} refused to boost", display);
    }
    println!("Display {} boosted for {:?}", display, timeout);
    tokio::time::sleep(timeout + Duration::from_millis(100)).await;
    println!(
        "Display {} back at brightness {}",
        display,
        client.get_device_brightness(display).await?
    );
    Ok(())
}
