use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gcodelink::{
    default_config_path, init_logging, list_ports, load_program, Config, LinkEvent, LinkManager,
    MemoryResponseLog, OwnerId, SerialConnector, StatusSnapshot,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("BUILD_DATE"),
    ")"
);

const CLI_OWNER: &str = "cli";
const RESUME_CHECK: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    name = "gcodelink",
    version,
    long_version = LONG_VERSION,
    about = "Headless sender for GRBL-class CNC controllers"
)]
struct Cli {
    /// Settings file (.toml or .json)
    #[arg(long, value_name = "PATH", env = "GCODELINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the settings file
    #[arg(long, short, global = true)]
    port: Option<String>,

    /// Baud rate, overriding the settings file
    #[arg(long, short, global = true)]
    baud: Option<u32>,

    /// Emit logs as JSON (stderr)
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List candidate controller ports
    Ports,
    /// Connect and print one status snapshot
    Status,
    /// Send lines as one batch and wait for the controller to accept them
    Send {
        /// Lines to send, in order
        #[arg(required = true)]
        lines: Vec<String>,
        /// Seconds to wait for completion
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Stream a program file, printing progress as status arrives
    Stream {
        /// G-code file
        file: PathBuf,
        /// Seconds to wait for completion
        #[arg(long, default_value_t = 86_400)]
        timeout: u64,
    },
    /// Print the controller's work-coordinate and tool-offset dump
    Offsets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    if let Command::Ports = cli.command {
        return print_ports();
    }

    let config = load_config(cli.config.as_ref())?;
    let port = resolve_port(&config, cli.port.as_deref())?;
    let mut params = config.connection.to_params(port);
    if let Some(baud) = cli.baud {
        params.baud_rate = baud;
    }

    let log = Arc::new(MemoryResponseLog::new(config.link.response_log_capacity));
    let link = Arc::new(
        LinkManager::new(Arc::new(SerialConnector::new()), config.link.to_link_config())
            .with_response_log(log.clone()),
    );
    let owner = OwnerId::from(CLI_OWNER);

    tracing::info!("Connecting to {} at {} baud", params.port, params.baud_rate);
    let connected = tokio::time::timeout(
        config.connection.open_timeout(),
        link.connect(&params, owner.clone()),
    )
    .await;
    match connected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = link.disconnect().await;
            return Err(e).with_context(|| format!("connecting to {}", params.port));
        }
        Err(_) => {
            let _ = link.disconnect().await;
            bail!(
                "connecting to {} timed out after {} ms",
                params.port,
                config.connection.open_timeout_ms
            );
        }
    }

    let result = run(cli.command, &link, owner).await;

    if let Err(e) = link.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
    }
    for entry in log.entries_with_level(gcodelink::LogLevel::Error) {
        tracing::debug!("{}", entry.formatted());
    }
    result
}

async fn run(command: Command, link: &Arc<LinkManager>, owner: OwnerId) -> anyhow::Result<()> {
    match command {
        Command::Ports => print_ports(),
        Command::Status => {
            let status = link.get_position(owner).await?;
            print_status(&status);
            Ok(())
        }
        Command::Send { lines, timeout } => {
            let batch = link.send_commands(lines, owner)?;
            let response = link
                .wait_for_completion(batch, Duration::from_secs(timeout))
                .await?;
            if !response.is_empty() {
                println!("{}", response);
            }
            Ok(())
        }
        Command::Stream { file, timeout } => stream(link, owner, file, timeout).await,
        Command::Offsets => {
            let dump = link.get_tool_offsets(owner).await?;
            println!("{}", dump);
            Ok(())
        }
    }
}

async fn stream(
    link: &Arc<LinkManager>,
    owner: OwnerId,
    file: PathBuf,
    timeout: u64,
) -> anyhow::Result<()> {
    let program =
        load_program(&file).with_context(|| format!("reading {}", file.display()))?;
    tracing::info!("Streaming {} ({} lines)", file.display(), program.len());

    let progress = link.subscribe_status(owner.clone(), |event: &LinkEvent| {
        if let LinkEvent::StatusChanged(status) = event {
            println!(
                "{:>5.1}% {:<10} {}",
                status.progress * 100.0,
                status.machine_state,
                status.work_position
            );
        }
    });

    let batch = link.start(program, owner.clone())?;
    let prompt = tokio::spawn(resume_prompt(link.clone()));

    let result = tokio::select! {
        done = link.wait_for_completion(batch, Duration::from_secs(timeout)) => {
            done.map(|_| ()).map_err(anyhow::Error::from)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping");
            link.stop(owner)?;
            Err(anyhow::anyhow!("stream interrupted"))
        }
    };

    prompt.abort();
    link.unsubscribe(progress);
    if result.is_ok() {
        println!("Done");
    }
    result
}

/// Wait for Enter whenever the controller holds, then resume
///
/// Stdin is read on a detached thread so a pending read never blocks
/// runtime shutdown.
async fn resume_prompt(link: Arc<LinkManager>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::time::sleep(RESUME_CHECK).await;
        if !link.can_resume() {
            continue;
        }
        while rx.try_recv().is_ok() {}
        match link.pause_reason() {
            Some(reason) => println!("Paused: {}. Press Enter to resume.", reason),
            None => println!("Paused. Press Enter to resume."),
        }
        if rx.recv().await.is_none() {
            return;
        }
        if let Err(e) = link.resume() {
            tracing::warn!("Resume failed: {}", e);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.clone(),
        None => match default_config_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("No config directory: {}", e);
                return Ok(Config::default());
            }
        },
    };
    Config::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

fn resolve_port(config: &Config, requested: Option<&str>) -> anyhow::Result<String> {
    if let Some(port) = requested {
        return Ok(port.to_string());
    }
    if !config.connection.is_auto_port() {
        return Ok(config.connection.port.clone());
    }
    let ports = list_ports()?;
    match ports.first() {
        Some(info) => {
            tracing::info!("Using {} ({})", info.port_name, info.description);
            Ok(info.port_name.clone())
        }
        None => bail!("no controller port found; pass --port"),
    }
}

fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No candidate ports found");
    }
    for info in ports {
        match &info.manufacturer {
            Some(maker) => println!("{}\t{}\t{}", info.port_name, info.description, maker),
            None => println!("{}\t{}", info.port_name, info.description),
        }
    }
    Ok(())
}

fn print_status(status: &StatusSnapshot) {
    println!("State:    {} ({})", status.machine_state, status.condition);
    println!("Link:     {}", status.link_state);
    println!("WPos:     {}", status.work_position);
    println!("MPos:     {}", status.machine_position);
    println!("Feed:     {:.1}", status.feed_rate);
    println!("Spindle:  {:.0}", status.spindle_speed);
    if let Some(version) = &status.version {
        println!("Version:  {}", version);
    }
    if let Some(error) = &status.last_error {
        println!("Error:    {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from(["gcodelink", "send", "G21", "G0 X1", "--port", "COM3"])
            .expect("send args should parse");

        assert_eq!(cli.port.as_deref(), Some("COM3"));
        match cli.command {
            Command::Send { lines, timeout } => {
                assert_eq!(lines, vec!["G21", "G0 X1"]);
                assert_eq!(timeout, 30);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn send_requires_lines() {
        let err = Cli::try_parse_from(["gcodelink", "send"]).expect_err("lines are required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn parses_stream_with_global_flags() {
        let cli = Cli::try_parse_from([
            "gcodelink",
            "--json-logs",
            "stream",
            "part.nc",
            "--baud",
            "250000",
        ])
        .expect("stream args should parse");

        assert!(cli.json_logs);
        assert_eq!(cli.baud, Some(250000));
        assert!(matches!(cli.command, Command::Stream { .. }));
    }

    #[test]
    fn explicit_port_wins_over_settings() {
        let mut config = Config::default();
        config.connection.port = "/dev/ttyUSB0".to_string();
        assert_eq!(resolve_port(&config, Some("COM7")).unwrap(), "COM7");
        assert_eq!(resolve_port(&config, None).unwrap(), "/dev/ttyUSB0");
    }
}
