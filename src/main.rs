use anyhow::Context;
use clap::Parser;
use gcodelink::{
    init_logging_with, list_ports, stream_program, Config, DialectKind, GcodeDriver, LogFormat,
    BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gcodelink",
    version,
    about = "Stream a G-code file to a GRBL-style serial device"
)]
struct Cli {
    /// Serial device path (overrides the config file)
    #[arg(short, long)]
    port: Option<String>,
    /// Config file (.toml or .json); defaults to the platform config directory
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Firmware dialect: grbl or uarm
    #[arg(long)]
    dialect: Option<DialectKind>,
    /// Pipelined flow control
    #[arg(long, default_value_t = false)]
    advanced: bool,
    /// List serial ports and exit
    #[arg(long, default_value_t = false)]
    list_ports: bool,
    /// Log as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,
    /// G-code file to stream
    #[arg(required_unless_present = "list_ports")]
    file: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::read_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::read_or_default(&Config::default_path()?)?,
    };

    if let Some(port) = &cli.port {
        config.connection.port.clone_from(port);
    }
    if let Some(dialect) = cli.dialect {
        config.firmware.dialect = dialect;
    }
    if cli.advanced {
        config.streaming.advanced_flow_control = true;
    }

    // Only the merged result has to be valid
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging_with(format)?;
    tracing::debug!("gcodelink {} built {}", VERSION, BUILD_DATE);

    if cli.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let Some(file) = cli.file.clone() else {
        anyhow::bail!("no G-code file given");
    };
    let program = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;

    let config = load_config(&cli)?;
    let driver = GcodeDriver::start(config.to_driver_config(), Arc::new(config.port_opener()));

    driver
        .wait_ready()
        .await
        .with_context(|| format!("connecting to {}", config.connection.port))?;
    tracing::info!("Streaming {}", file.display());

    let summary = stream_program(&driver, program.lines()).await?;
    driver.wait_queue_drained().await?;
    driver.shutdown().await;

    println!(
        "{} lines, {} sent, {} ok, {} errors, {} rejected, {} aborted in {:.1}s",
        summary.total_lines,
        summary.submitted,
        summary.accepted,
        summary.errors.len(),
        summary.rejected.len(),
        summary.aborted,
        summary.elapsed.as_secs_f64()
    );
    for (line, code) in &summary.errors {
        println!("  line {}: error {}", line, code);
    }
    for (line, reason) in &summary.rejected {
        println!("  line {}: not sent ({})", line, reason);
    }

    if !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
