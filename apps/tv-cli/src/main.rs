use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tv_controls::{PidInputs, PidParams, PidRecord, TpiInput, TpiParams, pid, tpi};
use tv_store::{JsonFileBackend, JsonFileLegacySource, LegacyKind, LegacySource, StateStore};
use tv_sync::load_yaml;

mod error;
mod simulate;

use error::CliResult;

#[derive(Parser)]
#[command(name = "tv-cli")]
#[command(about = "thermovalve CLI - heating-valve calibration and state tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a thermostat configuration file
    CheckConfig {
        /// Path to the thermostat YAML file
        config_path: PathBuf,
    },
    /// Inspect or maintain a persisted state file
    #[command(subcommand)]
    State(StateCommands),
    /// Evaluate the PID controller once
    Pid(PidArgs),
    /// Evaluate the static TPI controller once
    Tpi(TpiArgs),
    /// Demo: drive a thermostat against a toy simulated room
    Simulate(simulate::SimulateArgs),
}

#[derive(Subcommand)]
enum StateCommands {
    /// Summarize the records in a state file
    Show {
        state_path: PathBuf,
        /// Print the full document instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a state file in the current schema
    Migrate { state_path: PathBuf },
    /// Merge legacy per-kind stores into an empty state file
    ImportLegacy {
        state_path: PathBuf,
        /// Only keys starting with this prefix are imported
        #[arg(long)]
        prefix: String,
        /// Group id the thermal statistics are stored under
        #[arg(long)]
        group: String,
        #[arg(long)]
        pid: Option<PathBuf>,
        #[arg(long)]
        tpi: Option<PathBuf>,
        #[arg(long)]
        mpc: Option<PathBuf>,
        #[arg(long)]
        thermal: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PidArgs {
    #[arg(long)]
    target: f64,
    /// External (room) temperature
    #[arg(long)]
    external: f64,
    /// The actuator's own reading
    #[arg(long)]
    actuator: Option<f64>,
    /// External temperature slope, K/min
    #[arg(long)]
    slope: Option<f64>,
    /// Take controller parameters from a thermostat config
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct TpiArgs {
    #[arg(long)]
    target: f64,
    #[arg(long)]
    current: f64,
    #[arg(long)]
    outdoor: Option<f64>,
    #[arg(long)]
    window_open: bool,
    /// Heating is not allowed (thermostat off or no call for heat)
    #[arg(long)]
    blocked: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config_path } => cmd_check_config(&config_path),
        Commands::State(state_cmd) => match state_cmd {
            StateCommands::Show { state_path, json } => cmd_state_show(&state_path, json),
            StateCommands::Migrate { state_path } => cmd_state_migrate(&state_path),
            StateCommands::ImportLegacy {
                state_path,
                prefix,
                group,
                pid,
                tpi,
                mpc,
                thermal,
            } => {
                let sources: Vec<JsonFileLegacySource> = [
                    (LegacyKind::Pid, pid),
                    (LegacyKind::Tpi, tpi),
                    (LegacyKind::Mpc, mpc),
                    (LegacyKind::Thermal, thermal),
                ]
                .into_iter()
                .filter_map(|(kind, path)| path.map(|p| JsonFileLegacySource::new(kind, p)))
                .collect();
                cmd_state_import_legacy(&state_path, &prefix, &group, &sources)
            }
        },
        Commands::Pid(args) => cmd_pid(&args),
        Commands::Tpi(args) => cmd_tpi(&args),
        Commands::Simulate(args) => simulate::run(&args),
    }
}

fn cmd_check_config(config_path: &Path) -> CliResult<()> {
    println!("Checking config: {}", config_path.display());
    let config = load_yaml(config_path)?;
    println!("✓ Thermostat {} is valid", config.id);
    for actuator in &config.actuators {
        println!(
            "  {} - {} / {} ({}..{} °C{})",
            actuator.id,
            actuator.calibration_type,
            actuator.calibration_mode,
            actuator.min_temp,
            actuator.max_temp,
            if actuator.supports_valve { ", valve" } else { "" },
        );
    }
    Ok(())
}

fn open_state(state_path: &Path) -> StateStore {
    StateStore::open(JsonFileBackend::new(state_path))
}

fn cmd_state_show(state_path: &Path, json: bool) -> CliResult<()> {
    let store = open_state(state_path);
    if json {
        println!("{}", serde_json::to_string_pretty(&store.export())?);
        return Ok(());
    }

    let snapshot = store.snapshot();
    println!("State file: {}", state_path.display());
    println!("  schema version: {}", snapshot.version);
    println!("  pid records:    {}", snapshot.pid.len());
    println!("  tpi records:    {}", snapshot.tpi.len());
    println!("  mpc records:    {}", snapshot.mpc.len());
    match (snapshot.thermal.heating_power, snapshot.thermal.heat_loss_rate) {
        (None, None) => println!("  thermal:        not learned yet"),
        (power, loss) => println!(
            "  thermal:        heating {} K/min, loss {} K/min",
            fmt_opt(power),
            fmt_opt(loss)
        ),
    }
    for (name, temperature) in &snapshot.presets {
        println!("  preset {name}: {temperature} °C");
    }
    if store.is_dirty() {
        println!("  (older schema, run `tv-cli state migrate` to rewrite)");
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn cmd_state_migrate(state_path: &Path) -> CliResult<()> {
    let mut store = open_state(state_path);
    if store.save_if_dirty()? {
        println!("✓ Rewrote {} as schema {}", state_path.display(), tv_store::LATEST_VERSION);
    } else {
        println!("Nothing to migrate");
    }
    Ok(())
}

fn cmd_state_import_legacy(
    state_path: &Path,
    prefix: &str,
    group: &str,
    sources: &[JsonFileLegacySource],
) -> CliResult<()> {
    if sources.is_empty() {
        return Err(error::CliError::Usage(
            "give at least one of --pid, --tpi, --mpc, --thermal".to_string(),
        ));
    }
    let mut store = open_state(state_path);
    let sources: Vec<&dyn LegacySource> = sources.iter().map(|s| s as &dyn LegacySource).collect();
    let report = store.import_legacy(&sources, prefix, group);

    if report.skipped_not_empty {
        println!("State file already has data, legacy import skipped");
        return Ok(());
    }
    println!(
        "Imported {} pid, {} tpi, {} mpc records{}",
        report.pid,
        report.tpi,
        report.mpc,
        if report.thermal { " and thermal statistics" } else { "" }
    );
    if report.rejected > 0 {
        println!("  {} entries rejected", report.rejected);
    }
    for failed in &report.failed_sources {
        println!("  could not read {failed}");
    }
    store.save_if_dirty()?;
    Ok(())
}

fn cmd_pid(args: &PidArgs) -> CliResult<()> {
    let params = match &args.config {
        Some(path) => load_yaml(path)?.pid,
        None => PidParams::default(),
    };
    params.validate()?;

    let mut record = PidRecord::default();
    let out = pid::compute(
        &params,
        &PidInputs {
            target: Some(args.target),
            external: Some(args.external),
            actuator: args.actuator,
            external_slope: args.slope,
            now_s: 0.0,
        },
        &mut record,
    );
    let d = &out.debug;
    println!("demand: {:.1} % ({})", out.percent, d.reason);
    println!("  error {:+.2} K  p {:.2}  i {:.2}  d {:.2}", d.error, d.p, d.i, d.d);
    println!("  gains kp {} ki {} kd {}", d.kp, d.ki, d.kd);
    Ok(())
}

fn cmd_tpi(args: &TpiArgs) -> CliResult<()> {
    let params = match &args.config {
        Some(path) => load_yaml(path)?.tpi,
        None => TpiParams::default(),
    };
    params.validate()?;

    let out = tpi::compute(
        &params,
        &TpiInput {
            target: Some(args.target),
            current: Some(args.current),
            outdoor: args.outdoor,
            heating_allowed: !args.blocked,
            window_open: args.window_open,
            now_s: 0.0,
        },
    );
    println!("duty: {:.1} % ({})", out.percent, out.reason);
    Ok(())
}
