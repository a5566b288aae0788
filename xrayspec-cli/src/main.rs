mod parsers;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use xrayspec::{
    EfficiencyTable, ExperimentalSpectrum, RateTable, Session, SimulationConfig, Subject,
};

#[derive(Parser)]
#[command(name = "xrayspec")]
#[command(about = "X-ray emission and Auger spectrum synthesis and fitting")]
#[command(version)]
struct Cli {
    /// Log verbosity (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a plain-text rate file into a compressed database
    Pack {
        /// Rate rows and shake probabilities
        input: PathBuf,
        /// Element symbol stored in the database
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        atomic_number: u16,
        /// Output path (postcard + zstd)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Simulate a spectrum and write it as JSON
    Simulate(RunArgs),
    /// Fit the configured parameters against an experimental spectrum
    Fit {
        #[command(flatten)]
        run: RunArgs,
        /// Also write the configuration with the fitted values
        #[arg(long)]
        write_config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON configuration
    #[arg(short, long)]
    config: PathBuf,
    /// Packed rate database; repeat for multi-element runs
    #[arg(short, long = "rates", required = true)]
    rates: Vec<PathBuf>,
    /// Weight of each rate database, in the same order
    #[arg(long = "weight")]
    weights: Vec<f64>,
    /// Experimental spectrum (energy, intensity[, sigma])
    #[arg(short, long)]
    experiment: Option<PathBuf>,
    /// Detector efficiency table (energy, percent)
    #[arg(long)]
    efficiency: Option<PathBuf>,
    /// Output file for results (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Pack {
            input,
            symbol,
            atomic_number,
            output,
        } => cmd_pack(&input, &symbol, atomic_number, &output),
        Commands::Simulate(run) => cmd_simulate(&run),
        Commands::Fit { run, write_config } => cmd_fit(&run, write_config.as_deref()),
    }
}

fn cmd_pack(input: &Path, symbol: &str, atomic_number: u16, output: &Path) -> Result<()> {
    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let db = parsers::parse_rates(&text, symbol, atomic_number)
        .with_context(|| format!("parsing {}", input.display()))?;
    let compressed = pack(&db)?;

    // Reject anything the library would refuse to load.
    RateTable::from_compressed(&compressed).context("packed database does not round-trip")?;

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(output, &compressed).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(
        rows = db.records.len(),
        bytes = compressed.len(),
        path = %output.display(),
        "packed rate database"
    );
    Ok(())
}

fn pack(db: &xrayspec_data::RateDatabase) -> Result<Vec<u8>> {
    let serialized = postcard::to_allocvec(db).context("postcard serialization failed")?;
    zstd::encode_all(&serialized[..], 19).context("zstd compression failed")
}

fn load_session(run: &RunArgs) -> Result<Session> {
    let config = SimulationConfig::from_path(&run.config)
        .with_context(|| format!("loading {}", run.config.display()))?;

    if !run.weights.is_empty() && run.weights.len() != run.rates.len() {
        bail!(
            "{} weights given for {} rate databases",
            run.weights.len(),
            run.rates.len()
        );
    }
    let mut subjects = Vec::with_capacity(run.rates.len());
    for (i, path) in run.rates.iter().enumerate() {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let table = RateTable::from_compressed(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        let mut subject = Subject::new(table.symbol.clone(), table);
        if let Some(&w) = run.weights.get(i) {
            subject = subject.with_weight(w);
        }
        subjects.push(subject);
    }

    let mut session = Session::new(config, subjects)?;

    if let Some(path) = &run.experiment {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let record = parsers::parse_spectrum(&text).with_context(|| format!("parsing {}", path.display()))?;
        session.set_experiment(Some(ExperimentalSpectrum::from_record(&record)?));
    }
    if let Some(path) = &run.efficiency {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let record =
            parsers::parse_efficiency(&text).with_context(|| format!("parsing {}", path.display()))?;
        session.set_efficiency(Some(EfficiencyTable::from_record(&record)?));
    }
    Ok(session)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{text}")?;
        }
    }
    Ok(())
}

fn cmd_simulate(run: &RunArgs) -> Result<()> {
    let session = load_session(run)?;
    let simulation = session.simulate();
    write_json(&simulation, run.output.as_deref())
}

fn cmd_fit(run: &RunArgs, write_config: Option<&Path>) -> Result<()> {
    let mut session = load_session(run)?;
    let fitted = session.fit()?;
    eprint!("{}", fitted.report);
    write_json(&fitted, run.output.as_deref())?;
    if let Some(path) = write_config {
        fs::write(path, session.config().to_json_string()?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: &str = "\
D K L3 - - 2 4 6400.0 10.0 1.0
D K L2 - - 2 2 6404.0 5.0 1.0
";

    const CONFIG: &str = r#"{
        "transition_category": "Diagram",
        "profile_kind": "Lorentzian",
        "normalization_mode": "None",
        "fit_backend": "LeastSquares",
        "n_points": 200,
        "x_min": "Auto",
        "x_max": "Auto",
        "energy_offset": 0.0,
        "resolution": 1.0,
        "y_offset": 0.0
    }"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run_args(dir: &Path) -> RunArgs {
        let rates = write(dir, "fe.txt", RATES);
        let packed = dir.join("fe.bin.zst");
        cmd_pack(&rates, "Fe", 26, &packed).unwrap();
        RunArgs {
            config: write(dir, "config.json", CONFIG),
            rates: vec![packed],
            weights: Vec::new(),
            experiment: None,
            efficiency: None,
            output: Some(dir.join("out.json")),
        }
    }

    #[test]
    fn test_pack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rates = write(dir.path(), "fe.txt", RATES);
        let packed = dir.path().join("db").join("fe.bin.zst");
        cmd_pack(&rates, "Fe", 26, &packed).unwrap();

        let table = RateTable::from_compressed(&fs::read(&packed).unwrap()).unwrap();
        assert_eq!(table.symbol, "Fe");
        assert_eq!(table.atomic_number, 26);
        assert_eq!(table.lines().len(), 2);
    }

    #[test]
    fn test_simulate_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_args(dir.path());
        cmd_simulate(&run).unwrap();

        let out: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("out.json")).unwrap()).unwrap();
        assert_eq!(out["grid"]["points"].as_array().unwrap().len(), 200);
        assert_eq!(out["curve"].as_array().unwrap().len(), 200);
    }

    #[test]
    fn test_fit_without_experiment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_args(dir.path());
        assert!(cmd_fit(&run, None).is_err());
    }

    #[test]
    fn test_fit_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = run_args(dir.path());
        let spectrum: String = (0..81)
            .map(|i| {
                let x = 6394.0 + 0.2 * i as f64;
                let a = x - 6400.3;
                let b = x - 6404.3;
                format!("{x} {}\n", 10.0 / (1.0 + a * a) + 5.0 / (1.0 + b * b))
            })
            .collect();
        run.experiment = Some(write(dir.path(), "exp.txt", &spectrum));
        let fitted_config = dir.path().join("fitted.json");
        cmd_fit(&run, Some(&fitted_config)).unwrap();

        let config = SimulationConfig::from_path(&fitted_config).unwrap();
        assert!((config.energy_offset - 0.3).abs() < 0.01);
    }

    #[test]
    fn test_weight_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = run_args(dir.path());
        run.weights = vec![0.5, 0.5];
        assert!(load_session(&run).is_err());
    }
}
