// crates/ce_cli/src/args.rs
//
// CLI surface: flag definitions plus local-path checks done before any
// input is read. Loading and plan compilation happen in main.rs.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use clap::Parser;

/// Parsed CLI arguments.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "ce",
    version,
    disable_help_subcommand = true,
    about = "Offline evaluator for regional capability models (TOPSIS, grading, roll-ups)"
)]
pub struct Args {
    /// Model JSON (steps, operations, weights, engine overrides).
    #[arg(long)]
    pub model: PathBuf,

    /// Records JSON: {"kind": "survey"|"community"|"raw", "records": [...]}.
    #[arg(long)]
    pub records: PathBuf,

    /// Weights JSON: {"weights": {code: w}}; entries override the model's weights.
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Output directory for result.json, validation.json and run_record.json.
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Repair anomalous distances and scores after each TOPSIS step.
    #[arg(long)]
    pub repair: bool,

    /// Exit with status 3 when validation issues remain after the run.
    #[arg(long)]
    pub strict: bool,

    /// Evaluate regions one at a time.
    #[arg(long)]
    pub sequential: bool,

    /// Load inputs and compile the model, then exit without evaluating.
    #[arg(long)]
    pub validate_only: bool,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug, ce_pipeline=trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Only warnings and errors on stderr.
    #[arg(long)]
    pub quiet: bool,
}

impl Args {
    /// Filter directive for the subscriber; `--quiet` wins over `--log-level`.
    pub fn log_filter(&self) -> &str {
        if self.quiet {
            "warn"
        } else {
            self.log_level.as_str()
        }
    }

    /// `Some(false)` under `--sequential`, otherwise the model decides.
    pub fn parallel_override(&self) -> Option<bool> {
        self.sequential.then_some(false)
    }
}

/// Argument errors. Messages stay short and stable for scripts.
#[derive(Debug)]
pub enum CliError {
    NonLocalPath(String),
    NotFound(String),
    NotADirectory(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::NonLocalPath(p) => write!(f, "path must be local (no scheme): {p}"),
            CliError::NotFound(p) => write!(f, "file not found: {p}"),
            CliError::NotADirectory(p) => write!(f, "--out exists and is not a directory: {p}"),
        }
    }
}

impl std::error::Error for CliError {}

/// Parse argv, then check every path before anything is loaded.
pub fn parse_and_validate() -> Result<Args, CliError> {
    validate(Args::parse())
}

pub fn validate(mut args: Args) -> Result<Args, CliError> {
    for p in [Some(args.model.as_path()), Some(args.records.as_path()), args.weights.as_deref(), Some(args.out.as_path())]
        .into_iter()
        .flatten()
    {
        ensure_local_path(p)?;
    }

    ensure_file(&args.model, "--model")?;
    ensure_file(&args.records, "--records")?;
    if let Some(w) = &args.weights {
        ensure_file(w, "--weights")?;
    }
    if args.out.exists() && !args.out.is_dir() {
        return Err(CliError::NotADirectory(args.out.display().to_string()));
    }

    args.model = normalize_path(&args.model);
    args.records = normalize_path(&args.records);
    args.weights = args.weights.take().map(|p| normalize_path(&p));
    args.out = normalize_path(&args.out);
    Ok(args)
}

#[inline]
fn has_scheme(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    ce_io::looks_like_url_strict(&lower)
        || lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("file:")
}

#[inline]
fn ensure_local_path(p: &Path) -> Result<(), CliError> {
    match p.to_str() {
        Some(s) if has_scheme(s) => Err(CliError::NonLocalPath(s.to_string())),
        _ => Ok(()),
    }
}

fn ensure_file(p: &Path, label: &'static str) -> Result<(), CliError> {
    match fs::metadata(p) {
        Ok(m) if m.is_file() => Ok(()),
        _ => Err(CliError::NotFound(format!("{label} {}", p.display()))),
    }
}

/// Absolute form of `p`; falls back to CWD-relative when it does not exist yet.
fn normalize_path(p: &Path) -> PathBuf {
    fs::canonicalize(p).unwrap_or_else(|_| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(p)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(model: &Path, records: &Path, out: &Path) -> Args {
        Args::parse_from([
            "ce",
            "--model",
            model.to_str().unwrap(),
            "--records",
            records.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ])
    }

    #[test]
    fn schemes_are_rejected() {
        assert!(ensure_local_path(Path::new("http://x/model.json")).is_err());
        assert!(ensure_local_path(Path::new("HTTPS://x/model.json")).is_err());
        assert!(ensure_local_path(Path::new("file://C:/model.json")).is_err());
        assert!(ensure_local_path(Path::new("/tmp/model.json")).is_ok());
        assert!(ensure_local_path(Path::new(r"C:\data\model.json")).is_ok());
    }

    #[test]
    fn missing_inputs_are_reported_by_flag() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        fs::write(&model, "{}").unwrap();
        let err = validate(args(&model, &dir.path().join("nope.json"), dir.path())).unwrap_err();
        assert!(err.to_string().contains("--records"));
    }

    #[test]
    fn out_must_be_a_directory_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        fs::write(&model, "{}").unwrap();
        let err = validate(args(&model, &model, &model)).unwrap_err();
        assert!(matches!(err, CliError::NotADirectory(_)));
    }

    #[test]
    fn quiet_overrides_log_level_and_sequential_forces_off() {
        let a = Args::parse_from(["ce", "--model", "m", "--records", "r", "--log-level", "debug", "--quiet", "--sequential"]);
        assert_eq!(a.log_filter(), "warn");
        assert_eq!(a.parallel_override(), Some(false));
        let b = Args::parse_from(["ce", "--model", "m", "--records", "r"]);
        assert_eq!(b.log_filter(), "info");
        assert_eq!(b.parallel_override(), None);
    }

    #[test]
    fn normalize_path_returns_absolute() {
        assert!(normalize_path(Path::new("does/not/exist")).is_absolute());
    }
}
