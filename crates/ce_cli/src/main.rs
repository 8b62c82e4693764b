// crates/ce_cli/src/main.rs
//
// `ce`: load → compile → evaluate → write canonical artifacts.
// Exit codes are stable and documented in `exitcodes`.

mod args;

mod exitcodes {
    pub const OK: i32 = 0;
    /// Bad flags, malformed inputs, rejected model.
    pub const CONFIG: i32 = 2;
    /// `--strict` and validation issues remain.
    pub const ANOMALIES: i32 = 3;
    pub const IO: i32 = 4;
    /// An operation failed during evaluation.
    pub const EVAL: i32 = 5;
    pub const CANCELLED: i32 = 130;
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use args::{parse_and_validate as parse_cli, Args};
use ce_core::CancelToken;
use ce_io::{canonical_json, hasher, loader, IoError};
use ce_pipeline::build_result::ResultTable;
use ce_pipeline::diagnose::TopsisDiagnosis;
use ce_pipeline::{
    build_run_record, prepare, run_model, ExecutionOptions, ModelPlan, ModelRun, PipelineError, RepairResult,
    ValidationResult,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const RESULT_FILE: &str = "result.json";
const VALIDATION_FILE: &str = "validation.json";
const RUN_RECORD_FILE: &str = "run_record.json";

/// Errors bucketed by exit code.
#[derive(Debug)]
enum MainError {
    Config(String),
    Io(String),
    Eval(String),
    Cancelled(String),
    /// Artifacts were written, but `--strict` found this many open issues.
    Anomalies(usize),
}

impl std::fmt::Display for MainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainError::Config(m) => write!(f, "config: {m}"),
            MainError::Io(m) => write!(f, "io: {m}"),
            MainError::Eval(m) => write!(f, "evaluation: {m}"),
            MainError::Cancelled(m) => write!(f, "{m}"),
            MainError::Anomalies(n) => write!(f, "{n} validation issue(s) remain (--strict)"),
        }
    }
}

fn main() -> ExitCode {
    let args = match parse_cli() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("ce: error: {e}");
            return ExitCode::from(exitcodes::CONFIG as u8);
        }
    };

    if let Err(e) = init_tracing(args.log_filter()) {
        eprintln!("ce: error: {e}");
        return ExitCode::from(exitcodes::CONFIG as u8);
    }

    let result = if args.validate_only { validate_only(&args) } else { run_once(&args) };
    let rc = match result {
        Ok(()) => exitcodes::OK,
        Err(e) => {
            tracing::error!("{e}");
            map_error(&e)
        }
    };
    ExitCode::from(rc as u8)
}

/// `RUST_LOG` wins; otherwise the CLI filter. Logs go to stderr.
fn init_tracing(filter: &str) -> Result<(), String> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(filter).map_err(|e| format!("invalid log level/filter '{filter}': {e}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| format!("logging: {e}"))
}

fn map_error(e: &MainError) -> i32 {
    use exitcodes::*;
    match e {
        MainError::Config(_) => CONFIG,
        MainError::Io(_) => IO,
        MainError::Eval(_) => EVAL,
        MainError::Cancelled(_) => CANCELLED,
        MainError::Anomalies(_) => ANOMALIES,
    }
}

fn map_io_err(e: IoError) -> MainError {
    match e {
        IoError::Path(m) => MainError::Io(format!("path: {m}")),
        IoError::Hash(m) => MainError::Io(format!("hash: {m}")),
        IoError::Json { pointer, msg } => MainError::Config(format!("json {pointer}: {msg}")),
        IoError::Invalid(m) => MainError::Config(m),
    }
}

fn map_pipeline_err(e: PipelineError) -> MainError {
    match e {
        PipelineError::Plan(p) => {
            for i in p.0.errors() {
                tracing::error!(code = i.code, at = ?i.where_, "{}", i.message);
            }
            MainError::Config(p.to_string())
        }
        PipelineError::Io(e) => map_io_err(e),
        e @ (PipelineError::Input(_) | PipelineError::NoRegions) => MainError::Config(e.to_string()),
        e @ (PipelineError::Step { .. } | PipelineError::Internal(_)) => MainError::Eval(e.to_string()),
        e @ PipelineError::Cancelled { .. } => MainError::Cancelled(e.to_string()),
    }
}

/// Load and compile only. Nothing is written.
fn validate_only(args: &Args) -> Result<(), MainError> {
    let loaded = loader::load_inputs(&args.model, &args.records, args.weights.as_deref()).map_err(map_io_err)?;
    let (plan, inputs) = prepare(&loaded).map_err(map_pipeline_err)?;
    if inputs.is_empty() {
        return Err(map_pipeline_err(PipelineError::NoRegions));
    }
    tracing::info!(model = %plan.name, steps = plan.steps.len(), regions = inputs.len(), "validate-only: inputs OK");
    Ok(())
}

fn run_once(args: &Args) -> Result<(), MainError> {
    let loaded = loader::load_inputs(&args.model, &args.records, args.weights.as_deref()).map_err(map_io_err)?;
    let (plan, inputs) = prepare(&loaded).map_err(map_pipeline_err)?;

    let cancel = CancelToken::new();
    {
        let token = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
            tracing::debug!(error = %e, "ctrl-c handler not installed");
        }
    }

    let options = ExecutionOptions { repair: args.repair, parallel: args.parallel_override() };
    let run = run_model(&plan, inputs, &options, &cancel).map_err(map_pipeline_err)?;

    let artifacts = write_artifacts(&args.out, &plan, &run)?;
    let record = build_run_record(&plan, &run, &loaded.digests, &options, artifacts);
    canonical_json::write_canonical_file(&args.out.join(RUN_RECORD_FILE), &record)
        .map_err(|e| MainError::Io(format!("write {RUN_RECORD_FILE}: {e}")))?;

    let open = open_issues(&run);
    tracing::info!(run_id = %record.id, out = %args.out.display(), open_issues = open, "artifacts written");
    if args.strict && open > 0 {
        return Err(MainError::Anomalies(open));
    }
    Ok(())
}

/// Issues (errors and warnings) left in the final validation of each step.
fn open_issues(run: &ModelRun) -> usize {
    run.steps
        .iter()
        .filter_map(|s| s.repair.as_ref().map(|r| &r.remaining).or(s.validation.as_ref()))
        .map(|v| v.issues().count())
        .sum()
}

#[derive(Serialize)]
struct ResultDoc<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
    #[serde(flatten)]
    table: ResultTable,
}

#[derive(Serialize)]
struct StepValidationDoc<'a> {
    code: &'a str,
    name: &'a str,
    validation: &'a ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    repair: Option<&'a RepairResult>,
    diagnostics: &'a [TopsisDiagnosis],
}

#[derive(Serialize)]
struct ValidationDoc<'a> {
    model: &'a str,
    steps: Vec<StepValidationDoc<'a>>,
}

/// Write result.json and validation.json; returns their SHA-256 by file name.
fn write_artifacts(out_dir: &Path, plan: &ModelPlan, run: &ModelRun) -> Result<BTreeMap<String, String>, MainError> {
    fs::create_dir_all(out_dir).map_err(|e| MainError::Io(format!("mkdir {}: {e}", out_dir.display())))?;

    let result = ResultDoc { model: &plan.name, model_id: plan.model_id.as_deref(), table: run.result_table(plan) };
    let validation = ValidationDoc {
        model: &plan.name,
        steps: run
            .steps
            .iter()
            .filter_map(|s| {
                s.validation.as_ref().map(|v| StepValidationDoc {
                    code: &s.code,
                    name: &s.name,
                    validation: v,
                    repair: s.repair.as_ref(),
                    diagnostics: &s.diagnostics,
                })
            })
            .collect(),
    };

    let mut digests = BTreeMap::new();
    for (file, value) in [
        (RESULT_FILE, serde_json::to_value(&result)),
        (VALIDATION_FILE, serde_json::to_value(&validation)),
    ] {
        let value = value.map_err(|e| MainError::Io(format!("serialize {file}: {e}")))?;
        let path = out_dir.join(file);
        canonical_json::write_canonical_file(&path, &value).map_err(|e| MainError::Io(format!("write {file}: {e}")))?;
        let sha = hasher::sha256_file(&path).map_err(|e| MainError::Io(format!("hash {file}: {e}")))?;
        digests.insert(file.to_string(), sha);
    }
    Ok(digests)
}
