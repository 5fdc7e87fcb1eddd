// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use iid_cli::{DetectionReport, DetectorSelection, render_text_report, run_detectors};
use iid_core::DetectError;
use iid_online::{IidConfig, history_length_for_series_len};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV_VAR: &str = "IID_LOG";

#[derive(Debug)]
struct Cli {
    command: Command,
}

#[derive(Debug)]
enum Command {
    Detect(DetectArgs),
}

#[derive(Debug)]
struct DetectArgs {
    input: PathBuf,
    column: Option<ColumnSelector>,
    detector: DetectorSelection,
    history_length: Option<usize>,
    confidence: Option<f64>,
    warmup_fraction: Option<f64>,
    reset_on_alert: bool,
    config: Option<PathBuf>,
    format: OutputFormat,
    output: Option<PathBuf>,
}

impl Default for DetectArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            column: None,
            detector: DetectorSelection::Both,
            history_length: None,
            confidence: None,
            warmup_fraction: None,
            reset_on_alert: false,
            config: None,
            format: OutputFormat::Text,
            output: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ColumnSelector {
    Index(usize),
    Name(String),
}

impl ColumnSelector {
    fn parse(raw: &str) -> Result<Self, CliError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CliError::invalid_input("--column must not be empty"));
        }
        Ok(match trimmed.parse::<usize>() {
            Ok(idx) => Self::Index(idx),
            Err(_) => Self::Name(trimmed.to_string()),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(raw: &str) -> Result<Self, CliError> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(CliError::invalid_input(format!(
                "invalid --format '{raw}'; expected one of: text, json"
            ))),
        }
    }
}

fn parse_detector_selection(raw: &str) -> Result<DetectorSelection, CliError> {
    match raw.to_ascii_lowercase().as_str() {
        "spike" => Ok(DetectorSelection::Spike),
        "changepoint" | "change-point" | "change_point" => Ok(DetectorSelection::ChangePoint),
        "both" => Ok(DetectorSelection::Both),
        _ => Err(CliError::invalid_input(format!(
            "invalid --detector '{raw}'; expected one of: spike, changepoint, both"
        ))),
    }
}

#[derive(Debug)]
enum CliError {
    Detect(DetectError),
    Io {
        context: String,
        source: std::io::Error,
    },
    Json {
        context: String,
        source: serde_json::Error,
    },
    InvalidInput(String),
    NotSupported(String),
}

impl CliError {
    fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Detect(err) => err.code(),
            Self::InvalidInput(_) => "invalid_input",
            Self::NotSupported(_) => "not_supported",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detect(err) => write!(f, "{err}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Json { context, source } => write!(f, "{context}: {source}"),
            Self::InvalidInput(msg) => write!(f, "{msg}"),
            Self::NotSupported(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Detect(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::InvalidInput(_) | Self::NotSupported(_) => None,
        }
    }
}

impl From<DetectError> for CliError {
    fn from(value: DetectError) -> Self {
        Self::Detect(value)
    }
}

/// Optional detector settings read from a `--config` JSON file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigPatch {
    history_length: Option<usize>,
    confidence: Option<f64>,
    warmup_fraction: Option<f64>,
    reset_on_alert: Option<bool>,
}

#[derive(Clone, Debug)]
struct LoadedSeries {
    path: PathBuf,
    column: String,
    values: Vec<f64>,
}

impl LoadedSeries {
    fn summary(&self) -> InputSummary {
        InputSummary {
            path: self.path.display().to_string(),
            column: self.column.clone(),
            n: self.values.len(),
        }
    }
}

#[derive(Serialize)]
struct InputSummary {
    path: String,
    column: String,
    n: usize,
}

#[derive(Serialize)]
struct DetectOutput {
    command: &'static str,
    input: InputSummary,
    #[serde(flatten)]
    report: DetectionReport,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        emit_structured_error(&err);
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

fn run() -> Result<(), CliError> {
    let Some(cli) = parse_cli_from_env()? else {
        return Ok(());
    };

    match cli.command {
        Command::Detect(args) => handle_detect(args),
    }
}

fn parse_cli_from_env() -> Result<Option<Cli>, CliError> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    parse_cli(&args)
}

fn parse_cli(args: &[String]) -> Result<Option<Cli>, CliError> {
    let Some(command_name) = args.first() else {
        print_root_help();
        return Ok(None);
    };

    if matches!(command_name.as_str(), "-h" | "--help" | "help") {
        match args.get(1) {
            Some(topic) => print_command_help(topic.as_str())?,
            None => print_root_help(),
        }
        return Ok(None);
    }
    if matches!(command_name.as_str(), "-V" | "--version") {
        print_version();
        return Ok(None);
    }

    let rest = &args[1..];
    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_command_help(command_name.as_str())?;
        return Ok(None);
    }
    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        print_version();
        return Ok(None);
    }

    let command = match command_name.as_str() {
        "detect" => Command::Detect(parse_detect_args(rest)?),
        _ => {
            return Err(CliError::invalid_input(format!(
                "unknown command '{command_name}'; expected one of: detect, help"
            )));
        }
    };

    Ok(Some(Cli { command }))
}

fn parse_detect_args(tokens: &[String]) -> Result<DetectArgs, CliError> {
    let mut args = DetectArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.input = PathBuf::from(raw);
            }
            "--column" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.column = Some(ColumnSelector::parse(raw.as_str())?);
            }
            "--detector" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.detector = parse_detector_selection(raw.as_str())?;
            }
            "--history-length" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.history_length = Some(parse_usize_arg(raw.as_str(), flag)?);
            }
            "--confidence" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.confidence = Some(parse_f64_arg(raw.as_str(), flag)?);
            }
            "--warmup-fraction" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.warmup_fraction = Some(parse_f64_arg(raw.as_str(), flag)?);
            }
            "--reset-on-alert" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.reset_on_alert = true;
            }
            "--config" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.config = Some(PathBuf::from(raw));
            }
            "--format" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.format = OutputFormat::parse(raw.as_str())?;
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                return Err(CliError::invalid_input(format!(
                    "unknown detect option '{other}'"
                )));
            }
        }
        idx += 1;
    }

    if args.input.as_os_str().is_empty() {
        return Err(CliError::invalid_input("detect requires --input <path>"));
    }

    Ok(args)
}

fn split_flag(token: &str) -> Result<(&str, Option<String>), CliError> {
    if !token.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "unexpected positional argument '{token}'; expected --flag value"
        )));
    }
    if let Some((flag, value)) = token.split_once('=') {
        return Ok((flag, Some(value.to_string())));
    }
    Ok((token, None))
}

fn take_flag_value(
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<String, CliError> {
    if let Some(value) = inline_value {
        return Ok(value);
    }

    *idx += 1;
    let value = tokens
        .get(*idx)
        .ok_or_else(|| CliError::invalid_input(format!("{flag} requires a value")))?;
    if value.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "{flag} requires a value, but got option '{value}'"
        )));
    }
    Ok(value.clone())
}

fn ensure_no_inline_value(flag: &str, inline_value: Option<String>) -> Result<(), CliError> {
    if inline_value.is_some() {
        return Err(CliError::invalid_input(format!(
            "{flag} does not accept a value"
        )));
    }
    Ok(())
}

fn parse_usize_arg(raw: &str, flag: &str) -> Result<usize, CliError> {
    raw.parse::<usize>().map_err(|_| {
        CliError::invalid_input(format!(
            "{flag} expects a non-negative integer, got '{raw}'"
        ))
    })
}

fn parse_f64_arg(raw: &str, flag: &str) -> Result<f64, CliError> {
    raw.parse::<f64>()
        .map_err(|_| CliError::invalid_input(format!("{flag} expects a number, got '{raw}'")))
}

fn print_version() {
    println!("iid {}", env!("CARGO_PKG_VERSION"));
}

fn print_root_help() {
    println!(
        "iid {}\n\nUSAGE:\n  iid <COMMAND> [OPTIONS]\n\nCOMMANDS:\n  detect   Run IID spike and/or change-point detection over a CSV series\n  help     Show help for a command\n\nGLOBAL OPTIONS:\n  -h, --help      Show help\n  -V, --version   Show version\n\nENVIRONMENT:\n  {LOG_ENV_VAR}   tracing filter for diagnostics on stderr (default: warn)\n\nRun 'iid <COMMAND> --help' for subcommand options.",
        env!("CARGO_PKG_VERSION")
    );
}

fn print_command_help(command: &str) -> Result<(), CliError> {
    match command {
        "detect" => {
            println!(
                "USAGE:\n  iid detect --input <path.csv> [OPTIONS]\n\nOPTIONS:\n  --input <path>                          Required CSV input\n  --column <name|index>                   Value column; default: last column\n  --detector <spike|changepoint|both>     Default: both\n  --history-length <usize>                Default: a quarter of the series (min 2)\n  --confidence <float>                    Percentage in (0, 100); default: 95\n  --warmup-fraction <float>               Fraction of history in (0, 1]; default: 1\n  --reset-on-alert                        Reset evidence after each alert\n  --config <path>                         JSON file with detector settings; flags win\n  --format <text|json>                    Default: text\n  --output <path>                         Write output to file instead of stdout"
            );
            Ok(())
        }
        _ => Err(CliError::invalid_input(format!(
            "unknown command '{command}'; expected one of: detect"
        ))),
    }
}

fn handle_detect(args: DetectArgs) -> Result<(), CliError> {
    let input = load_series(args.input.as_path(), args.column.as_ref())?;
    info!(
        path = %input.path.display(),
        column = %input.column,
        n = input.values.len(),
        "loaded series"
    );

    let patch = match args.config.as_deref() {
        Some(path) => load_config_patch(path)?,
        None => ConfigPatch::default(),
    };
    let config = resolve_config(&args, &patch, input.values.len())?;
    debug!(?config, detector = ?args.detector, "resolved detector configuration");

    let report = run_detectors(&input.values, &config, args.detector)?;
    if let Some(spike) = &report.spike {
        info!(alerts = spike.alerts.len(), "spike detection finished");
    }
    if let Some(changepoint) = &report.changepoint {
        info!(
            alerts = changepoint.alerts.len(),
            "change-point detection finished"
        );
    }

    match args.format {
        OutputFormat::Text => {
            write_text_output(&render_text_report(&report), args.output.as_deref())
        }
        OutputFormat::Json => {
            let output = DetectOutput {
                command: "detect",
                input: input.summary(),
                report,
            };
            write_json_output(&output, args.output.as_deref())
        }
    }
}

fn resolve_config(
    args: &DetectArgs,
    patch: &ConfigPatch,
    series_len: usize,
) -> Result<IidConfig, CliError> {
    let defaults = IidConfig::default();
    let history_length = args
        .history_length
        .or(patch.history_length)
        .unwrap_or_else(|| history_length_for_series_len(series_len));
    let confidence = args
        .confidence
        .or(patch.confidence)
        .unwrap_or(defaults.confidence);

    let config = IidConfig::new(history_length, confidence)
        .with_warmup_fraction(
            args.warmup_fraction
                .or(patch.warmup_fraction)
                .unwrap_or(defaults.warmup_fraction),
        )
        .with_reset_on_alert(args.reset_on_alert || patch.reset_on_alert.unwrap_or(false));
    config.validate()?;
    Ok(config)
}

fn load_config_patch(path: &Path) -> Result<ConfigPatch, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))?;
    serde_json::from_str(raw.as_str()).map_err(|source| {
        CliError::json(
            format!("failed to parse config '{}'", path.display()),
            source,
        )
    })
}

fn load_series(path: &Path, column: Option<&ColumnSelector>) -> Result<LoadedSeries, CliError> {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .ok_or_else(|| {
            CliError::not_supported(format!(
                "unable to infer input format for '{}'; expected .csv",
                path.display()
            ))
        })?;

    match extension.as_str() {
        "csv" => {
            let raw = fs::read_to_string(path).map_err(|source| {
                CliError::io(format!("failed to read '{}'", path.display()), source)
            })?;
            let (values, column) = parse_csv_column(raw.as_str(), column)?;
            Ok(LoadedSeries {
                path: path.to_path_buf(),
                column,
                values,
            })
        }
        _ => Err(CliError::not_supported(format!(
            "unsupported input format '{extension}'; expected .csv"
        ))),
    }
}

/// Extracts one numeric column from CSV text, skipping a header row when the
/// selected cell of the first row is not a number.
fn parse_csv_column(
    raw: &str,
    selector: Option<&ColumnSelector>,
) -> Result<(Vec<f64>, String), CliError> {
    let rows = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(',').map(str::trim).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let Some(first_row) = rows.first() else {
        return Err(CliError::invalid_input("CSV input is empty"));
    };

    let col = match selector {
        Some(ColumnSelector::Name(name)) => first_row
            .iter()
            .position(|cell| cell == name)
            .ok_or_else(|| {
                CliError::invalid_input(format!(
                    "CSV header has no column named '{name}'; found: {}",
                    first_row.join(", ")
                ))
            })?,
        Some(ColumnSelector::Index(idx)) => *idx,
        None => first_row.len().saturating_sub(1),
    };
    if col >= first_row.len() {
        return Err(CliError::invalid_input(format!(
            "CSV column index {col} is out of range; row 1 has {} columns",
            first_row.len()
        )));
    }

    let has_header = matches!(selector, Some(ColumnSelector::Name(_)))
        || first_row_looks_like_header(&rows, col);
    let (label, data_rows) = if has_header {
        (first_row[col].to_string(), &rows[1..])
    } else {
        (format!("column {col}"), &rows[..])
    };
    if data_rows.is_empty() {
        return Err(CliError::invalid_input("CSV input has no data rows"));
    }

    let row_offset = 1 + usize::from(has_header);
    let mut values = Vec::with_capacity(data_rows.len());
    for (row_idx, row) in data_rows.iter().enumerate() {
        let row_number = row_idx + row_offset;
        let cell = row.get(col).ok_or_else(|| {
            CliError::invalid_input(format!(
                "CSV row {row_number} has {} columns; column {col} is missing",
                row.len()
            ))
        })?;
        if cell.is_empty() {
            return Err(CliError::invalid_input(format!(
                "CSV row {row_number} column {} is empty",
                col + 1
            )));
        }
        let value = cell
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| {
                CliError::invalid_input(format!(
                    "CSV row {row_number} column {} is not a finite float: '{cell}'",
                    col + 1
                ))
            })?;
        values.push(value);
    }

    Ok((values, label))
}

fn first_row_looks_like_header(rows: &[Vec<&str>], col: usize) -> bool {
    rows.first()
        .and_then(|row| row.get(col))
        .is_some_and(|cell| !cell.is_empty() && cell.parse::<f64>().is_err())
}

fn write_text_output(text: &str, output_path: Option<&Path>) -> Result<(), CliError> {
    if let Some(path) = output_path {
        fs::write(path, text)
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        print!("{text}");
        Ok(())
    }
}

fn write_json_output<T: Serialize>(
    payload: &T,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))?;

    if let Some(path) = output_path {
        fs::write(path, format!("{encoded}\n"))
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        println!("{encoded}");
        Ok(())
    }
}

fn emit_structured_error(err: &CliError) {
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!(
            "{{\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
            err.code(),
            err
        ),
    }
}
