//! Vigil CLI - Command-line interface for the Vigil proctoring engine
//!
//! Commands:
//! - replay: Run recorded samples through the engine (batch mode)
//! - run: Monitor a live sample stream from stdin (streaming mode)
//! - validate: Validate sample schema
//! - calibrate: Compute a calibration profile from samples
//! - doctor: Diagnose configuration and session manifests
//! - schema: Print input/output schema information

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil::calibration::{CalibrationCollector, CalibrationEngine};
use vigil::error::{CalibrationError, ConfigError, IngestError};
use vigil::pipeline::{replay, ReplayReport, SessionManifest};
use vigil::runtime::MonitorRuntime;
use vigil::sample::{SampleAdapter, SampleRecord, SCHEMA_VERSION};
use vigil::{EngineConfig, MonitorError, SessionStatus, PRODUCER_NAME, VIGIL_VERSION};

/// Vigil - Violation detection and risk scoring for remote exam proctoring
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = VIGIL_VERSION)]
#[command(about = "Turn proctoring sample streams into violations and session risk", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded samples through the engine (batch mode)
    Replay {
        /// Session manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Monitor a live sample stream from stdin (streaming mode)
    Run {
        /// Session manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate sample schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute a calibration profile from samples
    Calibrate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Diagnose configuration and session manifests
    Doctor {
        /// Engine configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session manifest to check
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one sample per line)
    Ndjson,
    /// JSON array of samples
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// One violation per line, then the final risk snapshot
    Ndjson,
    /// Replay reports as a JSON array
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (vigil.sample.v1)
    Input,
    /// Output schema (violation events and risk snapshot)
    Output,
    /// Engine configuration with defaults
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "vigil=debug" } else { "vigil=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), VigilCliError> {
    match cli.command {
        Commands::Replay {
            manifest,
            input,
            output,
            input_format,
            output_format,
            config,
        } => cmd_replay(
            &manifest,
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
        ),

        Commands::Run { manifest, config } => cmd_run(&manifest, config.as_deref()),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Calibrate {
            input,
            input_format,
            config,
        } => cmd_calibrate(&input, input_format, config.as_deref()),

        Commands::Doctor {
            config,
            manifest,
            json,
        } => cmd_doctor(config.as_deref(), manifest.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn read_input(input: &Path) -> Result<String, VigilCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_samples(input: &Path, format: InputFormat) -> Result<Vec<SampleRecord>, VigilCliError> {
    let data = read_input(input)?;
    let records = match format {
        InputFormat::Ndjson => SampleAdapter::parse_ndjson(&data)?,
        InputFormat::Json => SampleAdapter::parse_array(&data)?,
    };
    Ok(records)
}

fn read_manifest(path: &Path) -> Result<SessionManifest, VigilCliError> {
    let manifest: SessionManifest = serde_json::from_str(&fs::read_to_string(path)?)?;
    manifest.settings.validate()?;
    Ok(manifest)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, VigilCliError> {
    Ok(EngineConfig::load(path)?)
}

fn cmd_replay(
    manifest_path: &Path,
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
) -> Result<(), VigilCliError> {
    let manifest = read_manifest(manifest_path)?;
    let config = load_config(config)?;
    let records = read_samples(input, input_format)?;
    if records.is_empty() {
        return Err(VigilCliError::NoSamples);
    }

    let mut reports: Vec<ReplayReport> = Vec::new();
    for (session_id, group) in SampleAdapter::group_by_session(records) {
        if manifest.session_id.is_some_and(|id| id != session_id) {
            warn!(session_id = %session_id, "Skipping samples for a session not in the manifest");
            continue;
        }
        let session_manifest = SessionManifest {
            session_id: Some(session_id),
            ..manifest.clone()
        };
        let report = replay(&session_manifest, group, &config)?;
        info!(
            session_id = %session_id,
            status = ?report.status,
            violations = report.violations.len(),
            dropped = report.samples_dropped,
            "Replay finished"
        );
        reports.push(report);
    }

    if reports.is_empty() {
        return Err(VigilCliError::NoSamples);
    }

    let output_data = format_reports(&reports, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

fn cmd_run(manifest_path: &Path, config: Option<&Path>) -> Result<(), VigilCliError> {
    let manifest = read_manifest(manifest_path)?;
    let config = load_config(config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let now = Utc::now();
        let session_id = manifest.session_id.unwrap_or_default();
        let monitor = MonitorRuntime::new(config);
        let handle = monitor.open_session(manifest.to_session(session_id, now))?;

        let mut events = handle.subscribe();
        let printer = tokio::spawn(async move {
            let mut stdout = io::stdout();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            let _ = writeln!(stdout, "{}", line);
                            let _ = stdout.flush();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "Event printer lagged behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        match manifest.calibration {
            Some(profile) => handle.use_calibration(profile, now).await?,
            None => handle.start_calibration(now).await?,
        }

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: SampleRecord = serde_json::from_str(trimmed).map_err(|e| {
                VigilCliError::ParseError(format!("Failed to parse sample: {}", e))
            })?;
            match handle.submit(record) {
                Ok(()) => {}
                Err(MonitorError::Ingest(IngestError::SessionClosed(_))) => {
                    info!(session_id = %session_id, "Session closed; ignoring remaining input");
                    break;
                }
                // Dropped samples are logged by the runtime
                Err(MonitorError::Ingest(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if handle.status().accepts_samples() && handle.status() != SessionStatus::Calibrating {
            handle.complete(Utc::now()).await?;
        }
        let snapshot = handle.snapshot(Utc::now()).await?;
        drop(handle);
        let _ = printer.await;
        println!("{}", serde_json::to_string(&snapshot)?);
        Ok::<(), VigilCliError>(())
    })
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), VigilCliError> {
    let records = read_samples(input, input_format)?;
    let results = SampleAdapter::validate_records(&records);

    let report = ValidationReport {
        total_samples: records.len(),
        valid_samples: records.len() - results.len(),
        invalid_samples: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                session_id: r.session_id.to_string(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:   {}", report.total_samples);
        println!("Valid samples:   {}", report.valid_samples);
        println!("Invalid samples: {}", report.invalid_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Sample {} (session {}): {}",
                    err.index, err.session_id, err.error
                );
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(VigilCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

fn cmd_calibrate(
    input: &Path,
    input_format: InputFormat,
    config: Option<&Path>,
) -> Result<(), VigilCliError> {
    let config = load_config(config)?;
    let mut records = read_samples(input, input_format)?;
    records.sort_by_key(|r| r.timestamp);
    let Some(start) = records.first().map(|r| r.timestamp) else {
        return Err(VigilCliError::NoSamples);
    };

    let engine = CalibrationEngine::new(config.calibration);
    let mut collector = CalibrationCollector::new(start);
    for record in records {
        collector.observe(record);
    }
    let profile = collector.finish(&engine, Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    manifest: Option<&Path>,
    json: bool,
) -> Result<(), VigilCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "vigil_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Vigil version {}", VIGIL_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    match config {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist; defaults will be used".to_string(),
        }),
        _ => checks.push(match EngineConfig::load(config) {
            Ok(cfg) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (debounce {}ms, decay {} per {}ms, time budget {}ms)",
                    cfg.aggregation.debounce_window_ms,
                    cfg.risk.decay,
                    cfg.risk.tick_ms,
                    cfg.ingest.time_budget_ms
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        }),
    }

    if let Some(path) = manifest {
        checks.push(match read_manifest(path) {
            Ok(m) => DoctorCheck {
                name: "manifest".to_string(),
                status: if m.calibration.is_some() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warning
                },
                message: if m.calibration.is_some() {
                    format!("Manifest valid for exam {}", m.exam_id)
                } else {
                    format!(
                        "Manifest valid for exam {}; no stored calibration, samples will calibrate",
                        m.exam_id
                    )
                },
            },
            Err(e) => DoctorCheck {
                name: "manifest".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        });
    }

    // Check stdin is available (for streaming mode)
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (streaming mode ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VIGIL_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Vigil Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(VigilCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), VigilCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("Each sample carries schema_version, session_id, timestamp (UTC),");
                println!("an optional evidence reference and a payload tagged by modality:");
                println!();
                println!("1. face - face_detected, face_count, confidence, position,");
                println!("   is_looking_at_screen, eye_gaze_confidence, liveness_detected,");
                println!("   emotions, face_encoding_hash");
                println!("2. audio - voice_level, background_noise, speaker_count,");
                println!("   voice_detected, multiple_voices_detected, detected_words");
                println!("3. screen - is_full_screen, tab_switch_detected, window_change_detected,");
                println!("   screenshot_attempted, print_screen_detected, virtual_machine_detected,");
                println!("   remote_desktop_detected, suspicious_applications, monitor_count");
                println!("4. behavior - copy_paste_detected, idle_time_secs, typing_speed,");
                println!("   focus_score, suspicious_pattern");
                println!("5. environment - background_person_count, lighting_quality,");
                println!("   phone_detected, book_detected, paper_detected");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output: violation events followed by the final risk snapshot");
                println!();
                println!("- violation: {{ id, session_id, type, timestamp, confidence, severity,");
                println!("  description, evidence, is_resolved, resolution, reviewed_by }}");
                println!("- snapshot: {{ session_id, current_score, status, posture,");
                println!("  recent_violations, total_violations, computed_at }}");
            }
        }
        SchemaType::Config => {
            println!("{}", EngineConfig::default().to_json()?);
        }
    }

    Ok(())
}

// Helper functions

fn format_reports(reports: &[ReplayReport], format: &OutputFormat) -> Result<String, VigilCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for report in reports {
                for violation in &report.violations {
                    lines.push(serde_json::to_string(violation)?);
                }
                lines.push(serde_json::to_string(&report.final_state)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(&ReplayOutput::new(reports))?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(&ReplayOutput::new(reports))?),
    }
}

fn get_input_json_schema() -> String {
    let unit = serde_json::json!({ "type": "number", "minimum": 0.0, "maximum": 1.0 });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "Vigil proctoring sample",
        "type": "object",
        "required": ["session_id", "timestamp", "payload"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "session_id": { "type": "string", "format": "uuid" },
            "timestamp": { "type": "string", "format": "date-time" },
            "evidence": { "type": "string" },
            "payload": {
                "type": "object",
                "required": ["modality"],
                "properties": {
                    "modality": {
                        "type": "string",
                        "enum": ["face", "audio", "screen", "behavior", "environment"]
                    },
                    "confidence": unit,
                    "eye_gaze_confidence": unit,
                    "focus_score": unit,
                    "lighting_quality": unit
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "vigil.violation.v1",
        "description": "Vigil finalized violation event",
        "type": "object",
        "required": ["id", "session_id", "type", "timestamp", "confidence", "severity"],
        "properties": {
            "id": { "type": "string", "format": "uuid" },
            "session_id": { "type": "string", "format": "uuid" },
            "type": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "confidence": { "type": "number" },
            "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
            "description": { "type": "string" },
            "evidence": { "type": "string" },
            "is_resolved": { "type": "boolean" },
            "resolution": { "type": "string" },
            "reviewed_by": { "type": "string" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum VigilCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    NoSamples,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for VigilCliError {
    fn from(e: io::Error) -> Self {
        VigilCliError::Io(e)
    }
}

impl From<MonitorError> for VigilCliError {
    fn from(e: MonitorError) -> Self {
        VigilCliError::Monitor(e)
    }
}

impl From<ConfigError> for VigilCliError {
    fn from(e: ConfigError) -> Self {
        VigilCliError::Monitor(e.into())
    }
}

impl From<CalibrationError> for VigilCliError {
    fn from(e: CalibrationError) -> Self {
        VigilCliError::Monitor(e.into())
    }
}

impl From<serde_json::Error> for VigilCliError {
    fn from(e: serde_json::Error) -> Self {
        VigilCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VigilCliError> for CliError {
    fn from(e: VigilCliError) -> Self {
        match e {
            VigilCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VigilCliError::Monitor(MonitorError::Config(e)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'vigil schema config' for the expected layout".to_string()),
            },
            VigilCliError::Monitor(MonitorError::Calibration(e)) => CliError {
                code: "CALIBRATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Provide at least 5s of samples with the face in view".to_string()),
            },
            VigilCliError::Monitor(e) => CliError {
                code: "MONITOR_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches {} schema", SCHEMA_VERSION)),
            },
            VigilCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VigilCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty and matches the manifest session".to_string()),
            },
            VigilCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            VigilCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            VigilCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ReplayOutput<'a> {
    producer: &'static str,
    version: &'static str,
    sessions: &'a [ReplayReport],
}

impl<'a> ReplayOutput<'a> {
    fn new(sessions: &'a [ReplayReport]) -> Self {
        Self {
            producer: PRODUCER_NAME,
            version: VIGIL_VERSION,
            sessions,
        }
    }
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session_id: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
