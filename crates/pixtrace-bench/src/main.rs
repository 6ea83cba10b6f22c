//! pixtrace: trace image files into vector markup from the command line.
//!
//! Runs the full plugin session against a filesystem host in which every
//! image file is a selectable node. Useful for:
//!
//! - Previewing how a preset or option set traces a given image
//! - Batch-converting a directory of logos to SVG files
//! - Inspecting the retry ladder's per-attempt diagnostics
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin pixtrace -- preview [OPTIONS] <IMAGE>
//! cargo run --release --bin pixtrace -- convert [OPTIONS] --out-dir <DIR> <IMAGES>...
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod host;
mod logger;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pixtrace_core::orchestrator::AttemptResult;
use pixtrace_core::{
    AttemptRecord, BatchEvent, CurveFitting, HostEvent, OrchestratorConfig, Preset, Session,
    SessionConfig, SessionError, SessionEvent, Status, StatusLevel, SystemClock, TraceOptions,
};
use pixtrace_engines::default_engines;

use crate::host::FsHost;

/// Trace image files into vector shapes.
///
/// Each input file stands in for one selected node: `preview` traces the
/// first at preview size, `convert` traces all of them at full size and
/// writes one SVG per file.
#[derive(Parser)]
#[command(name = "pixtrace", version)]
struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trace one image at preview size.
    Preview {
        /// Path to the input image (PNG, JPEG, BMP, WebP).
        image: PathBuf,

        /// Write the markup to this file instead of stdout.
        #[arg(long)]
        svg: Option<PathBuf>,

        #[command(flatten)]
        trace: TraceArgs,
    },
    /// Convert every image, writing `<name>.svg` into the output directory.
    Convert {
        /// Paths to the input images.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Directory receiving the SVG files.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        trace: TraceArgs,
    },
}

#[derive(Args)]
struct TraceArgs {
    /// Named parameter preset (logo_bw, icon_clean, detailed).
    #[arg(long, default_value_t = Preset::default())]
    preset: Preset,

    /// Luminance cutoff; darker pixels become black.
    #[arg(long)]
    threshold: Option<u8>,

    /// Swap black and white after thresholding.
    #[arg(long)]
    invert: bool,

    /// Drop regions smaller than this squared, in pixels.
    #[arg(long)]
    filter_speckle: Option<u32>,

    /// Turning angle in degrees above which a vertex stays sharp (0-180).
    #[arg(long)]
    corner_threshold: Option<u32>,

    /// Path geometry mode.
    #[arg(long, value_enum)]
    curve_fitting: Option<Fitting>,

    /// Decimal places kept in coordinates (1-10).
    #[arg(long)]
    path_precision: Option<u32>,

    /// Full trace options as a JSON string.
    ///
    /// When provided, the preset and every other option flag are ignored.
    /// The JSON must be a valid `TraceOptions` serialization.
    #[arg(long)]
    options_json: Option<String>,

    /// Seed for retry perturbation, for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Print the session events as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Path geometry mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Fitting {
    /// Follow the pixel staircase exactly.
    Pixel,
    /// Straight-line polygon approximation.
    Polygon,
    /// Smooth curves with sharp corners preserved.
    Spline,
}

impl From<Fitting> for CurveFitting {
    fn from(fitting: Fitting) -> Self {
        match fitting {
            Fitting::Pixel => Self::Pixel,
            Fitting::Polygon => Self::Polygon,
            Fitting::Spline => Self::Spline,
        }
    }
}

/// Batch runs never show a live preview, so the debounce is pushed out
/// beyond any realistic run.
const BATCH_PREVIEW_DEBOUNCE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error parsing --options-json: {0}")]
    OptionsJson(serde_json::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("no readable images given")]
    NoImages,

    #[error("session stalled with no host answer pending")]
    Stalled,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error serializing report: {0}")]
    Report(serde_json::Error),
}

type CliSession = Session<FsHost, SystemClock>;

/// Explicit options from the command line, or `None` to use the preset
/// as is.
fn options_from_cli(args: &TraceArgs) -> Result<Option<TraceOptions>, CliError> {
    if let Some(json) = &args.options_json {
        return serde_json::from_str(json)
            .map(Some)
            .map_err(CliError::OptionsJson);
    }
    let overridden = args.threshold.is_some()
        || args.invert
        || args.filter_speckle.is_some()
        || args.corner_threshold.is_some()
        || args.curve_fitting.is_some()
        || args.path_precision.is_some();
    if !overridden {
        return Ok(None);
    }
    let base = args.preset.options();
    Ok(Some(TraceOptions {
        threshold: args.threshold.unwrap_or(base.threshold),
        invert: args.invert || base.invert,
        filter_speckle: args.filter_speckle.unwrap_or(base.filter_speckle),
        corner_threshold: args.corner_threshold.unwrap_or(base.corner_threshold),
        curve_fitting: args.curve_fitting.map_or(base.curve_fitting, CurveFitting::from),
        path_precision: args.path_precision.unwrap_or(base.path_precision),
    }))
}

/// A session over `host` with the bundled engines, the requested
/// options and every opened file selected.
fn build_session(
    host: FsHost,
    args: &TraceArgs,
    preview_debounce: Option<Duration>,
) -> Result<CliSession, CliError> {
    let defaults = SessionConfig::default();
    let config = SessionConfig {
        preview_debounce: preview_debounce.unwrap_or(defaults.preview_debounce),
        orchestrator: OrchestratorConfig {
            seed: args.seed,
            ..OrchestratorConfig::default()
        },
        ..defaults
    };
    let mut session = Session::new(host, default_engines(), SystemClock, config);
    match options_from_cli(args)? {
        Some(options) => session.set_options(options)?,
        None => session.apply_preset(args.preset),
    }

    let selection = session.host().selection();
    if selection.is_empty() {
        return Err(CliError::NoImages);
    }
    session.handle_event(HostEvent::SelectionChanged(selection));
    Ok(session)
}

/// Pump host answers and session turns until `done` accepts an event.
///
/// Returns every event the session emitted along the way.
fn drive(
    session: &mut CliSession,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> Result<Vec<SessionEvent>, CliError> {
    let mut seen = Vec::new();
    loop {
        let answers = session.host_mut().drain();
        let answered = !answers.is_empty();
        for event in answers {
            session.handle_event(event);
        }
        let busy = session.run_turn();

        let mut finished = false;
        for event in session.take_events() {
            if let SessionEvent::Status(status) = &event {
                log_status(status);
            }
            finished |= done(&event);
            seen.push(event);
        }
        if finished {
            return Ok(seen);
        }
        if !busy && !answered && !session.host().has_pending() {
            return Err(CliError::Stalled);
        }
    }
}

fn log_status(status: &Status) {
    match status.level {
        StatusLevel::Info => log::info!("{}", status.message),
        StatusLevel::Warning => log::warn!("{}", status.message),
        StatusLevel::Error => log::error!("{}", status.message),
    }
}

fn print_json(events: &[SessionEvent]) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(events).map_err(CliError::Report)?;
    println!("{json}");
    Ok(())
}

fn print_attempts(attempts: &[AttemptRecord]) {
    for attempt in attempts {
        let result = match &attempt.result {
            AttemptResult::Succeeded => String::from("ok"),
            AttemptResult::Failed { kind, message } => format!("{kind:?}: {message}"),
        };
        eprintln!(
            "  attempt {} {} {:?} corner={} perturb={} steps={} {:.3}ms  {result}",
            attempt.plan.index,
            attempt.plan.engine,
            attempt.plan.curve_fitting,
            attempt.plan.corner_threshold,
            attempt.plan.perturb,
            attempt.steps,
            attempt.duration.as_secs_f64() * 1000.0,
        );
    }
}

fn preview(image: PathBuf, svg: Option<&Path>, args: &TraceArgs) -> Result<ExitCode, CliError> {
    let host = FsHost::open(&[image], PathBuf::from("."));
    let mut session = build_session(host, args, None)?;
    let request_id = session.request_preview_now().ok_or(CliError::NoImages)?;

    let events = drive(&mut session, |event| match event {
        SessionEvent::PreviewReady(shown) => shown.request_id == request_id,
        SessionEvent::PreviewFailed { request_id: id, .. } => *id == request_id,
        _ => false,
    })?;
    if args.json {
        print_json(&events)?;
    } else {
        for event in &events {
            if let SessionEvent::Diagnostics { attempts, .. } = event {
                eprintln!("Attempts:");
                print_attempts(attempts);
            }
        }
    }

    let Some(shown) = session.preview() else {
        if let Some(status) = session.status() {
            eprintln!("{}", status.message);
        }
        return Ok(ExitCode::FAILURE);
    };
    eprintln!(
        "Traced {} ({}x{}) with the {} engine in {:.1}ms",
        shown.source.name,
        shown.source.width,
        shown.source.height,
        shown.engine,
        shown.elapsed.as_secs_f64() * 1000.0,
    );
    match svg {
        Some(path) => {
            std::fs::write(path, &shown.markup).map_err(|source| CliError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            eprintln!("SVG written to {} ({} bytes)", path.display(), shown.markup.len());
        }
        None if !args.json => println!("{}", shown.markup),
        None => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn convert(images: &[PathBuf], out_dir: PathBuf, args: &TraceArgs) -> Result<ExitCode, CliError> {
    std::fs::create_dir_all(&out_dir).map_err(|source| CliError::Io {
        path: out_dir.clone(),
        source,
    })?;
    let host = FsHost::open(images, out_dir);
    let mut session = build_session(host, args, Some(BATCH_PREVIEW_DEBOUNCE))?;
    let request_id = session.request_convert()?;

    let events = drive(&mut session, |event| match event {
        SessionEvent::Batch(
            BatchEvent::Complete { request_id: id, .. } | BatchEvent::Aborted { request_id: id, .. },
        ) => *id == request_id,
        _ => false,
    })?;
    if args.json {
        print_json(&events)?;
    }

    let mut clean = false;
    for event in &events {
        let SessionEvent::Batch(batch) = event else {
            continue;
        };
        match batch {
            BatchEvent::NodeConverted {
                node_id,
                vector_name,
                attempts,
                ..
            } if !args.json => {
                eprintln!("{node_id} -> {vector_name}");
                print_attempts(attempts);
            }
            BatchEvent::NodeFailed {
                node_name, message, ..
            } if !args.json => eprintln!("{node_name}: {message}"),
            BatchEvent::Complete { failed, .. } => clean = *failed == 0,
            _ => {}
        }
    }
    if let Some(status) = session.status() {
        eprintln!("{}", status.message);
    }
    for path in session.host().written() {
        log::info!("wrote {}", path.display());
    }
    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let result = match cli.command {
        Command::Preview { image, svg, trace } => preview(image, svg.as_deref(), &trace),
        Command::Convert {
            images,
            out_dir,
            trace,
        } => convert(&images, out_dir, &trace),
    };
    result.unwrap_or_else(|e| {
        eprintln!("{e}");
        ExitCode::FAILURE
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pixtrace").chain(args.iter().copied())).unwrap()
    }

    fn trace_args(cli: Cli) -> TraceArgs {
        match cli.command {
            Command::Preview { trace, .. } | Command::Convert { trace, .. } => trace,
        }
    }

    #[test]
    fn preset_alone_keeps_preset_options() {
        let args = trace_args(parse(&["preview", "logo.png", "--preset", "icon_clean"]));
        assert_eq!(args.preset, Preset::IconClean);
        assert!(options_from_cli(&args).unwrap().is_none());
    }

    #[test]
    fn flags_override_the_preset() {
        let args = trace_args(parse(&[
            "convert",
            "a.png",
            "b.png",
            "--preset",
            "detailed",
            "--threshold",
            "90",
            "--curve-fitting",
            "polygon",
        ]));
        let options = options_from_cli(&args).unwrap().unwrap();
        assert_eq!(options.threshold, 90);
        assert_eq!(options.curve_fitting, CurveFitting::Polygon);
        assert_eq!(options.corner_threshold, Preset::Detailed.options().corner_threshold);
    }

    #[test]
    fn options_json_wins() {
        let json = serde_json::to_string(&TraceOptions {
            filter_speckle: 7,
            ..TraceOptions::default()
        })
        .unwrap();
        let args = trace_args(parse(&["preview", "x.png", "--threshold", "5", "--options-json", &json]));
        assert_eq!(options_from_cli(&args).unwrap().unwrap().filter_speckle, 7);

        let bad = trace_args(parse(&["preview", "x.png", "--options-json", "{"]));
        assert!(matches!(options_from_cli(&bad), Err(CliError::OptionsJson(_))));
    }

    #[test]
    fn unknown_presets_are_rejected() {
        let parsed = Cli::try_parse_from(["pixtrace", "preview", "x.png", "--preset", "neon"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn convert_requires_images() {
        assert!(Cli::try_parse_from(["pixtrace", "convert"]).is_err());
    }
}
