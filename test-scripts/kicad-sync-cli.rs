use std::path::{Path, PathBuf};
use std::process::ExitCode;

use kicad_sync_rs::model::diff::ClassDiff;
use kicad_sync_rs::{
    ApplyReport, BoardDiff, BoardFile, BoardSnapshot, ClientBuilder, Document, MemorySketch,
    SketchKernel, SyncError,
};

const SNAPSHOT_ENV: &str = "KICAD_SYNC_SNAPSHOT";

#[derive(Debug, Default)]
struct CliConfig {
    board: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    diff: Option<PathBuf>,
    diff_out: Option<PathBuf>,
}

#[derive(Debug)]
enum Command {
    Scan,
    Apply,
    Sketch,
    Help,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            if matches!(err, SyncError::Config { .. }) {
                eprintln!("hint: run `kicad-sync-cli help` for usage.");
            }
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let (config, command) = parse_args()?;

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Scan => scan(config).await,
        Command::Apply => apply(config).await,
        Command::Sketch => sketch(config),
    }
}

async fn scan(config: CliConfig) -> Result<(), SyncError> {
    let board_path = required(config.board, "--board")?;
    let board = BoardFile::open(&board_path)?;

    let existing = config.snapshot.clone().filter(|path| path.exists());
    let Some(snapshot_path) = existing else {
        let (document, report) = Document::from_source(MemorySketch::new(), &board)?;
        print_report("build", &report);
        let snapshot = document.snapshot();
        println!(
            "full snapshot: pcb_name={} pcb_id={} entities={}",
            snapshot.general.pcb_name,
            snapshot.general.pcb_id,
            snapshot.entity_count()
        );
        return match config.snapshot {
            Some(path) => write_json(&path, snapshot),
            None => print_json(snapshot),
        };
    };

    let snapshot: BoardSnapshot = read_json(&snapshot_path)?;
    let (document, report) = Document::from_snapshot(MemorySketch::new(), snapshot);
    print_report("rebuild", &report);

    let client = ClientBuilder::new().spawn(document)?;
    let outcome = client.scan(board).await?;
    print_report("scan", &outcome.report);

    if outcome.diff.is_empty() {
        println!("no changes");
    } else {
        print_diff_summary(&outcome.diff);
        match config.diff_out {
            Some(path) => write_json(&path, &outcome.diff)?,
            None => print_json(&outcome.diff)?,
        }
    }

    write_json(&snapshot_path, &client.snapshot().await?)
}

async fn apply(config: CliConfig) -> Result<(), SyncError> {
    let snapshot_path = required(config.snapshot, "--snapshot")?;
    let diff_path = required(config.diff, "--diff")?;

    let snapshot: BoardSnapshot = read_json(&snapshot_path)?;
    let diff: BoardDiff = read_json(&diff_path)?;
    print_diff_summary(&diff);

    let (document, report) = Document::from_snapshot(MemorySketch::new(), snapshot);
    print_report("rebuild", &report);

    let client = ClientBuilder::new().spawn(document)?;
    let report = client.apply_diff(diff).await?;
    print_report("apply", &report);

    write_json(&snapshot_path, &client.snapshot().await?)
}

fn sketch(config: CliConfig) -> Result<(), SyncError> {
    let snapshot_path = required(config.snapshot, "--snapshot")?;
    let snapshot: BoardSnapshot = read_json(&snapshot_path)?;
    let (document, report) = Document::from_snapshot(MemorySketch::new(), snapshot);
    print_report("rebuild", &report);

    let kernel = document.kernel();
    println!("geometry={}", kernel.geometry_count());
    for index in 0..kernel.geometry_count() {
        let tag = kernel
            .tag_of(index)
            .map(|tag| tag.to_string())
            .unwrap_or_else(|| "-".to_string());
        if let Some(geometry) = kernel.geometry(index) {
            println!("[{index}] {tag} {geometry:?}");
        }
    }

    println!("constraints={}", kernel.constraints().len());
    for (index, constraint) in kernel.constraints().iter().enumerate() {
        println!("[{index}] {} {:?}", constraint.name, constraint.kind);
    }

    let model = document.model();
    println!("entities={}", model.registry.len());
    for (external_id, registration) in model.registry.iter() {
        let label = model
            .containers
            .get(registration.container)
            .map(|container| container.label.as_str())
            .unwrap_or("<gone>");
        let tags: Vec<String> = registration.tags.iter().map(|tag| tag.to_string()).collect();
        println!(
            "{} {external_id} label={label} tags=[{}] constraints={}",
            registration.class,
            tags.join(","),
            registration.constraints.len()
        );
    }

    Ok(())
}

fn parse_args() -> Result<(CliConfig, Command), SyncError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() {
        return Ok((CliConfig::default(), Command::Help));
    }

    let mut config = CliConfig::default();
    let mut index = 0;

    while index < args.len() {
        let slot = match args[index].as_str() {
            "--board" => &mut config.board,
            "--snapshot" => &mut config.snapshot,
            "--diff" => &mut config.diff,
            "--diff-out" => &mut config.diff_out,
            _ => {
                index += 1;
                continue;
            }
        };
        let value = args.get(index + 1).ok_or_else(|| SyncError::Config {
            reason: format!("missing value for {}", args[index]),
        })?;
        *slot = Some(PathBuf::from(value));
        args.drain(index..=index + 1);
    }

    config.snapshot = resolve_snapshot_path(config.snapshot);

    if args.is_empty() {
        return Ok((config, Command::Help));
    }

    let command = match args[0].as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "scan" => Command::Scan,
        "apply" => Command::Apply,
        "sketch" => Command::Sketch,
        other => {
            return Err(SyncError::Config {
                reason: format!("unknown command `{other}`"),
            })
        }
    };

    Ok((config, command))
}

fn resolve_snapshot_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| std::env::var_os(SNAPSHOT_ENV).map(PathBuf::from))
}

fn required(value: Option<PathBuf>, flag: &str) -> Result<PathBuf, SyncError> {
    value.ok_or_else(|| SyncError::Config {
        reason: format!("{flag} is required for this command"),
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SyncError> {
    let text = std::fs::read_to_string(path).map_err(|err| SyncError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| SyncError::Decode(err.to_string()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), SyncError> {
    let text =
        serde_json::to_string_pretty(value).map_err(|err| SyncError::Encode(err.to_string()))?;
    std::fs::write(path, text).map_err(|err| SyncError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    println!("wrote {}", path.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), SyncError> {
    let text =
        serde_json::to_string_pretty(value).map_err(|err| SyncError::Encode(err.to_string()))?;
    println!("{text}");
    Ok(())
}

fn print_diff_summary(diff: &BoardDiff) {
    print_class_summary("footprints", diff.footprints.as_ref());
    print_class_summary("drawings", diff.drawings.as_ref());
    print_class_summary("vias", diff.vias.as_ref());
}

fn print_class_summary<T>(key: &str, diff: Option<&ClassDiff<T>>) {
    if let Some(diff) = diff {
        println!(
            "{key}: added={} changed={} removed={}",
            diff.added.len(),
            diff.changed.len(),
            diff.removed.len()
        );
    }
}

fn print_report(stage: &str, report: &ApplyReport) {
    println!(
        "{stage}: added={} removed={} changed={} skipped={}",
        report.added,
        report.removed,
        report.changed,
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!(
            "  skipped {} `{}`: {}",
            skipped.class, skipped.external_id, skipped.error
        );
    }
}

fn print_help() {
    println!(
        "kicad-sync-cli\n\nUSAGE:\n  cargo run --bin kicad-sync-cli -- [--board FILE] [--snapshot FILE] [--diff FILE] [--diff-out FILE] <command>\n\nCOMMANDS:\n  scan      Full snapshot of --board, or the diff against an existing --snapshot (snapshot is updated)\n  apply     Replay --diff onto the model built from --snapshot (snapshot is updated)\n  sketch    List geometry, constraints and entities of the model built from --snapshot\n  help      Show help\n\nENVIRONMENT:\n  {SNAPSHOT_ENV}    Default for --snapshot\n"
    );
}
