use log::{LevelFilter, Log, Metadata, Record};
use lysync::trace::source_files;
use lysync::{synchronize_with_sources, ScoreSources, SyncConfig, SyncError};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

/// Writes log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    eprintln!("{}: {}", record.level(), record.args())
                }
                _ => eprintln!("{}", record.args()),
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: lysync <trace-file> <midi-file> [config.yaml]");
        process::exit(1);
    }

    if let Err(e) = run(&args[1], &args[2], args.get(3)) {
        eprintln!("{}", e.report());
        process::exit(e.severity().exit_code());
    }
}

fn run(trace_path: &str, midi_path: &str, config_path: Option<&String>) -> Result<(), SyncError> {
    let config = match config_path {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let level = if config.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }

    let trace = fs::read_to_string(trace_path)?;
    let midi = fs::read(midi_path)?;

    // Score files named in the trace are optional; they refine pitches.
    let mut sources = ScoreSources::new();
    let trace_dir = Path::new(trace_path).parent().unwrap_or_else(|| Path::new("."));
    for file in source_files(&trace) {
        let candidates = [Path::new(&file).to_path_buf(), trace_dir.join(&file)];
        if let Some(text) = candidates.iter().find_map(|path| fs::read_to_string(path).ok()) {
            log::debug!("Loaded score source {}", file);
            sources.insert(file, &text, config.language)?;
        }
    }

    let sync = synchronize_with_sources(&trace, &midi, &sources, &config)?;
    let schedule = sync.schedule()?;
    let json = serde_json::to_string_pretty(&schedule)
        .map_err(|e| SyncError::Config(format!("Failed to serialize schedule: {}", e)))?;
    println!("{}", json);
    Ok(())
}
