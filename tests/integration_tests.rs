//! Integration tests for lysync
//!
//! Runs the full pipeline from trace text and MIDI bytes to a frame schedule.

use lysync::{synchronize, synchronize_with_sources, Language, ScoreSources, Severity, SyncConfig, SyncError};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use pretty_assertions::assert_eq;
use std::io::Write;

fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn note_on(delta: u32, key: u8) -> TrackEvent<'static> {
    event(
        delta,
        TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(90),
            },
        },
    )
}

/// A 384-tick-per-quarter file at the given tempo, one note track of
/// `(delta, keys)` chords, ending `tail` ticks after the last chord.
fn midi_bytes(micros_per_quarter: u32, chords: &[(u32, &[u8])], tail: u32) -> Vec<u8> {
    let conductor = vec![
        event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter)))),
        event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ];
    let mut notes = Vec::new();
    for (delta, keys) in chords {
        for (i, &key) in keys.iter().enumerate() {
            notes.push(note_on(if i == 0 { *delta } else { 0 }, key));
        }
    }
    notes.push(event(tail, TrackEventKind::Meta(MetaMessage::EndOfTrack)));

    let smf = Smf {
        header: Header::new(Format::Parallel, Timing::Metrical(u15::new(384))),
        tracks: vec![conductor, notes],
    };
    let mut bytes = Vec::new();
    smf.write(&mut bytes).unwrap();
    bytes
}

fn anchor(left: f64, pitch: &str, moment: f64, line: usize, column: usize) -> String {
    format!(
        "ly2video: ({:23.16}, {:23.16}) pitch {} @ {:23.16} from score.ly:{:3}:{}",
        left,
        left + 1.0,
        pitch,
        moment,
        line,
        column
    )
}

fn scale_trace() -> String {
    [
        "Processing `score.ly'".to_string(),
        anchor(4.0, "0:0:0", 0.0, 2, 2),
        anchor(8.0, "0:1:0", 0.25, 2, 6),
        anchor(12.0, "0:2:0", 0.5, 2, 9),
        anchor(16.0, "0:3:0", 0.75, 2, 12),
        "ly2videoBar: (   2.0000000000000000,    2.0000000000000000) @    0.0000000000000000".to_string(),
        "ly2videoBar: (  20.0000000000000000,   20.0000000000000000) @    1.0000000000000000".to_string(),
    ]
    .join("\n")
}

#[test]
fn test_synchronize_scale() {
    // one quarter per second
    let midi = midi_bytes(1_000_000, &[(0, &[60]), (384, &[62]), (384, &[64]), (384, &[65])], 384);
    let sync = synchronize(&scale_trace(), &midi, &SyncConfig::default()).unwrap();

    let ticks: Vec<u64> = sync.sync_points().iter().map(|p| p.tick).collect();
    assert_eq!(ticks, vec![0, 384, 768, 1152]);
    assert_eq!(sync.alignment.stats.warnings(), 0);
    assert_eq!(sync.bar_lines.len(), 3);
    assert_eq!(sync.bar_lines[0], 50);

    let schedule = sync.schedule().unwrap();
    let frames: Vec<usize> = schedule.segments.iter().map(|s| s.frames).collect();
    assert_eq!(frames, vec![30, 30, 30, 30]);
    assert_eq!(schedule.total_frames, 120);
    assert_eq!(schedule.estimated_frames, 120);
    assert_eq!(schedule.segments[3].end_tick, 1536);
    assert!((schedule.segments[2].start_seconds - 2.0).abs() < 1e-9);
}

#[test]
fn test_rendered_cursor_follows_sync_points() {
    let midi = midi_bytes(1_000_000, &[(0, &[60]), (384, &[62]), (384, &[64]), (384, &[65])], 384);
    let sync = synchronize(&scale_trace(), &midi, &SyncConfig::default()).unwrap();

    let mut time_code = sync.time_code().unwrap();
    time_code.register(Box::new(sync.score_cursor()));
    let frames = time_code.render_all();
    assert_eq!(frames.len(), 120);

    let positions = sync.alignment.pixel_positions();
    assert_eq!(frames[0].layers[0].x, positions[0]);
    assert_eq!(frames[30].layers[0].x, positions[1]);
    assert_eq!(frames[119].layers[0].x, positions[3]);
}

#[test]
fn test_schedule_serializes_to_json() {
    let midi = midi_bytes(500_000, &[(0, &[60]), (384, &[62]), (384, &[64]), (384, &[65])], 384);
    let schedule = synchronize(&scale_trace(), &midi, &SyncConfig::default())
        .unwrap()
        .schedule()
        .unwrap();
    let json = serde_json::to_value(&schedule).unwrap();
    assert_eq!(json["totalFrames"], 60);
    assert_eq!(json["tempo"][0]["beatsPerMinute"], 120.0);
    assert_eq!(json["syncPoints"][1]["tick"], 384);
    assert_eq!(json["segments"][0]["startTick"], 0);
}

#[test]
fn test_no_common_times_is_fatal() {
    // sixteen notated quarters, every note sounding an eighth late
    let trace = (0..16)
        .map(|q| anchor(4.0 + 4.0 * q as f64, "0:0:0", q as f64 / 4.0, 2, 2 + 3 * q))
        .collect::<Vec<_>>()
        .join("\n");
    let mut chords: Vec<(u32, &[u8])> = vec![(192, &[60u8] as &[u8])];
    chords.extend((1..16).map(|_| (384, &[60u8] as &[u8])));
    let midi = midi_bytes(1_000_000, &chords, 192);

    let err = synchronize(&trace, &midi, &SyncConfig::default()).unwrap_err();
    assert!(matches!(err, SyncError::NotEnoughSyncPoints { found: 0 }));
    assert_eq!(err.severity(), Severity::Fatal);
    assert_eq!(err.severity().exit_code(), 1);
}

#[test]
fn test_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "fps: 10").unwrap();
    writeln!(file, "left-margin-px: 0").unwrap();
    writeln!(file, "language: english").unwrap();
    let config = SyncConfig::load(file.path()).unwrap();
    assert_eq!(config.language, Language::English);

    let midi = midi_bytes(1_000_000, &[(0, &[60]), (384, &[62]), (384, &[64]), (384, &[65])], 384);
    let sync = synchronize(&scale_trace(), &midi, &config).unwrap();
    assert_eq!(sync.bar_lines[0], 0);
    assert_eq!(sync.schedule().unwrap().total_frames, 40);
}

#[test]
fn test_repeated_chord_from_source() {
    let score = "\\version \"2.24.0\"\n{ <c' e'>4 q <d' f'>4 }\n";
    let mut sources = ScoreSources::new();
    sources.insert("score.ly", score, Language::Nederlands).unwrap();

    let trace = [
        anchor(4.0, "0:0:0", 0.0, 2, 3),
        anchor(8.0, "0:0:0", 0.25, 2, 11),
        anchor(12.0, "0:1:0", 0.5, 2, 14),
    ]
    .join("\n");
    let midi = midi_bytes(1_000_000, &[(0, &[60, 64]), (384, &[60, 64]), (384, &[62, 65])], 384);

    let sync = synchronize_with_sources(&trace, &midi, &sources, &SyncConfig::default()).unwrap();
    assert_eq!(sync.sync_points().len(), 3);
    assert!(!sync.alignment.stats.unmatched_start);
    assert_eq!(
        sync.schedule().unwrap().segments.iter().map(|s| s.frames).collect::<Vec<_>>(),
        vec![30, 30, 30]
    );
}

#[test]
fn test_malformed_trace_is_a_bug() {
    let midi = midi_bytes(1_000_000, &[(0, &[60])], 384);
    let err = synchronize("ly2video: garbage", &midi, &SyncConfig::default()).unwrap_err();
    assert_eq!(err.severity(), Severity::Bug);
    assert_eq!(err.severity().exit_code(), 70);
}
