//! # Public API
//!
//! Entry points for the synchronization pipeline:
//!
//! - [`extract_anchors()`] - positional trace to visual anchors
//! - [`extract_bar_lines()`] - positional trace to measure positions
//! - [`extract_performance()`] - MIDI bytes to tempo and note timelines
//! - [`synchronize()`] - the whole pipeline, producing a [`Synchronization`]
//!
//! ## Typical Usage
//!
//! ```rust,no_run
//! use lysync::{synchronize, SyncConfig};
//!
//! let trace = std::fs::read_to_string("score.trace")?;
//! let midi = std::fs::read("score.midi")?;
//!
//! let sync = synchronize(&trace, &midi, &SyncConfig::default())?;
//! let mut time_code = sync.time_code()?;
//! time_code.register(Box::new(sync.score_cursor()));
//! for frame in time_code.render_all() {
//!     // hand frame.layers to a renderer
//! }
//! # Ok::<(), lysync::SyncError>(())
//! ```

use crate::align::{Alignment, AlignmentEngine, SyncPoint};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::midi::{self, Performance};
use crate::tempo::TempoChange;
use crate::timecode::{ScoreCursor, TimeCode};
use crate::trace::{AnchorExtractor, PixelScale, ScoreSources, VisualAnchor};
use log::info;
use serde::Serialize;

/// Visual anchors of a positional trace, one per moment.
pub fn extract_anchors(trace: &str, config: &SyncConfig) -> Result<Vec<VisualAnchor>, SyncError> {
    AnchorExtractor::new(PixelScale::from_config(config)).extract(trace)
}

/// Like [`extract_anchors()`], consulting score text for `q` chords and
/// pitches missing from the trace.
pub fn extract_anchors_with_sources(
    trace: &str,
    sources: &ScoreSources,
    config: &SyncConfig,
) -> Result<Vec<VisualAnchor>, SyncError> {
    AnchorExtractor::new(PixelScale::from_config(config))
        .with_sources(sources)
        .extract(trace)
}

/// Bar line positions of a positional trace, starting with the left margin.
pub fn extract_bar_lines(trace: &str, config: &SyncConfig) -> Result<Vec<i64>, SyncError> {
    AnchorExtractor::new(PixelScale::from_config(config)).extract_bar_lines(trace)
}

/// Tempo timeline and note-on ticks of a standard MIDI file.
pub fn extract_performance(midi: &[u8]) -> Result<Performance, SyncError> {
    midi::extract_performance(midi)
}

/// Run extraction and alignment.
///
/// # Errors
/// Fails with a [`SyncError`] if any stage fails, notably
/// [`SyncError::NotEnoughSyncPoints`] when score and performance share
/// fewer than two instants.
pub fn synchronize(trace: &str, midi: &[u8], config: &SyncConfig) -> Result<Synchronization, SyncError> {
    synchronize_with_sources(trace, midi, &ScoreSources::new(), config)
}

pub fn synchronize_with_sources(
    trace: &str,
    midi: &[u8],
    sources: &ScoreSources,
    config: &SyncConfig,
) -> Result<Synchronization, SyncError> {
    config.validate()?;
    let anchors = extract_anchors_with_sources(trace, sources, config)?;
    let bar_lines = extract_bar_lines(trace, config)?;
    let performance = extract_performance(midi)?;

    let engine = AlignmentEngine::from_config(config, performance.resolution);
    let alignment = engine.align(&anchors, performance.ticks.clone())?;
    info!(
        "{} sync points, {} warnings",
        alignment.sync_points.len(),
        alignment.stats.warnings()
    );

    Ok(Synchronization {
        anchors,
        bar_lines,
        performance,
        alignment,
        fps: config.fps,
    })
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct Synchronization {
    pub anchors: Vec<VisualAnchor>,
    pub bar_lines: Vec<i64>,
    pub performance: Performance,
    pub alignment: Alignment,
    pub fps: f64,
}

impl Synchronization {
    pub fn sync_points(&self) -> &[SyncPoint] {
        &self.alignment.sync_points
    }

    /// A fresh frame scheduler over the aligned ticks.
    pub fn time_code(&self) -> Result<TimeCode, SyncError> {
        TimeCode::from_alignment(&self.alignment, self.performance.tempo.clone(), self.fps)
    }

    /// Note and measure cursor over the sync-point positions.
    pub fn score_cursor(&self) -> ScoreCursor {
        let measures = if self.bar_lines.len() > 1 {
            self.bar_lines.clone()
        } else {
            Vec::new()
        };
        ScoreCursor::new(self.alignment.pixel_positions(), measures)
    }

    /// Frame counts for every segment, as consumed by a video writer.
    pub fn schedule(&self) -> Result<Schedule, SyncError> {
        let mut time_code = self.time_code()?;
        let estimated_frames = time_code.estimate_frames().round() as u64;
        let mut segments = Vec::new();
        while !time_code.at_end() {
            let (Some(start_tick), Some(end_tick)) = (time_code.current_tick(), time_code.next_tick())
            else {
                break;
            };
            let start_seconds = time_code.current_offset();
            let frames = time_code.frames_for_segment();
            segments.push(Segment {
                start_tick,
                end_tick,
                start_seconds,
                frames,
            });
            time_code.go_to_next_segment();
        }

        Ok(Schedule {
            fps: self.fps,
            resolution: self.performance.resolution,
            tempo: self.performance.tempo.changes().to_vec(),
            sync_points: self.alignment.sync_points.clone(),
            segments,
            total_frames: time_code.frames_emitted(),
            estimated_frames,
            warnings: self.alignment.stats.warnings(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start_tick: u64,
    pub end_tick: u64,
    pub start_seconds: f64,
    pub frames: usize,
}

/// Serializable summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub fps: f64,
    pub resolution: u16,
    pub tempo: Vec<TempoChange>,
    pub sync_points: Vec<SyncPoint>,
    pub segments: Vec<Segment>,
    pub total_frames: u64,
    pub estimated_frames: u64,
    pub warnings: usize,
}
