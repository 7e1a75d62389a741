//! # Frame Scheduling
//!
//! [`TimeCode`] walks the aligned tick sequence one segment (pair of adjacent
//! ticks) at a time and decides how many video frames each segment gets.
//!
//! The frame budget of a segment is derived from absolute time:
//!
//! ```text
//! ideal   += seconds(current, next)
//! frames   = round(ideal * fps) - emitted
//! emitted += frames
//! ```
//!
//! so rounding never accumulates: after every segment the number of frames
//! produced is within half a frame of the ideal elapsed time.
//!
//! Media consumers ([`Media`]) are notified at each segment start with the
//! segment index and offsets in seconds, and render each frame from the
//! `(frame, frames_in_segment)` ratio.

use crate::align::Alignment;
use crate::error::SyncError;
use crate::tempo::TempoMap;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Ready,
    Advancing,
    AtEnd,
}

/// What a media consumer draws for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorFrame {
    /// Cursor position in pixels.
    pub x: i64,
    /// Left and right edge of the measure containing the cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_span: Option<(i64, i64)>,
    /// Offset (seconds) naming the slide shown with this frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_offset: Option<f64>,
}

/// A visual consumer driven by the scheduler.
pub trait Media {
    /// Called when segment `segment` becomes current, with its start and end
    /// in seconds from the beginning of the performance.
    fn on_segment(&mut self, segment: usize, current_offset: f64, next_offset: f64);

    /// Render frame `frame` of the `among` frames of the current segment.
    fn render(&self, frame: usize, among: usize) -> CursorFrame;
}

/// One frame request handed to [`TimeCode::for_each_frame`] callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSlot {
    /// Index in the whole video.
    pub number: u64,
    pub segment: usize,
    pub frame: usize,
    pub among: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedFrame {
    pub slot: FrameSlot,
    pub layers: Vec<CursorFrame>,
}

pub struct TimeCode {
    ticks: Vec<u64>,
    tempo: TempoMap,
    fps: f64,
    current_index: usize,
    tempo_index: usize,
    ideal_seconds: f64,
    frames_emitted: u64,
    /// Frames already granted to the current segment.
    scheduled: Option<usize>,
    state: SchedulerState,
    media: Vec<Box<dyn Media>>,
}

impl TimeCode {
    /// Scheduler over `ticks` (ascending). Fewer than two ticks leave it
    /// [`SchedulerState::AtEnd`] from the start.
    pub fn new(ticks: Vec<u64>, tempo: TempoMap, fps: f64) -> Result<Self, SyncError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(SyncError::Config(format!("fps must be positive, got {}", fps)));
        }
        let state = if ticks.len() < 2 {
            SchedulerState::AtEnd
        } else {
            SchedulerState::Ready
        };
        let tempo_index = ticks.first().map_or(0, |&tick| tempo.index_at(tick));
        let time_code = TimeCode {
            ticks,
            tempo,
            fps,
            current_index: 0,
            tempo_index,
            ideal_seconds: 0.0,
            frames_emitted: 0,
            scheduled: None,
            state,
            media: Vec::new(),
        };
        if let Some(&last) = time_code.ticks.last() {
            debug!("first tempo is {:.3} bpm", time_code.current_bpm());
            debug!("final MIDI tick is {}", last);
        }
        info!(
            "SYNC: approx. {} frames at {:.3} frames/sec",
            time_code.estimate_frames().round(),
            fps
        );
        Ok(time_code)
    }

    /// Scheduler over the matched ticks of an alignment plus the horizon.
    pub fn from_alignment(alignment: &Alignment, tempo: TempoMap, fps: f64) -> Result<Self, SyncError> {
        Self::new(alignment.tick_sequence(), tempo, fps)
    }

    /// Register a media consumer. It is immediately told about the current
    /// segment.
    pub fn register(&mut self, mut media: Box<dyn Media>) {
        if self.state != SchedulerState::AtEnd {
            media.on_segment(self.current_index, self.current_offset(), self.next_offset());
        }
        self.media.push(media);
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn at_end(&self) -> bool {
        self.state == SchedulerState::AtEnd
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn ticks(&self) -> &[u64] {
        &self.ticks
    }

    pub fn segment_index(&self) -> usize {
        self.current_index
    }

    pub fn current_tick(&self) -> Option<u64> {
        self.ticks.get(self.current_index).copied()
    }

    pub fn next_tick(&self) -> Option<u64> {
        self.ticks.get(self.current_index + 1).copied()
    }

    /// Start of the current segment, in seconds from tick 0.
    pub fn current_offset(&self) -> f64 {
        self.current_tick()
            .map_or(0.0, |tick| self.tempo.seconds_at(tick))
    }

    /// End of the current segment, in seconds from tick 0.
    pub fn next_offset(&self) -> f64 {
        self.next_tick()
            .map_or_else(|| self.current_offset(), |tick| self.tempo.seconds_at(tick))
    }

    pub fn current_bpm(&self) -> f64 {
        self.tempo.changes()[self.tempo_index].beats_per_minute
    }

    pub fn ideal_seconds(&self) -> f64 {
        self.ideal_seconds
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn seconds_elapsed(&self, start: u64, end: u64) -> f64 {
        self.tempo.seconds_between(start, end)
    }

    /// Frames for the current segment; 0 at the end. Repeated calls within
    /// one segment return the same count without advancing the clock.
    pub fn frames_for_segment(&mut self) -> usize {
        let (Some(current), Some(next)) = (self.current_tick(), self.next_tick()) else {
            return 0;
        };
        if self.at_end() {
            return 0;
        }
        if let Some(frames) = self.scheduled {
            return frames;
        }
        let segment_seconds = self.seconds_elapsed(current, next);
        self.ideal_seconds += segment_seconds;
        let target = (self.ideal_seconds * self.fps).round() as u64;
        let frames = target.saturating_sub(self.frames_emitted);
        debug!(
            "    ticks {} -> {}: {:.6} secs, ideal total {:.6} secs, {} frames",
            current, next, segment_seconds, self.ideal_seconds, frames
        );
        self.frames_emitted += frames;
        let frames = frames as usize;
        self.scheduled = Some(frames);
        frames
    }

    /// Move to the next segment and notify media. No-op at the end.
    pub fn go_to_next_segment(&mut self) {
        if self.at_end() {
            return;
        }
        self.current_index += 1;
        self.scheduled = None;
        if self.ticks.len() - self.current_index < 2 {
            self.state = SchedulerState::AtEnd;
            return;
        }
        self.state = SchedulerState::Advancing;
        if let Some(tick) = self.current_tick() {
            self.tempo_index = self.tempo.index_at(tick);
        }
        debug!(
            "ticks: {:?} -> {:?}",
            self.current_tick(),
            self.next_tick()
        );

        let segment = self.current_index;
        let (current, next) = (self.current_offset(), self.next_offset());
        for media in &mut self.media {
            media.on_segment(segment, current, next);
        }
    }

    /// Rough frame count from the final tick at the initial tempo.
    pub fn estimate_frames(&self) -> f64 {
        let Some(&last) = self.ticks.last() else {
            return 0.0;
        };
        let bpm = self.tempo.changes()[0].beats_per_minute;
        self.tempo.ticks_to_seconds(last, bpm) * self.fps
    }

    /// Drive every segment to the end, calling `render` once per frame in
    /// ascending order with the registered media.
    pub fn for_each_frame<F>(&mut self, mut render: F)
    where
        F: FnMut(FrameSlot, &[Box<dyn Media>]),
    {
        let mut number = 0u64;
        while !self.at_end() {
            let segment = self.current_index;
            let among = self.frames_for_segment();
            for frame in 0..among {
                render(
                    FrameSlot {
                        number,
                        segment,
                        frame,
                        among,
                    },
                    &self.media,
                );
                number += 1;
            }
            self.go_to_next_segment();
        }
    }

    /// Render every frame of every registered medium.
    pub fn render_all(&mut self) -> Vec<RenderedFrame> {
        let mut frames = Vec::new();
        self.for_each_frame(|slot, media| {
            let layers = media
                .iter()
                .map(|m| m.render(slot.frame, slot.among))
                .collect();
            frames.push(RenderedFrame { slot, layers });
        });
        frames
    }

    /// Frame counts of all remaining segments, without rendering.
    pub fn schedule(&mut self) -> Vec<usize> {
        let mut counts = Vec::new();
        while !self.at_end() {
            counts.push(self.frames_for_segment());
            self.go_to_next_segment();
        }
        counts
    }
}

/// Interpolate from `start` by `travel * frame / among`, rounded.
fn interpolate(start: f64, travel: f64, frame: usize, among: usize) -> f64 {
    if among == 0 {
        return start;
    }
    start + (frame as f64 * travel / among as f64).round()
}

/// Note cursor over the score, moving between successive sync-point pixel
/// positions, with an optional measure cursor from bar line positions.
#[derive(Debug, Clone)]
pub struct ScoreCursor {
    notes_x: Vec<i64>,
    measures_x: Vec<i64>,
    note_index: usize,
    measure_index: usize,
}

impl ScoreCursor {
    pub fn new(mut notes_x: Vec<i64>, measures_x: Vec<i64>) -> Self {
        // the last position is held through the final segment
        if let Some(&last) = notes_x.last() {
            notes_x.push(last);
        }
        ScoreCursor {
            notes_x,
            measures_x,
            note_index: 0,
            measure_index: 0,
        }
    }

    pub fn current_x(&self) -> i64 {
        self.notes_x.get(self.note_index).copied().unwrap_or(0)
    }

    fn travel_to_next(&self) -> i64 {
        let index = self.note_index;
        match (self.notes_x.get(index), self.notes_x.get(index + 1)) {
            (Some(&here), Some(&next)) => next - here,
            _ => 0,
        }
    }
}

impl Media for ScoreCursor {
    fn on_segment(&mut self, segment: usize, _current_offset: f64, _next_offset: f64) {
        self.note_index = segment;
        let x = self.current_x();
        self.measure_index = self
            .measures_x
            .windows(2)
            .position(|span| x <= span[1])
            .unwrap_or(self.measures_x.len().saturating_sub(1));
    }

    fn render(&self, frame: usize, among: usize) -> CursorFrame {
        let x = interpolate(
            self.current_x() as f64,
            self.travel_to_next() as f64,
            frame,
            among,
        ) as i64;
        let measure_span = match (
            self.measures_x.get(self.measure_index),
            self.measures_x.get(self.measure_index + 1),
        ) {
            (Some(&start), Some(&end)) => Some((start, end)),
            _ => None,
        };
        CursorFrame {
            x,
            measure_span,
            slide_offset: None,
        }
    }
}

/// A cursor sweeping linearly over an auxiliary slide, from `start_x` at
/// offset 0 to `end_x` at `last_offset` seconds.
#[derive(Debug, Clone)]
pub struct SlideCursor {
    start_x: f64,
    scale: f64,
    start_offset: f64,
    end_offset: f64,
}

impl SlideCursor {
    pub fn new(start_x: i64, end_x: i64, last_offset: f64) -> Self {
        let scale = if last_offset > 0.0 {
            (end_x - start_x) as f64 / last_offset
        } else {
            0.0
        };
        SlideCursor {
            start_x: start_x as f64,
            scale,
            start_offset: 0.0,
            end_offset: 0.0,
        }
    }
}

impl Media for SlideCursor {
    fn on_segment(&mut self, _segment: usize, current_offset: f64, next_offset: f64) {
        self.start_offset = current_offset;
        self.end_offset = next_offset;
    }

    fn render(&self, frame: usize, among: usize) -> CursorFrame {
        let start = self.start_offset * self.scale;
        let end = self.end_offset * self.scale;
        let x = interpolate(start, end - start, frame, among) + self.start_x;
        CursorFrame {
            x: x as i64,
            measure_span: None,
            slide_offset: Some(self.start_offset),
        }
    }
}
