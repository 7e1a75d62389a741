//! # Alignment
//!
//! Merges the visual anchors of the score with the note-on ticks of the
//! performance. Both sequences are walked in time order with the MIDI tick
//! as the common clock; an anchor at moment `m` is expected at tick
//! `round(m * resolution * 4)` (moments count whole notes).
//!
//! - A tick earlier than the current anchor has no visual counterpart
//!   (hidden notes, chord-name voicings): it is dropped from the tick list.
//! - An anchor earlier than the current tick has no MIDI counterpart (tie
//!   continuations, chord names excluded from MIDI): it is skipped.
//! - When both coincide the anchor's pitch must be among the tick's notes.
//!   A mismatch drops the tick, except for the very first candidate, which
//!   is accepted so that video and audio start together.
//!
//! The ticks that survive are exactly those consumed by sync points; the
//! frame scheduler only ever sees this trimmed list.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::midi::MidiTick;
use crate::pitch::midi_pitch_token;
use crate::rational;
use crate::trace::{AnchorPitch, VisualAnchor};
use log::{debug, info, warn};
use serde::Serialize;

/// A validated correspondence between a score position and a MIDI tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPoint {
    pub pixel_x: i64,
    pub tick: u64,
}

/// Warn-tier anomalies met during alignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentStats {
    pub anchors: usize,
    pub original_ticks: usize,
    /// Ticks removed because no anchor matched them.
    pub ticks_dropped: usize,
    /// Anchors without a MIDI counterpart.
    pub anchors_skipped: usize,
    pub pitch_mismatches: usize,
    /// The first sync point was accepted without a pitch match.
    pub unmatched_start: bool,
    /// Ticks left over when the anchors ran out.
    pub unconsumed_ticks: usize,
}

impl AlignmentStats {
    pub fn warnings(&self) -> usize {
        self.ticks_dropped + self.unconsumed_ticks + usize::from(self.unmatched_start)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub sync_points: Vec<SyncPoint>,
    /// The ticks consumed by `sync_points`, in the same order.
    pub ticks: Vec<MidiTick>,
    /// End-of-track tick of the performance.
    pub horizon: u64,
    pub stats: AlignmentStats,
}

impl Alignment {
    /// Matched ticks followed by the horizon, as driven by the scheduler.
    pub fn tick_sequence(&self) -> Vec<u64> {
        let mut sequence: Vec<u64> = self.ticks.iter().map(|tick| tick.tick).collect();
        if sequence.last().map_or(true, |&last| last < self.horizon) {
            sequence.push(self.horizon);
        }
        sequence
    }

    pub fn pixel_positions(&self) -> Vec<i64> {
        self.sync_points.iter().map(|point| point.pixel_x).collect()
    }
}

/// Two-pointer merge of visual anchors and MIDI ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentEngine {
    resolution: u16,
    max_consecutive_skips: usize,
}

impl AlignmentEngine {
    pub fn new(resolution: u16, max_consecutive_skips: usize) -> Self {
        AlignmentEngine {
            resolution,
            max_consecutive_skips,
        }
    }

    pub fn from_config(config: &SyncConfig, resolution: u16) -> Self {
        Self::new(resolution, config.max_consecutive_skips)
    }

    /// Tick at which an anchor's moment sounds.
    pub fn expected_tick(&self, anchor: &VisualAnchor) -> i128 {
        rational::scaled_round(anchor.moment, i128::from(self.resolution) * 4)
    }

    /// Align anchors (ascending moment) with ticks (ascending, ending with
    /// the horizon sentinel). Consumes the working tick list.
    pub fn align(
        &self,
        anchors: &[VisualAnchor],
        ticks: Vec<MidiTick>,
    ) -> Result<Alignment, SyncError> {
        let mut stats = AlignmentStats {
            anchors: anchors.len(),
            original_ticks: ticks.len(),
            ..AlignmentStats::default()
        };
        let horizon = ticks.last().map_or(0, |tick| tick.tick);

        let mut sync_points = Vec::new();
        let mut matched: Vec<MidiTick> = Vec::new();
        let mut last_chord: Option<Vec<f64>> = None;
        let mut consecutive_drops = 0usize;
        let mut t = 0usize;
        let mut a = 0usize;
        let mut reached_horizon = false;

        while a < anchors.len() {
            let Some(tick) = ticks.get(t) else {
                warn!("Ran out of MIDI ticks after {} at anchor {}", t, a);
                break;
            };

            if tick.is_sentinel() {
                if t + 1 < ticks.len() {
                    return Err(SyncError::EmptyTick {
                        tick: tick.tick,
                        index: t + 1,
                        len: ticks.len(),
                    });
                }
                debug!("    no notes in final tick {}", tick.tick);
                reached_horizon = true;
                break;
            }

            let anchor = &anchors[a];
            let expected = self.expected_tick(anchor);
            let pitch = match anchor.pitch {
                AnchorPitch::Pitch(p) => Some(p.absolute_semitone()),
                AnchorPitch::RepeatedChord => match &last_chord {
                    Some(chord) => chord.first().copied(),
                    None => {
                        return Err(SyncError::NoPreviousChord {
                            location: anchor.location.to_string(),
                        })
                    }
                },
                AnchorPitch::Unknown => None,
            };
            debug!(
                "{:<6} @ {} | grob(time={}, x={}, tick={}) | MIDI(tick={})",
                anchor.pitch.to_string(),
                anchor.location,
                anchor.moment,
                anchor.pixel_x,
                expected,
                tick.tick
            );

            let tick_time = i128::from(tick.tick);
            if tick_time < expected {
                self.drop_tick(tick, &mut stats, &mut consecutive_drops)?;
                t += 1;
                continue;
            }
            if expected < tick_time {
                debug!("    No MIDI events for this grob; probably a tie or chord name - skipping grob.");
                stats.anchors_skipped += 1;
                consecutive_drops = 0;
                a += 1;
                continue;
            }

            let matches = pitch.map_or(false, |p| tick.contains(p));
            if !matches {
                stats.pitch_mismatches += 1;
                debug!(
                    "    grob's pitch {} not found in MIDI pitches: {}",
                    anchor.pitch,
                    tick.notes
                        .iter()
                        .map(|&n| format!("{} ({})", n, midi_pitch_token(n)))
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                if sync_points.is_empty() {
                    info!("    Starting by hovering over the first grob");
                    stats.unmatched_start = true;
                } else {
                    self.drop_tick(tick, &mut stats, &mut consecutive_drops)?;
                    t += 1;
                    continue;
                }
            }

            sync_points.push(SyncPoint {
                pixel_x: anchor.pixel_x,
                tick: tick.tick,
            });
            if tick.notes.len() > 1 {
                last_chord = Some(tick.notes.clone());
            }
            matched.push(tick.clone());
            consecutive_drops = 0;
            a += 1;
            t += 1;
        }

        let remaining = ticks.len().saturating_sub(t + 1);
        if !reached_horizon && remaining > 0 {
            stats.unconsumed_ticks = remaining;
            warn!(
                "ran out of notes at MIDI tick {} ({}/{} ticks)",
                ticks.get(t).map_or(horizon, |tick| tick.tick),
                t + 1,
                ticks.len()
            );
        }

        info!(
            "sync points found: {} from {} anchors and {} ticks; ticks skipped: {}",
            sync_points.len(),
            stats.anchors,
            stats.original_ticks,
            stats.ticks_dropped
        );

        if sync_points.len() < 2 {
            return Err(SyncError::NotEnoughSyncPoints {
                found: sync_points.len(),
            });
        }

        Ok(Alignment {
            sync_points,
            ticks: matched,
            horizon,
            stats,
        })
    }

    fn drop_tick(
        &self,
        tick: &MidiTick,
        stats: &mut AlignmentStats,
        consecutive_drops: &mut usize,
    ) -> Result<(), SyncError> {
        stats.ticks_dropped += 1;
        *consecutive_drops += 1;
        warn!(
            "skipping MIDI tick {} since no grob matched; pitches: {:?}",
            tick.tick, tick.notes
        );
        if *consecutive_drops > self.max_consecutive_skips {
            return Err(SyncError::TooManySkips {
                skipped: *consecutive_drops,
                limit: self.max_consecutive_skips,
                tick: tick.tick,
            });
        }
        Ok(())
    }
}
