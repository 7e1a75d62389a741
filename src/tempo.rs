//! Tempo timeline and tick-to-seconds integration.

use log::warn;
use serde::Serialize;

/// Tempo used when a performance does not state one at tick 0.
pub const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoChange {
    pub tick: u64,
    pub beats_per_minute: f64,
}

impl TempoChange {
    pub fn new(tick: u64, beats_per_minute: f64) -> Self {
        TempoChange {
            tick,
            beats_per_minute,
        }
    }

    /// From a MIDI set-tempo value in microseconds per quarter note.
    pub fn from_micros_per_quarter(tick: u64, micros: u32) -> Self {
        TempoChange::new(tick, 60_000_000.0 / f64::from(micros))
    }
}

/// An ordered tempo timeline that always starts at tick 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoMap {
    resolution: u16,
    changes: Vec<TempoChange>,
}

impl TempoMap {
    /// Build a timeline from tempo changes in any order. Changes with a
    /// non-positive tempo are ignored; if no change applies at tick 0,
    /// [`DEFAULT_BPM`] is assumed until the first one.
    pub fn new(resolution: u16, changes: impl IntoIterator<Item = TempoChange>) -> Self {
        let mut changes: Vec<TempoChange> = changes
            .into_iter()
            .filter(|change| {
                let valid = change.beats_per_minute.is_finite() && change.beats_per_minute > 0.0;
                if !valid {
                    warn!(
                        "Ignoring invalid tempo {} bpm at tick {}",
                        change.beats_per_minute, change.tick
                    );
                }
                valid
            })
            .collect();
        // stable: of two changes on one tick the later one wins
        changes.sort_by_key(|change| change.tick);
        changes.dedup_by(|later, earlier| {
            if later.tick == earlier.tick {
                *earlier = *later;
                true
            } else {
                false
            }
        });

        if changes.first().map_or(true, |first| first.tick > 0) {
            warn!("No tempo set at tick 0; assuming {} bpm", DEFAULT_BPM);
            changes.insert(0, TempoChange::new(0, DEFAULT_BPM));
        }

        TempoMap {
            resolution: resolution.max(1),
            changes,
        }
    }

    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    /// Index of the tempo change in effect at `tick`.
    pub fn index_at(&self, tick: u64) -> usize {
        self.changes
            .partition_point(|change| change.tick <= tick)
            .saturating_sub(1)
    }

    pub fn bpm_at(&self, tick: u64) -> f64 {
        self.changes[self.index_at(tick)].beats_per_minute
    }

    /// Seconds for `ticks` ticks at a constant tempo.
    pub fn ticks_to_seconds(&self, ticks: u64, beats_per_minute: f64) -> f64 {
        ticks as f64 / f64::from(self.resolution) * 60.0 / beats_per_minute
    }

    /// Wall-clock seconds between two ticks, integrating piecewise over every
    /// tempo change strictly inside the interval. Returns 0 if `end <= start`.
    pub fn seconds_between(&self, start: u64, end: u64) -> f64 {
        if end <= start {
            return 0.0;
        }
        let mut index = self.index_at(start);
        let mut last_tick = start;
        let mut seconds = 0.0;

        while let Some(next) = self.changes.get(index + 1) {
            if next.tick >= end {
                break;
            }
            let bpm = self.changes[index].beats_per_minute;
            seconds += self.ticks_to_seconds(next.tick - last_tick, bpm);
            last_tick = next.tick;
            index += 1;
        }
        seconds + self.ticks_to_seconds(end - last_tick, self.changes[index].beats_per_minute)
    }

    /// Seconds from the start of the performance.
    pub fn seconds_at(&self, tick: u64) -> f64 {
        self.seconds_between(0, tick)
    }
}
