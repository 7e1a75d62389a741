// Performance extraction - read tempo and note-on timelines from a MIDI file using midly

use crate::error::SyncError;
use crate::pitch::midi_pitch_token;
use crate::tempo::{TempoChange, TempoMap};
use log::{debug, info, warn};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::collections::BTreeMap;

/// Semitones per unit of the centred 14-bit bend value.
const BEND_SCALE: f64 = 4096.0;

/// All note-ons sounding at one tick, as bend-adjusted pitches in
/// ascending order. The horizon sentinel has no notes.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiTick {
    pub tick: u64,
    pub notes: Vec<f64>,
}

impl MidiTick {
    pub fn is_sentinel(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn contains(&self, pitch: f64) -> bool {
        self.notes.iter().any(|&note| note == pitch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Performance {
    /// Ticks per quarter note.
    pub resolution: u16,
    pub tempo: TempoMap,
    /// Ticks carrying note-ons, ascending, followed by the horizon sentinel.
    pub ticks: Vec<MidiTick>,
}

impl Performance {
    /// The end-of-track tick that closes the performance.
    pub fn end_tick(&self) -> u64 {
        self.ticks.last().map_or(0, |tick| tick.tick)
    }

    /// Ticks with notes, without the sentinel.
    pub fn note_ticks(&self) -> &[MidiTick] {
        let len = self.ticks.len().saturating_sub(1);
        &self.ticks[..len]
    }
}

/// Parse a standard MIDI file into a [`Performance`].
pub fn extract_performance(bytes: &[u8]) -> Result<Performance, SyncError> {
    let smf = Smf::parse(bytes)?;
    extract_from_smf(&smf)
}

/// Build a [`Performance`] from an already parsed file.
///
/// Tempo is read from the conductor track (track 0); notes from every other
/// track. Single-track files use track 0 for both.
pub fn extract_from_smf(smf: &Smf) -> Result<Performance, SyncError> {
    let resolution = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(..) => return Err(SyncError::UnsupportedTiming),
    };
    info!("MIDI resolution (ticks per beat) is {}", resolution);

    let conductor = smf.tracks.first().map(Vec::as_slice).unwrap_or(&[]);
    let tempo = TempoMap::new(resolution, read_tempo_changes(conductor));

    let first_note_track = match smf.header.format {
        Format::SingleTrack => 0,
        _ if smf.tracks.len() == 1 => 0,
        _ => 1,
    };

    let mut notes_by_tick: BTreeMap<u64, Vec<f64>> = BTreeMap::new();
    let mut end_of_track = 0u64;
    for (index, track) in smf.tracks.iter().enumerate().skip(first_note_track) {
        debug!("Reading MIDI track {}", index);
        let track_end = read_track_notes(index, track, &mut notes_by_tick)?;
        end_of_track = end_of_track.max(track_end);
    }

    let mut ticks: Vec<MidiTick> = notes_by_tick
        .into_iter()
        .map(|(tick, mut notes)| {
            notes.sort_by(f64::total_cmp);
            MidiTick { tick, notes }
        })
        .collect();

    let last_note = ticks.last().map_or(0, |tick| tick.tick);
    if end_of_track < last_note {
        warn!(
            "End of track at tick {} precedes the last note at tick {}",
            end_of_track, last_note
        );
        end_of_track = last_note;
    }
    ticks.push(MidiTick {
        tick: end_of_track,
        notes: Vec::new(),
    });

    info!(
        "MIDI: {} ticks with notes, {} tempo changes, end of track at tick {}",
        ticks.len() - 1,
        tempo.changes().len(),
        end_of_track
    );
    Ok(Performance {
        resolution,
        tempo,
        ticks,
    })
}

fn read_tempo_changes(track: &[TrackEvent]) -> Vec<TempoChange> {
    let mut tick = 0u64;
    let mut changes = Vec::new();
    for event in track {
        tick += u64::from(event.delta.as_int());
        if let TrackEventKind::Meta(MetaMessage::Tempo(micros)) = event.kind {
            let micros = micros.as_int();
            if micros == 0 {
                warn!("Ignoring zero tempo at tick {}", tick);
                continue;
            }
            let change = TempoChange::from_micros_per_quarter(tick, micros);
            debug!("tick {:6}: tempo change to {:.3} bpm", tick, change.beats_per_minute);
            changes.push(change);
        }
    }
    changes
}

struct PendingBend {
    tick: u64,
    semitones: f64,
}

/// Collect the note-ons of one track. Returns the tick of its last event.
fn read_track_notes(
    track_index: usize,
    track: &[TrackEvent],
    notes_by_tick: &mut BTreeMap<u64, Vec<f64>>,
) -> Result<u64, SyncError> {
    let mut tick = 0u64;
    let mut pending: Option<PendingBend> = None;

    for event in track {
        tick += u64::from(event.delta.as_int());

        if let Some(bend) = &pending {
            let orphaned = SyncError::OrphanedPitchBend {
                track: track_index,
                tick: bend.tick,
            };
            if bend.tick != tick {
                return Err(orphaned);
            }
            match event.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { vel, .. },
                    ..
                } if vel.as_int() > 0 => {}
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. },
                    ..
                } => {
                    return Err(SyncError::PitchBendBeforeNoteOff {
                        track: track_index,
                        tick,
                    })
                }
                _ => return Err(orphaned),
            }
        }

        let TrackEventKind::Midi { message, .. } = event.kind else {
            continue;
        };
        match message {
            MidiMessage::PitchBend { bend } => {
                let value = bend.as_int();
                debug!("    tick {:6}: pitch bend({})", tick, value);
                if value != 0 {
                    pending = Some(PendingBend {
                        tick,
                        semitones: f64::from(value) / BEND_SCALE,
                    });
                }
            }
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                let mut pitch = f64::from(key.as_int());
                if let Some(bend) = pending.take() {
                    pitch += bend.semitones;
                }
                debug!("    tick {:6}: note on {} ({})", tick, pitch, midi_pitch_token(pitch));
                notes_by_tick.entry(tick).or_default().push(pitch);
            }
            _ => {}
        }
    }

    if let Some(bend) = pending {
        return Err(SyncError::OrphanedPitchBend {
            track: track_index,
            tick: bend.tick,
        });
    }
    Ok(tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u14, u15, u24, u28, u4, u7};
    use midly::{Header, PitchBend};
    use pretty_assertions::assert_eq;

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note_on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        )
    }

    fn bend(delta: u32, raw: u16) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::PitchBend {
                    bend: PitchBend(u14::new(raw)),
                },
            },
        )
    }

    fn tempo(delta: u32, micros: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros))))
    }

    fn end(delta: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::EndOfTrack))
    }

    fn parallel_file(tracks: Vec<Vec<TrackEvent<'static>>>) -> Smf<'static> {
        Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::new(384))),
            tracks,
        }
    }

    #[test]
    fn test_ticks_and_sentinel() {
        let smf = parallel_file(vec![
            vec![tempo(0, 1_000_000), end(0)],
            vec![
                note_on(0, 60, 90),
                note_on(0, 64, 90),
                note_on(384, 60, 0),
                note_on(0, 62, 90),
                end(384),
            ],
            vec![note_on(384, 55, 80), end(768)],
        ]);
        let performance = extract_from_smf(&smf).unwrap();
        assert_eq!(performance.resolution, 384);
        assert_eq!(performance.tempo.changes(), &[TempoChange::new(0, 60.0)]);
        assert_eq!(
            performance.ticks,
            vec![
                MidiTick { tick: 0, notes: vec![60.0, 64.0] },
                MidiTick { tick: 384, notes: vec![55.0, 62.0] },
                MidiTick { tick: 1152, notes: vec![] },
            ]
        );
        assert_eq!(performance.end_tick(), 1152);
        assert_eq!(performance.note_ticks().len(), 2);
    }

    #[test]
    fn test_pitch_bend_attaches_to_note() {
        // +4096 from centre is one semitone up
        let smf = parallel_file(vec![
            vec![end(0)],
            vec![bend(0, 0x2000 + 2048), note_on(0, 60, 90), bend(10, 0x2000), end(10)],
        ]);
        let performance = extract_from_smf(&smf).unwrap();
        assert_eq!(performance.ticks[0].notes, vec![60.5]);
        // no tempo given: default prepended
        assert_eq!(performance.tempo.changes()[0].beats_per_minute, 120.0);
    }

    #[test]
    fn test_orphaned_pitch_bend() {
        let smf = parallel_file(vec![vec![end(0)], vec![bend(0, 0x3000), note_on(5, 60, 90), end(0)]]);
        assert!(matches!(
            extract_from_smf(&smf),
            Err(SyncError::OrphanedPitchBend { track: 1, tick: 0 })
        ));

        let smf = parallel_file(vec![vec![end(0)], vec![note_on(0, 60, 90), bend(5, 0x3000)]]);
        assert!(matches!(
            extract_from_smf(&smf),
            Err(SyncError::OrphanedPitchBend { .. })
        ));
    }

    #[test]
    fn test_pitch_bend_before_note_off() {
        let smf = parallel_file(vec![vec![end(0)], vec![bend(0, 0x3000), note_on(0, 60, 0), end(0)]]);
        let err = extract_from_smf(&smf).unwrap_err();
        assert!(matches!(err, SyncError::PitchBendBeforeNoteOff { track: 1, tick: 0 }));
        assert_eq!(err.severity(), crate::error::Severity::Bug);
    }

    #[test]
    fn test_single_track_file() {
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(96))),
            tracks: vec![vec![tempo(0, 500_000), note_on(0, 67, 100), note_on(96, 69, 100), end(96)]],
        };
        let performance = extract_from_smf(&smf).unwrap();
        let ticks: Vec<u64> = performance.ticks.iter().map(|t| t.tick).collect();
        assert_eq!(ticks, vec![0, 96, 192]);
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let smf = parallel_file(vec![vec![tempo(0, 500_000), end(0)], vec![note_on(0, 60, 90), end(384)]]);
        let mut bytes = Vec::new();
        smf.write(&mut bytes).unwrap();
        let performance = extract_performance(&bytes).unwrap();
        assert_eq!(performance.end_tick(), 384);

        assert!(matches!(extract_performance(b"not midi"), Err(SyncError::Midi(_))));
    }

    #[test]
    fn test_timecode_timing_is_rejected() {
        let smf = Smf {
            header: Header::new(Format::Parallel, Timing::Timecode(midly::Fps::Fps25, 40)),
            tracks: vec![],
        };
        assert!(matches!(extract_from_smf(&smf), Err(SyncError::UnsupportedTiming)));
    }
}
