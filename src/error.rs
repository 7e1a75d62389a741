//! # Error Types
//!
//! This module defines the error type shared by every stage of the pipeline.
//!
//! Failures fall into two tiers (a third tier, warnings, never becomes an
//! error: it is logged and counted in [`crate::align::AlignmentStats`]):
//!
//! - **Fatal** - an expected but unrecoverable condition of the inputs, such as
//!   a score with an unterminated string or a performance that shares too few
//!   instants with the score.
//! - **Bug** - an internal invariant was violated. The positional trace and the
//!   MIDI layout are produced by our own instrumentation, so a mismatch means
//!   a defect or version skew between collaborators.
//!
//! ## Usage
//! ```rust
//! use lysync::{Severity, SyncError};
//!
//! let err = SyncError::NotEnoughSyncPoints { found: 1 };
//! assert_eq!(err.severity(), Severity::Fatal);
//! assert_eq!(err.severity().exit_code(), 1);
//! ```

use thiserror::Error;

/// Which tier an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Bug,
}

impl Severity {
    /// Process exit status used by the driver for this tier.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Fatal => 1,
            Severity::Bug => 70,
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// A string or comment in the score text never closes.
    ///
    /// # Example
    /// ```
    /// # use lysync::SyncError;
    /// let err = SyncError::Unterminated {
    ///     construct: "block comment",
    ///     line: 3,
    ///     column: 7,
    /// };
    /// assert_eq!(err.to_string(), "Unterminated block comment starting at line 3, column 7");
    /// ```
    #[error("Unterminated {construct} starting at line {line}, column {column}")]
    Unterminated {
        construct: &'static str,
        line: usize,
        column: usize,
    },

    /// A line of the positional trace does not follow the trace grammar.
    #[error("Failed to parse trace line:\n{line}")]
    MalformedTrace { line: String },

    /// The trace contained no anchors at all.
    #[error("Didn't find any notes in the positional trace")]
    EmptyTrace,

    /// The score location of an anchor could not be resolved.
    #[error("No note found at {location}")]
    MissingSourceToken { location: String },

    /// The MIDI container could not be decoded.
    #[error("Invalid MIDI file: {0}")]
    Midi(String),

    /// The MIDI file uses SMPTE timecode instead of ticks per quarter note.
    #[error("MIDI file uses timecode timing; only metrical timing is supported")]
    UnsupportedTiming,

    /// A pitch bend was not followed by a note-on in the same tick.
    #[error("Orphaned pitch bend in tick {tick} on track {track}")]
    OrphanedPitchBend { track: usize, tick: u64 },

    /// A pitch bend was immediately followed by a note-off.
    #[error("Pitch bend in tick {tick} on track {track} was followed by a note-off")]
    PitchBendBeforeNoteOff { track: usize, tick: u64 },

    /// A tick without notes was found before the end of the tick list.
    #[error("No notes in tick {tick} ({index}/{len})")]
    EmptyTick { tick: u64, index: usize, len: usize },

    /// A `q` anchor appeared before any multi-note match was recorded.
    #[error("Encountered a repeated chord at {location} but no previous chord was saved")]
    NoPreviousChord { location: String },

    /// Too many ticks in a row were dropped for lack of a matching anchor.
    #[error("Dropped {skipped} consecutive MIDI ticks (limit {limit}) at tick {tick}; score and performance are out of sync")]
    TooManySkips {
        skipped: usize,
        limit: usize,
        tick: u64,
    },

    /// Alignment produced fewer than two sync points.
    #[error("Not enough synchronization points found ({found})")]
    NotEnoughSyncPoints { found: usize },

    /// The run configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn severity(&self) -> Severity {
        match self {
            SyncError::MalformedTrace { .. }
            | SyncError::EmptyTrace
            | SyncError::MissingSourceToken { .. }
            | SyncError::OrphanedPitchBend { .. }
            | SyncError::PitchBendBeforeNoteOff { .. }
            | SyncError::EmptyTick { .. }
            | SyncError::NoPreviousChord { .. }
            | SyncError::TooManySkips { .. } => Severity::Bug,
            SyncError::Unterminated { .. }
            | SyncError::Midi(_)
            | SyncError::UnsupportedTiming
            | SyncError::NotEnoughSyncPoints { .. }
            | SyncError::Config(_)
            | SyncError::Io(_) => Severity::Fatal,
        }
    }

    /// Full user-facing report. Bugs get a hint about where the defect lies.
    pub fn report(&self) -> String {
        match self.severity() {
            Severity::Fatal => format!("ERROR: {}", self),
            Severity::Bug => format!(
                "ERROR: {}\n\nThis is an internal error. The positional trace and MIDI layout \
                 are generated by our own instrumentation, so the renderer and this tool are \
                 probably out of step. Aborted execution.",
                self
            ),
        }
    }
}

impl From<midly::Error> for SyncError {
    fn from(err: midly::Error) -> Self {
        SyncError::Midi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        assert_eq!(SyncError::EmptyTrace.severity(), Severity::Bug);
        assert_eq!(
            SyncError::TooManySkips { skipped: 11, limit: 10, tick: 384 }.severity(),
            Severity::Bug
        );
        assert_eq!(
            SyncError::NotEnoughSyncPoints { found: 0 }.severity(),
            Severity::Fatal
        );
        assert_ne!(Severity::Fatal.exit_code(), Severity::Bug.exit_code());
    }

    #[test]
    fn test_bug_report_mentions_internal_error() {
        let report = SyncError::MalformedTrace { line: "ly2video: junk".to_string() }.report();
        assert!(report.starts_with("ERROR: Failed to parse trace line"));
        assert!(report.contains("internal error"));

        let report = SyncError::NotEnoughSyncPoints { found: 1 }.report();
        assert!(!report.contains("internal error"));
    }
}
