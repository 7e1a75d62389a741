pub mod align;
pub mod api;
pub mod config;
pub mod error;
pub mod lexer;
pub mod midi;
pub mod pitch;
pub mod rational;
pub mod tempo;
pub mod timecode;
pub mod trace;

pub use align::{Alignment, AlignmentEngine, AlignmentStats, SyncPoint};
pub use api::*;
pub use config::SyncConfig;
pub use error::*;
pub use lexer::{Lexer, LocatedToken, Mode, Token};
pub use midi::{MidiTick, Performance};
pub use pitch::{read_pitch, Language, Pitch};
pub use rational::Rational;
pub use tempo::{TempoChange, TempoMap};
pub use timecode::{CursorFrame, Media, SchedulerState, ScoreCursor, SlideCursor, TimeCode};
pub use trace::{AnchorExtractor, AnchorPitch, PixelScale, ScoreSources, SourceLocation, VisualAnchor};

/// Tokenize LilyPond score text in the default pitch language.
pub fn tokenize(source: &str) -> Result<Vec<LocatedToken<'_>>, SyncError> {
    Lexer::new(source).tokenize()
}
