//! # Anchor Extraction
//!
//! The score renderer is instrumented to print one line per visible note head
//! or chord name:
//!
//! ```text
//! ly2video: (  3.4000000000000004,   4.7187500000000000) pitch 0:2:1/2 @    0.7500000000000000 from score.ly:  4:10
//! ```
//!
//! i.e. the horizontal extent in staff spaces, the pitch as
//! `OCTAVE:STEP:ALTERATION` (step and alteration are `?` for grobs without a
//! pitch), the score moment and the `file:line:char` location of the event.
//! Bar lines are printed as `ly2videoBar: (left, right) @ moment`.
//!
//! [`AnchorExtractor`] reduces those lines to one [`VisualAnchor`] per moment
//! (the leftmost grob) in ascending moment order.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lexer::{Lexer, Token};
use crate::pitch::{Language, Pitch};
use crate::rational::{self, Rational};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

pub const TRACE_PREFIX: &str = "ly2video: ";
pub const BAR_PREFIX: &str = "ly2videoBar: ";

/// TeX points per inch.
pub const POINTS_PER_INCH: f64 = 72.27;

const ANCHOR_PATTERN: &str = concat!(
    r"^ly2video:\s+",
    r"\(\s*(-?\d+\.\d+),\s*(-?\d+\.\d+)\s*\)",
    r"\s+pitch\s+(-?\d+):(\d+|\?):(-?\d+(?:/\d+)?|\?)",
    r"\s+@\s+(-?\d+\.\d+)",
    r"\s+from\s+(.+): *(\d+):(\d+)\r?$",
);

const BAR_PATTERN: &str = concat!(
    r"^ly2videoBar:\s+",
    r"\(\s*(-?\d+\.\d+),\s*(-?\d+\.\d+)\s*\)",
    r"\s+@\s+(-?\d+\.\d+)\r?$",
);

static ANCHOR_REGEX: OnceLock<Regex> = OnceLock::new();
static BAR_REGEX: OnceLock<Regex> = OnceLock::new();

fn anchor_regex() -> &'static Regex {
    ANCHOR_REGEX.get_or_init(|| Regex::new(ANCHOR_PATTERN).expect("invalid regex pattern"))
}

fn bar_regex() -> &'static Regex {
    BAR_REGEX.get_or_init(|| Regex::new(BAR_PATTERN).expect("invalid regex pattern"))
}

/// Where an event was written in the score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 0-based character index within the line.
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The pitch an anchor stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnchorPitch {
    Pitch(Pitch),
    /// Written as `q`; resolved against the previous chord during alignment.
    RepeatedChord,
    /// Rest-like or chord-name glyphs carry no comparable pitch.
    Unknown,
}

impl fmt::Display for AnchorPitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorPitch::Pitch(p) => write!(f, "{}", p),
            AnchorPitch::RepeatedChord => f.write_str("q"),
            AnchorPitch::Unknown => f.write_str("?"),
        }
    }
}

/// The leftmost notated object at one score moment.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualAnchor {
    pub moment: Rational,
    pub pixel_x: i64,
    pub pitch: AnchorPitch,
    pub location: SourceLocation,
}

/// Converts staff-space extents into pixel positions on the rendered page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub dpi: u32,
    pub staff_size: f64,
    pub left_margin_px: i64,
}

impl PixelScale {
    pub fn from_config(config: &SyncConfig) -> Self {
        PixelScale {
            dpi: config.dpi,
            staff_size: config.global_staff_size,
            left_margin_px: config.left_margin_px,
        }
    }

    /// A staff space is a quarter of the staff size (in TeX points).
    pub fn staff_spaces_to_pixels(&self, staff_spaces: f64) -> f64 {
        let points = staff_spaces * self.staff_size / 4.0;
        points / POINTS_PER_INCH * f64::from(self.dpi)
    }

    /// Pixel position of the centre of an extent, including the page margin.
    pub fn pixel_x(&self, left: f64, right: f64) -> i64 {
        let centre = (left + right) / 2.0;
        self.staff_spaces_to_pixels(centre).round() as i64 + self.left_margin_px
    }
}

/// A note-name token found in score text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceNote {
    Pitch(Pitch),
    RepeatedChord,
}

/// The note-name tokens of one score file, keyed by position.
#[derive(Debug, Clone, Default)]
pub struct ScoreSource {
    notes: HashMap<(usize, usize), SourceNote>,
    line_count: usize,
    relative: bool,
}

impl ScoreSource {
    /// Lex score text from the start, tracking language changes, and record
    /// every pitch and `q` token.
    pub fn parse(text: &str, language: Language) -> Result<Self, SyncError> {
        let mut notes = HashMap::new();
        let mut relative = false;
        for token in Lexer::with_language(text, language) {
            let token = token?;
            let note = match token.token {
                Token::Pitch(pitch) => SourceNote::Pitch(pitch),
                Token::RepeatedChord => SourceNote::RepeatedChord,
                Token::Command if token.text == "\\relative" => {
                    relative = true;
                    continue;
                }
                _ => continue,
            };
            // Locations in the trace count characters from 0.
            notes.insert((token.line, token.column - 1), note);
        }
        Ok(ScoreSource {
            notes,
            line_count: text.lines().count().max(1),
            relative,
        })
    }

    /// Note token starting at a trace location (1-based line, 0-based column).
    pub fn note_at(&self, line: usize, column: usize) -> Option<SourceNote> {
        self.notes.get(&(line, column)).copied()
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// True if the text uses `\relative`, whose octaves are not resolved here.
    pub fn uses_relative(&self) -> bool {
        self.relative
    }
}

/// Score files named in the trace, keyed by the name the trace uses.
#[derive(Debug, Clone, Default)]
pub struct ScoreSources {
    files: HashMap<String, ScoreSource>,
}

impl ScoreSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: impl Into<String>, text: &str, language: Language) -> Result<(), SyncError> {
        let source = ScoreSource::parse(text, language)?;
        self.files.insert(file.into(), source);
        Ok(())
    }

    pub fn get(&self, file: &str) -> Option<&ScoreSource> {
        self.files.get(file)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parses the positional trace into visual anchors.
pub struct AnchorExtractor<'s> {
    scale: PixelScale,
    sources: Option<&'s ScoreSources>,
}

impl<'s> AnchorExtractor<'s> {
    pub fn new(scale: PixelScale) -> Self {
        AnchorExtractor {
            scale,
            sources: None,
        }
    }

    /// Consult score text to flag `q` anchors and fill in missing pitches.
    pub fn with_sources(mut self, sources: &'s ScoreSources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Extract the leftmost anchor of every moment, ordered by moment.
    pub fn extract(&self, trace: &str) -> Result<Vec<VisualAnchor>, SyncError> {
        let mut leftmost: BTreeMap<Rational, VisualAnchor> = BTreeMap::new();
        let mut current_file: Option<String> = None;

        for line in trace.lines() {
            if !line.starts_with(TRACE_PREFIX) {
                continue;
            }
            // The dumper may embed comments for debugging.
            if line[TRACE_PREFIX.len()..].trim_start().starts_with('#') {
                continue;
            }

            let anchor = self.parse_line(line)?;
            if current_file.as_deref() != Some(anchor.location.file.as_str()) {
                debug!("Current score source file: {}", anchor.location.file);
                current_file = Some(anchor.location.file.clone());
            }

            let replace = leftmost
                .get(&anchor.moment)
                .map_or(true, |existing| anchor.pixel_x < existing.pixel_x);
            if replace {
                debug!(
                    "leftmost grob ({}) for moment {} is now x = {} @ {}",
                    anchor.pitch, anchor.moment, anchor.pixel_x, anchor.location
                );
                leftmost.insert(anchor.moment, anchor);
            }
        }

        if leftmost.is_empty() {
            return Err(SyncError::EmptyTrace);
        }
        Ok(leftmost.into_values().collect())
    }

    /// Sorted, de-duplicated bar line positions, starting with the left margin.
    pub fn extract_bar_lines(&self, trace: &str) -> Result<Vec<i64>, SyncError> {
        let mut positions = vec![self.scale.left_margin_px];
        for line in trace.lines() {
            if !line.starts_with(BAR_PREFIX) {
                continue;
            }
            let caps = bar_regex().captures(line).ok_or_else(|| malformed(line))?;
            let left = parse_float(&caps[1], line)?;
            let right = parse_float(&caps[2], line)?;
            let x = self.scale.pixel_x(left, right);
            if !positions.contains(&x) {
                positions.push(x);
            }
        }
        positions.sort_unstable();
        Ok(positions)
    }

    fn parse_line(&self, line: &str) -> Result<VisualAnchor, SyncError> {
        let caps = anchor_regex().captures(line).ok_or_else(|| malformed(line))?;

        let left = parse_float(&caps[1], line)?;
        let right = parse_float(&caps[2], line)?;
        let octave: i32 = caps[3].parse().map_err(|_| malformed(line))?;
        let traced_pitch = match (&caps[4], &caps[5]) {
            ("?", _) | (_, "?") => None,
            (step, alteration) => {
                let step: u8 = step.parse().map_err(|_| malformed(line))?;
                let alteration =
                    rational::parse_rational(alteration).ok_or_else(|| malformed(line))?;
                if step > 6 {
                    return Err(malformed(line));
                }
                Some(Pitch::new(step, alteration, octave))
            }
        };
        let moment = rational::parse_rational(&caps[6]).ok_or_else(|| malformed(line))?;
        let location = SourceLocation {
            file: caps[7].to_string(),
            line: caps[8].parse().map_err(|_| malformed(line))?,
            column: caps[9].parse().map_err(|_| malformed(line))?,
        };

        let pitch = self.resolve_pitch(traced_pitch, &location)?;
        Ok(VisualAnchor {
            moment,
            pixel_x: self.scale.pixel_x(left, right),
            pitch,
            location,
        })
    }

    fn resolve_pitch(
        &self,
        traced: Option<Pitch>,
        location: &SourceLocation,
    ) -> Result<AnchorPitch, SyncError> {
        let source = self.sources.and_then(|sources| sources.get(&location.file));
        let Some(source) = source else {
            return Ok(traced.map_or(AnchorPitch::Unknown, AnchorPitch::Pitch));
        };

        if location.line == 0 || location.line > source.line_count() {
            return Err(SyncError::MissingSourceToken {
                location: location.to_string(),
            });
        }

        match (source.note_at(location.line, location.column), traced) {
            (Some(SourceNote::RepeatedChord), _) => Ok(AnchorPitch::RepeatedChord),
            (_, Some(pitch)) => Ok(AnchorPitch::Pitch(pitch)),
            (Some(SourceNote::Pitch(pitch)), None) => {
                if source.uses_relative() {
                    warn!(
                        "Pitch at {} read from relative-mode source; its octave may be wrong",
                        location
                    );
                }
                Ok(AnchorPitch::Pitch(pitch))
            }
            (None, None) => Ok(AnchorPitch::Unknown),
        }
    }
}

/// Distinct score files named by the anchor lines of a trace, in order of
/// first appearance. Malformed lines are ignored here.
pub fn source_files(trace: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in trace.lines().filter(|line| line.starts_with(TRACE_PREFIX)) {
        if let Some(caps) = anchor_regex().captures(line) {
            if !files.iter().any(|file| file == &caps[7]) {
                files.push(caps[7].to_string());
            }
        }
    }
    files
}

fn malformed(line: &str) -> SyncError {
    SyncError::MalformedTrace {
        line: line.to_string(),
    }
}

fn parse_float(text: &str, line: &str) -> Result<f64, SyncError> {
    text.parse().map_err(|_| malformed(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scale() -> PixelScale {
        PixelScale {
            dpi: 110,
            staff_size: 20.0,
            left_margin_px: 50,
        }
    }

    fn trace_line(left: f64, right: f64, pitch: &str, moment: &str, line: usize, col: usize) -> String {
        format!(
            "ly2video: ({:23.16}, {:23.16}) pitch {} @ {:>23} from score.ly:{:3}:{}",
            left, right, pitch, moment, line, col
        )
    }

    #[test]
    fn test_staff_spaces_to_pixels() {
        // 4 staff spaces = 20pt at 72.27pt/in and 110dpi
        let px = scale().staff_spaces_to_pixels(4.0);
        assert!((px - 20.0 / 72.27 * 110.0).abs() < 1e-9);
        assert_eq!(scale().pixel_x(0.0, 0.0), 50);
        assert_eq!(scale().pixel_x(4.0, 4.0), 50 + 30);
    }

    #[test]
    fn test_leftmost_per_moment() {
        let trace = [
            "GNU LilyPond 2.24.0".to_string(),
            trace_line(10.0, 11.0, "0:0:0", "0.0000000000000000", 3, 2),
            trace_line(9.0, 10.0, "0:2:0", "0.0000000000000000", 3, 5),
            "ly2video: # debugging comment".to_string(),
            trace_line(20.0, 21.0, "0:4:1/2", "0.2500000000000000", 3, 9),
        ]
        .join("\n");

        let anchors = AnchorExtractor::new(scale()).extract(&trace).unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].moment, rational::ZERO);
        assert_eq!(anchors[0].pitch, AnchorPitch::Pitch(Pitch::new(2, rational::ZERO, 0)));
        assert_eq!(anchors[0].pixel_x, scale().pixel_x(9.0, 10.0));
        assert_eq!(anchors[1].moment, Rational::new(1, 4));
        assert_eq!(
            anchors[1].pitch,
            AnchorPitch::Pitch(Pitch::new(4, Rational::new(1, 2), 0))
        );
        assert_eq!(
            anchors[1].location,
            SourceLocation { file: "score.ly".to_string(), line: 3, column: 9 }
        );
    }

    #[test]
    fn test_anchors_sorted_by_moment() {
        let trace = [
            trace_line(30.0, 31.0, "0:1:0", "0.5000000000000000", 1, 8),
            trace_line(10.0, 11.0, "0:0:0", "0.0000000000000000", 1, 0),
        ]
        .join("\n");
        let anchors = AnchorExtractor::new(scale()).extract(&trace).unwrap();
        let moments: Vec<_> = anchors.iter().map(|a| a.moment.to_string()).collect();
        assert_eq!(moments, vec!["0", "1/2"]);
    }

    #[test]
    fn test_missing_pitch_is_unknown() {
        let trace = trace_line(1.0, 2.0, "0:?:?", "0.0000000000000000", 1, 0);
        let anchors = AnchorExtractor::new(scale()).extract(&trace).unwrap();
        assert_eq!(anchors[0].pitch, AnchorPitch::Unknown);
    }

    #[test]
    fn test_malformed_line_is_a_bug() {
        let trace = "ly2video: (1.0, 2.0) pitch c @ 0.0 from x.ly:1:0";
        let err = AnchorExtractor::new(scale()).extract(trace).unwrap_err();
        assert!(matches!(err, SyncError::MalformedTrace { .. }));
        assert_eq!(err.severity(), crate::error::Severity::Bug);
    }

    #[test]
    fn test_empty_trace() {
        let err = AnchorExtractor::new(scale()).extract("no anchors here\n").unwrap_err();
        assert!(matches!(err, SyncError::EmptyTrace));
    }

    #[test]
    fn test_source_lookup() {
        let score = "\\version \"2.24.0\"\n{ <c' e'>4 q d'4 }\n";
        let mut sources = ScoreSources::new();
        sources.insert("score.ly", score, Language::Nederlands).unwrap();

        // columns are 0-based: '<' at 2, 'c' at 3, 'q' at 11, 'd' at 13
        let trace = [
            trace_line(1.0, 2.0, "0:0:0", "0.0000000000000000", 2, 3),
            trace_line(5.0, 6.0, "0:0:0", "0.2500000000000000", 2, 11),
            trace_line(9.0, 10.0, "0:?:?", "0.5000000000000000", 2, 13),
        ]
        .join("\n");
        let anchors = AnchorExtractor::new(scale())
            .with_sources(&sources)
            .extract(&trace)
            .unwrap();
        let pitches: Vec<_> = anchors.iter().map(|a| a.pitch).collect();
        assert_eq!(
            pitches,
            vec![
                AnchorPitch::Pitch(Pitch::new(0, rational::ZERO, 0)),
                AnchorPitch::RepeatedChord,
                AnchorPitch::Pitch(Pitch::new(1, rational::ZERO, 0)),
            ]
        );

        let outside = trace_line(1.0, 2.0, "0:0:0", "1.0000000000000000", 40, 0);
        let err = AnchorExtractor::new(scale())
            .with_sources(&sources)
            .extract(&outside)
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingSourceToken { .. }));
        assert_eq!(source_files(&trace), vec!["score.ly".to_string()]);
    }

    #[test]
    fn test_bar_lines() {
        let trace = [
            "ly2videoBar: (  10.0000000000000000,   10.5000000000000000) @    1.0000000000000000",
            "ly2videoBar: (   4.0000000000000000,    4.0000000000000000) @    0.0000000000000000",
            "ly2videoBar: (  10.0000000000000000,   10.5000000000000000) @    1.0000000000000000",
        ]
        .join("\n");
        let bars = AnchorExtractor::new(scale()).extract_bar_lines(&trace).unwrap();
        assert_eq!(bars, vec![50, scale().pixel_x(4.0, 4.0), scale().pixel_x(10.0, 10.5)]);

        let err = AnchorExtractor::new(scale())
            .extract_bar_lines("ly2videoBar: broken")
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedTrace { .. }));
    }
}
