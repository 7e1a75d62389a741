//! # Pitches and Pitch Languages
//!
//! LilyPond spells note names differently depending on the active input
//! language (`c cis des` in nederlands, `c cs df` in english, `do dod reb` in
//! italiano, ...). This module resolves such spellings into a language
//! independent [`Pitch`] that can be compared with MIDI note numbers.
//!
//! ## Octave convention
//! `octave` follows LilyPond: 0 is the octave of `c'` (middle C, MIDI 60),
//! -1 the octave of an unmarked `c`, and so on.
//!
//! ## Alterations
//! Alterations are fractions of a whole tone: `1/2` is a sharp, `-1/2` a flat,
//! `1/4` a quarter-tone sharp. Semitones are therefore `2 * alteration`.

use crate::rational::{self, Rational};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Semitone offset of each diatonic step from C.
pub const DIATONIC_TO_CHROMATIC: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// MIDI octave offset: `c'` (octave 0) is MIDI 60.
pub const OCTAVE_OFFSET: i32 = 5;

const STEP_NAMES: [&str; 7] = ["c", "d", "e", "f", "g", "a", "b"];

const ALTERATION_SUFFIXES: [&str; 9] = ["eses", "eseh", "es", "eh", "", "ih", "is", "isih", "isis"];

const CHROMATIC_NAMES: [&str; 12] = [
    "c", "c#/db", "d", "d#/eb", "e", "f", "f#/gb", "g", "g#/ab", "a", "a#/bb", "b",
];

/// A notated pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pitch {
    /// Diatonic step, 0..=6 for c..b.
    pub step: u8,
    pub alteration: Rational,
    pub octave: i32,
}

impl Pitch {
    pub fn new(step: u8, alteration: Rational, octave: i32) -> Self {
        Pitch {
            step: step % 7,
            alteration,
            octave,
        }
    }

    /// Absolute pitch in semitones, directly comparable with a MIDI note
    /// number. Quarter tones yield fractional values.
    pub fn absolute_semitone(&self) -> f64 {
        let base = DIATONIC_TO_CHROMATIC[self.step as usize] + 12 * (self.octave + OCTAVE_OFFSET);
        base as f64 + 2.0 * rational::to_f64(self.alteration)
    }

    /// Octave number for a LilyPond octave mark string such as `''` or `,`.
    /// An unmarked note lies in octave -1.
    pub fn octave_from_marks(marks: &str) -> i32 {
        let up = marks.chars().filter(|&c| c == '\'').count() as i32;
        let down = marks.chars().filter(|&c| c == ',').count() as i32;
        up - down - 1
    }
}

/// Writes the pitch as an absolute nederlands token, e.g. `fis''`.
impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STEP_NAMES[self.step as usize])?;
        let q4 = *self.alteration.numer() * 4;
        let den = *self.alteration.denom();
        if q4 % den == 0 && (-4..=4).contains(&(q4 / den)) {
            write!(f, "{}", ALTERATION_SUFFIXES[(q4 / den + 4) as usize])?;
        } else {
            write!(f, "[{}]", self.alteration)?;
        }
        if self.octave >= 0 {
            write!(f, "{}", "'".repeat((self.octave + 1) as usize))
        } else {
            write!(f, "{}", ",".repeat((-self.octave - 1) as usize))
        }
    }
}

/// Approximate note token for a MIDI pitch, for diagnostics.
pub fn midi_pitch_token(pitch: f64) -> String {
    let p = pitch.round() as i64;
    let mut token = CHROMATIC_NAMES[p.rem_euclid(12) as usize].to_string();
    let octave = p.div_euclid(12);
    if octave < 4 {
        token.push_str(&",".repeat((4 - octave) as usize));
    } else {
        token.push_str(&"'".repeat((octave - 4) as usize));
    }
    token
}

/// Note-name languages understood by LilyPond's `\language` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Nederlands,
    English,
    Deutsch,
    Norsk,
    Suomi,
    Svenska,
    Italiano,
    Francais,
    Catalan,
    Espanol,
    Portugues,
    Vlaams,
}

impl Language {
    pub const ALL: [Language; 12] = [
        Language::Nederlands,
        Language::English,
        Language::Deutsch,
        Language::Norsk,
        Language::Suomi,
        Language::Svenska,
        Language::Italiano,
        Language::Francais,
        Language::Catalan,
        Language::Espanol,
        Language::Portugues,
        Language::Vlaams,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Language::Nederlands => "nederlands",
            Language::English => "english",
            Language::Deutsch => "deutsch",
            Language::Norsk => "norsk",
            Language::Suomi => "suomi",
            Language::Svenska => "svenska",
            Language::Italiano => "italiano",
            Language::Francais => "francais",
            Language::Catalan => "catalan",
            Language::Espanol => "espanol",
            Language::Portugues => "portugues",
            Language::Vlaams => "vlaams",
        }
    }

    fn spelling(self) -> Spelling {
        match self {
            Language::Nederlands => Spelling {
                steps: &GERMANIC_STEPS_B,
                suffixes: &DUTCH_SUFFIXES,
                specials: &DUTCH_SPECIALS,
            },
            Language::English => Spelling {
                steps: &GERMANIC_STEPS_B,
                suffixes: &ENGLISH_SUFFIXES,
                specials: &[],
            },
            Language::Deutsch => Spelling {
                steps: &GERMANIC_STEPS_H,
                suffixes: &DUTCH_SUFFIXES,
                specials: &DEUTSCH_SPECIALS,
            },
            Language::Norsk => Spelling {
                steps: &GERMANIC_STEPS_H,
                suffixes: &NORSK_SUFFIXES,
                specials: &NORSK_SPECIALS,
            },
            Language::Suomi => Spelling {
                steps: &GERMANIC_STEPS_H,
                suffixes: &DUTCH_SUFFIXES,
                specials: &SUOMI_SPECIALS,
            },
            Language::Svenska => Spelling {
                steps: &GERMANIC_STEPS_H,
                suffixes: &SVENSKA_SUFFIXES,
                specials: &SVENSKA_SPECIALS,
            },
            Language::Italiano | Language::Francais => Spelling {
                steps: &SOLFEGE_STEPS,
                suffixes: &ITALIAN_SUFFIXES,
                specials: &[],
            },
            Language::Catalan => Spelling {
                steps: &SOLFEGE_STEPS,
                suffixes: &CATALAN_SUFFIXES,
                specials: &[],
            },
            Language::Espanol => Spelling {
                steps: &SOLFEGE_STEPS,
                suffixes: &SPANISH_SUFFIXES,
                specials: &[],
            },
            Language::Portugues => Spelling {
                steps: &SOLFEGE_STEPS,
                suffixes: &PORTUGUESE_SUFFIXES,
                specials: &[],
            },
            Language::Vlaams => Spelling {
                steps: &SOLFEGE_STEPS,
                suffixes: &FLEMISH_SUFFIXES,
                specials: &[],
            },
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Nederlands
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.name() == s)
            .ok_or_else(|| format!("Unknown pitch language '{}'", s))
    }
}

// Step spellings: (name, step).
const GERMANIC_STEPS_B: [(&str, u8); 7] =
    [("c", 0), ("d", 1), ("e", 2), ("f", 3), ("g", 4), ("a", 5), ("b", 6)];
const GERMANIC_STEPS_H: [(&str, u8); 7] =
    [("c", 0), ("d", 1), ("e", 2), ("f", 3), ("g", 4), ("a", 5), ("h", 6)];
const SOLFEGE_STEPS: [(&str, u8); 7] =
    [("do", 0), ("re", 1), ("mi", 2), ("fa", 3), ("sol", 4), ("la", 5), ("si", 6)];

// Suffix spellings: (suffix, alteration in quarter tones).
const DUTCH_SUFFIXES: [(&str, i32); 9] = [
    ("", 0),
    ("is", 2),
    ("isis", 4),
    ("ih", 1),
    ("isih", 3),
    ("es", -2),
    ("eses", -4),
    ("eh", -1),
    ("eseh", -3),
];
const NORSK_SUFFIXES: [(&str, i32); 13] = [
    ("", 0),
    ("is", 2),
    ("iss", 2),
    ("isis", 4),
    ("ississ", 4),
    ("ih", 1),
    ("isih", 3),
    ("es", -2),
    ("ess", -2),
    ("eses", -4),
    ("essess", -4),
    ("eh", -1),
    ("eseh", -3),
];
const SVENSKA_SUFFIXES: [(&str, i32); 5] =
    [("", 0), ("iss", 2), ("ississ", 4), ("ess", -2), ("essess", -4)];
const ENGLISH_SUFFIXES: [(&str, i32); 14] = [
    ("", 0),
    ("s", 2),
    ("sharp", 2),
    ("ss", 4),
    ("x", 4),
    ("sharpsharp", 4),
    ("f", -2),
    ("flat", -2),
    ("ff", -4),
    ("flatflat", -4),
    ("qs", 1),
    ("qf", -1),
    ("tqs", 3),
    ("tqf", -3),
];
const ITALIAN_SUFFIXES: [(&str, i32); 9] = [
    ("", 0),
    ("d", 2),
    ("dd", 4),
    ("b", -2),
    ("bb", -4),
    ("sd", 1),
    ("sb", -1),
    ("dsd", 3),
    ("bsb", -3),
];
const CATALAN_SUFFIXES: [(&str, i32); 7] =
    [("", 0), ("d", 2), ("dd", 4), ("s", 2), ("ss", 4), ("b", -2), ("bb", -4)];
const SPANISH_SUFFIXES: [(&str, i32); 10] = [
    ("", 0),
    ("s", 2),
    ("ss", 4),
    ("x", 4),
    ("b", -2),
    ("bb", -4),
    ("cs", 1),
    ("cb", -1),
    ("tcs", 3),
    ("tcb", -3),
];
const PORTUGUESE_SUFFIXES: [(&str, i32); 9] = [
    ("", 0),
    ("s", 2),
    ("ss", 4),
    ("b", -2),
    ("bb", -4),
    ("sqt", 1),
    ("bqt", -1),
    ("stqt", 3),
    ("btqt", -3),
];
const FLEMISH_SUFFIXES: [(&str, i32); 5] = [("", 0), ("k", 2), ("kk", 4), ("b", -2), ("bb", -4)];

// Irregular whole-word spellings: (word, step, quarter tones).
const DUTCH_SPECIALS: [(&str, u8, i32); 8] = [
    ("as", 5, -2),
    ("ases", 5, -4),
    ("asas", 5, -4),
    ("aseh", 5, -3),
    ("aeh", 5, -1),
    ("es", 2, -2),
    ("eses", 2, -4),
    ("eeh", 2, -1),
];
const DEUTSCH_SPECIALS: [(&str, u8, i32); 7] = [
    ("as", 5, -2),
    ("ases", 5, -4),
    ("asah", 5, -3),
    ("es", 2, -2),
    ("eses", 2, -4),
    ("b", 6, -2),
    ("heses", 6, -4),
];
const NORSK_SPECIALS: [(&str, u8, i32); 8] = [
    ("as", 5, -2),
    ("ass", 5, -2),
    ("ases", 5, -4),
    ("assess", 5, -4),
    ("es", 2, -2),
    ("ess", 2, -2),
    ("eses", 2, -4),
    ("b", 6, -2),
];
const SUOMI_SPECIALS: [(&str, u8, i32); 6] = [
    ("as", 5, -2),
    ("ases", 5, -4),
    ("es", 2, -2),
    ("eses", 2, -4),
    ("b", 6, -2),
    ("bes", 6, -4),
];
const SVENSKA_SPECIALS: [(&str, u8, i32); 6] = [
    ("ass", 5, -2),
    ("assess", 5, -4),
    ("ess", 2, -2),
    ("essess", 2, -4),
    ("b", 6, -2),
    ("bess", 6, -4),
];

struct Spelling {
    steps: &'static [(&'static str, u8)],
    suffixes: &'static [(&'static str, i32)],
    specials: &'static [(&'static str, u8, i32)],
}

type SpellingTable = HashMap<String, (u8, Rational)>;

fn quarters(q: i32) -> Rational {
    Rational::new(i128::from(q), 4)
}

fn build_table(spelling: Spelling) -> SpellingTable {
    let mut table = HashMap::new();
    for &(name, step) in spelling.steps {
        for &(suffix, q) in spelling.suffixes {
            table.insert(format!("{}{}", name, suffix), (step, quarters(q)));
        }
    }
    for &(word, step, q) in spelling.specials {
        table.insert(word.to_string(), (step, quarters(q)));
    }
    table
}

fn tables() -> &'static HashMap<Language, SpellingTable> {
    static TABLES: OnceLock<HashMap<Language, SpellingTable>> = OnceLock::new();
    TABLES.get_or_init(|| {
        Language::ALL
            .iter()
            .map(|&lang| (lang, build_table(lang.spelling())))
            .collect()
    })
}

/// Resolve a note-name word (without octave marks) in the given language.
///
/// Returns `(step, alteration)` or `None` if the word is not a note name.
///
/// # Example
/// ```
/// use lysync::pitch::{read_pitch, Language};
/// use lysync::Rational;
///
/// let (step, alt) = read_pitch("fis", Language::Nederlands).unwrap();
/// assert_eq!((step, alt), (3, Rational::new(1, 2)));
/// assert_eq!(read_pitch("fs", Language::English), Some((3, Rational::new(1, 2))));
/// assert_eq!(read_pitch("fis", Language::English), None);
/// ```
pub fn read_pitch(word: &str, language: Language) -> Option<(u8, Rational)> {
    tables().get(&language)?.get(word).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(n: i128, d: i128) -> Rational {
        Rational::new(n, d)
    }

    #[test]
    fn test_absolute_semitone() {
        // c' is middle C
        assert_eq!(Pitch::new(0, rational::ZERO, 0).absolute_semitone(), 60.0);
        // bes (b flat below middle C)
        assert_eq!(Pitch::new(6, alt(-1, 2), -1).absolute_semitone(), 58.0);
        // a quarter-tone sharp a'
        assert_eq!(Pitch::new(5, alt(1, 4), 0).absolute_semitone(), 69.5);
    }

    #[test]
    fn test_octave_marks() {
        assert_eq!(Pitch::octave_from_marks(""), -1);
        assert_eq!(Pitch::octave_from_marks("'"), 0);
        assert_eq!(Pitch::octave_from_marks("''"), 1);
        assert_eq!(Pitch::octave_from_marks(",,"), -3);
    }

    #[test]
    fn test_display() {
        assert_eq!(Pitch::new(3, alt(1, 2), 1).to_string(), "fis''");
        assert_eq!(Pitch::new(0, rational::ZERO, -1).to_string(), "c");
        assert_eq!(Pitch::new(2, alt(-1, 2), -3).to_string(), "ees,,");
        assert_eq!(midi_pitch_token(60.0), "c'");
        assert_eq!(midi_pitch_token(46.0), "a#/bb,");
    }

    #[test]
    fn test_nederlands() {
        let l = Language::Nederlands;
        assert_eq!(read_pitch("c", l), Some((0, rational::ZERO)));
        assert_eq!(read_pitch("cisis", l), Some((0, alt(1, 1))));
        assert_eq!(read_pitch("bes", l), Some((6, alt(-1, 2))));
        assert_eq!(read_pitch("as", l), Some((5, alt(-1, 2))));
        assert_eq!(read_pitch("aes", l), Some((5, alt(-1, 2))));
        assert_eq!(read_pitch("es", l), Some((2, alt(-1, 2))));
        assert_eq!(read_pitch("gih", l), Some((4, alt(1, 4))));
        assert_eq!(read_pitch("deseh", l), Some((1, alt(-3, 4))));
        assert_eq!(read_pitch("h", l), None);
        assert_eq!(read_pitch("q", l), None);
    }

    #[test]
    fn test_deutsch_b_and_h() {
        let l = Language::Deutsch;
        assert_eq!(read_pitch("h", l), Some((6, rational::ZERO)));
        assert_eq!(read_pitch("b", l), Some((6, alt(-1, 2))));
        assert_eq!(read_pitch("heses", l), Some((6, alt(-1, 1))));
        assert_eq!(read_pitch("his", l), Some((6, alt(1, 2))));
    }

    #[test]
    fn test_english_and_solfege() {
        assert_eq!(read_pitch("bflat", Language::English), Some((6, alt(-1, 2))));
        assert_eq!(read_pitch("ctqs", Language::English), Some((0, alt(3, 4))));
        assert_eq!(read_pitch("sold", Language::Italiano), Some((4, alt(1, 2))));
        assert_eq!(read_pitch("sibb", Language::Francais), Some((6, alt(-1, 1))));
        assert_eq!(read_pitch("fas", Language::Espanol), Some((3, alt(1, 2))));
        assert_eq!(read_pitch("rek", Language::Vlaams), Some((1, alt(1, 2))));
        assert_eq!(read_pitch("c", Language::Italiano), None);
    }

    #[test]
    fn test_language_names_round_trip() {
        for lang in Language::ALL {
            assert_eq!(lang.name().parse::<Language>(), Ok(lang));
        }
        assert!("klingon".parse::<Language>().is_err());
    }
}
