//! # Score Lexer
//!
//! A mode-stack tokenizer for LilyPond score text. It recovers just enough
//! structure to find note names and resolve them to [`Pitch`]es: identical
//! punctuation means different things in Scheme, markup, lyrics or strings, so
//! the active grammar is the top of an explicit stack of [`Mode`]s.
//!
//! Constructs that change grammar push a frame (`#`, `#{`, `\markup`,
//! `\lyricmode`, `"`, `%{`, ...). A frame is popped by its closer, or when
//! the construct has consumed its arguments: `\markup \bold foo` leaves markup
//! mode after `foo`, while `\markup { ... }` leaves it at the closing brace.
//!
//! The lexer is an [`Iterator`] over `Result<LocatedToken, SyncError>`. The
//! active pitch language is part of its running state and follows
//! `\language "..."` and `\include "<language>.ly"` directives. The state can be
//! captured with [`Lexer::freeze`] and resumed with [`Lexer::thaw`] at any
//! token boundary.

use crate::error::SyncError;
use crate::pitch::{read_pitch, Language, Pitch};

/// Lexical context, one per stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Top-level music, also re-entered by `#{` inside Scheme and by
    /// `\score` inside markup.
    Music,
    Scheme,
    Markup,
    Lyric,
    Chord,
    Figure,
    Note,
    /// `\layout`, `\midi`, `\paper`, `\header`, `\with` blocks.
    Section,
    /// `\context` inside a section.
    Context,
    Include,
    Language,
    Quoted,
    BlockComment,
    SchemeBlockComment,
}

impl Mode {
    fn construct_name(self) -> &'static str {
        match self {
            Mode::Quoted => "quoted string",
            Mode::BlockComment => "block comment",
            Mode::SchemeBlockComment => "Scheme block comment",
            _ => "construct",
        }
    }
}

/// Token types for LilyPond score text
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A note name with its octave marks, resolved in the active language.
    Pitch(Pitch),
    /// `q`, which repeats the previous chord.
    RepeatedChord,
    /// A word that is not a note name (rests, markup words, lyrics, Scheme atoms).
    Word,
    Command,
    ModeEnter(Mode),
    ModeLeave(Mode),
    OpenDelimiter,  // { << (
    CloseDelimiter, // } >> )
    OpenChord,      // <
    CloseChord,     // >
    /// A complete single-line `"..."` string.
    StringLiteral,
    /// Part of a multi-line string.
    StringFragment,
    Comment,
    LanguageName(Language),
    IncludeFile,
    Articulation,
    Dynamic,
    VoiceSeparator,
    SchemeQuote,
    Whitespace,
    Newline,
    /// Text no rule of the active mode understands.
    Unparsed,
}

/// A token with its position in the source
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedToken<'a> {
    pub token: Token,
    pub text: &'a str,
    /// Byte offset of the first character.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    mode: Mode,
    /// Brace/parenthesis nesting inside this frame.
    level: usize,
    /// Arguments still expected before the frame ends itself; 0 means it only
    /// ends at its closer.
    argcount: usize,
    line: usize,
    column: usize,
}

/// Snapshot of the lexer's running state, see [`Lexer::freeze`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerState {
    stack: Vec<Frame>,
    language: Language,
    position: usize,
    line: usize,
    column: usize,
}

enum Action {
    None,
    Item,
    Enter(Mode, usize),
    Leave,
    LeaveItem,
    Inc,
    Dec,
    SetLanguage(Language),
    MarkupCommand(usize),
}

const MARKUP_NO_ARGS: &[&str] = &[
    "doubleflat", "doublesharp", "eyeglasses", "flat", "natural", "null", "semiflat",
    "semisharp", "sesquiflat", "sesquisharp", "sharp", "strut",
];

const MARKUP_TWO_ARGS: &[&str] = &[
    "abs-fontsize", "combine", "fontsize", "fraction", "halign", "hcenter-in", "lower",
    "magnify", "note", "on-the-fly", "override", "pad-around", "pad-markup", "pad-x", "path",
    "raise", "rotate", "translate", "translate-scaled", "with-color", "with-url",
];

const MARKUP_THREE_ARGS: &[&str] = &[
    "arrow-head", "beam", "draw-circle", "eps-file", "filled-box", "general-align",
    "note-by-number", "pad-to-box", "page-ref", "with-dimensions",
];

const MARKUP_FOUR_ARGS: &[&str] = &["put-adjacent"];

/// Lexer for tokenizing LilyPond score text
pub struct Lexer<'a> {
    input: &'a str,
    stack: Vec<Frame>,
    language: Language,
    position: usize,
    line: usize,
    column: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_language(input, Language::default())
    }

    pub fn with_language(input: &'a str, language: Language) -> Self {
        Self {
            input,
            stack: vec![Frame {
                mode: Mode::Music,
                level: 0,
                argcount: 0,
                line: 1,
                column: 1,
            }],
            language,
            position: 0,
            line: 1,
            column: 1,
            finished: false,
        }
    }

    /// Capture the running state at the current token boundary.
    pub fn freeze(&self) -> LexerState {
        LexerState {
            stack: self.stack.clone(),
            language: self.language,
            position: self.position,
            line: self.line,
            column: self.column,
        }
    }

    /// Resume lexing `input` from a state captured by [`Lexer::freeze`] on
    /// the same input.
    pub fn thaw(input: &'a str, state: LexerState) -> Self {
        Self {
            input,
            stack: state.stack,
            language: state.language,
            position: state.position.min(input.len()),
            line: state.line,
            column: state.column,
            finished: false,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// The active mode (top of the stack).
    pub fn mode(&self) -> Mode {
        self.top().mode
    }

    /// Number of frames on the stack; never less than 1.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Tokenize the remaining input, stopping at the first error.
    pub fn tokenize(&mut self) -> Result<Vec<LocatedToken<'a>>, SyncError> {
        self.collect()
    }

    fn top(&self) -> &Frame {
        // The stack is created with one frame and never popped below it.
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn enter(&mut self, mode: Mode, argcount: usize, line: usize, column: usize) {
        self.stack.push(Frame {
            mode,
            level: 0,
            argcount,
            line,
            column,
        });
    }

    fn leave(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    fn end_argument(&mut self) {
        while self.stack.len() > 1 && self.top().level == 0 {
            let argcount = self.top().argcount;
            if argcount > 1 {
                self.top_mut().argcount -= 1;
                return;
            } else if argcount == 0 {
                return;
            }
            self.stack.pop();
        }
    }

    fn dec(&mut self) {
        while self.top().level == 0 && self.stack.len() > 1 {
            self.stack.pop();
        }
        if self.top().level > 0 {
            self.top_mut().level -= 1;
            self.end_argument();
        }
    }

    fn apply(&mut self, action: Action, line: usize, column: usize) {
        match action {
            Action::None => {}
            Action::Item => self.end_argument(),
            Action::Enter(mode, argcount) => self.enter(mode, argcount, line, column),
            Action::Leave => self.leave(),
            Action::LeaveItem => {
                self.leave();
                self.end_argument();
            }
            Action::Inc => self.top_mut().level += 1,
            Action::Dec => self.dec(),
            Action::SetLanguage(language) => {
                self.language = language;
                self.end_argument();
            }
            Action::MarkupCommand(0) => self.end_argument(),
            Action::MarkupCommand(n) => self.enter(Mode::Markup, n, line, column),
        }
    }

    fn advance_over(&mut self, text: &str) {
        self.position += text.len();
        match text.rfind('\n') {
            Some(idx) => {
                self.line += text.matches('\n').count();
                self.column = text[idx + 1..].chars().count() + 1;
            }
            None => self.column += text.chars().count(),
        }
    }

    /// Try every rule of the active mode at the start of `rest`.
    fn match_rule(&self, rest: &str) -> Option<(Token, usize, Action)> {
        match self.mode() {
            Mode::Quoted => scan_quoted(rest),
            Mode::BlockComment => scan_comment_body(rest, "%}", '%', '}', Mode::BlockComment),
            Mode::SchemeBlockComment => {
                scan_comment_body(rest, "!#", '!', '#', Mode::SchemeBlockComment)
            }
            Mode::Scheme => scan_scheme(rest),
            Mode::Markup => scan_markup(rest).or_else(|| scan_base(rest)),
            Mode::Lyric => scan_lyric(rest).or_else(|| scan_base(rest)),
            Mode::Section => scan_section(rest).or_else(|| scan_base(rest)),
            Mode::Context => scan_braces(rest).or_else(|| scan_base(rest)),
            Mode::Include => scan_include(rest).or_else(|| scan_base(rest)),
            Mode::Language => scan_language(rest).or_else(|| scan_base(rest)),
            Mode::Music | Mode::Chord | Mode::Figure | Mode::Note => {
                self.scan_music(rest).or_else(|| scan_base(rest))
            }
        }
    }

    fn scan_music(&self, rest: &str) -> Option<(Token, usize, Action)> {
        if rest.starts_with("<<") {
            return Some((Token::OpenDelimiter, 2, Action::Inc));
        }
        if rest.starts_with(">>") {
            return Some((Token::CloseDelimiter, 2, Action::Dec));
        }
        let first = rest.chars().next()?;
        match first {
            '{' => return Some((Token::OpenDelimiter, 1, Action::Inc)),
            '}' => return Some((Token::CloseDelimiter, 1, Action::Dec)),
            '<' => return Some((Token::OpenChord, 1, Action::None)),
            '>' => return Some((Token::CloseChord, 1, Action::None)),
            _ => {}
        }
        if first.is_ascii_alphabetic() {
            return Some(self.scan_note_word(rest));
        }
        if rest.starts_with("\\\\") {
            return Some((Token::VoiceSeparator, 2, Action::None));
        }
        if rest.starts_with("\\<") || rest.starts_with("\\>") || rest.starts_with("\\!") {
            return Some((Token::Dynamic, 2, Action::None));
        }
        let mut chars = rest.chars();
        if let (Some(a), Some(b)) = (chars.next(), chars.next()) {
            if "-_^".contains(a) && "_.>|+^-".contains(b) {
                return Some((Token::Articulation, 2, Action::None));
            }
        }
        None
    }

    /// A word in music mode: a pitch with octave marks, `q`, or any other word.
    fn scan_note_word(&self, rest: &str) -> (Token, usize, Action) {
        let word_len = ascii_word_len(rest);
        let word = &rest[..word_len];
        if word == "q" {
            return (Token::RepeatedChord, word_len, Action::Item);
        }
        let Some((step, alteration)) = read_pitch(word, self.language) else {
            return (Token::Word, word_len, Action::Item);
        };

        let after = &rest[word_len..];
        let marks_len = match after.chars().next() {
            Some('\'') => after.len() - after.trim_start_matches('\'').len(),
            Some(',') => after.len() - after.trim_start_matches(',').len(),
            _ => 0,
        };
        let marks = &after[..marks_len];
        let mut len = word_len + marks_len;

        // cautionary accidental and octave check belong to the pitch
        if rest[len..].starts_with('?') || rest[len..].starts_with('!') {
            len += 1;
        }
        let tail = &rest[len..];
        let trimmed = tail.trim_start();
        if let Some(check) = trimmed.strip_prefix('=') {
            let check_marks = check.len() - check.trim_start_matches(['\'', ',']).len();
            len += tail.len() - trimmed.len() + 1 + check_marks;
        }

        let pitch = Pitch::new(step, alteration, Pitch::octave_from_marks(marks));
        (Token::Pitch(pitch), len, Action::Item)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<LocatedToken<'a>, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.position >= self.input.len() {
            self.finished = true;
            let open = self.stack.iter().find(|frame| {
                matches!(
                    frame.mode,
                    Mode::Quoted | Mode::BlockComment | Mode::SchemeBlockComment
                )
            });
            return open.map(|frame| {
                Err(SyncError::Unterminated {
                    construct: frame.mode.construct_name(),
                    line: frame.line,
                    column: frame.column,
                })
            });
        }

        let input = self.input;
        let rest = &input[self.position..];
        let (line, column, offset) = (self.line, self.column, self.position);

        let (token, len, action) = match self.match_rule(rest) {
            Some(found) => found,
            None => {
                // Gather characters until some rule of the active mode matches.
                let mut end = rest.chars().next().map_or(rest.len(), char::len_utf8);
                while end < rest.len() && self.match_rule(&rest[end..]).is_none() {
                    end += rest[end..].chars().next().map_or(1, char::len_utf8);
                }
                (Token::Unparsed, end, Action::None)
            }
        };

        let text = &rest[..len];
        self.advance_over(text);
        self.apply(action, line, column);

        Some(Ok(LocatedToken {
            token,
            text,
            offset,
            line,
            column,
        }))
    }
}

fn ascii_word_len(rest: &str) -> usize {
    rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of `\name` if `rest` starts with exactly that command.
fn command(rest: &str, name: &str) -> Option<usize> {
    let after = rest.strip_prefix('\\')?.strip_prefix(name)?;
    match after.chars().next() {
        Some(c) if is_word_char(c) => None,
        _ => Some(name.len() + 1),
    }
}

/// Length of a generic `\command` (letters, optionally joined by hyphens).
fn command_len(rest: &str) -> Option<usize> {
    let body = rest.strip_prefix('\\')?;
    let mut len = ascii_word_len(body);
    if len == 0 {
        return None;
    }
    while let Some(after) = body[len..].strip_prefix('-') {
        let part = ascii_word_len(after);
        if part == 0 {
            break;
        }
        len += 1 + part;
    }
    Some(len + 1)
}

/// Length of a complete `"..."` string; `multiline` allows newlines inside.
fn quoted_len(rest: &str, multiline: bool) -> Option<usize> {
    let body = rest.strip_prefix('"')?;
    let mut chars = body.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some(idx + 2),
            '\\' => {
                if let Some((_, '"' | '\\')) = chars.clone().next() {
                    chars.next();
                }
            }
            '\n' if !multiline => return None,
            _ => {}
        }
    }
    None
}

fn whitespace(rest: &str) -> Option<(Token, usize, Action)> {
    if rest.starts_with('\n') {
        return Some((Token::Newline, 1, Action::None));
    }
    let len = rest
        .find(|c: char| !c.is_whitespace() || c == '\n')
        .unwrap_or(rest.len());
    (len > 0).then_some((Token::Whitespace, len, Action::None))
}

fn scan_braces(rest: &str) -> Option<(Token, usize, Action)> {
    match rest.chars().next()? {
        '{' => Some((Token::OpenDelimiter, 1, Action::Inc)),
        '}' => Some((Token::CloseDelimiter, 1, Action::Dec)),
        _ => None,
    }
}

/// Rules shared by every LilyPond (non-Scheme, non-string) mode.
fn scan_base(rest: &str) -> Option<(Token, usize, Action)> {
    if rest.starts_with("%{") {
        return Some((
            Token::ModeEnter(Mode::BlockComment),
            2,
            Action::Enter(Mode::BlockComment, 0),
        ));
    }
    if rest.starts_with('%') {
        let len = rest.find('\n').unwrap_or(rest.len());
        return Some((Token::Comment, len, Action::None));
    }
    if let Some(len) = quoted_len(rest, false) {
        return Some((Token::StringLiteral, len, Action::Item));
    }
    if rest.starts_with('"') {
        return Some((Token::ModeEnter(Mode::Quoted), 1, Action::Enter(Mode::Quoted, 0)));
    }
    if rest.starts_with("#}") {
        return Some((Token::ModeLeave(Mode::Music), 2, Action::Leave));
    }
    if rest.starts_with('#') {
        return Some((Token::ModeEnter(Mode::Scheme), 1, Action::Enter(Mode::Scheme, 1)));
    }
    if rest.starts_with('\\') {
        return scan_command(rest);
    }
    whitespace(rest)
}

fn scan_command(rest: &str) -> Option<(Token, usize, Action)> {
    for name in ["with", "layout", "midi", "paper", "header"] {
        if let Some(len) = command(rest, name) {
            return Some((Token::ModeEnter(Mode::Section), len, Action::Enter(Mode::Section, 1)));
        }
    }
    for name in ["lyricmode", "lyrics", "addlyrics", "oldaddlyrics"] {
        if let Some(len) = command(rest, name) {
            return Some((Token::ModeEnter(Mode::Lyric), len, Action::Enter(Mode::Lyric, 1)));
        }
    }
    if let Some(len) = command(rest, "lyricsto") {
        return Some((Token::ModeEnter(Mode::Lyric), len, Action::Enter(Mode::Lyric, 2)));
    }
    let input_modes = [
        ("chords", Mode::Chord),
        ("chordmode", Mode::Chord),
        ("figures", Mode::Figure),
        ("figuremode", Mode::Figure),
        ("notes", Mode::Note),
        ("notemode", Mode::Note),
        ("markup", Mode::Markup),
        ("markuplines", Mode::Markup),
        ("include", Mode::Include),
        ("language", Mode::Language),
    ];
    for (name, mode) in input_modes {
        if let Some(len) = command(rest, name) {
            return Some((Token::ModeEnter(mode), len, Action::Enter(mode, 1)));
        }
    }
    command_len(rest).map(|len| (Token::Command, len, Action::Item))
}

fn scan_quoted(rest: &str) -> Option<(Token, usize, Action)> {
    if rest.starts_with('"') {
        return Some((Token::ModeLeave(Mode::Quoted), 1, Action::LeaveItem));
    }
    if rest.starts_with('\n') {
        return Some((Token::Newline, 1, Action::None));
    }
    let mut len = 0;
    let mut chars = rest.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' | '\n' => break,
            '\\' if matches!(chars.peek(), Some((_, '"' | '\\'))) => {
                chars.next();
                len = idx + 2;
            }
            _ => len = idx + c.len_utf8(),
        }
    }
    (len > 0).then_some((Token::StringFragment, len, Action::None))
}

/// Body of a block comment closed by `closer` (`%}` or `!#`).
fn scan_comment_body(
    rest: &str,
    closer: &str,
    lead: char,
    follow: char,
    mode: Mode,
) -> Option<(Token, usize, Action)> {
    if rest.starts_with(closer) {
        return Some((Token::ModeLeave(mode), closer.len(), Action::Leave));
    }
    if rest.starts_with('\n') {
        return Some((Token::Newline, 1, Action::None));
    }
    let mut len = 0;
    let mut chars = rest.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\n' || (c == lead && matches!(chars.peek(), Some(&(_, f)) if f == follow)) {
            break;
        }
        len = idx + c.len_utf8();
    }
    (len > 0).then_some((Token::Comment, len, Action::None))
}

fn scan_scheme(rest: &str) -> Option<(Token, usize, Action)> {
    let first = rest.chars().next()?;
    if first == '"' {
        return Some((Token::ModeEnter(Mode::Quoted), 1, Action::Enter(Mode::Quoted, 0)));
    }
    if let Some(after) = rest.strip_prefix("#\\") {
        let letters = after
            .find(|c: char| !c.is_ascii_lowercase())
            .unwrap_or(after.len());
        let len = if letters > 0 {
            letters
        } else {
            after.chars().next().map_or(0, char::len_utf8)
        };
        return Some((Token::Word, 2 + len, Action::Item));
    }
    if "',`".contains(first) {
        return Some((Token::SchemeQuote, 1, Action::None));
    }
    if first == ';' {
        let len = rest.find('\n').unwrap_or(rest.len());
        return Some((Token::Comment, len, Action::None));
    }
    if rest.starts_with("#!") {
        return Some((
            Token::ModeEnter(Mode::SchemeBlockComment),
            2,
            Action::Enter(Mode::SchemeBlockComment, 0),
        ));
    }
    match first {
        '(' => return Some((Token::OpenDelimiter, 1, Action::Inc)),
        ')' => return Some((Token::CloseDelimiter, 1, Action::Dec)),
        _ => {}
    }
    if rest.starts_with("#{") {
        return Some((Token::ModeEnter(Mode::Music), 2, Action::Enter(Mode::Music, 0)));
    }
    let len = rest
        .find(|c: char| "()\"{}".contains(c) || c.is_whitespace())
        .unwrap_or(rest.len());
    if len > 0 {
        return Some((Token::Word, len, Action::Item));
    }
    whitespace(rest)
}

fn scan_markup(rest: &str) -> Option<(Token, usize, Action)> {
    if let Some(len) = command(rest, "score") {
        return Some((Token::ModeEnter(Mode::Music), len, Action::Enter(Mode::Music, 1)));
    }
    if let Some(len) = command_len(rest) {
        let name = &rest[1..len];
        let argcount = if MARKUP_NO_ARGS.contains(&name) {
            0
        } else if MARKUP_TWO_ARGS.contains(&name) {
            2
        } else if MARKUP_THREE_ARGS.contains(&name) {
            3
        } else if MARKUP_FOUR_ARGS.contains(&name) {
            4
        } else {
            1
        };
        return Some((Token::Command, len, Action::MarkupCommand(argcount)));
    }
    if let Some(found) = scan_braces(rest) {
        return Some(found);
    }
    let len = rest
        .find(|c: char| "{}\"\\#".contains(c) || c.is_whitespace())
        .unwrap_or(rest.len());
    (len > 0).then_some((Token::Word, len, Action::Item))
}

fn scan_lyric(rest: &str) -> Option<(Token, usize, Action)> {
    if let Some(found) = scan_braces(rest) {
        return Some(found);
    }
    let len = rest
        .find(|c: char| !(is_word_char(c) && !c.is_numeric()))
        .unwrap_or(rest.len());
    (len > 0).then_some((Token::Word, len, Action::Item))
}

fn scan_section(rest: &str) -> Option<(Token, usize, Action)> {
    if let Some(found) = scan_braces(rest) {
        return Some(found);
    }
    command(rest, "context")
        .map(|len| (Token::ModeEnter(Mode::Context), len, Action::Enter(Mode::Context, 1)))
}

/// `"<language>"` as a quoted word, if it names a known language.
fn quoted_language(rest: &str, suffix: &str) -> Option<(Language, usize)> {
    let body = rest.strip_prefix('"')?;
    let end = body.find('"')?;
    let name = body[..end].strip_suffix(suffix)?;
    let language = name.parse().ok()?;
    Some((language, end + 2))
}

fn scan_include(rest: &str) -> Option<(Token, usize, Action)> {
    if let Some((language, len)) = quoted_language(rest, ".ly") {
        return Some((Token::LanguageName(language), len, Action::SetLanguage(language)));
    }
    quoted_len(rest, true).map(|len| (Token::IncludeFile, len, Action::Item))
}

fn scan_language(rest: &str) -> Option<(Token, usize, Action)> {
    quoted_language(rest, "")
        .map(|(language, len)| (Token::LanguageName(language), len, Action::SetLanguage(language)))
}
