//! Regex compilation into full-match byte automata.
//!
//! Trie indexes match a deterministic automaton against their keys one
//! byte at a time, so a pattern is compiled once into a dense DFA whose
//! start is anchored at the first key byte and whose accepting states
//! require the end of the key. A key matches only if the whole key
//! matches the pattern.

use crate::error::{CoreError, CoreResult};
use regex_automata::dfa::{dense, Automaton, StartKind};
use regex_automata::nfa::thompson;
use regex_automata::util::primitives::StateID;
use regex_automata::util::syntax;
use regex_automata::{Anchored, Input, MatchKind};
use regex_syntax::hir::{Hir, Look};
use std::fmt;

/// Flags parsed from a regex options string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexOptions {
    /// `i`: case-insensitive.
    pub case_insensitive: bool,
    /// `s`: `.` also matches `\n`.
    pub dot_matches_new_line: bool,
    /// `m`: `^`/`$` match at line boundaries.
    pub multi_line: bool,
    /// `x`: whitespace and `#` comments are ignored.
    pub ignore_whitespace: bool,
    /// `u` (default) / `U`: Unicode-aware classes.
    pub unicode: bool,
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            dot_matches_new_line: false,
            multi_line: false,
            ignore_whitespace: false,
            unicode: true,
        }
    }
}

impl RegexOptions {
    /// Parses a flag string such as `"is"`. Later flags win.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegexOption`] for an unknown flag.
    pub fn parse(options: &str) -> CoreResult<Self> {
        let mut parsed = Self::default();
        for option in options.chars() {
            match option {
                'i' => parsed.case_insensitive = true,
                's' => parsed.dot_matches_new_line = true,
                'm' => parsed.multi_line = true,
                'x' => parsed.ignore_whitespace = true,
                'u' => parsed.unicode = true,
                'U' => parsed.unicode = false,
                _ => return Err(CoreError::InvalidRegexOption { option }),
            }
        }
        Ok(parsed)
    }

    fn syntax_config(self) -> syntax::Config {
        syntax::Config::new()
            .case_insensitive(self.case_insensitive)
            .dot_matches_new_line(self.dot_matches_new_line)
            .multi_line(self.multi_line)
            .ignore_whitespace(self.ignore_whitespace)
            .unicode(self.unicode)
            // keys of binary columns need not be UTF-8
            .utf8(self.unicode)
    }
}

/// A compiled full-match automaton.
pub struct RegexDfa {
    pattern: String,
    dfa: dense::DFA<Vec<u32>>,
    start: StateID,
}

impl RegexDfa {
    /// Compiles `pattern` with the flags in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegexOption`] for an unknown flag and
    /// [`CoreError::RegexCompile`] if the pattern does not parse or
    /// cannot be built as a DFA.
    pub fn compile(pattern: &str, options: &str) -> CoreResult<Self> {
        let options = RegexOptions::parse(options)?;
        let compile_err = |message: String| CoreError::RegexCompile {
            pattern: pattern.to_string(),
            message,
        };

        let hir = syntax::parse_with(pattern, &options.syntax_config())
            .map_err(|e| compile_err(e.to_string()))?;
        let hir = Hir::concat(vec![hir, Hir::look(Look::End)]);

        let nfa = thompson::Compiler::new()
            .configure(thompson::Config::new().utf8(false))
            .build_from_hir(&hir)
            .map_err(|e| compile_err(e.to_string()))?;
        let dfa = dense::Builder::new()
            .configure(
                dense::Config::new()
                    .start_kind(StartKind::Anchored)
                    .match_kind(MatchKind::All),
            )
            .build_from_nfa(&nfa)
            .map_err(|e| compile_err(e.to_string()))?;
        let start = dfa
            .start_state_forward(&Input::new("").anchored(Anchored::Yes))
            .map_err(|e| compile_err(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            dfa,
            start,
        })
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// State before any key byte.
    #[must_use]
    pub fn start(&self) -> StateID {
        self.start
    }

    /// Transition on one key byte.
    #[must_use]
    pub fn next(&self, state: StateID, byte: u8) -> StateID {
        self.dfa.next_state(state, byte)
    }

    /// Returns true if no continuation from `state` can match.
    #[must_use]
    pub fn is_dead(&self, state: StateID) -> bool {
        self.dfa.is_dead_state(state) || self.dfa.is_quit_state(state)
    }

    /// Returns true if a key ending in `state` matches.
    #[must_use]
    pub fn accepts_at_end(&self, state: StateID) -> bool {
        self.dfa.is_match_state(self.dfa.next_eoi_state(state))
    }

    /// Returns true if the whole of `key` matches.
    #[must_use]
    pub fn is_full_match(&self, key: &[u8]) -> bool {
        let mut state = self.start;
        for &byte in key {
            state = self.next(state, byte);
            if self.is_dead(state) {
                return false;
            }
        }
        self.accepts_at_end(state)
    }

    /// Heap bytes held by the automaton.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.dfa.memory_usage()
    }
}

impl fmt::Debug for RegexDfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexDfa")
            .field("pattern", &self.pattern)
            .field("memory_usage", &self.memory_usage())
            .finish_non_exhaustive()
    }
}
