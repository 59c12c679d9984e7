//! Rule-based normalizer for recognized speech.
//!
//! The recognizer keeps hearing the character's name as one of a handful of
//! near-homophones. [`TextCorrector`] rewrites those back to the real name.
//!
//! Matching is a single left-to-right scan. At each position the longest
//! wrong-form that matches is replaced, so the result never depends on table
//! order even when one wrong-form is a prefix of another (`민호야` / `민호`).

use parley_config::{CorrectionMode, CorrectionsConfig};

/// Where a wrong-form is allowed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Anywhere in the text, including inside longer words.
    #[default]
    Substring,
    /// Only at the start of a token: start of text, or after whitespace or punctuation.
    /// Korean particles attach to the end of names, so the tail is left unconstrained.
    TokenStart,
}

impl From<CorrectionMode> for MatchMode {
    fn from(mode: CorrectionMode) -> Self {
        match mode {
            CorrectionMode::Substring => MatchMode::Substring,
            CorrectionMode::TokenStart => MatchMode::TokenStart,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrectionError {
    #[error("Correction table contains an empty wrong-form")]
    EmptyWrongForm,

    #[error("Correct-form '{right}' contains wrong-form '{wrong}'")]
    SelfOverlapping { wrong: String, right: String },

    #[error("Correct-form '{right}' can join neighbouring text into wrong-form '{wrong}'")]
    SeamOverlap { wrong: String, right: String },
}

/// Ordered `(wrong, right)` replacement pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionTable {
    pairs: Vec<(String, String)>,
}

impl CorrectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Misrecognitions of 니노 seen from the Korean recognizer.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for stem in ["민호", "인호", "이노", "미노", "리노"] {
            table.insert(format!("{stem}야"), "니노야");
            table.insert(stem, "니노");
        }
        table
    }

    /// Add a pair, replacing the correct-form of an existing wrong-form.
    pub fn insert(&mut self, wrong: impl Into<String>, right: impl Into<String>) {
        let wrong = wrong.into();
        let right = right.into();
        match self.pairs.iter_mut().find(|(w, _)| *w == wrong) {
            Some(pair) => pair.1 = right,
            None => self.pairs.push((wrong, right)),
        }
    }

    /// Built-in pairs with the configured extras merged over them.
    pub fn from_config(config: &CorrectionsConfig) -> Self {
        let mut table = Self::builtin();
        for (wrong, right) in &config.extra {
            table.insert(wrong.clone(), right.clone());
        }
        table
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(w, r)| (w.as_str(), r.as_str()))
    }
}

/// Applies a [`CorrectionTable`] to text. Pure and cheap to share.
#[derive(Debug, Clone)]
pub struct TextCorrector {
    // Sorted longest wrong-form first.
    rules: Vec<(String, String)>,
    mode: MatchMode,
}

impl TextCorrector {
    pub fn new(table: CorrectionTable, mode: MatchMode) -> Result<Self, CorrectionError> {
        let mut rules = table.pairs;

        for (wrong, _) in &rules {
            if wrong.is_empty() {
                return Err(CorrectionError::EmptyWrongForm);
            }
        }
        // Correcting already corrected text must change nothing: no correct-form
        // may hold a wrong-form, or complete one together with its neighbours.
        for (_, right) in &rules {
            for (wrong, _) in &rules {
                if right.contains(wrong.as_str()) {
                    return Err(CorrectionError::SelfOverlapping {
                        wrong: wrong.clone(),
                        right: right.clone(),
                    });
                }
                if overlaps_across_seam(right, wrong) {
                    return Err(CorrectionError::SeamOverlap {
                        wrong: wrong.clone(),
                        right: right.clone(),
                    });
                }
            }
        }

        sort_longest_first(&mut rules);
        Ok(Self { rules, mode })
    }

    pub fn from_config(config: &CorrectionsConfig) -> Result<Self, CorrectionError> {
        Self::new(CorrectionTable::from_config(config), config.match_mode.into())
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn correct(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut prev: Option<char> = None;
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            if self.may_match_after(prev) {
                if let Some((wrong, right)) = self
                    .rules
                    .iter()
                    .find(|(wrong, _)| rest.starts_with(wrong.as_str()))
                {
                    out.push_str(right);
                    prev = right.chars().last();
                    rest = &rest[wrong.len()..];
                    continue;
                }
            }
            out.push(c);
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
        }

        out
    }

    fn may_match_after(&self, prev: Option<char>) -> bool {
        match self.mode {
            MatchMode::Substring => true,
            MatchMode::TokenStart => {
                prev.is_none_or(|c| c.is_whitespace() || c.is_ascii_punctuation() || is_cjk_punct(c))
            }
        }
    }
}

impl Default for TextCorrector {
    fn default() -> Self {
        let mut rules = CorrectionTable::builtin().pairs;
        sort_longest_first(&mut rules);
        Self {
            rules,
            mode: MatchMode::Substring,
        }
    }
}

fn sort_longest_first(rules: &mut [(String, String)]) {
    rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
}

/// Whether `wrong` can be laid over `right` so that they share at least one
/// character, agree on the shared span, and `wrong` sticks out past an edge of
/// `right`. Such a `wrong` can appear in corrected output once the text around
/// the replacement supplies its remaining characters.
fn overlaps_across_seam(right: &str, wrong: &str) -> bool {
    let r: Vec<char> = right.chars().collect();
    let w: Vec<char> = wrong.chars().collect();
    let (r_len, w_len) = (r.len() as isize, w.len() as isize);

    // `offset` is where w[0] lands relative to r[0].
    (1 - w_len..r_len).any(|offset| {
        let inside = offset >= 0 && offset + w_len <= r_len;
        let start = offset.max(0);
        let end = (offset + w_len).min(r_len);
        !inside
            && start < end
            && (start..end).all(|i| r[i as usize] == w[(i - offset) as usize])
    })
}

fn is_cjk_punct(c: char) -> bool {
    matches!(c, '「' | '」' | '『' | '』' | '“' | '”' | '‘' | '’' | '…' | '、' | '。' | '·')
}
