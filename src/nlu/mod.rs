//! Intent classification over normalized user text.
//!
//! The classifier is a pure function of the input plus two static marker
//! tables — no network, no randomness. Marker tables are disjoint: a phrase
//! scores for exactly one class. Scores are weighted by marker specificity
//! (multi-word and domain-specific markers weigh more than generic verbs).

pub mod translator;

use std::fmt;

/// Which downstream capability a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Free-text question for the knowledge service.
    Knowledge,
    /// Aggregate/chart request for the records service.
    Analytics,
    /// No evidence for either class; the caller must ask for clarification.
    Unrecognized,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Knowledge => write!(f, "knowledge"),
            Intent::Analytics => write!(f, "analytics"),
            Intent::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// Outcome of classifying one query. Produced once per query, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub intent: Intent,
    /// In [0,1]; 0 exactly when no marker matched.
    pub confidence: f64,
    /// Markers that matched for the winning class, in table order.
    pub evidence: Vec<String>,
}

/// (phrase, weight) — weight 2 for specific markers, 1 for generic ones.
type Marker = (&'static str, u32);

const ANALYTICS_MARKERS: &[Marker] = &[
    ("how many", 2),
    ("number of", 2),
    ("count", 2),
    ("total", 1),
    ("statistics", 2),
    ("chart", 2),
    ("graph", 2),
    ("plot", 2),
    ("visualize", 2),
    ("visualise", 2),
    ("show", 1),
    ("display", 1),
    ("cost", 2),
    ("expenditure", 2),
    ("budget", 2),
    ("spending", 2),
    ("progress", 2),
    ("completion", 2),
    ("status", 1),
    ("breakdown", 2),
    ("distribution", 2),
    ("proportion", 2),
    ("share", 1),
    ("compare", 1),
    ("comparison", 1),
    ("trend", 1),
    ("average", 2),
    ("by year", 2),
    ("by state", 2),
    ("by division", 2),
    ("by type", 2),
    ("per year", 2),
];

const KNOWLEDGE_MARKERS: &[Marker] = &[
    ("what is", 2),
    ("what are", 2),
    ("explain", 2),
    ("tell me about", 2),
    ("describe", 2),
    ("who", 1),
    ("why", 1),
    ("where", 1),
    ("how does", 2),
    ("when was", 2),
    ("website", 2),
    ("guidelines", 2),
    ("objective", 2),
    ("objectives", 2),
    ("eligibility", 2),
    ("benefits", 1),
    ("jal jeevan mission", 2),
    ("swachh bharat mission", 2),
    ("mission", 1),
];

/// Lowercase, trim, and collapse internal whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment: `phrase` must not be bordered by alphanumerics.
/// Prevents "cost" matching inside "costume".
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(phrase) {
        let at = start + pos;
        let end = at + phrase.len();
        let before_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        let after_ok = end == text.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

/// Replace whole-word abbreviations with their expansions.
/// `aliases` must be sorted; application order is then deterministic.
/// Scanning resumes after each splice, so an expansion that contains its
/// own abbreviation ("andaman" → "andaman and nicobar islands") terminates.
pub fn expand_aliases(text: &str, aliases: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (abbrev, full) in aliases {
        if abbrev == full {
            continue;
        }
        let mut search_from = 0;
        while let Some(at) = find_whole_word_from(&out, abbrev, search_from) {
            out.replace_range(at..at + abbrev.len(), full);
            search_from = at + full.len();
        }
    }
    out
}

fn find_whole_word_from(text: &str, phrase: &str, from: usize) -> Option<usize> {
    if from >= text.len() {
        return None;
    }
    let bytes = text.as_bytes();
    let mut start = from;
    while let Some(pos) = text[start..].find(phrase) {
        let at = start + pos;
        let end = at + phrase.len();
        let before_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        let after_ok = end == text.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(at);
        }
        start = at + 1;
    }
    None
}

/// Keyword/pattern classifier. Tables are fixed at construction and never
/// mutated at request time.
pub struct IntentClassifier {
    analytics: &'static [Marker],
    knowledge: &'static [Marker],
    aliases: Vec<(String, String)>,
}

impl IntentClassifier {
    pub fn new(aliases: Vec<(String, String)>) -> Self {
        Self {
            analytics: ANALYTICS_MARKERS,
            knowledge: KNOWLEDGE_MARKERS,
            aliases,
        }
    }

    /// Classify `text`. Always returns a result; zero evidence for both
    /// classes yields `Unrecognized` with confidence 0.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let normalized = expand_aliases(&normalize(text), &self.aliases);

        let (analytics_score, analytics_hits) = score(&normalized, self.analytics);
        let (knowledge_score, knowledge_hits) = score(&normalized, self.knowledge);

        if analytics_score == 0 && knowledge_score == 0 {
            return ClassificationResult {
                intent: Intent::Unrecognized,
                confidence: 0.0,
                evidence: Vec::new(),
            };
        }

        // Equal nonzero scores break toward Knowledge: it has no downstream
        // query-construction surface, so over-triggering it is the safer miss.
        let (intent, win, lose, evidence) = if analytics_score > knowledge_score {
            (Intent::Analytics, analytics_score, knowledge_score, analytics_hits)
        } else {
            (Intent::Knowledge, knowledge_score, analytics_score, knowledge_hits)
        };

        let confidence = f64::from(win) / f64::from(win + lose + 1);

        ClassificationResult { intent, confidence, evidence }
    }
}

fn score(text: &str, markers: &[Marker]) -> (u32, Vec<String>) {
    let mut total = 0;
    let mut hits = Vec::new();
    for (phrase, weight) in markers {
        if contains_phrase(text, phrase) {
            total += weight;
            hits.push((*phrase).to_string());
        }
    }
    (total, hits)
}
