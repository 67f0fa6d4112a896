use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use whatlang::Script;

/// Minimum confidence below which a summary is flagged for review.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Verdict of the fact-verification guard for one generated summary.
///
/// Advisory only: the guard never errors and never blocks the pipeline.
/// A flagged summary is still persisted, with `needs_review` set so that
/// downstream review decides final publication quality.
#[derive(Clone, Debug)]
pub struct Verification {
    pub needs_review: bool,
    pub issues: Vec<String>,
    pub confidence: f64,
    pub verified_facts: usize,
    pub total_facts: usize,
    /// True when the summary's script is outside what the heuristics can
    /// judge and the check was skipped entirely.
    pub skipped: bool,
}

impl Verification {
    fn skipped() -> Self {
        Verification {
            needs_review: false,
            issues: Vec::new(),
            confidence: 1.0,
            verified_facts: 0,
            total_facts: 0,
            skipped: true,
        }
    }
}

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("invalid number pattern"));

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    let months = "january|february|march|april|may|june|july|august|september|october|november|december";
    Regex::new(&format!(
        r"(?ix)
        \b(?:{m})\s+\d{{1,2}},\s*\d{{4}}\b   # March 5, 2024
        | \b\d{{1,2}}\s+(?:{m})\s+\d{{4}}\b  # 5 March 2024
        | \b(?:{m})\s+\d{{4}}\b              # March 2024
        | \b\d{{4}}-\d{{2}}-\d{{2}}\b        # 2024-03-05
        | \b\d{{1,2}}/\d{{1,2}}/\d{{2,4}}\b  # 3/5/2024
        ",
        m = months
    ))
    .expect("invalid date pattern")
});

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z'’\-]+(?:\s+[A-Z][A-Za-z'’\-]+)+\b")
        .expect("invalid entity pattern")
});

/// Capitalized words that usually start a sentence rather than a name.
const ENTITY_STOPLIST: &[&str] = &[
    "The", "A", "An", "In", "On", "At", "It", "He", "She", "They", "We", "You", "This", "That",
    "These", "Those", "But", "And", "Or", "If", "When", "While", "After", "Before", "As", "By",
    "For", "From", "With", "However", "Meanwhile", "According", "Despite", "Although", "Since",
    "Last", "Earlier", "Later", "Officials", "Police", "Authorities",
];

/// Extracts normalized numeric tokens (commas stripped) from text.
fn extract_numbers(text: &str) -> HashSet<String> {
    NUMBER_RE
        .find_iter(text)
        .map(|m| m.as_str().replace(',', ""))
        .collect()
}

/// Extracts normalized date tokens (lowercased, commas stripped,
/// whitespace collapsed) from text.
fn extract_dates(text: &str) -> HashSet<String> {
    DATE_RE
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .to_lowercase()
                .replace(',', "")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Extracts capitalized multi-word entity candidates from text.
///
/// Leading stoplist words are stripped (so "The White House" survives as
/// "White House"); whatever drops below two words is discarded.
fn extract_entities(text: &str) -> HashSet<String> {
    let mut entities = HashSet::new();

    for m in ENTITY_RE.find_iter(text) {
        let mut words: Vec<&str> = m.as_str().split_whitespace().collect();

        while let Some(&first) = words.first() {
            if ENTITY_STOPLIST.contains(&first) {
                words.remove(0);
            } else {
                break;
            }
        }

        if words.len() >= 2 {
            entities.insert(words.join(" "));
        }
    }

    entities
}

/// Checks whether a summary entity is corroborated by any source entity.
///
/// Exact match, or substring containment in either direction, all
/// case-insensitive; this tolerates surname-only and abbreviated-title
/// references.
fn entity_is_verified(entity: &str, source_entities: &HashSet<String>) -> bool {
    let lower = entity.to_lowercase();

    source_entities.iter().any(|source| {
        let source_lower = source.to_lowercase();
        source_lower == lower || source_lower.contains(&lower) || lower.contains(&source_lower)
    })
}

/// Screens a generated summary against the source texts it was derived from.
///
/// Extracts numbers, dates, and capitalized multi-word entities from both
/// sides; any summary fact absent from the union of source facts becomes
/// an issue. Confidence is the verified fraction, defined as 1.0 for a
/// fact-free summary. A summary is flagged when confidence falls below
/// the threshold or when any issue was recorded at all, since one
/// fabricated statistic is disqualifying regardless of the overall ratio.
///
/// Summaries in a non-Latin script skip the check: the heuristics are
/// Latin-script-oriented and would produce false flags.
pub fn validate(summary_text: &str, source_texts: &[String]) -> Verification {
    if let Some(script) = whatlang::detect_script(summary_text) {
        if script != Script::Latin {
            return Verification::skipped();
        }
    }

    let combined_sources = source_texts.join("\n");

    let summary_numbers = extract_numbers(summary_text);
    let summary_dates = extract_dates(summary_text);
    let summary_entities = extract_entities(summary_text);

    let source_numbers = extract_numbers(&combined_sources);
    let source_dates = extract_dates(&combined_sources);
    let source_entities = extract_entities(&combined_sources);

    let mut issues = Vec::new();
    let mut verified = 0;
    let total = summary_numbers.len() + summary_dates.len() + summary_entities.len();

    for number in &summary_numbers {
        if source_numbers.contains(number) {
            verified += 1;
        } else {
            issues.push(format!("Unverified number in summary: {}", number));
        }
    }

    for date in &summary_dates {
        if source_dates.contains(date) {
            verified += 1;
        } else {
            issues.push(format!("Unverified date in summary: {}", date));
        }
    }

    for entity in &summary_entities {
        if entity_is_verified(entity, &source_entities) {
            verified += 1;
        } else {
            issues.push(format!("Unverified entity in summary: {}", entity));
        }
    }

    // A summary with no checkable facts cannot be penalized.
    let confidence = if total == 0 {
        1.0
    } else {
        verified as f64 / total as f64
    };

    Verification {
        needs_review: confidence < CONFIDENCE_THRESHOLD || !issues.is_empty(),
        issues,
        confidence,
        verified_facts: verified,
        total_facts: total,
        skipped: false,
    }
}
