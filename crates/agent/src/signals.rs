//! Deterministic lexical signals over the evidence gathered for one invocation.
//!
//! The offline reasoner, the signal classifier and the template strategies all read the same
//! [`SignalReport`], so an invocation is scored once and described consistently.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use betweenus_core::domain::conversation::SearchResult;
use betweenus_core::domain::evidence::EvidenceLog;
use serde_json::Value;

const DEADLINE_WORDS: &[&str] = &[
    "deadline",
    "due",
    "eta",
    "release",
    "ship",
    "shipping",
    "launch",
    "cutoff",
    "freeze",
    "milestone",
    "sprint",
    "timeline",
    "schedule",
];

const DATE_WORDS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "today",
    "tomorrow",
    "tonight",
    "eod",
    "eow",
    "january",
    "february",
    "march",
    "april",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const REFERENCE_WORDS: &[&str] = &[
    "doc",
    "docs",
    "document",
    "ticket",
    "jira",
    "spec",
    "specs",
    "requirements",
    "roadmap",
    "data",
    "metrics",
    "benchmark",
    "estimate",
    "estimates",
    "version",
    "changelog",
    "calendar",
    "contract",
    "budget",
    "report",
    "dashboard",
    "logs",
    "commit",
    "pr",
    "api",
    "tests",
    "build",
    "bug",
];

const ACCUSATION_PHRASES: &[&str] = &[
    "you always",
    "you never",
    "your fault",
    "you don't care",
    "you dont care",
    "you ignored",
    "you ignore",
    "you didn't even",
    "you don't listen",
    "you dont listen",
    "under the bus",
    "not my fault",
    "blame me",
    "blaming me",
    "as usual",
    "tired of",
    "sick of",
    "fed up",
    "can't believe",
];

const FEELING_WORDS: &[&str] = &[
    "frustrated",
    "frustrating",
    "annoyed",
    "annoying",
    "angry",
    "upset",
    "hurt",
    "unfair",
    "ridiculous",
    "unacceptable",
    "disrespectful",
    "disrespect",
    "insulting",
    "rude",
    "blame",
    "blamed",
    "fault",
    "ignored",
    "dismissive",
    "whatever",
    "seriously",
    "ugh",
    "hate",
    "furious",
    "offended",
    "betrayed",
    "undermined",
    "overlooked",
    "incompetent",
    "lazy",
    "useless",
];

const TOPIC_WORDS: &[&str] = &[
    "release",
    "launch",
    "project",
    "migration",
    "deadline",
    "design",
    "review",
    "sprint",
    "customer",
    "demo",
    "presentation",
    "report",
    "feature",
    "rollout",
    "deployment",
];

const ACCUSATION_WEIGHT: u32 = 2;

/// A message as the engine sees it, with the author's name resolved when known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptLine {
    pub author: String,
    pub text: String,
}

/// A sentence attributed to its author.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    pub author: String,
    pub sentence: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalReport {
    pub message_count: usize,
    pub participants: Vec<String>,
    pub fact_score: u32,
    pub emotion_score: u32,
    pub factual_markers: Vec<String>,
    pub emotional_markers: Vec<String>,
    pub deadline_mentioned: bool,
    pub dates: Vec<String>,
    pub references: Vec<String>,
    pub claims: Vec<Quote>,
    pub charged: Vec<Quote>,
    pub focus: Option<String>,
    pub findings: Vec<SearchResult>,
    pub degraded_tools: Vec<String>,
}

impl SignalReport {
    /// More than one concrete date is cited while a deadline is being discussed.
    pub fn deadline_disputed(&self) -> bool {
        self.deadline_mentioned && self.dates.len() >= 2
    }

    pub fn has_history(&self) -> bool {
        self.message_count > 0
    }

    pub fn participants_phrase(&self) -> String {
        join_names(&self.participants)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, evidence: &EvidenceLog) -> SignalReport {
        let lines = transcript(evidence);
        let mut report = self.extract_lines(&lines);
        report.findings = search_findings(evidence);
        report.degraded_tools = evidence
            .iter()
            .filter(|record| record.observation.failure().is_some())
            .filter_map(|record| record.action.tool_name().map(str::to_owned))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report
    }

    pub fn extract_lines(&self, lines: &[TranscriptLine]) -> SignalReport {
        let mut report = SignalReport { message_count: lines.len(), ..SignalReport::default() };
        let mut factual = BTreeSet::new();
        let mut emotional = BTreeSet::new();
        let mut references = BTreeSet::new();
        let mut topics = BTreeMap::<&'static str, u32>::new();

        for line in lines {
            if !report.participants.contains(&line.author) {
                report.participants.push(line.author.clone());
            }

            for sentence in split_sentences(&line.text) {
                let normalized = normalize_text(&sentence);
                let tokens = tokenize(&sentence);

                let mut sentence_fact = 0;
                for token in &tokens {
                    let lower = token.to_lowercase();
                    if DEADLINE_WORDS.contains(&lower.as_str()) {
                        report.deadline_mentioned = true;
                        factual.insert(lower.clone());
                        sentence_fact += 1;
                    } else if DATE_WORDS.contains(&lower.as_str()) || is_date_token(&lower) {
                        push_unique(&mut report.dates, capitalize(&lower));
                        factual.insert(lower.clone());
                        sentence_fact += 1;
                    } else if REFERENCE_WORDS.contains(&lower.as_str()) {
                        references.insert(lower.clone());
                        factual.insert(lower.clone());
                        sentence_fact += 1;
                    } else if is_figure_token(&lower) {
                        factual.insert("figures".to_owned());
                        sentence_fact += 1;
                    }

                    if let Some(topic) = TOPIC_WORDS.iter().find(|topic| **topic == lower) {
                        *topics.entry(topic).or_default() += 1;
                    }
                }

                let mut sentence_emotion = 0;
                for phrase in ACCUSATION_PHRASES {
                    if normalized.contains(&format!(" {phrase} ")) {
                        emotional.insert((*phrase).to_owned());
                        sentence_emotion += ACCUSATION_WEIGHT;
                    }
                }
                for token in &tokens {
                    let lower = token.to_lowercase();
                    if FEELING_WORDS.contains(&lower.as_str()) {
                        emotional.insert(lower);
                        sentence_emotion += 1;
                    } else if is_shouting(token) {
                        emotional.insert("shouting".to_owned());
                        sentence_emotion += 1;
                    }
                }
                if sentence.contains("!!") {
                    emotional.insert("exclamations".to_owned());
                    sentence_emotion += 1;
                }

                report.fact_score += sentence_fact;
                report.emotion_score += sentence_emotion;

                let quote = Quote { author: line.author.clone(), sentence: sentence.clone() };
                if sentence_fact > 0 {
                    report.claims.push(quote.clone());
                }
                if sentence_emotion > 0 {
                    report.charged.push(quote);
                }
            }
        }

        report.factual_markers = factual.into_iter().collect();
        report.emotional_markers = emotional.into_iter().collect();
        report.references = references.into_iter().collect();
        report.focus = topics
            .into_iter()
            .max_by(|left, right| left.1.cmp(&right.1).then_with(|| right.0.cmp(left.0)))
            .map(|(topic, _)| topic.to_owned());
        report
    }
}

/// Messages recovered from history and digest payloads, oldest first, without repeats. Author
/// ids are replaced by names resolved through `user_info` or `list_channel_members`.
pub fn transcript(evidence: &EvidenceLog) -> Vec<TranscriptLine> {
    let names = resolved_names(evidence);
    let mut seen = BTreeSet::new();
    let mut lines = Vec::new();

    let history = evidence
        .payloads_for("fetch_history")
        .filter_map(|payload| payload.get("messages").and_then(Value::as_array));
    let digests = evidence
        .payloads_for("channel_digest")
        .filter_map(|payload| payload.get("recent").and_then(Value::as_array));

    for message in history.chain(digests).flatten() {
        let author = message.get("author").and_then(Value::as_str).unwrap_or("unknown");
        let text = message.get("text").and_then(Value::as_str).unwrap_or_default();
        let timestamp = message.get("timestamp").and_then(Value::as_str).unwrap_or_default();
        if text.trim().is_empty() || !seen.insert((author, text, timestamp)) {
            continue;
        }
        let author = names.get(author).cloned().unwrap_or_else(|| author.to_owned());
        lines.push(TranscriptLine { author, text: text.trim().to_owned() });
    }

    lines
}

fn resolved_names(evidence: &EvidenceLog) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for payload in evidence.payloads_for("list_channel_members") {
        for member in payload.get("members").and_then(Value::as_array).into_iter().flatten() {
            if let (Some(id), Some(name)) =
                (member.get("id").and_then(Value::as_str), member.get("name").and_then(Value::as_str))
            {
                names.insert(id.to_owned(), name.to_owned());
            }
        }
    }
    for payload in evidence.payloads_for("user_info") {
        if let (Some(id), Some(name)) =
            (payload.get("id").and_then(Value::as_str), payload.get("name").and_then(Value::as_str))
        {
            names.insert(id.to_owned(), name.to_owned());
        }
    }
    names
}

fn search_findings(evidence: &EvidenceLog) -> Vec<SearchResult> {
    evidence
        .payloads_for("web_search")
        .filter_map(|payload| payload.get("results").cloned())
        .filter_map(|results| serde_json::from_value::<Vec<SearchResult>>(results).ok())
        .flatten()
        .collect()
}

/// Splits text into sentences on `.`, `!` and `?` followed by whitespace or the end of text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(character) = chars.next() {
        current.push(character);
        if matches!(character, '.' | '!' | '?') {
            while let Some(next) = chars.peek().copied() {
                if matches!(next, '.' | '!' | '?' | '"' | '\'' | ')') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().map_or(true, |next| next.is_whitespace()) {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_owned());
                }
                current.clear();
            }
        } else if character == '\n' {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_owned());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_owned());
    }
    sentences
}

/// Lowercased words (letters, digits, apostrophes) padded with spaces for phrase matching.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len() + 2);
    normalized.push(' ');
    for word in text
        .to_lowercase()
        .replace('\u{2019}', "'")
        .split(|character: char| !(character.is_alphanumeric() || character == '\''))
        .filter(|word| !word.is_empty())
    {
        normalized.push_str(word);
        normalized.push(' ');
    }
    normalized
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| {
        character.is_whitespace() || matches!(character, ',' | ';' | ':' | '!' | '?' | '(' | ')' | '"')
    })
    .map(|token| token.trim_matches(|character: char| matches!(character, '.' | '\'' | '*' | '_')))
    .filter(|token| !token.is_empty())
    .map(str::to_owned)
    .collect()
}

fn is_date_token(token: &str) -> bool {
    let digits = token.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 2 {
        let suffix = &token[digits..];
        if matches!(suffix, "st" | "nd" | "rd" | "th") {
            return true;
        }
    }

    let parts = token.split(['/', '-']).collect::<Vec<_>>();
    parts.len() >= 2
        && parts.iter().all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn is_figure_token(token: &str) -> bool {
    let stripped = token.trim_start_matches(['v', '$']).trim_end_matches(['%', 'k']);
    !stripped.is_empty()
        && stripped.chars().any(|c| c.is_ascii_digit())
        && stripped.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn is_shouting(token: &str) -> bool {
    let letters = token.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 4
        && token.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
        && token.chars().any(char::is_alphabetic)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// "A", "A and B", "A, B and C".
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => "the participants".to_owned(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
