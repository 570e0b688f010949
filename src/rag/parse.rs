//! Text-matching rules for generated answers.
//!
//! Everything pattern-shaped lives here: response cleanup, the
//! suggested-question block grammar, and the phrase sets that decide whether
//! a generated answer offers help or admits defeat. Orchestration code never
//! touches the patterns directly, so the rules can change in one place.

use regex::Regex;

/// Appended when the model forgot to offer further help.
const CLOSING_LINE: &str =
    "Please let me know if you need any further clarification or have additional questions.";

/// An answer containing any of these already closes with an offer of help.
const CLOSING_PHRASES: [&str; 7] = [
    "let me know",
    "assist you further",
    "additional questions",
    "help you",
    "support you",
    "feel free",
    "clarification",
];

/// Substrings that mark a generated answer as a non-answer.
const UNHELPFUL_PHRASES: [&str; 5] = [
    "couldn't find specific information",
    "don't have enough information",
    "not explicitly stated",
    "not found in the documentation",
    "i cannot provide specific information",
];

pub struct ResponseParser {
    empty_bold: Regex,
    question_block: Regex,
    line_marker: Regex,
    block_header: Regex,
    blank_runs: Regex,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            empty_bold: Regex::new(r"\*\*\s*\*\*").expect("static pattern"),
            question_block: Regex::new(r"(?is)(?:Suggested|Follow-up) questions?:\n+((?:[-\d*]\s*.+\n?)+)")
                .expect("static pattern"),
            line_marker: Regex::new(r"^[-\d*\s.]+").expect("static pattern"),
            block_header: Regex::new(r"(?i)(?:Suggested|Follow-up) questions?:\n*")
                .expect("static pattern"),
            blank_runs: Regex::new(r"\n{2,}").expect("static pattern"),
        }
    }

    /// Normalize raw model output for presentation.
    ///
    /// Bullet mojibake becomes `-`, inline ` - ` separators become list
    /// lines, blank lines are dropped, and a closing offer of help is
    /// appended when the model did not include one.
    pub fn clean(&self, response: &str) -> String {
        let response = self.empty_bold.replace_all(response, "").to_string();
        let response = response.replace('\u{2022}', "-").replace(" - ", "\n- ");

        let mut cleaned = response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let lower = cleaned.to_lowercase();
        if !CLOSING_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            cleaned.push_str("\n\n");
            cleaned.push_str(CLOSING_LINE);
        }

        cleaned.trim().to_string()
    }

    /// Pull up to three follow-up questions out of a trailing
    /// "Suggested questions:" block. Only lines ending in `?` count.
    pub fn extract_suggested_questions(&self, text: &str) -> Vec<String> {
        let mut questions = Vec::new();

        if let Some(captures) = self.question_block.captures(text) {
            if let Some(block) = captures.get(1) {
                for line in block.as_str().split('\n') {
                    let clean_line = self.line_marker.replace(line, "").trim().to_string();
                    if !clean_line.is_empty() && clean_line.ends_with('?') {
                        questions.push(clean_line);
                    }
                }
            }
        }

        questions.truncate(3);
        questions
    }

    /// Remove the extracted questions and their header from the body so the
    /// follow-ups are not duplicated in the answer text.
    pub fn strip_suggested_block(&self, text: &str, questions: &[String]) -> String {
        let mut body = text.to_string();

        for question in questions {
            let pattern = format!(r"(?i)[\s\n]*[-*]?\s*{}", regex::escape(question));
            match Regex::new(&pattern) {
                Ok(re) => body = re.replace_all(&body, "").trim().to_string(),
                Err(err) => {
                    tracing::warn!("Failed to build strip pattern for follow-up: {}", err);
                }
            }
        }

        body = self.block_header.replace_all(&body, "").trim().to_string();
        self.blank_runs.replace_all(&body, "\n\n").trim().to_string()
    }

    /// True when the cleaned body admits it has no answer.
    pub fn is_unhelpful(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        UNHELPFUL_PHRASES
            .iter()
            .any(|phrase| lower.contains(phrase))
    }
}
