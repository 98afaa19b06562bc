//! Trigger-phrase detection
//!
//! Pure transcript parsing: decides whether a transcript addresses the
//! assistant and, if so, extracts the query text. No I/O, no state.

/// The literal token that addresses the assistant.
const TRIGGER_WORD: &str = "coach";

/// How many leading tokens are scanned for the trigger word.
const TRIGGER_TOKEN_WINDOW: usize = 3;

/// Extracts the assistant query from a transcript, if it contains the trigger.
///
/// Primary rule: the trigger word appears among the first three
/// whitespace-delimited tokens (case-insensitive, non-alphabetic characters
/// stripped). The query is everything after that token, joined with single
/// spaces. Fallback rule: the transcript starts with `hey <seps> coach <seps>`
/// and the query is the remainder. An empty remainder yields no query.
pub fn extract_query(transcript: &str) -> Option<String> {
    let tokens: Vec<&str> = transcript.split_whitespace().collect();

    for (i, token) in tokens.iter().take(TRIGGER_TOKEN_WINDOW).enumerate() {
        if normalize(token) == TRIGGER_WORD {
            let remainder = tokens[i + 1..].join(" ");
            let remainder = remainder.trim();
            if remainder.is_empty() {
                return None;
            }
            return Some(remainder.to_string());
        }
    }

    hey_coach_fallback(transcript)
}

/// Lowercases a token and strips everything non-alphabetic, so "Coach!" and
/// "coach," both match the trigger word.
fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Matches `hey[, ]+coach[!,. ]+<query>` case-insensitively, for transcripts
/// where punctuation glued the trigger to its surroundings (e.g. "Hey,Coach,").
fn hey_coach_fallback(transcript: &str) -> Option<String> {
    let mut idx = eat_keyword(transcript, 0, "hey")?;
    idx = eat_separators(transcript, idx, &[',', ' '])?;
    idx = eat_keyword(transcript, idx, TRIGGER_WORD)?;
    idx = eat_separators(transcript, idx, &['!', ',', '.', ' '])?;

    let remainder = transcript[idx..].trim();
    if remainder.is_empty() {
        return None;
    }
    Some(remainder.to_string())
}

/// Consumes `keyword` at byte offset `idx`, ASCII case-insensitively.
fn eat_keyword(text: &str, idx: usize, keyword: &str) -> Option<usize> {
    let rest = text.get(idx..idx + keyword.len())?;
    if rest.eq_ignore_ascii_case(keyword) {
        Some(idx + keyword.len())
    } else {
        None
    }
}

/// Consumes one or more characters from `separators` at byte offset `idx`.
fn eat_separators(text: &str, idx: usize, separators: &[char]) -> Option<usize> {
    let rest = text.get(idx..)?;
    let consumed: usize = rest
        .chars()
        .take_while(|c| separators.contains(c))
        .map(|c| c.len_utf8())
        .sum();
    if consumed == 0 {
        return None;
    }
    Some(idx + consumed)
}
