use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::{seq::SliceRandom, Rng};
use regex::Regex;

const ADJECTIVES: [&str; 21] = [
    "fast", "quick", "steady", "strong", "focused", "mindful", "determined", "patient", "calm",
    "active", "healthy", "vibrant", "energetic", "peaceful", "balanced", "clear", "bright",
    "fresh", "happy", "brave", "mighty",
];

const NOUNS: [&str; 21] = [
    "eagle", "tiger", "lion", "wolf", "bear", "hawk", "falcon", "dragon", "phoenix", "warrior",
    "champion", "hero", "tracker", "journey", "quest", "path", "mission", "goal", "star", "comet",
    "rocket",
];

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// ASCII digits only; `\d` would also accept other Unicode digits.
static SESSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+-[a-z]+-[0-9]{1,3}$").expect("session id pattern"));

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));

/// Generate a human-readable session id such as `fast-eagle-42`.
///
/// No uniqueness check happens here; callers that care retry against storage.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("fast");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("eagle");
    let number: u16 = rng.gen_range(0..1000);
    format!("{adjective}-{noun}-{number}")
}

pub fn is_valid_session_id(id: &str) -> bool {
    SESSION_ID_PATTERN.is_match(id)
}

/// Four-digit numeric edit token. This is an access PIN, not a secret.
pub fn generate_edit_token() -> String {
    rand::thread_rng().gen_range(1000..=9999u16).to_string()
}

/// True iff both tokens are present, non-empty, and equal.
pub fn validate_edit_token(stored: Option<&str>, provided: Option<&str>) -> bool {
    match (stored, provided) {
        (Some(stored), Some(provided)) if !stored.is_empty() && !provided.is_empty() => {
            constant_time_eq(stored.as_bytes(), provided.as_bytes())
        }
        _ => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Id for check-ins, metrics and notes: `<unix-millis>-<9 base-36 chars>`.
pub fn generate_entry_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}
