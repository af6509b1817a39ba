//! Instruction texts the engine injects into a room, and small text helpers.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use agora_core::ids::MessageId;
use agora_core::messages::Message;

/// Author of the system messages the engine itself broadcasts.
pub const HOST: &str = "Host";
/// Author of periodic time announcements.
pub const TIMER: &str = "Timer";

pub const OPENING_INSTRUCTION: &str = "The session has started. Orientador: explain the objective \
of the discussion and invite the participants to share their first positions.";

pub const INACTIVITY_INSTRUCTION: &str = "Inactivity detected: nobody has written for a while. \
Orientador: encourage participation with a short, concrete question about the topic.";

pub const INACTIVITY_FALLBACK: &str =
    "The room has been quiet for a while. Share your view to keep the discussion going.";

static MENTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)@orientador\b").ok());

/// Whether a message addresses the moderator-in-chief directly.
pub fn is_mention(text: &str) -> bool {
    MENTION.as_ref().is_some_and(|re| re.is_match(text))
}

/// Context block broadcast when a session opens.
pub fn session_context(topic: &str, participants: &[String], language: &str) -> String {
    let people = if participants.is_empty() {
        "none".to_string()
    } else {
        participants
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "=== SESSION CONTEXT ===\n\
         TOPIC: {topic}\n\
         LANGUAGE: {language}\n\n\
         PARTICIPANTS:\n{people}\n\n\
         INSTRUCTIONS:\n\
         1. Every intervention must stay aligned with the TOPIC.\n\
         2. Answer in {language}."
    )
}

/// Default text shown for a milestone when the moderator stays silent.
pub fn milestone_base_text(pct: u8) -> String {
    match pct {
        25 => "A quarter of the time has elapsed.".to_string(),
        50 => "Half of the time has elapsed.".to_string(),
        75 => "A quarter of the time remains.".to_string(),
        100 => "Time is up.".to_string(),
        n => format!("Milestone {n}% reached."),
    }
}

pub fn milestone_instruction(
    pct: u8,
    base_text: &str,
    elapsed: Duration,
    remaining: Duration,
) -> String {
    let ask = if pct >= 100 {
        "close the discussion with a brief synthesis of the positions presented"
    } else {
        "briefly summarize the progress and guide the participants for the time left"
    };
    format!(
        "Time milestone {pct}%: {base_text}\n\
         - Elapsed: {}\n\
         - Remaining: {}\n\
         Orientador: {ask}.",
        format_clock(elapsed),
        format_clock(remaining),
    )
}

pub fn time_update(elapsed: Duration, remaining: Duration) -> String {
    format!(
        "**Time update**\n- Elapsed: {}\n- Remaining: {}",
        format_clock(elapsed),
        format_clock(remaining)
    )
}

/// One message summarizing a full window, oldest first.
pub fn window_summary(messages: &[Message]) -> String {
    let mut text = format!("Last {} messages of the discussion:", messages.len());
    for m in messages {
        text.push_str(&format!("\n- {}: {}", m.author, m.content));
    }
    text
}

pub fn threshold_review(ids: &[MessageId]) -> String {
    let listed = ids.iter().map(MessageId::as_str).collect::<Vec<_>>().join(", ");
    format!(
        "{} new messages since the last review ({listed}). \
         Curator: evaluate whether the discussion needs an intervention.",
        ids.len()
    )
}

/// `MM:SS`, or `H:MM:SS` from one hour up.
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Normalize a user-supplied author name for use as a message author.
pub fn sanitize_author(raw: &str) -> String {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join("_");
    let clean: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    if clean.is_empty() {
        "user".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_detection() {
        assert!(MENTION.is_some());
        assert!(is_mention("@orientador what now?"));
        assert!(is_mention("hey @Orientador, help"));
        assert!(is_mention("@ORIENTADOR"));
        assert!(!is_mention("@orientadora please"));
        assert!(!is_mention("orientador without at-sign"));
    }

    #[test]
    fn context_lists_participants() {
        let text = session_context("energy", &["ana".into(), "luis".into()], "Spanish");
        assert!(text.contains("TOPIC: energy"));
        assert!(text.contains("- ana\n- luis"));
        assert!(text.contains("Answer in Spanish."));
    }

    #[test]
    fn context_without_participants() {
        assert!(session_context("t", &[], "English").contains("PARTICIPANTS:\nnone"));
    }

    #[test]
    fn milestone_texts() {
        assert_eq!(milestone_base_text(50), "Half of the time has elapsed.");
        assert_eq!(milestone_base_text(100), "Time is up.");
        assert_eq!(milestone_base_text(90), "Milestone 90% reached.");
    }

    #[test]
    fn milestone_instruction_mentions_times() {
        let text = milestone_instruction(
            25,
            "A quarter of the time has elapsed.",
            Duration::from_secs(150),
            Duration::from_secs(450),
        );
        assert!(text.contains("02:30"));
        assert!(text.contains("07:30"));
        assert!(text.contains("guide the participants"));
        let closing = milestone_instruction(100, "Time is up.", Duration::ZERO, Duration::ZERO);
        assert!(closing.contains("close the discussion"));
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(Duration::from_secs(0)), "00:00");
        assert_eq!(format_clock(Duration::from_secs(65)), "01:05");
        assert_eq!(format_clock(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn author_sanitizing() {
        assert_eq!(sanitize_author("  Ana  María "), "Ana_María");
        assert_eq!(sanitize_author("bob<script>"), "bobscript");
        assert_eq!(sanitize_author("j.doe-2"), "j.doe-2");
        assert_eq!(sanitize_author("  !!  "), "user");
    }

    #[test]
    fn window_summary_lists_messages() {
        let text = window_summary(&[Message::user("ana", "one"), Message::user("luis", "two")]);
        assert!(text.starts_with("Last 2 messages"));
        assert!(text.contains("- ana: one\n- luis: two"));
    }

    #[test]
    fn threshold_review_lists_ids() {
        let ids = vec![MessageId::from_raw("m1"), MessageId::from_raw("m2")];
        let text = threshold_review(&ids);
        assert!(text.starts_with("2 new messages"));
        assert!(text.contains("(m1, m2)"));
    }
}
