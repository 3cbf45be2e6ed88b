//! Context budget management.
//!
//! Providers reject transcripts that overflow the model's context window,
//! so before every completion the loop runs the transcript through
//! [`trim_transcript`]. Trimming pins the first N messages (the goal and
//! any framing), then greedily keeps the newest suffix that still fits,
//! and finally splices in a synthetic recap exchange standing in for the
//! evicted middle. Estimation uses the same ~4-chars-per-token heuristic
//! as [`Message::estimated_tokens`], deliberately rough but consistent on
//! both sides of the budget math.

use wardclaw_config::AgentConfig;
use wardclaw_core::{AgentError, Message, Role};

const TOPIC_CHARS: usize = 60;
const MAX_RECAP_TOPICS: usize = 6;

/// Budget parameters for one trim pass.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Model context window, in estimated tokens.
    pub context_limit: usize,
    /// Tokens held back for the model's own reply.
    pub reserved_response_tokens: usize,
    /// Leading messages never evicted.
    pub pin_first_n: usize,
    /// Splice a recap exchange in place of evicted history.
    pub summarize: bool,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            context_limit: 100_000,
            reserved_response_tokens: 4096,
            pin_first_n: 2,
            summarize: true,
        }
    }
}

impl ContextBudget {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            context_limit: config.context_limit,
            reserved_response_tokens: config.reserved_response_tokens,
            pin_first_n: config.pin_first_messages,
            summarize: config.summarize_on_trim,
        }
    }

    /// Tokens actually available for the transcript.
    fn usable(&self) -> usize {
        self.context_limit
            .saturating_sub(self.reserved_response_tokens)
    }
}

/// Outcome of one trim pass.
#[derive(Debug, Clone)]
pub struct TrimResult {
    /// The transcript to send, possibly with a recap exchange spliced in.
    pub messages: Vec<Message>,
    /// Whether anything was evicted.
    pub trimmed: bool,
    /// How many original messages were dropped.
    pub removed_count: usize,
    /// Estimated token cost of `messages`, recap included.
    pub final_tokens: usize,
}

/// Estimated token cost of a message slice.
pub fn estimate_transcript(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.estimated_tokens()).sum()
}

/// Fit a transcript into the budget.
///
/// The first `pin_first_n` messages are always kept. From the rest, the
/// newest contiguous suffix that fits is kept; everything between the
/// pinned prefix and that suffix is evicted. With `summarize` on, a
/// two-message recap exchange is inserted after the pinned prefix, and
/// its own token cost counts against the budget.
///
/// Fails with [`AgentError::BudgetExceeded`] only when the pinned prefix
/// alone overflows the budget; there is nothing left to evict.
pub fn trim_transcript(
    messages: &[Message],
    budget: &ContextBudget,
) -> Result<TrimResult, AgentError> {
    let limit = budget.usable();
    let total = estimate_transcript(messages);

    if total <= limit {
        return Ok(TrimResult {
            messages: messages.to_vec(),
            trimmed: false,
            removed_count: 0,
            final_tokens: total,
        });
    }

    let pin = budget.pin_first_n.min(messages.len());
    let pinned_tokens = estimate_transcript(&messages[..pin]);
    if pinned_tokens > limit {
        return Err(AgentError::BudgetExceeded {
            reason: format!(
                "pinned prefix alone needs {pinned_tokens} tokens but only {limit} fit"
            ),
        });
    }

    // Walk backwards from the newest message, keeping while it fits. Stop
    // at the first message that does not fit so the kept tail stays
    // contiguous.
    let mut kept_start = messages.len();
    let mut kept_tokens = 0usize;
    for i in (pin..messages.len()).rev() {
        let cost = messages[i].estimated_tokens();
        if pinned_tokens + kept_tokens + cost <= limit {
            kept_tokens += cost;
            kept_start = i;
        } else {
            break;
        }
    }

    let mut removed_count = kept_start - pin;
    let mut recap: Option<(Message, Message)> = None;

    if budget.summarize && removed_count > 0 {
        let pair = recap_exchange(&messages[pin..kept_start]);
        let recap_tokens = pair.0.estimated_tokens() + pair.1.estimated_tokens();

        // Make room for the recap itself, evicting from the old end of
        // the kept tail if necessary.
        while kept_start < messages.len()
            && pinned_tokens + kept_tokens + recap_tokens > limit
        {
            kept_tokens -= messages[kept_start].estimated_tokens();
            kept_start += 1;
            removed_count += 1;
        }
        if pinned_tokens + kept_tokens + recap_tokens <= limit {
            recap = Some(pair);
        }
    }

    let mut result = Vec::with_capacity(pin + 2 + (messages.len() - kept_start));
    result.extend_from_slice(&messages[..pin]);
    if let Some((ask, answer)) = recap {
        result.push(ask);
        result.push(answer);
    }
    result.extend_from_slice(&messages[kept_start..]);

    let final_tokens = estimate_transcript(&result);
    Ok(TrimResult {
        messages: result,
        trimmed: true,
        removed_count,
        final_tokens,
    })
}

/// Build the synthetic exchange that stands in for evicted history. The
/// recap names the user's evicted topics so the model keeps some thread
/// of what already happened.
fn recap_exchange(evicted: &[Message]) -> (Message, Message) {
    let topics: Vec<String> = evicted
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.content.lines().next())
        .map(head_chars)
        .take(MAX_RECAP_TOPICS)
        .collect();

    let summary = if topics.is_empty() {
        "Earlier assistant reasoning and observations were trimmed to fit the context window."
            .to_string()
    } else {
        format!("Earlier messages covered: {}.", topics.join("; "))
    };

    (
        Message::user("Recap the earlier conversation."),
        Message::assistant(summary),
    )
}

fn head_chars(line: &str) -> String {
    if line.chars().count() <= TOPIC_CHARS {
        line.to_string()
    } else {
        let head: String = line.chars().take(TOPIC_CHARS).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    fn sample_transcript(turns: usize) -> Vec<Message> {
        let mut messages = vec![
            msg(Role::System, "You are a careful autonomous assistant."),
            msg(Role::User, "Organize my project notes into a summary."),
        ];
        for i in 0..turns {
            messages.push(msg(
                Role::Assistant,
                &format!("THOUGHT: working through part {i} of the notes in detail"),
            ));
            messages.push(msg(
                Role::User,
                &format!("Observation: processed chunk {i} with plenty of output text"),
            ));
        }
        messages
    }

    fn tight_budget(limit: usize) -> ContextBudget {
        ContextBudget {
            context_limit: limit,
            reserved_response_tokens: 0,
            pin_first_n: 2,
            summarize: true,
        }
    }

    #[test]
    fn under_budget_passes_through() {
        let messages = sample_transcript(3);
        let result = trim_transcript(&messages, &ContextBudget::default()).unwrap();
        assert!(!result.trimmed);
        assert_eq!(result.removed_count, 0);
        assert_eq!(result.messages.len(), messages.len());
        assert_eq!(result.final_tokens, estimate_transcript(&messages));
    }

    #[test]
    fn over_budget_fits_and_accounts_for_recap() {
        let messages = sample_transcript(40);
        let budget = tight_budget(400);
        assert!(estimate_transcript(&messages) > 400);

        let result = trim_transcript(&messages, &budget).unwrap();
        assert!(result.trimmed);
        assert!(result.removed_count > 0);
        assert!(result.final_tokens <= 400);
        // final_tokens is the real cost of what we return
        assert_eq!(result.final_tokens, estimate_transcript(&result.messages));
    }

    #[test]
    fn pinned_prefix_survives_verbatim() {
        let messages = sample_transcript(40);
        let result = trim_transcript(&messages, &tight_budget(400)).unwrap();
        assert_eq!(result.messages[0].content, messages[0].content);
        assert_eq!(result.messages[1].content, messages[1].content);
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(result.messages[1].role, Role::User);
    }

    #[test]
    fn kept_tail_is_the_newest_suffix() {
        let messages = sample_transcript(40);
        let result = trim_transcript(&messages, &tight_budget(400)).unwrap();
        // The last original message always survives, and the kept tail
        // matches the end of the original transcript in order.
        let tail: Vec<&str> = result.messages[4..] // pin 2 + recap 2
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        let original_tail: Vec<&str> = messages[messages.len() - tail.len()..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tail, original_tail);
    }

    #[test]
    fn recap_exchange_sits_after_the_pin() {
        let messages = sample_transcript(40);
        let result = trim_transcript(&messages, &tight_budget(400)).unwrap();
        assert_eq!(result.messages[2].role, Role::User);
        assert_eq!(result.messages[2].content, "Recap the earlier conversation.");
        assert_eq!(result.messages[3].role, Role::Assistant);
        assert!(result.messages[3].content.starts_with("Earlier messages covered:"));
        assert!(result.messages[3].content.contains("Observation: processed chunk"));
    }

    #[test]
    fn no_recap_when_summarize_is_off() {
        let messages = sample_transcript(40);
        let mut budget = tight_budget(400);
        budget.summarize = false;
        let result = trim_transcript(&messages, &budget).unwrap();
        assert!(result.trimmed);
        assert!(
            !result
                .messages
                .iter()
                .any(|m| m.content == "Recap the earlier conversation.")
        );
    }

    #[test]
    fn oversized_pin_is_a_budget_error() {
        let mut messages = sample_transcript(5);
        messages[1].content = "x".repeat(4000);
        let err = trim_transcript(&messages, &tight_budget(100)).unwrap_err();
        match err {
            AgentError::BudgetExceeded { reason } => {
                assert!(reason.contains("pinned prefix"));
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[test]
    fn trimming_is_deterministic() {
        let messages = sample_transcript(40);
        let budget = tight_budget(400);
        let a = trim_transcript(&messages, &budget).unwrap();
        let b = trim_transcript(&messages, &budget).unwrap();
        assert_eq!(a.removed_count, b.removed_count);
        assert_eq!(a.final_tokens, b.final_tokens);
        let left: Vec<&str> = a.messages.iter().map(|m| m.content.as_str()).collect();
        let right: Vec<&str> = b.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn pin_larger_than_transcript_is_tolerated() {
        let messages = sample_transcript(1);
        let budget = ContextBudget {
            pin_first_n: 50,
            ..ContextBudget::default()
        };
        let result = trim_transcript(&messages, &budget).unwrap();
        assert!(!result.trimmed);
        assert_eq!(result.messages.len(), messages.len());
    }
}
