//! Reply parser — turns a model reply into one directive.
//!
//! Replies are line-oriented. A reply may open with `PLAN:` (shown to the
//! user, not acted on) and `THOUGHT:` (reasoning), and carries at most one
//! decisive tag: `ACTION:`, `ASK:`, `DONE:`, or `STUCK:`. The first
//! decisive tag wins; later ones, including extra `ACTION` lines, are
//! ignored. A reply with reasoning but no decisive tag parses to
//! [`Directive::Continue`]; a reply with no recognized tag at all parses to
//! [`Directive::Untagged`] so the loop can push back instead of silently
//! dropping it.

use wardclaw_core::Params;

/// What the reply asks the loop to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Invoke one tool or action with named parameters.
    Action { name: String, params: Params },
    /// Pause and put a question to the user.
    Ask(String),
    /// Terminal success with a summary.
    Done(String),
    /// Terminal non-success; the model cannot proceed.
    Stuck(String),
    /// Reasoning only; keep looping.
    Continue,
    /// No recognized tag anywhere in the reply.
    Untagged,
    /// A decisive tag was present but its payload did not parse.
    Malformed(String),
}

/// A fully parsed reply.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    pub plan: Option<String>,
    pub thought: Option<String>,
    pub directive: Directive,
}

/// Parse one model reply.
pub fn parse_reply(text: &str) -> ParsedReply {
    let mut plan: Option<String> = None;
    let mut thought: Option<String> = None;
    let mut directive: Option<Directive> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("PLAN:") {
            if plan.is_none() {
                plan = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("THOUGHT:") {
            if thought.is_none() {
                thought = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("ACTION:") {
            if directive.is_none() {
                directive = Some(parse_action(rest.trim()));
            }
        } else if let Some(rest) = line.strip_prefix("ASK:") {
            if directive.is_none() {
                directive = Some(Directive::Ask(rest.trim().to_string()));
            }
        } else if let Some(rest) = line.strip_prefix("DONE:") {
            if directive.is_none() {
                directive = Some(Directive::Done(rest.trim().to_string()));
            }
        } else if let Some(rest) = line.strip_prefix("STUCK:") {
            if directive.is_none() {
                directive = Some(Directive::Stuck(rest.trim().to_string()));
            }
        }
        // Anything else is free text around the tags; ignored.
    }

    let directive = directive.unwrap_or(if plan.is_some() || thought.is_some() {
        Directive::Continue
    } else {
        Directive::Untagged
    });

    ParsedReply {
        plan,
        thought,
        directive,
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse an ACTION payload: `name(key=value, key="quoted, value")` or a
/// bare `name` with no parameters. All values come out as strings; the
/// target callable interprets them.
fn parse_action(payload: &str) -> Directive {
    let payload = payload.trim();
    if payload.is_empty() {
        return Directive::Malformed("ACTION line carries no payload".into());
    }

    let Some(open) = payload.find('(') else {
        // Bare name, no parameters
        if valid_name(payload) {
            return Directive::Action {
                name: payload.to_string(),
                params: Params::new(),
            };
        }
        return Directive::Malformed(format!("invalid action name '{payload}'"));
    };

    let Some(close) = payload.rfind(')') else {
        return Directive::Malformed("unbalanced parentheses in ACTION".into());
    };
    if close < open {
        return Directive::Malformed("unbalanced parentheses in ACTION".into());
    }

    let name = payload[..open].trim();
    if !valid_name(name) {
        return Directive::Malformed(format!("invalid action name '{name}'"));
    }

    let mut params = Params::new();
    for part in split_args(&payload[open + 1..close]) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some(eq) = part.find('=') else {
            return Directive::Malformed(format!("expected key=value, got '{part}'"));
        };
        let key = part[..eq].trim();
        if key.is_empty() {
            return Directive::Malformed(format!("empty parameter name in '{part}'"));
        }
        let value = unquote(part[eq + 1..].trim());
        params.insert(key.to_string(), serde_json::Value::String(value));
    }

    Directive::Action {
        name: name.to_string(),
        params,
    }
}

/// Split on commas that are not inside double quotes.
fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}
