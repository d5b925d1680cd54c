//! Transition resolver: turns one user message into state exits and entries.
//!
//! Matching is plain case-sensitive substring containment. A keyword that is
//! part of an unrelated word still matches ("glad" fires inside "gladiator").
//! Exits are resolved before entries, and a state that exits in a pass can't
//! re-enter in the same pass.

use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;

use crate::catalog::StateCatalog;
use crate::store::{CharacterStateRecord, CUSTOM_STATE};

/// Activates the custom state with the text of the following `--span--`.
pub const CUSTOM_STATE_TOKEN: &str = "customstate";
/// Deactivates the custom state.
pub const NO_CUSTOM_STATE_TOKEN: &str = "nocustomstate";

/// What one resolved message did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub states_added: BTreeSet<String>,
    pub states_removed: BTreeSet<String>,
    /// Exit messages of states removed this pass, in catalog order.
    pub exit_messages: Vec<String>,
    pub rewritten_message: String,
    pub changed: bool,
}

impl TransitionOutcome {
    pub fn unchanged(message: &str) -> Self {
        Self {
            rewritten_message: message.to_string(),
            ..Self::default()
        }
    }

    /// Whether the message the model sees differs from what the user typed.
    pub fn rewrote(&self, original: &str) -> bool {
        self.rewritten_message != original
    }
}

pub struct TransitionResolver {
    custom_span: Regex,
}

impl TransitionResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            custom_span: Regex::new(r"(?s)--(.*?)--").context("Invalid custom state pattern")?,
        })
    }

    /// Resolve one message against a character's record, mutating it in place.
    ///
    /// Keywords are matched against the message with any custom state
    /// directive cut out, so text inside `--...--` never triggers a state.
    /// An empty message is a no-op.
    pub fn resolve(
        &self,
        catalog: &StateCatalog,
        message: &str,
        record: &mut CharacterStateRecord,
    ) -> TransitionOutcome {
        if message.trim().is_empty() {
            return TransitionOutcome::unchanged(message);
        }

        let mut outcome = TransitionOutcome::default();
        let mut working = message.to_string();
        let custom_text = self.take_custom_directive(&mut working);
        let scan = working.clone();

        // Exit scan: first matching deactivation keyword wins per state.
        for definition in catalog.iter().filter(|d| record.is_active(&d.name)) {
            let Some(keyword) = definition
                .deactivation_keywords
                .iter()
                .find(|keyword| scan.contains(keyword.as_str()))
            else {
                continue;
            };

            tracing::debug!("State '{}' exits on '{}'", definition.name, keyword);
            strip_first(&mut working, keyword);
            outcome.states_removed.insert(definition.name.clone());
            if !definition.exit_message.is_empty() {
                outcome.exit_messages.push(definition.exit_message.clone());
            }
            outcome.changed = true;
        }

        for name in &outcome.states_removed {
            record.remove(name);
        }

        // Entry scan over the whole catalog. Every matching keyword is
        // stripped even when the state is already active.
        let mut additions = Vec::new();
        for definition in catalog.iter() {
            let mut matched = false;
            for keyword in &definition.activation_keywords {
                if scan.contains(keyword.as_str()) {
                    strip_first(&mut working, keyword);
                    matched = true;
                }
            }

            if matched
                && !record.is_active(&definition.name)
                && !outcome.states_removed.contains(&definition.name)
            {
                tracing::debug!("State '{}' enters", definition.name);
                additions.push(definition.name.clone());
                outcome.changed = true;
            }
        }

        if let Some(text) = custom_text {
            if !record.has_custom_state() {
                outcome.states_added.insert(CUSTOM_STATE.to_string());
            }
            tracing::debug!("Custom state set to '{}'", text);
            record.set_custom_state(text);
            outcome.changed = true;
        }
        apply_no_custom_directive(&mut working, record, &mut outcome);

        for name in additions {
            record.active_states.insert(name.clone());
            outcome.states_added.insert(name);
        }

        outcome.rewritten_message = working;
        outcome
    }

    /// Strip a `customstate --text--` directive, returning the trimmed text.
    ///
    /// A token without a span is stripped and yields nothing.
    fn take_custom_directive(&self, working: &mut String) -> Option<String> {
        let at = find_custom_token(working.as_str())?;
        remove_span(working, at..at + CUSTOM_STATE_TOKEN.len());

        let captured = self.custom_span.captures(working.as_str()).and_then(|caps| {
            let span = caps.get(0)?.range();
            let text = caps.get(1)?.as_str().trim().to_string();
            Some((span, text))
        });
        let Some((span, text)) = captured else {
            tracing::debug!("'{}' without a --text-- span", CUSTOM_STATE_TOKEN);
            return None;
        };
        remove_span(working, span);

        if text.is_empty() {
            tracing::debug!("Ignoring empty custom state text");
            return None;
        }
        Some(text)
    }
}

fn apply_no_custom_directive(
    working: &mut String,
    record: &mut CharacterStateRecord,
    outcome: &mut TransitionOutcome,
) {
    if !strip_first(working, NO_CUSTOM_STATE_TOKEN) {
        return;
    }

    if record.remove(CUSTOM_STATE) && !outcome.states_added.remove(CUSTOM_STATE) {
        outcome.states_removed.insert(CUSTOM_STATE.to_string());
    }
    outcome.changed = true;
}

/// Position of a `customstate` token that isn't the tail of `nocustomstate`.
fn find_custom_token(text: &str) -> Option<usize> {
    let prefix = &NO_CUSTOM_STATE_TOKEN[..NO_CUSTOM_STATE_TOKEN.len() - CUSTOM_STATE_TOKEN.len()];
    text.match_indices(CUSTOM_STATE_TOKEN)
        .map(|(at, _)| at)
        .find(|&at| !text[..at].ends_with(prefix))
}

/// Remove the first occurrence of `needle`. Returns whether one was found.
fn strip_first(haystack: &mut String, needle: &str) -> bool {
    match haystack.find(needle) {
        Some(at) => {
            remove_span(haystack, at..at + needle.len());
            true
        }
        None => false,
    }
}

/// Cut `range` out of `text`, plus one adjoining blank when the cut would
/// leave a doubled blank or a blank at a line edge. The rest of the text is
/// left as typed.
fn remove_span(text: &mut String, range: Range<usize>) {
    let before = text[..range.start].chars().next_back();
    let after = text[range.end..].chars().next();
    let is_blank = |c: Option<char>| matches!(c, Some(' ' | '\t'));
    let at_line_start = matches!(before, None | Some('\n'));
    let at_line_end = matches!(after, None | Some('\n' | '\r'));

    let (mut start, mut end) = (range.start, range.end);
    if is_blank(before) && (is_blank(after) || at_line_end) {
        start -= 1;
    } else if at_line_start && is_blank(after) {
        end += 1;
    }
    text.replace_range(start..end, "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StateDefinition;

    fn catalog() -> StateCatalog {
        StateCatalog::from_definitions([
            StateDefinition::new("happy")
                .with_activation(["happy", "glad"])
                .with_deactivation(["sad", "gloomy"])
                .with_messages("You are cheerful.", "Your cheer fades."),
            StateDefinition::new("angry")
                .with_activation(["furious", "angry"])
                .with_deactivation(["calm down"])
                .with_messages("You are angry.", "You calm down."),
            StateDefinition::new("flip")
                .with_activation(["switch"])
                .with_deactivation(["switch"])
                .with_messages("Flip on.", "Flip off."),
        ])
    }

    fn active(names: &[&str]) -> CharacterStateRecord {
        CharacterStateRecord {
            active_states: names.iter().map(|s| s.to_string()).collect(),
            custom_state_text: String::new(),
        }
    }

    fn resolver() -> TransitionResolver {
        TransitionResolver::new().expect("resolver")
    }

    #[test]
    fn activation_keyword_enters_state_and_is_stripped() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "I am so happy now", &mut record);

        assert!(outcome.changed);
        assert!(record.is_active("happy"));
        assert_eq!(outcome.states_added, BTreeSet::from(["happy".to_string()]));
        assert_eq!(outcome.rewritten_message, "I am so now");
    }

    #[test]
    fn multiple_matching_keywords_add_once_and_strip_all() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "happy and glad", &mut record);

        assert_eq!(outcome.states_added.len(), 1);
        assert_eq!(outcome.rewritten_message, "and");
    }

    #[test]
    fn only_first_occurrence_of_a_keyword_is_stripped() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "happy happy", &mut record);
        assert_eq!(outcome.rewritten_message, "happy");
    }

    #[test]
    fn deactivation_keyword_exits_active_state() {
        let mut record = active(&["happy"]);
        let outcome = resolver().resolve(&catalog(), "feeling sad", &mut record);

        assert!(outcome.changed);
        assert!(!record.is_active("happy"));
        assert_eq!(outcome.states_removed, BTreeSet::from(["happy".to_string()]));
        assert_eq!(outcome.exit_messages, vec!["Your cheer fades."]);
        assert_eq!(outcome.rewritten_message, "feeling");
    }

    #[test]
    fn deactivation_keyword_for_inactive_state_does_nothing() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "feeling sad", &mut record);
        assert!(!outcome.changed);
        assert_eq!(outcome.rewritten_message, "feeling sad");
    }

    #[test]
    fn exit_wins_over_entry_in_the_same_message() {
        let mut record = active(&["happy", "flip"]);
        let outcome = resolver().resolve(&catalog(), "sad but happy, switch", &mut record);

        assert!(!record.is_active("happy"));
        assert!(!record.is_active("flip"));
        assert!(outcome.states_added.is_empty());
        assert_eq!(outcome.exit_messages, vec!["Your cheer fades.", "Flip off."]);
    }

    #[test]
    fn first_matching_exit_keyword_wins() {
        let mut record = active(&["happy"]);
        let outcome = resolver().resolve(&catalog(), "sad and gloomy", &mut record);
        assert_eq!(outcome.exit_messages.len(), 1);
        assert_eq!(outcome.rewritten_message, "and gloomy");
    }

    #[test]
    fn already_active_state_is_not_re_added_but_keyword_is_stripped() {
        let mut record = active(&["angry"]);
        let outcome = resolver().resolve(&catalog(), "still furious", &mut record);
        assert!(!outcome.changed);
        assert!(outcome.states_added.is_empty());
        assert_eq!(outcome.rewritten_message, "still");
    }

    #[test]
    fn matching_is_case_sensitive_substring() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "HAPPY", &mut record);
        assert!(!outcome.changed);

        let outcome = resolver().resolve(&catalog(), "the gladiator", &mut record);
        assert!(record.is_active("happy"));
        assert_eq!(outcome.rewritten_message, "the iator");
    }

    #[test]
    fn custom_state_directive_with_keyword() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(
            &catalog(),
            "I feel happy today, customstate --grumpy--",
            &mut record,
        );

        let rewritten = &outcome.rewritten_message;
        assert!(!rewritten.contains("happy"));
        assert!(!rewritten.contains("customstate"));
        assert!(!rewritten.contains("--grumpy--"));
        assert_eq!(rewritten, "I feel today,");
        assert!(record.has_custom_state());
        assert_eq!(record.custom_state_text, "grumpy");
        assert!(outcome.states_added.contains(CUSTOM_STATE));
        assert!(record.is_active("happy"));
    }

    #[test]
    fn keywords_inside_custom_text_do_not_trigger_states() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "customstate --happy pirate--", &mut record);

        assert_eq!(record.custom_state_text, "happy pirate");
        assert!(!record.is_active("happy"));
        assert_eq!(outcome.states_added, BTreeSet::from([CUSTOM_STATE.to_string()]));
        assert_eq!(outcome.rewritten_message, "");
    }

    #[test]
    fn stripping_keeps_indentation_and_inner_spacing() {
        let mut record = CharacterStateRecord::default();
        let message = "happy, here is code:\n    fn main() {\n        let a  =  1;\n    }\n";
        let outcome = resolver().resolve(&catalog(), message, &mut record);

        assert!(record.is_active("happy"));
        assert_eq!(
            outcome.rewritten_message,
            ", here is code:\n    fn main() {\n        let a  =  1;\n    }\n"
        );
    }

    #[test]
    fn unchanged_message_is_returned_verbatim() {
        let mut record = CharacterStateRecord::default();
        let message = "  two  spaces\tand a tab  ";
        let outcome = resolver().resolve(&catalog(), message, &mut record);
        assert!(!outcome.changed);
        assert_eq!(outcome.rewritten_message, message);
    }

    #[test]
    fn custom_state_text_is_trimmed_and_replaced() {
        let mut record = CharacterStateRecord::default();
        record.set_custom_state("sleepy");
        let outcome =
            resolver().resolve(&catalog(), "customstate -- very hungry --", &mut record);

        assert!(outcome.changed);
        assert!(outcome.states_added.is_empty());
        assert_eq!(record.custom_state_text, "very hungry");
        assert_eq!(outcome.rewritten_message, "");
    }

    #[test]
    fn custom_token_without_span_is_stripped_only() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(&catalog(), "what is customstate", &mut record);
        assert!(!record.has_custom_state());
        assert!(!outcome.changed);
        assert_eq!(outcome.rewritten_message, "what is");
    }

    #[test]
    fn no_custom_state_clears_custom_text() {
        let mut record = active(&["angry"]);
        record.set_custom_state("grumpy");
        let outcome = resolver().resolve(&catalog(), "nocustomstate please", &mut record);

        assert!(outcome.changed);
        assert!(!record.has_custom_state());
        assert!(record.custom_state_text.is_empty());
        assert!(record.is_active("angry"));
        assert!(outcome.states_removed.contains(CUSTOM_STATE));
        assert!(!outcome.rewritten_message.contains("nocustomstate"));
        assert_eq!(outcome.rewritten_message, "please");
    }

    #[test]
    fn custom_then_no_custom_in_one_message_nets_out() {
        let mut record = CharacterStateRecord::default();
        let outcome = resolver().resolve(
            &catalog(),
            "customstate --bored-- nocustomstate",
            &mut record,
        );
        assert!(!record.has_custom_state());
        assert!(!outcome.states_added.contains(CUSTOM_STATE));
        assert!(!outcome.states_removed.contains(CUSTOM_STATE));
    }

    #[test]
    fn unknown_active_state_persists_without_exit() {
        let mut record = active(&["retired"]);
        let outcome = resolver().resolve(&catalog(), "sad calm down", &mut record);
        assert!(record.is_active("retired"));
        assert!(!outcome.changed);
    }

    #[test]
    fn empty_message_is_a_no_op() {
        let mut record = active(&["happy"]);
        let before = record.clone();
        for _ in 0..2 {
            let outcome = resolver().resolve(&catalog(), "", &mut record);
            assert!(!outcome.changed);
            assert_eq!(record, before);
        }
    }

    #[test]
    fn custom_token_search_skips_no_custom_prefix() {
        assert_eq!(find_custom_token("nocustomstate"), None);
        assert_eq!(find_custom_token("nocustomstate customstate"), Some(14));
        assert_eq!(find_custom_token("customstate"), Some(0));
    }
}
