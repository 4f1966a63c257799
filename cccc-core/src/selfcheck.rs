//! C7 — self-check & system-refresh message composition (spec §4.7).
//! The *cadence* (when to fire) lives in `handoff::Engine::send_handoff`
//! step 8, since that is the only place that sees every meaningful
//! handoff; this module supplies the actual `<FROM_SYSTEM>` text for the
//! two message kinds the cadence can trigger, plus the fixed
//! five-question self-check prompt and the trailing refresh marker.

use crate::events::{wrap_envelope, Role};

const SELF_CHECK_QUESTIONS: &str = "\
1. What is the current state of the shared task?
2. What have you changed since the last self-check?
3. What evidence backs your last claim?
4. What is blocking progress, if anything?
5. What is the very next concrete step?";

const REFRESH_COMPLETE_MARKER: &str = "[Background refresh complete — continue current work]";

/// Composes the standard self-check prompt (spec §4.7 "a fixed
/// five-question prompt"), optionally augmented with an Aux
/// review-prompt line.
pub fn compose_self_check(receiver: Role, aux_review_prompt: Option<&str>) -> String {
    let mut body = SELF_CHECK_QUESTIONS.to_string();
    if let Some(aux) = aux_review_prompt {
        if !aux.trim().is_empty() {
            body.push('\n');
            body.push_str(aux.trim());
        }
    }
    wrap_envelope(receiver, "selfcheck", &body, None)
}

/// Composes a full SYSTEM refresh: the rules document, an optional
/// project document, and the trailing completion marker (spec §4.7).
pub fn compose_system_refresh(receiver: Role, rules: &str, project_doc: Option<&str>) -> String {
    let mut body = rules.to_string();
    if let Some(doc) = project_doc {
        if !doc.trim().is_empty() {
            body.push_str("\n\n---\n\n");
            body.push_str(doc.trim());
        }
    }
    body.push_str("\n\n");
    body.push_str(REFRESH_COMPLETE_MARKER);
    wrap_envelope(receiver, "refresh", &body, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_check_contains_five_questions() {
        let msg = compose_self_check(Role::PeerA, None);
        for marker in ["1.", "2.", "3.", "4.", "5."] {
            assert!(msg.contains(marker), "missing question {marker}");
        }
    }

    #[test]
    fn self_check_appends_aux_prompt() {
        let msg = compose_self_check(Role::PeerA, Some("Aux flagged risk X"));
        assert!(msg.contains("Aux flagged risk X"));
    }

    #[test]
    fn system_refresh_includes_marker_and_project_doc() {
        let msg = compose_system_refresh(Role::PeerB, "RULES TEXT", Some("PROJECT TEXT"));
        assert!(msg.contains("RULES TEXT"));
        assert!(msg.contains("PROJECT TEXT"));
        assert!(msg.contains("Background refresh complete"));
    }
}
