use anyhow::Result;

use crate::store::repo::ReplyStore;

/// Strip leading reply/forward prefixes ("Re:", "Fwd:"), repeated and
/// case-insensitive, then trim.
pub fn clean_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let prefix_len = if lower.starts_with("re:") {
            3
        } else if lower.starts_with("fwd:") {
            4
        } else {
            break;
        };
        s = s[prefix_len..].trim_start();
    }
    s.trim().to_string()
}

/// Two-stage heuristic, first match wins.
///
/// Stage 1 matches the cleaned subject against notification titles for
/// this sender — the precise signal when a user has several outstanding
/// notifications. Stage 2 falls back to the sender's most recent
/// notification regardless of subject, trading occasional
/// misattribution for recall on clients that mangle subjects. `None`
/// means the message answers nothing this system generated.
pub fn find_notification(
    store: &dyn ReplyStore,
    sender_email: &str,
    subject: &str,
) -> Result<Option<i64>> {
    let cleaned = clean_subject(subject);
    if !cleaned.is_empty()
        && let Some(id) = store.find_notification_by_title(sender_email, &cleaned)?
    {
        return Ok(Some(id));
    }
    store.latest_notification_for(sender_email)
}
