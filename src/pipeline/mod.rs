pub mod correlate;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::config::Config;
use crate::domain::message::{InboundMessage, Outcome, RunSummary};
use crate::mail::{self, Mailbox, body, headers};
use crate::store::repo::{NewReply, ReplyStore};

const FANOUT_TITLE: &str = "New email reply received";
const EXCERPT_CHARS: usize = 140;

/// One batch run: list unseen, handle each message independently,
/// close the session, report the counters.
///
/// A failure to list aborts before any message is touched; nothing has
/// been marked seen yet, so the next scheduled run retries the same
/// set. Per-message failures never abort the batch.
pub fn run_once(
    cfg: &Config,
    store: &dyn ReplyStore,
    mailbox: &mut dyn Mailbox,
) -> Result<RunSummary> {
    let uids = mailbox
        .list_unseen(cfg.batch_limit)
        .context("listing unseen messages")?;
    info!("{} unseen message(s) to consider", uids.len());

    let mut summary = RunSummary::default();
    for uid in uids {
        let outcome = match handle_message(cfg, store, mailbox, uid) {
            Ok(o) => o,
            Err(e) => {
                error!("UID {uid}: {e:#}");
                Outcome::StoreFailed
            }
        };
        summary.record(outcome);

        if outcome.flag_seen()
            && let Err(e) = mailbox.mark_seen(uid)
        {
            // Mark-seen is best-effort; the dedup gate catches the
            // refetch on the next run.
            warn!("UID {uid}: could not flag \\Seen: {e:#}");
        }
    }

    mailbox.close().context("closing mailbox session")?;
    Ok(summary)
}

fn handle_message(
    cfg: &Config,
    store: &dyn ReplyStore,
    mailbox: &mut dyn Mailbox,
    uid: u32,
) -> Result<Outcome> {
    let raw = mailbox
        .fetch(uid)
        .with_context(|| format!("fetching UID {uid}"))?;
    let parsed = mail::parse(&raw).with_context(|| format!("parsing UID {uid}"))?;
    let env = headers::envelope(&parsed, &raw);

    if env.message_id.is_empty() {
        warn!("UID {uid}: no Message-ID header, cannot dedup; skipping");
        return Ok(Outcome::MissingId);
    }

    // Cheap gates before any body decoding.
    if store.reply_exists(&env.message_id)? {
        info!("UID {uid}: {} already recorded; skipping", env.message_id);
        return Ok(Outcome::Duplicate);
    }
    if env.sender_email.eq_ignore_ascii_case(&cfg.from_address) {
        info!("UID {uid}: echo of our own outbound mail; skipping");
        return Ok(Outcome::SelfEcho);
    }

    let bodies = body::extract_bodies(&parsed);
    if bodies.is_empty() {
        info!("UID {uid}: no plain or html content; skipping");
        return Ok(Outcome::EmptyBody);
    }

    let msg = InboundMessage {
        uid,
        message_id: env.message_id,
        sender_email: env.sender_email,
        sender_name: env.sender_name,
        subject: env.subject,
        in_reply_to: env.in_reply_to,
        references: env.references,
        body_plain: bodies.plain,
        body_html: bodies.html,
    };

    let Some(notification_id) =
        correlate::find_notification(store, &msg.sender_email, &msg.subject)?
    else {
        info!(
            "UID {uid}: no notification matches sender {} subject {:?}; skipping",
            msg.sender_email, msg.subject
        );
        return Ok(Outcome::Unmatched);
    };

    let reply_id = match store.insert_reply(&NewReply {
        notification_id,
        sender_email: &msg.sender_email,
        sender_name: &msg.sender_name,
        subject: &msg.subject,
        body_plain: &msg.body_plain,
        body_html: &msg.body_html,
        message_id: &msg.message_id,
    }) {
        Ok(id) => id,
        Err(e) => {
            error!("UID {uid}: storing reply failed: {e:#}");
            return Ok(Outcome::StoreFailed);
        }
    };
    info!("UID {uid}: stored reply {reply_id} for notification {notification_id}");

    // Fire-and-forget relative to the stored reply.
    if let Err(e) = fan_out(cfg, store, notification_id, &msg) {
        warn!("fan-out for notification {notification_id} failed: {e:#}");
    }

    Ok(Outcome::Stored)
}

fn fan_out(
    cfg: &Config,
    store: &dyn ReplyStore,
    notification_id: i64,
    msg: &InboundMessage,
) -> Result<()> {
    let who = if msg.sender_name.is_empty() {
        msg.sender_email.clone()
    } else {
        format!("{} <{}>", msg.sender_name, msg.sender_email)
    };
    let excerpt = body::excerpt(&msg.body_plain, EXCERPT_CHARS);
    let text = if excerpt.is_empty() {
        who
    } else {
        format!("{who}: {excerpt}")
    };

    for user_id in store.admin_user_ids(cfg.admin_fanout_limit)? {
        store.insert_admin_notification(user_id, notification_id, FANOUT_TITLE, &text)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use anyhow::anyhow;
    use std::collections::HashSet;

    /// In-memory mailbox mirroring ImapMailbox's listing semantics.
    struct FakeMailbox {
        messages: Vec<(u32, Vec<u8>)>,
        seen: HashSet<u32>,
        fetched: Vec<u32>,
        closed: bool,
    }

    impl FakeMailbox {
        fn new(messages: Vec<(u32, Vec<u8>)>) -> Self {
            Self {
                messages,
                seen: HashSet::new(),
                fetched: Vec::new(),
                closed: false,
            }
        }
    }

    impl Mailbox for FakeMailbox {
        fn list_unseen(&mut self, limit: usize) -> Result<Vec<u32>> {
            let mut uids: Vec<u32> = self
                .messages
                .iter()
                .map(|(uid, _)| *uid)
                .filter(|uid| !self.seen.contains(uid))
                .collect();
            uids.sort_unstable_by(|a, b| b.cmp(a));
            uids.truncate(limit);
            Ok(uids)
        }

        fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
            self.fetched.push(uid);
            self.messages
                .iter()
                .find(|(u, _)| *u == uid)
                .map(|(_, raw)| raw.clone())
                .ok_or_else(|| anyhow!("no such uid {uid}"))
        }

        fn mark_seen(&mut self, uid: u32) -> Result<()> {
            self.seen.insert(uid);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn raw_message(message_id: &str, from: &str, subject: &str, body: &str) -> Vec<u8> {
        format!(
            "Message-ID: <{message_id}>\r\nFrom: {from}\r\nSubject: {subject}\r\n\
Content-Type: text/plain\r\n\r\n{body}\r\n"
        )
        .into_bytes()
    }

    fn seeded_store() -> (SqliteStore, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = store.add_user("Resident", "resident@example.com", "resident");
        let n = store.add_notification(user, "Water interruption notice", 100);
        store.add_user("Admin", "admin@example.com", "admin");
        (store, n)
    }

    #[test]
    fn end_to_end_reply_is_stored_and_fanned_out() {
        let (store, n) = seeded_store();
        let cfg = Config::for_tests();
        let mut mb = FakeMailbox::new(vec![(
            7,
            raw_message(
                "m1@mta.example.com",
                "Resident <resident@example.com>",
                "Re: Water interruption notice",
                "When will service resume?",
            ),
        )]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.to_string(), "processed=1 skipped=0 errors=0");
        assert!(mb.closed);
        assert!(mb.seen.contains(&7));

        let (nid, plain, direction, is_read): (i64, String, String, i64) = store
            .raw()
            .query_row(
                "SELECT notification_id, body_plain, direction, is_read FROM replies",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(nid, n);
        assert_eq!(plain.trim(), "When will service resume?");
        assert_eq!(direction, "inbound");
        assert_eq!(is_read, 0);

        let (fan_count, related): (i64, i64) = store
            .raw()
            .query_row(
                "SELECT COUNT(*), MAX(related_id) FROM notifications
                 WHERE kind = 'reply_received'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(fan_count, 1); // one admin account seeded
        assert_eq!(related, n);
    }

    #[test]
    fn second_run_over_redelivered_mail_is_idempotent() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let message = raw_message(
            "m1@mta.example.com",
            "resident@example.com",
            "Re: Water interruption notice",
            "hello",
        );

        // Two fresh sessions see the same unseen message, as two
        // overlapping runs would before either marks it seen.
        let mut first = FakeMailbox::new(vec![(7, message.clone())]);
        let mut second = FakeMailbox::new(vec![(7, message)]);

        let s1 = run_once(&cfg, &store, &mut first).unwrap();
        let s2 = run_once(&cfg, &store, &mut second).unwrap();
        assert_eq!(s1.processed, 1);
        assert_eq!(s2.processed, 0);
        assert_eq!(s2.skipped, 1);

        let count: i64 = store
            .raw()
            .query_row("SELECT COUNT(*) FROM replies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn self_echo_is_never_stored_but_marked_seen() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let mut mb = FakeMailbox::new(vec![(
            3,
            raw_message(
                "echo@mta.example.com",
                "NOTIFY@example.com",
                "Re: Water interruption notice",
                "delivery receipt",
            ),
        )]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(mb.seen.contains(&3));

        let count: i64 = store
            .raw()
            .query_row("SELECT COUNT(*) FROM replies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn attachment_only_message_is_skipped_and_marked_seen() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let raw = b"Message-ID: <att@mta.example.com>\r\n\
From: resident@example.com\r\n\
Subject: scan\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: application/pdf; name=\"scan.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--B--\r\n"
            .to_vec();
        let mut mb = FakeMailbox::new(vec![(9, raw)]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);
        assert!(mb.seen.contains(&9));
    }

    #[test]
    fn unmatched_sender_is_skipped_without_a_record() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let mut mb = FakeMailbox::new(vec![(
            4,
            raw_message("x@mta", "stranger@example.com", "Hello", "who is this"),
        )]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(mb.seen.contains(&4));
        let count: i64 = store
            .raw()
            .query_row("SELECT COUNT(*) FROM replies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn missing_message_id_is_skipped() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let raw =
            b"From: resident@example.com\r\nSubject: Re: Water interruption notice\r\n\r\nhi\r\n"
                .to_vec();
        let mut mb = FakeMailbox::new(vec![(5, raw)]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(mb.seen.contains(&5));
    }

    #[test]
    fn batch_ceiling_considers_only_the_newest() {
        let (store, _) = seeded_store();
        let mut cfg = Config::for_tests();
        cfg.batch_limit = 50;

        let messages: Vec<(u32, Vec<u8>)> = (1..=120)
            .map(|uid| {
                (
                    uid,
                    raw_message(
                        &format!("m{uid}@mta"),
                        "resident@example.com",
                        "Re: Water interruption notice",
                        "ping",
                    ),
                )
            })
            .collect();
        let mut mb = FakeMailbox::new(messages);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.processed, 50);
        // Exactly the 50 newest UIDs, descending.
        let expected: Vec<u32> = (71..=120).rev().collect();
        assert_eq!(mb.fetched, expected);

        // The remaining 70 are picked up by the next run.
        let summary2 = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary2.processed, 50);
        let summary3 = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary3.processed, 20);
    }

    #[test]
    fn store_failure_counts_an_error_and_leaves_the_message_unseen() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        // Break the replies table so every store round-trip fails.
        store.raw().execute_batch("DROP TABLE replies").unwrap();

        let mut mb = FakeMailbox::new(vec![(
            6,
            raw_message(
                "err@mta",
                "resident@example.com",
                "Re: Water interruption notice",
                "hello",
            ),
        )]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.processed, 0);
        assert!(!mb.seen.contains(&6));
        assert!(mb.closed);
    }

    #[test]
    fn fanout_failure_does_not_lose_the_stored_reply() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        // Admin listing works but the fan-out insert will fail.
        store
            .raw()
            .execute_batch(
                "CREATE TRIGGER block_fanout BEFORE INSERT ON notifications
                 WHEN NEW.kind = 'reply_received'
                 BEGIN SELECT RAISE(ABORT, 'fanout blocked'); END",
            )
            .unwrap();

        let mut mb = FakeMailbox::new(vec![(
            8,
            raw_message(
                "f@mta",
                "resident@example.com",
                "Re: Water interruption notice",
                "hello",
            ),
        )]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary.to_string(), "processed=1 skipped=0 errors=0");
        assert!(mb.seen.contains(&8));

        let count: i64 = store
            .raw()
            .query_row("SELECT COUNT(*) FROM replies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_mailbox_still_closes_the_session() {
        let (store, _) = seeded_store();
        let cfg = Config::for_tests();
        let mut mb = FakeMailbox::new(vec![]);

        let summary = run_once(&cfg, &store, &mut mb).unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(mb.closed);
    }
}
