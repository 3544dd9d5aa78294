use anyhow::Result;

/// A reply row ready to persist. Direction is always "inbound" here and
/// the read flag starts unread; the store fills both.
#[derive(Debug, Clone)]
pub struct NewReply<'a> {
    pub notification_id: i64,
    pub sender_email: &'a str,
    pub sender_name: &'a str,
    pub subject: &'a str,
    pub body_plain: &'a str,
    pub body_html: &'a str,
    pub message_id: &'a str,
}

/// Relational-store operations the pipeline needs. Notifications and
/// users are owned by the web application; this subsystem only reads
/// them, except for the admin fan-out inserts.
pub trait ReplyStore {
    /// Dedup gate: is a reply with this message id already on record?
    fn reply_exists(&self, message_id: &str) -> Result<bool>;

    /// Single insert; the unique index on message_id is the second line
    /// of defense behind `reply_exists`.
    fn insert_reply(&self, reply: &NewReply) -> Result<i64>;

    /// Correlation stage 1: the most recent notification owned by a user
    /// with `email` whose title contains `subject` as a substring.
    fn find_notification_by_title(&self, email: &str, subject: &str) -> Result<Option<i64>>;

    /// Correlation stage 2: the most recent notification for `email`,
    /// subject ignored.
    fn latest_notification_for(&self, email: &str) -> Result<Option<i64>>;

    /// Accounts holding the administrator role, bounded.
    fn admin_user_ids(&self, limit: usize) -> Result<Vec<i64>>;

    /// One fan-out row referencing the original notification.
    fn insert_admin_notification(
        &self,
        user_id: i64,
        notification_id: i64,
        title: &str,
        message: &str,
    ) -> Result<()>;
}
