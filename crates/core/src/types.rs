/// Backend-assigned job identifier. Opaque to the client.
pub type JobId = String;

/// Milliseconds since the Unix epoch, as sent in heartbeat replies.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
