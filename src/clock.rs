use time::OffsetDateTime;

/// Wall clock in unix milliseconds, the unit used by every timestamp on the wire.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
