//! Retry policy and diagnostic helpers shared across tasks.

use std::time::Duration;

use backoff::backoff::Backoff;
use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use ethers::utils::keccak256;

use crate::error::Result;

/// Maximum number of attempts before a task error is treated as fatal.
pub const RETRY_LIMIT: usize = 600;
/// Fixed interval between attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(6);

/// Constant with Max Retry Count is a backoff policy which always returns
/// a constant duration, until it exceeds the maximum retry count.
#[derive(Debug)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// The default policy every periodic task runs under: 600 attempts, 6 s apart.
pub fn retry_policy() -> ConstantWithMaxRetryCount {
    ConstantWithMaxRetryCount::new(RETRY_INTERVAL, RETRY_LIMIT)
}

const DAY_LAYOUT: &str = "%Y%m%d";
const UTC8_SECONDS: i32 = 8 * 60 * 60;

fn utc8() -> FixedOffset {
    // Statically valid offset.
    FixedOffset::east_opt(UTC8_SECONDS).expect("UTC+8 is a valid offset")
}

/// Current date string in UTC+8, formatted `YYYYMMDD`.
pub fn now_utc8_date() -> String {
    Utc::now().with_timezone(&utc8()).format(DAY_LAYOUT).to_string()
}

pub const DROP_RATE_10: &str = "10000000000000000000";
pub const DROP_RATE_7: &str = "7000000000000000000";
pub const DROP_RATE_4: &str = "4000000000000000000";

/// Returns the drop rate for `now_day` on the repeating 30-day schedule that
/// starts at `start_day`: days 1-5 pay 10e18, days 6-20 pay 7e18 and days
/// 21-30 pay 4e18. Both arguments are `YYYYMMDD` strings.
pub fn drop_rate(start_day: &str, now_day: &str) -> Result<String> {
    if start_day > now_day {
        return Ok("0".into());
    }
    let start = NaiveDate::parse_from_str(start_day, DAY_LAYOUT)?;
    let now = NaiveDate::parse_from_str(now_day, DAY_LAYOUT)?;
    let inter_days = (now - start).num_days();
    let switch_day = inter_days % 30 + 1;
    let rate = match switch_day {
        1..=5 => DROP_RATE_10,
        6..=20 => DROP_RATE_7,
        _ => DROP_RATE_4,
    };
    Ok(rate.into())
}

/// Drop rate for a unix timestamp, resolved to a UTC+8 date first.
pub fn drop_rate_at_timestamp(start_day: &str, stamp: i64) -> Result<String> {
    let date = Utc
        .timestamp_opt(stamp, 0)
        .single()
        .ok_or(crate::error::Error::Generic("timestamp out of range"))?
        .with_timezone(&utc8())
        .format(DAY_LAYOUT)
        .to_string();
    drop_rate(start_day, &date)
}

/// Diagnostic hash identifying a swap record.
pub fn swap_hash(swap_type: &str, sender: &str, created: i64) -> String {
    let preimage = format!("{}{}{}", swap_type, sender, created);
    format!("0xswap{}", hex::encode(keccak256(preimage.as_bytes())))
}

pub const SYMBOL_DOT: &str = "DOT";
pub const SYMBOL_KSM: &str = "KSM";
pub const SYMBOL_ATOM: &str = "ATOM";
pub const SYMBOL_ETH: &str = "ETH";
pub const SYMBOL_FIS: &str = "FIS";

/// Symbols the relay recognizes as stakable assets.
pub fn symbol_valid(symbol: &str) -> bool {
    matches!(symbol, SYMBOL_DOT | SYMBOL_KSM | SYMBOL_ATOM | SYMBOL_ETH)
}

/// Symbols with a published price feed.
pub fn price_symbol_valid(symbol: &str) -> bool {
    symbol_valid(symbol) || symbol == SYMBOL_FIS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_rate_schedule() {
        assert_eq!(drop_rate("20240101", "20240105").unwrap(), DROP_RATE_10);
        assert_eq!(drop_rate("20240101", "20240110").unwrap(), DROP_RATE_7);
        assert_eq!(drop_rate("20240101", "20240125").unwrap(), DROP_RATE_4);
        // day 32 wraps to day 2 of the next 30-day window.
        assert_eq!(drop_rate("20240101", "20240201").unwrap(), DROP_RATE_10);
    }

    #[test]
    fn drop_rate_before_start() {
        assert_eq!(drop_rate("20240110", "20240101").unwrap(), "0");
    }

    #[test]
    fn drop_rate_window_edges() {
        assert_eq!(drop_rate("20240101", "20240101").unwrap(), DROP_RATE_10);
        assert_eq!(drop_rate("20240101", "20240106").unwrap(), DROP_RATE_7);
        assert_eq!(drop_rate("20240101", "20240121").unwrap(), DROP_RATE_4);
        assert_eq!(drop_rate("20240101", "20240130").unwrap(), DROP_RATE_4);
        // day 31 starts the next window.
        assert_eq!(drop_rate("20240101", "20240131").unwrap(), DROP_RATE_10);
    }

    #[test]
    fn swap_hash_shape() {
        let h = swap_hash("atomic", "0xabc", 1700000000);
        assert!(h.starts_with("0xswap"));
        assert_eq!(h.len(), "0xswap".len() + 64);
        // deterministic
        assert_eq!(h, swap_hash("atomic", "0xabc", 1700000000));
        assert_ne!(h, swap_hash("atomic", "0xabc", 1700000001));
    }

    #[test]
    fn symbols() {
        assert!(symbol_valid("ETH"));
        assert!(symbol_valid("DOT"));
        assert!(!symbol_valid("FIS"));
        assert!(price_symbol_valid("FIS"));
        assert!(!price_symbol_valid("BTC"));
    }

    #[test]
    fn retry_policy_is_bounded() {
        let mut policy = ConstantWithMaxRetryCount::new(RETRY_INTERVAL, 3);
        assert_eq!(policy.next_backoff(), Some(RETRY_INTERVAL));
        assert_eq!(policy.next_backoff(), Some(RETRY_INTERVAL));
        assert_eq!(policy.next_backoff(), Some(RETRY_INTERVAL));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert_eq!(policy.next_backoff(), Some(RETRY_INTERVAL));
    }
}
