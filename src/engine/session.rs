//! Regular trading session gate.
//!
//! Passes only run Monday to Friday between the configured open and close
//! (inclusive) in the exchange's local zone. Exchange holidays are not
//! modelled.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::MarketHoursConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSession {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketSession {
    pub fn from_config(config: &MarketHoursConfig) -> Result<Self> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow!("Unknown timezone {}: {e}", config.timezone))?;
        let open = parse_hhmm(&config.open)?;
        let close = parse_hhmm(&config.close)?;
        if open >= close {
            anyhow::bail!("Session open {open} must be before close {close}");
        }
        Ok(Self { tz, open, close })
    }

    /// Whether `now` falls inside the regular session.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("Invalid session time {s:?}, expected HH:MM"))
}
