//! Time and IP gating for roles
//!
//! A role's access rules decide whether the role is currently "active" for a
//! request. Two independent gates, both of which must pass:
//! - IP allowlist: wildcard patterns matched against the caller's address
//! - Schedule: per-weekday `HH:MM` windows, inclusive, minute granularity

use crate::core::pattern::PatternMatcher;
use crate::error::{AuthzError, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Day key used in schedules (`"monday"`, `"tuesday"`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for Day {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

/// Inclusive window within a single day
///
/// Windows do not wrap midnight: a window whose start is after its end
/// never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parse a window from two `HH:MM` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(TimeWindow {
            start: hhmm::parse(start)?,
            end: hhmm::parse(end)?,
        })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Structured access rules attached to a role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRules {
    /// Allowed caller IP patterns; empty means unrestricted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,

    /// Allowed windows per weekday; empty means unrestricted
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub times: BTreeMap<Day, Vec<TimeWindow>>,
}

impl AccessRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_ip(mut self, pattern: impl Into<String>) -> Self {
        self.ips.push(pattern.into());
        self
    }

    pub fn allow_window(mut self, day: Day, window: TimeWindow) -> Self {
        self.times.entry(day).or_default().push(window);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.times.is_empty()
    }

    /// Decode rules stored as a JSON blob
    ///
    /// Empty input, `null`, or an object with no gates yield `None`.
    pub fn from_json(json: &str) -> Result<Option<Self>> {
        let json = json.trim();
        if json.is_empty() || json == "null" {
            return Ok(None);
        }
        let rules: AccessRules = serde_json::from_str(json)
            .map_err(|e| AuthzError::InvalidArgument(format!("access rules: {}", e)))?;
        Ok(if rules.is_empty() { None } else { Some(rules) })
    }
}

/// Evaluates access rules against a request's IP and clock
pub struct AccessRuleEvaluator;

impl AccessRuleEvaluator {
    /// Check whether a role with these rules is active right now
    ///
    /// # Arguments
    ///
    /// * `rules` - The role's access rules, if any
    /// * `ip` - The caller's address; a missing address fails any IP gate
    /// * `now` - Wall-clock time in the offset the schedule is written for
    pub fn is_active(rules: Option<&AccessRules>, ip: Option<&str>, now: DateTime<FixedOffset>) -> bool {
        let rules = match rules {
            Some(rules) if !rules.is_empty() => rules,
            _ => return true,
        };

        Self::ip_allowed(rules, ip) && Self::schedule_allows(rules, now)
    }

    fn ip_allowed(rules: &AccessRules, ip: Option<&str>) -> bool {
        if rules.ips.is_empty() {
            return true;
        }

        match ip {
            Some(ip) => rules
                .ips
                .iter()
                .any(|pattern| PatternMatcher::matches(pattern, ip)),
            None => false,
        }
    }

    fn schedule_allows(rules: &AccessRules, now: DateTime<FixedOffset>) -> bool {
        if rules.times.is_empty() {
            return true;
        }

        let windows = match rules.times.get(&Day::from(now.weekday())) {
            Some(windows) => windows,
            None => return false,
        };

        // Compare at minute granularity
        let current = match NaiveTime::from_hms_opt(now.hour(), now.minute(), 0) {
            Some(t) => t,
            None => return false,
        };

        windows.iter().any(|window| window.contains(current))
    }
}

/// `HH:MM` (de)serialization for schedule bounds
mod hhmm {
    use crate::error::{AuthzError, Result};
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn parse(s: &str) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(s.trim(), FORMAT)
            .map_err(|e| AuthzError::InvalidArgument(format!("time '{}': {}", s, e)))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
