//! Scheduling policy: when does an entry become eligible?
//!
//! Welcome emails are due the moment they are created. Campaign emails are due
//! at the campaign's calendar anchor, the same instant for every recipient, so
//! a whole campaign becomes claimable in one processor cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::queue::EmailType;

/// Errors parsing a campaign calendar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar item must look like type=timestamp, got {0:?}")]
    Malformed(String),

    #[error("unknown campaign type {0:?}")]
    UnknownType(String),

    #[error("{0} is sent on creation and cannot have a calendar date")]
    NotACampaign(EmailType),

    #[error("invalid RFC 3339 timestamp for {email_type}: {value:?}")]
    InvalidTimestamp { email_type: EmailType, value: String },

    #[error("{0} appears more than once")]
    Repeated(EmailType),
}

/// Fixed eligibility instant per campaign type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CampaignCalendar(BTreeMap<EmailType, DateTime<Utc>>);

impl CampaignCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Returns an error for `welcome`.
    pub fn with(mut self, email_type: EmailType, at: DateTime<Utc>) -> Result<Self, CalendarError> {
        if !email_type.is_campaign() {
            return Err(CalendarError::NotACampaign(email_type));
        }
        self.0.insert(email_type, at);
        Ok(self)
    }

    /// Parse `search_engine=2025-07-30T14:00:00+05:30,platform_complete=...`.
    ///
    /// Empty input yields an empty calendar.
    pub fn parse(raw: &str) -> Result<Self, CalendarError> {
        let mut calendar = BTreeMap::new();

        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| CalendarError::Malformed(item.to_string()))?;

            let email_type: EmailType = name
                .trim()
                .parse()
                .map_err(|_| CalendarError::UnknownType(name.trim().to_string()))?;
            if !email_type.is_campaign() {
                return Err(CalendarError::NotACampaign(email_type));
            }

            let at = DateTime::parse_from_rfc3339(value.trim())
                .map_err(|_| CalendarError::InvalidTimestamp {
                    email_type,
                    value: value.trim().to_string(),
                })?
                .with_timezone(&Utc);

            if calendar.insert(email_type, at).is_some() {
                return Err(CalendarError::Repeated(email_type));
            }
        }

        Ok(Self(calendar))
    }

    pub fn get(&self, email_type: EmailType) -> Option<DateTime<Utc>> {
        self.0.get(&email_type).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmailType, DateTime<Utc>)> + '_ {
        self.0.iter().map(|(t, at)| (*t, *at))
    }
}

/// Maps an entry's type and creation time to its eligibility time.
#[derive(Debug, Clone, Default)]
pub struct SchedulingPolicy {
    calendar: CampaignCalendar,
}

impl SchedulingPolicy {
    pub fn new(calendar: CampaignCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &CampaignCalendar {
        &self.calendar
    }

    /// Eligibility time, or `None` for a campaign with no calendar date.
    pub fn scheduled_time(
        &self,
        email_type: EmailType,
        created_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if email_type.is_campaign() {
            self.calendar.get(email_type)
        } else {
            Some(created_at)
        }
    }

    /// Campaigns whose anchor is still ahead of `now`, in processing order.
    pub fn upcoming_campaigns(&self, now: DateTime<Utc>) -> Vec<(EmailType, DateTime<Utc>)> {
        self.calendar.iter().filter(|(_, at)| *at > now).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_welcome_is_due_at_creation() {
        let policy = SchedulingPolicy::default();
        let created = at(2025, 7, 20, 9);
        assert_eq!(policy.scheduled_time(EmailType::Welcome, created), Some(created));
    }

    #[test]
    fn test_campaign_ignores_creation_time() {
        let anchor = at(2025, 7, 30, 8);
        let calendar = CampaignCalendar::new()
            .with(EmailType::SearchEngine, anchor)
            .unwrap();
        let policy = SchedulingPolicy::new(calendar);

        let early = policy.scheduled_time(EmailType::SearchEngine, at(2025, 7, 1, 0));
        let late = policy.scheduled_time(EmailType::SearchEngine, at(2025, 7, 29, 23));
        assert_eq!(early, Some(anchor));
        assert_eq!(late, Some(anchor));
    }

    #[test]
    fn test_unscheduled_campaign_has_no_time() {
        let policy = SchedulingPolicy::default();
        assert_eq!(policy.scheduled_time(EmailType::PlatformComplete, at(2025, 1, 1, 0)), None);
    }

    #[test]
    fn test_parse_calendar() {
        let calendar = CampaignCalendar::parse(
            "search_engine=2025-07-30T14:00:00+05:30, portfolio_builder=2025-08-03T05:00:00Z",
        )
        .unwrap();

        assert_eq!(calendar.get(EmailType::SearchEngine), Some(at(2025, 7, 30, 8) + chrono::Duration::minutes(30)));
        assert_eq!(calendar.get(EmailType::PortfolioBuilder), Some(at(2025, 8, 3, 5)));
        assert_eq!(calendar.get(EmailType::PlatformComplete), None);
    }

    #[test]
    fn test_parse_calendar_errors() {
        assert!(CampaignCalendar::parse("").unwrap().is_empty());
        assert_eq!(
            CampaignCalendar::parse("welcome=2025-07-30T14:00:00Z"),
            Err(CalendarError::NotACampaign(EmailType::Welcome))
        );
        assert!(matches!(
            CampaignCalendar::parse("search_engine"),
            Err(CalendarError::Malformed(_))
        ));
        assert!(matches!(
            CampaignCalendar::parse("newsletter=2025-07-30T14:00:00Z"),
            Err(CalendarError::UnknownType(_))
        ));
        assert!(matches!(
            CampaignCalendar::parse("search_engine=tomorrow"),
            Err(CalendarError::InvalidTimestamp { .. })
        ));
        assert_eq!(
            CampaignCalendar::parse(
                "search_engine=2025-07-30T14:00:00Z,search_engine=2025-07-31T14:00:00Z"
            ),
            Err(CalendarError::Repeated(EmailType::SearchEngine))
        );
    }

    #[test]
    fn test_upcoming_campaigns_skips_past_anchors() {
        let calendar = CampaignCalendar::new()
            .with(EmailType::SearchEngine, at(2025, 7, 30, 8))
            .unwrap()
            .with(EmailType::PortfolioBuilder, at(2025, 8, 3, 5))
            .unwrap();
        let policy = SchedulingPolicy::new(calendar);

        let upcoming = policy.upcoming_campaigns(at(2025, 8, 1, 0));
        assert_eq!(upcoming, vec![(EmailType::PortfolioBuilder, at(2025, 8, 3, 5))]);
    }
}
