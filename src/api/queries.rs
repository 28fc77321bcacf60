use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// Preset windows offered by the history widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    Last30Minutes,
    LastHour,
    Last6Hours,
    Last24Hours,
    Custom {
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

impl HistoryRange {
    pub fn minutes(&self) -> Option<i64> {
        match self {
            HistoryRange::Last30Minutes => Some(30),
            HistoryRange::LastHour => Some(60),
            HistoryRange::Last6Hours => Some(360),
            HistoryRange::Last24Hours => Some(1440),
            HistoryRange::Custom { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HistoryRange::Last30Minutes => "Last 30 minutes",
            HistoryRange::LastHour => "Last 1 hour",
            HistoryRange::Last6Hours => "Last 6 hours",
            HistoryRange::Last24Hours => "Last 24 hours",
            HistoryRange::Custom { .. } => "Custom Interval",
        }
    }

    /// Resolve to concrete bounds relative to `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match (self, self.minutes()) {
            (HistoryRange::Custom { from, to }, _) => (*from, *to),
            (_, Some(minutes)) => (Some(now - Duration::minutes(minutes)), Some(now)),
            (_, None) => (None, None),
        }
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct HistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl HistoryQuery {
    pub fn between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            from: from.map(format_bound),
            to: to.map(format_bound),
        }
    }

    pub fn for_range(range: HistoryRange, now: DateTime<Utc>) -> Self {
        let (from, to) = range.bounds(now);
        Self::between(from, to)
    }
}

#[derive(Debug, Serialize)]
pub(super) struct SimulationQuery {
    pub id: i64,
}

fn format_bound(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
