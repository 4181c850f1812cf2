// =============================================================================
// Timeframes and venue-calendar bucket arithmetic
// =============================================================================
//
// Bucket boundaries are aligned to the venue's local calendar (KST), not UTC:
// a "1d" candle opens at midnight Seoul time, which is 15:00 UTC. Truncation
// therefore measures elapsed time from local midnight before snapping to the
// bucket size. Asia/Seoul has used a fixed +09:00 offset since 1988, so a
// `FixedOffset` is sufficient.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use crate::error::TimeframeParseError;

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// The venue's local time zone (KST, UTC+9).
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("+09:00 is a valid offset")
}

/// A candle bucket size supported by the venue.
///
/// `S1` is the raw 1-second stream; its duration is zero and aggregation
/// passes ticks through unchanged.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Timeframe {
    S1,
    M1,
    M3,
    M5,
    M10,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    /// Bucket duration. Zero for the raw pass-through timeframe.
    pub fn duration(&self) -> Duration {
        match self {
            Self::S1 => Duration::zero(),
            Self::M1 => Duration::minutes(1),
            Self::M3 => Duration::minutes(3),
            Self::M5 => Duration::minutes(5),
            Self::M10 => Duration::minutes(10),
            Self::M15 => Duration::minutes(15),
            Self::M30 => Duration::minutes(30),
            Self::H1 => Duration::hours(1),
            Self::H4 => Duration::hours(4),
            Self::D1 => Duration::days(1),
            Self::W1 => Duration::weeks(1),
        }
    }

    /// True for the raw 1-second pass-through timeframe.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::S1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M10 => "10m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// Path fragment of the venue's historical candle endpoint for this
    /// timeframe (`/v1/candles/<path>`).
    pub fn rest_path(&self) -> &'static str {
        match self {
            Self::S1 => "seconds",
            Self::M1 => "minutes/1",
            Self::M3 => "minutes/3",
            Self::M5 => "minutes/5",
            Self::M10 => "minutes/10",
            Self::M15 => "minutes/15",
            Self::M30 => "minutes/30",
            Self::H1 => "minutes/60",
            Self::H4 => "minutes/240",
            Self::D1 => "days",
            Self::W1 => "weeks",
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1s" => Ok(Self::S1),
            "1m" => Ok(Self::M1),
            "3m" => Ok(Self::M3),
            "5m" => Ok(Self::M5),
            "10m" => Ok(Self::M10),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "60m" | "1h" => Ok(Self::H1),
            "240m" | "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            "1w" => Ok(Self::W1),
            other => Err(TimeframeParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncate `t` down to the nearest multiple of `d`, measured from midnight
/// in the venue's local calendar.
///
/// Must not be called with a zero duration (the raw timeframe never reaches
/// bucket arithmetic).
pub fn truncate_kst(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    debug_assert!(d > Duration::zero());

    let local = t.with_timezone(&kst());
    let midnight = kst()
        .from_local_datetime(
            &local
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is a valid time"),
        )
        .single()
        .expect("fixed offset times are unambiguous");

    let elapsed = (local - midnight).num_seconds();
    let step = d.num_seconds();
    let truncated = midnight + Duration::seconds(elapsed / step * step);
    truncated.with_timezone(&Utc)
}

/// The first bucket boundary strictly after `t` for bucket size `d`.
///
/// A timestamp lying exactly on a boundary maps to the *next* boundary: the
/// tick at the boundary opens the new bucket rather than closing the old one.
pub fn next_boundary_kst(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    truncate_kst(t, d) + d
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn parse_all_labels() {
        assert_eq!("1s".parse::<Timeframe>().unwrap(), Timeframe::S1);
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert_eq!("60m".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert_eq!("240m".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!("1d".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert!("17m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn raw_timeframe_has_zero_duration() {
        assert!(Timeframe::S1.is_raw());
        assert_eq!(Timeframe::S1.duration(), Duration::zero());
        assert!(!Timeframe::M1.is_raw());
    }

    #[test]
    fn rest_paths() {
        assert_eq!(Timeframe::S1.rest_path(), "seconds");
        assert_eq!(Timeframe::M5.rest_path(), "minutes/5");
        assert_eq!(Timeframe::H1.rest_path(), "minutes/60");
        assert_eq!(Timeframe::D1.rest_path(), "days");
    }

    #[test]
    fn truncate_minute() {
        // 13:29:12 KST == 04:29:12 UTC.
        let t = utc("2025-01-12T04:29:12Z");
        assert_eq!(
            truncate_kst(t, Duration::minutes(1)),
            utc("2025-01-12T04:29:00Z")
        );
    }

    #[test]
    fn truncate_day_uses_kst_midnight() {
        // 2025-01-12 10:00 KST == 01:00 UTC; KST midnight == previous day
        // 15:00 UTC. A UTC-based truncation would give 00:00 UTC instead.
        let t = utc("2025-01-12T01:00:00Z");
        assert_eq!(
            truncate_kst(t, Duration::days(1)),
            utc("2025-01-11T15:00:00Z")
        );
    }

    #[test]
    fn truncate_four_hours_offset_from_utc_grid() {
        // 4h buckets from KST midnight land on 15:00, 19:00, 23:00 ... UTC.
        let t = utc("2025-01-12T05:30:00Z"); // 14:30 KST
        assert_eq!(
            truncate_kst(t, Duration::hours(4)),
            utc("2025-01-12T03:00:00Z") // 12:00 KST
        );
    }

    #[test]
    fn next_boundary_mid_bucket() {
        let t = utc("2025-01-12T04:29:12Z");
        assert_eq!(
            next_boundary_kst(t, Duration::hours(1)),
            utc("2025-01-12T05:00:00Z")
        );
    }

    #[test]
    fn next_boundary_on_exact_boundary_is_strictly_after() {
        let t = utc("2025-01-12T05:00:00Z");
        assert_eq!(
            next_boundary_kst(t, Duration::hours(1)),
            utc("2025-01-12T06:00:00Z")
        );
    }
}
