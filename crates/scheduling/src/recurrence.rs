use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use procura_core::{DomainError, DomainResult, ValueObject};
use procura_identity::CartId;

/// How often a template cart re-fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Weekly,
    #[serde(rename = "Bi-weekly")]
    BiWeekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    fn step_days(self) -> Option<u64> {
        match self {
            Frequency::Weekly => Some(7),
            Frequency::BiWeekly => Some(14),
            Frequency::Monthly | Frequency::Quarterly => None,
        }
    }

    fn step_months(self) -> Option<u32> {
        match self {
            Frequency::Monthly => Some(1),
            Frequency::Quarterly => Some(3),
            Frequency::Weekly | Frequency::BiWeekly => None,
        }
    }
}

/// Fact: the occurrence on `occurrence` fired at `fired_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceFired {
    pub occurrence: NaiveDate,
    pub fired_at: DateTime<Utc>,
    /// The cart instance spawned for this occurrence.
    pub spawned_cart_id: CartId,
}

/// Recurrence rule of a template cart plus its firing log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceDescriptor {
    frequency: Frequency,
    start_date: NaiveDate,
    day_of_week: Option<Weekday>,
    day_of_month: Option<u32>,
    #[serde(default)]
    firings: Vec<OccurrenceFired>,
}

impl ValueObject for RecurrenceDescriptor {}

impl RecurrenceDescriptor {
    pub fn new(frequency: Frequency, start_date: NaiveDate) -> Self {
        Self {
            frequency,
            start_date,
            day_of_week: None,
            day_of_month: None,
            firings: Vec::new(),
        }
    }

    /// Anchor weekday for Weekly/Bi-weekly (defaults to the start date's weekday).
    pub fn on_weekday(mut self, day: Weekday) -> Self {
        self.day_of_week = Some(day);
        self
    }

    /// Anchor day for Monthly/Quarterly (defaults to the start date's day).
    pub fn on_day_of_month(mut self, day: u32) -> DomainResult<Self> {
        if !(1..=31).contains(&day) {
            return Err(DomainError::validation(format!(
                "day of month must be within 1..=31 (got {day})"
            )));
        }
        self.day_of_month = Some(day);
        Ok(self)
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn firings(&self) -> &[OccurrenceFired] {
        &self.firings
    }

    /// Most recent occurrence that has fired.
    pub fn last_run_at(&self) -> Option<NaiveDate> {
        self.firings.iter().map(|f| f.occurrence).max()
    }

    /// First occurrence on or after `max(start_date, last_run_at + 1 day)`.
    ///
    /// `None` only when the calendar arithmetic overflows.
    pub fn next_occurrence(&self) -> Option<NaiveDate> {
        let lower = match self.last_run_at() {
            Some(last) => last.checked_add_days(Days::new(1))?.max(self.start_date),
            None => self.start_date,
        };
        self.first_occurrence_on_or_after(lower)
    }

    /// True iff the next occurrence is on or before `now` and strictly after
    /// the last fired occurrence.
    pub fn is_due(&self, now: NaiveDate) -> bool {
        match self.next_occurrence() {
            Some(next) => next <= now && self.last_run_at().is_none_or(|last| next > last),
            None => false,
        }
    }

    /// The next `count` occurrences, starting from `next_occurrence()`.
    pub fn upcoming(&self, count: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = self.next_occurrence();
        while let Some(date) = cursor {
            if out.len() == count {
                break;
            }
            out.push(date);
            cursor = date
                .checked_add_days(Days::new(1))
                .and_then(|d| self.first_occurrence_on_or_after(d));
        }
        out
    }

    /// Append a firing fact.
    ///
    /// Rejects an occurrence at or before the last fired one, so a period can
    /// never fire twice.
    pub fn record_firing(&mut self, fired: OccurrenceFired) -> DomainResult<()> {
        if let Some(last) = self.last_run_at() {
            if fired.occurrence <= last {
                return Err(DomainError::conflict(format!(
                    "occurrence {} already covered by firing on {last}",
                    fired.occurrence
                )));
            }
        }
        self.firings.push(fired);
        Ok(())
    }

    fn first_occurrence_on_or_after(&self, lower: NaiveDate) -> Option<NaiveDate> {
        if let Some(step) = self.frequency.step_days() {
            self.next_weekly(lower, step)
        } else {
            let step = self.frequency.step_months()?;
            self.next_monthly(lower, step)
        }
    }

    fn next_weekly(&self, lower: NaiveDate, step: u64) -> Option<NaiveDate> {
        let target = self.day_of_week.unwrap_or_else(|| self.start_date.weekday());
        let offset = (7 + target.num_days_from_monday() - self.start_date.weekday().num_days_from_monday()) % 7;
        let anchor = self.start_date.checked_add_days(Days::new(u64::from(offset)))?;
        if lower <= anchor {
            return Some(anchor);
        }

        let behind = u64::try_from((lower - anchor).num_days()).ok()?;
        let periods = behind.div_ceil(step);
        anchor.checked_add_days(Days::new(periods * step))
    }

    fn next_monthly(&self, lower: NaiveDate, step: u32) -> Option<NaiveDate> {
        let day = self.day_of_month.unwrap_or_else(|| self.start_date.day());
        let first_month = self.start_date.with_day(1)?;

        let months_between = month_index(lower) - month_index(self.start_date);
        let mut period = u32::try_from(months_between.max(0)).ok()? / step;
        loop {
            let month = first_month.checked_add_months(Months::new(period * step))?;
            let candidate = clamp_to_month(month, day)?;
            if candidate >= lower {
                return Some(candidate);
            }
            period += 1;
        }
    }
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// `day` within the month of `first_of_month`, clamped to the month's last day.
fn clamp_to_month(first_of_month: NaiveDate, day: u32) -> Option<NaiveDate> {
    let next_month = first_of_month.checked_add_months(Months::new(1))?;
    let last_day = next_month.pred_opt()?.day();
    first_of_month.with_day(day.min(last_day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fired(desc: &mut RecurrenceDescriptor, occurrence: NaiveDate) {
        desc.record_firing(OccurrenceFired {
            occurrence,
            fired_at: Utc::now(),
            spawned_cart_id: "CRT-user1234-0001".parse().unwrap(),
        })
        .unwrap();
    }

    #[test]
    fn weekly_anchors_on_requested_weekday() {
        // 2026-01-01 is a Thursday.
        let desc = RecurrenceDescriptor::new(Frequency::Weekly, date(2026, 1, 1)).on_weekday(Weekday::Mon);
        assert_eq!(desc.next_occurrence(), Some(date(2026, 1, 5)));
    }

    #[test]
    fn weekly_steps_seven_days_after_last_run() {
        let mut desc = RecurrenceDescriptor::new(Frequency::Weekly, date(2026, 1, 1)).on_weekday(Weekday::Mon);
        fired(&mut desc, date(2026, 1, 5));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 1, 12)));
    }

    #[test]
    fn biweekly_skips_alternate_weeks() {
        let mut desc = RecurrenceDescriptor::new(Frequency::BiWeekly, date(2026, 1, 1)).on_weekday(Weekday::Mon);
        fired(&mut desc, date(2026, 1, 5));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 1, 19)));
        assert_eq!(desc.upcoming(3), vec![date(2026, 1, 19), date(2026, 2, 2), date(2026, 2, 16)]);
    }

    #[test]
    fn weekly_defaults_to_start_weekday() {
        let desc = RecurrenceDescriptor::new(Frequency::Weekly, date(2026, 1, 1));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 1, 1)));
    }

    #[test]
    fn monthly_clamps_to_short_month_end() {
        let desc = RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 4, 1))
            .on_day_of_month(31)
            .unwrap();
        // April has 30 days: the 30th, not May 1st.
        assert_eq!(desc.next_occurrence(), Some(date(2026, 4, 30)));
        assert_eq!(desc.upcoming(3), vec![date(2026, 4, 30), date(2026, 5, 31), date(2026, 6, 30)]);
    }

    #[test]
    fn monthly_clamps_february() {
        let mut desc = RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 1, 1))
            .on_day_of_month(31)
            .unwrap();
        fired(&mut desc, date(2026, 1, 31));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 2, 28)));
    }

    #[test]
    fn monthly_day_before_start_rolls_to_next_month() {
        let desc = RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 1, 15))
            .on_day_of_month(10)
            .unwrap();
        assert_eq!(desc.next_occurrence(), Some(date(2026, 2, 10)));
    }

    #[test]
    fn quarterly_steps_three_months_from_start() {
        let mut desc = RecurrenceDescriptor::new(Frequency::Quarterly, date(2026, 1, 31));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 1, 31)));
        fired(&mut desc, date(2026, 1, 31));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 4, 30)));
        fired(&mut desc, date(2026, 4, 30));
        assert_eq!(desc.next_occurrence(), Some(date(2026, 7, 31)));
    }

    #[test]
    fn is_due_only_once_per_period() {
        let mut desc = RecurrenceDescriptor::new(Frequency::Weekly, date(2026, 1, 5));
        assert!(!desc.is_due(date(2026, 1, 4)));
        assert!(desc.is_due(date(2026, 1, 5)));

        fired(&mut desc, date(2026, 1, 5));
        assert!(!desc.is_due(date(2026, 1, 5)));
        assert!(!desc.is_due(date(2026, 1, 11)));
        assert!(desc.is_due(date(2026, 1, 12)));
    }

    #[test]
    fn refiring_a_covered_occurrence_is_rejected() {
        let mut desc = RecurrenceDescriptor::new(Frequency::Weekly, date(2026, 1, 5));
        fired(&mut desc, date(2026, 1, 5));
        let err = desc
            .record_firing(OccurrenceFired {
                occurrence: date(2026, 1, 5),
                fired_at: Utc::now(),
                spawned_cart_id: "CRT-user1234-0002".parse().unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(desc.firings().len(), 1);
    }

    #[test]
    fn rejects_out_of_range_day_of_month() {
        assert!(RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 1, 1)).on_day_of_month(0).is_err());
        assert!(RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 1, 1)).on_day_of_month(32).is_err());
    }

    #[test]
    fn frequency_serializes_with_collaborator_names() {
        assert_eq!(serde_json::to_string(&Frequency::BiWeekly).unwrap(), "\"Bi-weekly\"");
        assert_eq!(serde_json::to_string(&Frequency::Quarterly).unwrap(), "\"Quarterly\"");
    }

    fn frequency() -> impl Strategy<Value = Frequency> {
        prop_oneof![
            Just(Frequency::Weekly),
            Just(Frequency::BiWeekly),
            Just(Frequency::Monthly),
            Just(Frequency::Quarterly),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: occurrences never precede the start date, strictly increase,
        /// and never land on an already-fired date.
        #[test]
        fn occurrences_advance_strictly(
            freq in frequency(),
            offset in 0u64..3_000u64,
            dom in 1u32..=31u32,
            fires in 1usize..12usize,
        ) {
            let start = date(2024, 1, 1).checked_add_days(Days::new(offset)).unwrap();
            let mut desc = RecurrenceDescriptor::new(freq, start).on_day_of_month(dom).unwrap();

            let mut previous: Option<NaiveDate> = None;
            for _ in 0..fires {
                let next = desc.next_occurrence().unwrap();
                prop_assert!(next >= start);
                if let Some(prev) = previous {
                    prop_assert!(next > prev);
                }
                prop_assert!(desc.is_due(next));
                fired(&mut desc, next);
                prop_assert!(!desc.is_due(next));
                previous = Some(next);
            }
        }
    }
}
