//! Date Administration
//!
//! A date is a single observable timestamp: every read tracks one atom
//! and every effective write notifies it. Component getters and setters
//! interpret the timestamp as UTC through chrono; writes that leave the
//! timestamp unchanged fire nothing.

use std::rc::Rc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::reactive::Atom;
use crate::registry;
use crate::value::DateRef;

pub(crate) struct DateAdmin {
    pub(crate) atom: Rc<Atom>,
}

impl DateAdmin {
    pub(crate) fn new() -> Self {
        Self { atom: Atom::new() }
    }
}

impl DateRef {
    fn track(&self) {
        if self.observed {
            registry::date_admin(self).atom.report_observed();
        }
    }

    fn utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.data.borrow().timestamp_ms)
    }

    /// Milliseconds since the Unix epoch.
    pub fn get_time(&self) -> i64 {
        self.track();
        self.data.borrow().timestamp_ms
    }

    /// Assign the timestamp. Suppressed when unchanged.
    pub fn set_time(&self, timestamp_ms: i64) {
        {
            let mut data = self.data.borrow_mut();
            if data.timestamp_ms == timestamp_ms {
                return;
            }
            data.timestamp_ms = timestamp_ms;
        }
        if self.observed {
            registry::date_admin(self).atom.report_changed();
        }
    }

    /// UTC calendar year.
    pub fn year(&self) -> Option<i32> {
        self.track();
        self.utc().map(|dt| dt.year())
    }

    /// UTC month, 1 through 12.
    pub fn month(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.month())
    }

    /// UTC day of month, 1 through 31.
    pub fn day(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.day())
    }

    /// UTC hour, 0 through 23.
    pub fn hours(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.hour())
    }

    /// UTC minute.
    pub fn minutes(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.minute())
    }

    /// UTC second.
    pub fn seconds(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.second())
    }

    /// Millisecond within the second.
    pub fn milliseconds(&self) -> Option<u32> {
        self.track();
        self.utc().map(|dt| dt.timestamp_subsec_millis())
    }

    fn set_component(&self, f: impl FnOnce(DateTime<Utc>) -> Option<DateTime<Utc>>) {
        let Some(current) = self.utc() else { return };
        if let Some(next) = f(current) {
            self.set_time(next.timestamp_millis());
        }
    }

    /// Replace the UTC calendar year.
    pub fn set_year(&self, year: i32) {
        self.set_component(|dt| {
            Utc.with_ymd_and_hms(year, dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second())
                .single()
                .map(|base| base + chrono::Duration::milliseconds(dt.timestamp_subsec_millis() as i64))
        });
    }

    /// Replace the UTC month (1 through 12).
    pub fn set_month(&self, month: u32) {
        self.set_component(|dt| dt.with_month(month));
    }

    /// Replace the UTC day of month.
    pub fn set_day(&self, day: u32) {
        self.set_component(|dt| dt.with_day(day));
    }

    /// Replace the UTC hour.
    pub fn set_hours(&self, hours: u32) {
        self.set_component(|dt| dt.with_hour(hours));
    }

    /// Replace the UTC minute.
    pub fn set_minutes(&self, minutes: u32) {
        self.set_component(|dt| dt.with_minute(minutes));
    }

    /// Replace the UTC second.
    pub fn set_seconds(&self, seconds: u32) {
        self.set_component(|dt| dt.with_second(seconds));
    }

    /// Replace the sub-second milliseconds.
    pub fn set_milliseconds(&self, milliseconds: u32) {
        self.set_component(|dt| dt.with_nanosecond(milliseconds * 1_000_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect;
    use crate::value::Value;
    use std::cell::Cell;

    fn observed_date(ms: i64) -> DateRef {
        match registry::observe(&Value::date(ms)) {
            Value::Date(r) => r,
            _ => unreachable!(),
        }
    }

    #[test]
    fn components_read_utc() {
        // 2024-03-15T12:30:45.250Z
        let date = observed_date(1_710_505_845_250);
        assert_eq!(date.year(), Some(2024));
        assert_eq!(date.month(), Some(3));
        assert_eq!(date.day(), Some(15));
        assert_eq!(date.hours(), Some(12));
        assert_eq!(date.minutes(), Some(30));
        assert_eq!(date.seconds(), Some(45));
        assert_eq!(date.milliseconds(), Some(250));
    }

    #[test]
    fn writes_notify_and_no_op_writes_do_not() {
        let date = observed_date(1_000);

        let runs = Rc::new(Cell::new(0));
        let _sub = {
            let date = date.clone();
            let runs = runs.clone();
            effect(move || {
                date.get_time();
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        date.set_time(1_000);
        assert_eq!(runs.get(), 1);

        date.set_time(2_000);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn component_setter_shifts_timestamp() {
        let date = observed_date(1_710_505_845_250);
        date.set_hours(0);
        assert_eq!(date.hours(), Some(0));
        assert_eq!(date.minutes(), Some(30));
        assert_eq!(date.milliseconds(), Some(250));
    }
}
