//! Calendar arithmetic supplementing the distilled spec (`datetime.h` in
//! `original_source/`): a leap-year-aware `DateTime` (seconds since epoch)
//! and an `ExpandedDateTime` step cursor used by the run-state time loop
//! (C11). The original hand-rolls this instead of using a calendar
//! library because `Date_Time` doubles as an 8-byte parameter-value
//! payload; we don't share that constraint, but keep the same arithmetic
//! so `steps_between` and month-granularity stepping match exactly.

use std::fmt;

const SECONDS_PER_DAY: i64 = 86_400;

#[must_use]
pub fn is_leap_year(year: i32) -> bool {
    if year % 4 != 0 {
        false
    } else if year % 100 != 0 {
        true
    } else {
        year % 400 == 0
    }
}

#[must_use]
pub fn year_length(year: i32) -> i32 {
    365 + i32::from(is_leap_year(year))
}

const MONTH_LENGTH: [i32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const MONTH_OFFSET: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// `month` is 1-indexed, matching the original.
#[must_use]
pub fn month_length(year: i32, month: u32) -> i32 {
    let mut days = MONTH_LENGTH[(month - 1) as usize];
    if month == 2 && is_leap_year(year) {
        days += 1;
    }
    days
}

#[must_use]
pub fn month_offset(year: i32, month: u32) -> i32 {
    let mut days = MONTH_OFFSET[(month - 1) as usize];
    if month > 2 && is_leap_year(year) {
        days += 1;
    }
    days
}

/// A point in time as whole seconds since the 1970-01-01 epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DateTime {
    pub seconds_since_epoch: i64,
}

impl DateTime {
    #[must_use]
    pub fn epoch() -> Self {
        DateTime { seconds_since_epoch: 0 }
    }

    /// Constructs a date from a calendar year/month/day, `None` if the day
    /// is out of range for that month.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day < 1 || day > month_length(year, month) as u32 {
            return None;
        }
        let mut result: i64 = 0;
        if year > 1970 {
            for y in 1970..year {
                result += i64::from(year_length(y)) * SECONDS_PER_DAY;
            }
        } else if year < 1970 {
            for y in (year..1969 + 1).rev() {
                result -= i64::from(year_length(y)) * SECONDS_PER_DAY;
            }
        }
        result += i64::from(month_offset(year, month)) * SECONDS_PER_DAY;
        result += i64::from(day - 1) * SECONDS_PER_DAY;
        Some(DateTime { seconds_since_epoch: result })
    }

    #[must_use]
    pub fn with_time(self, hour: u32, minute: u32, second: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some(DateTime {
            seconds_since_epoch: self.seconds_since_epoch
                + i64::from(hour) * 3600
                + i64::from(minute) * 60
                + i64::from(second),
        })
    }

    #[must_use]
    pub fn day_of_year(&self) -> (i32, i32) {
        let mut year = 1970;
        let mut seconds_left = self.seconds_since_epoch;
        let doy;
        if seconds_left > 0 {
            loop {
                let seconds_this_year = i64::from(year_length(year)) * SECONDS_PER_DAY;
                if seconds_left >= seconds_this_year {
                    year += 1;
                    seconds_left -= seconds_this_year;
                } else {
                    break;
                }
            }
            doy = seconds_left / SECONDS_PER_DAY;
        } else if seconds_left < 0 {
            seconds_left = -seconds_left;
            year = 1969;
            let mut seconds_this_year;
            loop {
                seconds_this_year = i64::from(year_length(year)) * SECONDS_PER_DAY;
                if seconds_left > seconds_this_year {
                    year -= 1;
                    seconds_left -= seconds_this_year;
                } else {
                    break;
                }
            }
            doy = (seconds_this_year - seconds_left) / SECONDS_PER_DAY;
        } else {
            doy = 0;
        }
        (doy as i32 + 1, year)
    }

    #[must_use]
    pub fn year_month_day(&self) -> (i32, u32, u32) {
        let (day, year) = self.day_of_year();
        for month in 1u32..=12 {
            if day <= month_offset(year, month + 1) || month == 12 {
                return (year, month, (day - month_offset(year, month)) as u32);
            }
        }
        unreachable!("month loop always terminates by month 12")
    }

    #[must_use]
    pub fn second_of_day(&self) -> i64 {
        self.seconds_since_epoch.rem_euclid(SECONDS_PER_DAY)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (year, month, day) = self.year_month_day();
        if self.seconds_since_epoch % SECONDS_PER_DAY == 0 {
            write!(f, "{year:04}-{month:02}-{day:02}")
        } else {
            let sod = self.second_of_day();
            write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year,
                month,
                day,
                sod / 3600,
                (sod / 60) % 60,
                sod % 60
            )
        }
    }
}

/// The unit a model's time step is expressed in: a fixed count of seconds,
/// or a calendar count of months (whose length in seconds varies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStepUnit {
    Second,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeStepSize {
    pub unit: TimeStepUnit,
    pub magnitude: i32,
}

impl Default for TimeStepSize {
    fn default() -> Self {
        TimeStepSize { unit: TimeStepUnit::Second, magnitude: 86_400 }
    }
}

/// A run's step cursor: the current date plus calendar fields kept
/// incrementally up to date as `advance` is called, so per-step formatting
/// and month-length lookups don't need to recompute from scratch every
/// step. Exposed to a batch function as part of the run-state contract
/// (C11's `date_time_struct` argument).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpandedDateTime {
    pub step: i64,
    pub year: i32,
    pub month: u32,
    pub day_of_month: u32,
    pub day_of_year: i32,
    pub days_this_year: i32,
    pub days_this_month: i32,
    pub second_of_day: i64,
    pub date_time: DateTime,
    pub time_step: TimeStepSize,
    step_length_in_seconds: i64,
}

impl ExpandedDateTime {
    #[must_use]
    pub fn new(base: DateTime, time_step: TimeStepSize) -> Self {
        let (year, month, day_of_month) = base.year_month_day();
        let (day_of_year, _) = base.day_of_year();
        let mut edt = ExpandedDateTime {
            step: 0,
            year,
            month,
            day_of_month,
            day_of_year,
            days_this_year: year_length(year),
            days_this_month: month_length(year, month),
            second_of_day: base.second_of_day(),
            date_time: base,
            time_step,
            step_length_in_seconds: 0,
        };
        edt.compute_next_step_size();
        edt
    }

    fn compute_next_step_size(&mut self) {
        self.step_length_in_seconds = match self.time_step.unit {
            TimeStepUnit::Second => i64::from(self.time_step.magnitude),
            TimeStepUnit::Month => {
                let mut total = 0i64;
                let mut y = self.year;
                let mut m = self.month;
                for _ in 0..self.time_step.magnitude {
                    total += i64::from(month_length(y, m)) * SECONDS_PER_DAY;
                    m += 1;
                    if m > 12 {
                        m = 1;
                        y += 1;
                    }
                }
                total
            }
        };
    }

    /// Advances the cursor by exactly one time step, mirroring the
    /// original's incremental calendar bookkeeping instead of recomputing
    /// year/month/day from the raw seconds count every step.
    pub fn advance(&mut self) {
        self.step += 1;
        self.date_time.seconds_since_epoch += self.step_length_in_seconds;

        if self.time_step.unit == TimeStepUnit::Second {
            self.second_of_day += self.step_length_in_seconds;
            let days = self.second_of_day.div_euclid(SECONDS_PER_DAY);
            self.second_of_day -= SECONDS_PER_DAY * days;
            self.day_of_year += days as i32;
            self.day_of_month += days as u32;
        } else {
            self.day_of_month += (self.step_length_in_seconds / SECONDS_PER_DAY) as u32;
        }

        while self.day_of_month > self.days_this_month as u32 {
            self.day_of_month -= self.days_this_month as u32;
            self.month += 1;
            if self.month > 12 {
                self.day_of_year -= self.days_this_year;
                self.year += 1;
                self.days_this_year = year_length(self.year);
                self.month = 1;
            }
            self.days_this_month = month_length(self.year, self.month);
        }

        if self.time_step.unit == TimeStepUnit::Month {
            self.compute_next_step_size();
        }
    }
}

fn divide_down(a: i64, b: i64) -> i64 {
    let r = a / b;
    if r < 0 && r * b != a {
        r - 1
    } else {
        r
    }
}

/// The number of whole time steps of `time_step` between `from` and `to`.
/// Used to validate a run's declared step count against a date range
/// (C11's model-run protocol step 1).
#[must_use]
pub fn steps_between(from: DateTime, to: DateTime, time_step: TimeStepSize) -> i64 {
    let diff = match time_step.unit {
        TimeStepUnit::Second => to.seconds_since_epoch - from.seconds_since_epoch,
        TimeStepUnit::Month => {
            let (fy, fm, _) = from.year_month_day();
            let (ty, tm, _) = to.year_month_day();
            i64::from(tm) - i64::from(fm) + 12 * (i64::from(ty) - i64::from(fy))
        }
    };
    divide_down(diff, i64::from(time_step.magnitude))
}
