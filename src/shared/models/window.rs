use chrono::{Days, NaiveDate};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("start date {start} must not be after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },

    #[error("{days} days before {today} is outside the supported date range")]
    OutOfRange { days: u32, today: NaiveDate },
}

/// Date range sent to the API as `start_date` / `end_date`.
///
/// Either bound may be absent, in which case the API applies its own default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn between(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, WindowError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(WindowError::StartAfterEnd { start, end });
            }
        }
        Ok(Self { start, end })
    }

    /// The last `days` days ending at `today`.
    pub fn recent(days: u32, today: NaiveDate) -> Result<Self, WindowError> {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or(WindowError::OutOfRange { days, today })?;
        Ok(Self {
            start: Some(start),
            end: Some(today),
        })
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("start_date", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end {
            params.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn recent_window_ends_today() {
        let window = DateWindow::recent(7, date("2024-03-10")).unwrap();

        assert_eq!(window.start(), Some(date("2024-03-03")));
        assert_eq!(window.end(), Some(date("2024-03-10")));
    }

    #[test]
    fn huge_day_count_is_an_error() {
        let today = date("2024-01-01");

        assert_eq!(
            DateWindow::recent(u32::MAX, today),
            Err(WindowError::OutOfRange {
                days: u32::MAX,
                today,
            })
        );
    }

    #[test]
    fn start_after_end_is_rejected() {
        let err = DateWindow::between(Some(date("2024-02-01")), Some(date("2024-01-31")))
            .unwrap_err();

        assert_eq!(
            err,
            WindowError::StartAfterEnd {
                start: date("2024-02-01"),
                end: date("2024-01-31"),
            }
        );
    }

    #[test]
    fn same_day_window_is_allowed() {
        let day = date("2024-01-15");
        assert!(DateWindow::between(Some(day), Some(day)).is_ok());
    }

    #[test]
    fn query_params_only_include_present_bounds() {
        let open_ended = DateWindow::between(Some(date("2024-01-01")), None).unwrap();
        assert_eq!(
            open_ended.query_params(),
            vec![("start_date", "2024-01-01".to_string())]
        );

        assert!(DateWindow::default().query_params().is_empty());
    }
}
