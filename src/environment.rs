use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use smol_str::SmolStr;
use std::collections::HashMap;
use thiserror::Error;

/// Environment module specific errors.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("attempt to backtest beyond available calendar history")]
    CalendarExhausted,
}

/// Length of an exchange trading session.
pub fn trading_day() -> Duration {
    Duration::hours(6) + Duration::minutes(30)
}

/// Length of a calendar day, used to advance the market-open marker across the calendar.
pub fn calendar_day() -> Duration {
    Duration::hours(24)
}

/// Benchmark return observed on a single trading day.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct BenchmarkReturn {
    pub date: NaiveDate,
    pub returns: f64,
}

/// Immutable context for a simulation run: the exchange trading calendar, benchmark daily
/// returns, treasury reference curves, the tracked period and capital assumptions, and the frame
/// schema handed to the algorithm. Shared read-only across components via `Arc`.
#[derive(Clone, Debug)]
pub struct TradingEnvironment {
    trading_days: Vec<NaiveDate>,
    benchmark_returns: HashMap<NaiveDate, f64>,
    /// Annualised treasury yield by curve duration in months.
    treasury_curves: Vec<(u32, f64)>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub capital_base: f64,
    pub max_drawdown: f64,
    frame_index: Vec<SmolStr>,
}

impl TradingEnvironment {
    /// Returns a [`TradingEnvironmentBuilder`] instance.
    pub fn builder() -> TradingEnvironmentBuilder {
        TradingEnvironmentBuilder::new()
    }

    /// Truncates a timestamp to midnight UTC on its date.
    pub fn normalize_date(dt: DateTime<Utc>) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::new(dt.date_naive(), NaiveTime::MIN))
    }

    /// True if the exchange was open on the provided date.
    pub fn is_trading_day(&self, dt: DateTime<Utc>) -> bool {
        self.benchmark_returns.contains_key(&dt.date_naive())
    }

    /// Benchmark daily return for the provided date, 0.0 on non-trading days.
    pub fn benchmark_return(&self, dt: DateTime<Utc>) -> f64 {
        self.benchmark_returns
            .get(&dt.date_naive())
            .copied()
            .unwrap_or(0.0)
    }

    /// First day in the trading calendar, at midnight UTC.
    pub fn first_trading_day(&self) -> Option<DateTime<Utc>> {
        self.trading_days
            .first()
            .map(|date| Utc.from_utc_datetime(&NaiveDateTime::new(*date, NaiveTime::MIN)))
    }

    /// Last day in the trading calendar, at midnight UTC.
    pub fn last_trading_day(&self) -> DateTime<Utc> {
        self.trading_days
            .last()
            .map(|date| Utc.from_utc_datetime(&NaiveDateTime::new(*date, NaiveTime::MIN)))
            .unwrap_or(self.period_end)
    }

    /// Advances a market-open marker one calendar day at a time, skipping non-trading days.
    /// Fails with [`EnvironmentError::CalendarExhausted`] if the walk runs off the calendar.
    pub fn next_market_open(&self, market_open: DateTime<Utc>) -> Result<DateTime<Utc>, EnvironmentError> {
        let mut next = market_open + calendar_day();
        while !self.is_trading_day(next) {
            if next > self.last_trading_day() {
                return Err(EnvironmentError::CalendarExhausted);
            }
            next = next + calendar_day();
        }
        Ok(next)
    }

    /// Annualised treasury yield for the curve duration closest to the provided period length,
    /// scaled to a period return.
    pub fn treasury_period_return(&self, period: Duration) -> f64 {
        let months = (period.num_days() as f64 / 30.0).round().max(1.0) as u32;

        self.treasury_curves
            .iter()
            .min_by_key(|(duration, _)| duration.abs_diff(months))
            .map(|(_, annual_yield)| annual_yield * period.num_days() as f64 / 365.0)
            .unwrap_or(0.0)
    }

    /// Schema of the frames handed to the algorithm.
    pub fn frame_index(&self) -> &[SmolStr] {
        &self.frame_index
    }
}

/// Builder to construct [`TradingEnvironment`] instances.
#[derive(Clone, Debug, Default)]
pub struct TradingEnvironmentBuilder {
    benchmark_returns: Vec<BenchmarkReturn>,
    treasury_curves: Vec<(u32, f64)>,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    capital_base: Option<f64>,
    max_drawdown: Option<f64>,
    frame_index: Vec<SmolStr>,
}

impl TradingEnvironmentBuilder {
    pub fn new() -> Self {
        Self {
            frame_index: ["sid", "volume", "dt", "price", "changed"]
                .into_iter()
                .map(SmolStr::new)
                .collect(),
            ..Self::default()
        }
    }

    /// The trading calendar is derived from the dates carrying benchmark returns.
    pub fn benchmark_returns(self, value: Vec<BenchmarkReturn>) -> Self {
        Self {
            benchmark_returns: value,
            ..self
        }
    }

    pub fn treasury_curves(self, value: Vec<(u32, f64)>) -> Self {
        Self {
            treasury_curves: value,
            ..self
        }
    }

    pub fn period_start(self, value: DateTime<Utc>) -> Self {
        Self {
            period_start: Some(value),
            ..self
        }
    }

    pub fn period_end(self, value: DateTime<Utc>) -> Self {
        Self {
            period_end: Some(value),
            ..self
        }
    }

    pub fn capital_base(self, value: f64) -> Self {
        Self {
            capital_base: Some(value),
            ..self
        }
    }

    pub fn max_drawdown(self, value: f64) -> Self {
        Self {
            max_drawdown: Some(value),
            ..self
        }
    }

    /// Adds an entry to the frame schema before the environment is frozen.
    pub fn add_to_frame(mut self, name: &str) -> Self {
        self.frame_index.push(SmolStr::new(name));
        self
    }

    pub fn build(self) -> Result<TradingEnvironment, EnvironmentError> {
        let mut trading_days: Vec<NaiveDate> = self
            .benchmark_returns
            .iter()
            .map(|benchmark| benchmark.date)
            .collect();
        trading_days.sort_unstable();

        let benchmark_returns = self
            .benchmark_returns
            .iter()
            .map(|benchmark| (benchmark.date, benchmark.returns))
            .collect();

        Ok(TradingEnvironment {
            trading_days,
            benchmark_returns,
            treasury_curves: self.treasury_curves,
            period_start: self
                .period_start
                .ok_or(EnvironmentError::BuilderIncomplete)?,
            period_end: self.period_end.ok_or(EnvironmentError::BuilderIncomplete)?,
            capital_base: self
                .capital_base
                .ok_or(EnvironmentError::BuilderIncomplete)?,
            max_drawdown: self.max_drawdown.unwrap_or(1.0),
            frame_index: self.frame_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory;

    #[test]
    fn weekends_are_not_trading_days() {
        let env = factory::create_trading_environment();

        let a_saturday = Utc.with_ymd_and_hms(2008, 8, 2, 0, 0, 0).unwrap();
        let a_sunday = Utc.with_ymd_and_hms(2008, 10, 12, 0, 0, 0).unwrap();
        let a_monday = Utc.with_ymd_and_hms(2008, 1, 7, 0, 0, 0).unwrap();

        assert!(!env.is_trading_day(a_saturday));
        assert!(!env.is_trading_day(a_sunday));
        assert!(env.is_trading_day(a_monday));
    }

    #[test]
    fn next_market_open_skips_the_weekend() {
        let env = factory::create_trading_environment();
        let friday_open = Utc.with_ymd_and_hms(2008, 1, 11, 14, 30, 0).unwrap();

        let next = env.next_market_open(friday_open).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2008, 1, 14, 14, 30, 0).unwrap());
    }

    #[test]
    fn advancing_past_calendar_history_fails() {
        let env = factory::create_trading_environment();
        let beyond = env.last_trading_day() + Duration::days(1);

        let actual = env.next_market_open(beyond);

        assert!(matches!(actual, Err(EnvironmentError::CalendarExhausted)));
    }

    #[test]
    fn treasury_return_scales_to_period_length() {
        let env = factory::create_trading_environment();

        let one_month = env.treasury_period_return(Duration::days(30));
        let one_year = env.treasury_period_return(Duration::days(365));

        assert!(one_month > 0.0);
        assert!(one_year > one_month);
    }
}
