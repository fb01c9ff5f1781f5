//! Synthetic fixtures for tests and scripted scenario runs: a weekday trading calendar with flat
//! benchmark data, session-aware trade history generation, and a deterministic test algorithm.

use crate::client::frame::EventFrame;
use crate::client::{AlgoContext, Algorithm};
use crate::config::SimulationConfig;
use crate::environment::{trading_day, BenchmarkReturn, TradingEnvironment};
use crate::event::{OrderEvent, Sid, TradeEvent};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Flat benchmark daily return used by the synthetic calendar.
const BENCHMARK_DAILY_RETURN: f64 = 0.0005;

/// Synthetic annualised treasury curve: (duration in months, yield).
const TREASURY_CURVES: [(u32, f64); 4] = [(1, 0.035), (3, 0.04), (6, 0.045), (12, 0.05)];

/// A full-year synthetic environment: every 2008 weekday is a trading day with a flat benchmark
/// return. The tracked period starts on Monday 2008-01-07 at 14:30 UTC so multi-day scenarios
/// begin a run of consecutive sessions.
pub fn create_trading_environment() -> TradingEnvironment {
    TradingEnvironment::builder()
        .benchmark_returns(weekday_benchmark_returns(2008))
        .treasury_curves(TREASURY_CURVES.to_vec())
        .period_start(Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap())
        .period_end(Utc.with_ymd_and_hms(2008, 12, 31, 23, 59, 0).unwrap())
        .capital_base(100_000.0)
        .max_drawdown(0.5)
        .build()
        .expect("factory environment is fully specified")
}

/// One flat [`BenchmarkReturn`] per weekday of the year.
pub fn weekday_benchmark_returns(year: i32) -> Vec<BenchmarkReturn> {
    let mut returns = Vec::new();
    let mut date = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid start of year");

    while date.year() == year {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            returns.push(BenchmarkReturn {
                date,
                returns: BENCHMARK_DAILY_RETURN,
            });
        }
        date = date + Duration::days(1);
    }

    returns
}

/// Generates a trade history starting at the environment's period start, stepping by `interval`
/// and folding timestamps into 6.5 hour sessions: a step past the close rolls into the next
/// trading day's session, carrying the overflow.
pub fn create_trade_history(
    sid: Sid,
    prices: &[f64],
    volumes: &[u64],
    interval: Duration,
    env: &TradingEnvironment,
) -> Vec<TradeEvent> {
    let mut trades = Vec::with_capacity(prices.len());
    let mut cursor = env.period_start;

    for (price, volume) in prices.iter().zip(volumes) {
        trades.push(TradeEvent {
            source_id: format!("trades-{sid}").into(),
            sid,
            price: *price,
            volume: *volume,
            dt: cursor,
        });
        cursor = advance_session_clock(env, cursor + interval);
    }

    trades
}

/// Folds a timestamp into trading sessions: weekend & holiday days roll forward a day at a time,
/// and any time at or past the session close rolls into the next session carrying the overflow.
fn advance_session_clock(env: &TradingEnvironment, mut next: DateTime<Utc>) -> DateTime<Utc> {
    let open_time = env.period_start.time();

    loop {
        if next > env.last_trading_day() + Duration::days(1) {
            // Walked off the calendar; hand the raw timestamp back and let the tracker raise
            // CalendarExhausted when it gets there.
            return next;
        }

        if !env.is_trading_day(next) {
            next += Duration::days(1);
            continue;
        }

        let day_open = Utc
            .from_utc_datetime(&next.date_naive().and_time(open_time));
        let day_close = day_open + trading_day();

        if next < day_open {
            return day_open;
        }
        if next >= day_close {
            next = next + Duration::days(1) - (day_close - day_open);
            continue;
        }

        return next;
    }
}

/// Order issue times for a scripted scenario: stepping by `interval` from `start`, with orders
/// landing after 21:00 UTC pushed to the next day's open.
pub fn order_dates(start: DateTime<Utc>, count: usize, interval: Duration) -> Vec<DateTime<Utc>> {
    let mut dates = Vec::with_capacity(count);
    let mut order_date = start;

    for _ in 0..count {
        dates.push(order_date);
        order_date = order_date + interval;
        if order_date.hour() >= 21 {
            order_date = Utc.from_utc_datetime(
                &(order_date + Duration::days(1))
                    .date_naive()
                    .and_hms_opt(14, 30, 0)
                    .expect("14:30 is a valid wall-clock time"),
            );
        }
    }

    dates
}

/// The scripted order book for a scenario config: `order_count` orders of `order_amount` shares
/// (sign alternating when configured), spaced by `order_interval` from the period start.
pub fn create_scenario_orders(config: &SimulationConfig, env: &TradingEnvironment) -> Vec<OrderEvent> {
    order_dates(env.period_start, config.order_count, config.order_interval)
        .into_iter()
        .enumerate()
        .map(|(i, dt)| {
            let alternator = if config.alternate && i % 2 == 1 { -1 } else { 1 };
            OrderEvent::new(config.sid, config.order_amount * alternator, dt)
        })
        .collect()
}

/// The scripted trade tape for a scenario config: flat price & volume at the configured
/// interval, optionally shifted by the configured delay.
pub fn create_scenario_trades(config: &SimulationConfig, env: &TradingEnvironment) -> Vec<TradeEvent> {
    let prices = vec![config.trade_price; config.trade_count];
    let volumes = vec![config.trade_amount; config.trade_count];
    let mut trades = create_trade_history(config.sid, &prices, &volumes, config.trade_interval, env);

    if let Some(delay) = config.trade_delay {
        for trade in &mut trades {
            trade.dt += delay;
        }
    }

    trades
}

/// Counters shared between a [`TestAlgorithm`] and the test body, observable after the client
/// task has consumed the algorithm.
#[derive(Debug, Default)]
pub struct AlgoStats {
    pub frame_count: AtomicUsize,
    pub order_count: AtomicUsize,
}

impl AlgoStats {
    pub fn frames(&self) -> usize {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn orders(&self) -> usize {
        self.order_count.load(Ordering::Relaxed)
    }
}

/// Deterministic algorithm for harness runs: orders a fixed quantity of one sid on each frame
/// until its budget is spent, counting every frame it receives.
#[derive(Debug)]
pub struct TestAlgorithm {
    sid: Sid,
    amount: i64,
    count: usize,
    placed: usize,
    filter: HashSet<Sid>,
    pub stats: Arc<AlgoStats>,
}

impl TestAlgorithm {
    /// Constructs a [`TestAlgorithm`] placing `count` orders of `amount` shares of `sid`.
    pub fn new(sid: Sid, amount: i64, count: usize) -> Self {
        Self {
            sid,
            amount,
            count,
            placed: 0,
            filter: HashSet::from([sid]),
            stats: Arc::new(AlgoStats::default()),
        }
    }

    /// Shared counters observable while the algorithm runs inside the client task.
    pub fn stats(&self) -> Arc<AlgoStats> {
        Arc::clone(&self.stats)
    }
}

impl Algorithm for TestAlgorithm {
    fn sid_filter(&self) -> Option<&HashSet<Sid>> {
        Some(&self.filter)
    }

    fn handle_frame(&mut self, _frame: &EventFrame, ctx: &mut AlgoContext) {
        self.stats.frame_count.fetch_add(1, Ordering::Relaxed);

        if self.placed < self.count {
            ctx.order(self.sid, self.amount);
            self.placed += 1;
            self.stats.order_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}
