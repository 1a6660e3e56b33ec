use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Prices never fall below one cent.
pub const MIN_PRICE: f64 = 0.01;

/// Shortest ticker interval.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// A multiplicative random walk standing in for a market feed.
///
/// Each tick moves the price by at most `volatility` (as a fraction) in either
/// direction and rounds it to cents, so consecutive prices can be equal.
pub struct PriceSimulator {
    price: f64,
    volatility: f64,
    rng: StdRng,
}

impl PriceSimulator {
    pub fn new(start_price: f64, volatility: f64) -> Self {
        Self::with_rng(start_price, volatility, StdRng::from_entropy())
    }

    /// A reproducible walk for tests and replays.
    pub fn seeded(start_price: f64, volatility: f64, seed: u64) -> Self {
        Self::with_rng(start_price, volatility, StdRng::seed_from_u64(seed))
    }

    fn with_rng(start_price: f64, volatility: f64, rng: StdRng) -> Self {
        Self {
            price: round_cents(start_price.max(MIN_PRICE)),
            volatility: volatility.clamp(0.0, 0.5),
            rng,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn tick(&mut self) -> f64 {
        let shock: f64 = self.rng.gen_range(-1.0..=1.0);
        self.price = round_cents(self.price * (1.0 + self.volatility * shock)).max(MIN_PRICE);
        self.price
    }

    /// Runs the walk on a timer, publishing every tick on a watch channel.
    /// Intervals shorter than [`MIN_TICK`] are raised to it.
    pub fn spawn(mut self, interval: Duration) -> PriceTicker {
        let (tx, rx) = watch::channel(self.price);
        let interval = interval.max(MIN_TICK);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                if tx.send(self.tick()).is_err() {
                    break;
                }
            }
        });
        PriceTicker { rx, handle }
    }
}

/// Handle to a running price walk. Dropping it stops the task.
pub struct PriceTicker {
    rx: watch::Receiver<f64>,
    handle: JoinHandle<()>,
}

impl PriceTicker {
    pub fn latest(&self) -> f64 {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.rx.clone()
    }
}

impl Drop for PriceTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
