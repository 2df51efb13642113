use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the average gain/loss is carried forward after the SMA seed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    /// Wilder's smoothing, alpha = 1/N. This is what TradingView and most
    /// charting platforms plot as "RSI".
    #[default]
    Wilder,
    /// Standard exponential moving average, alpha = 2/(N+1).
    Ema,
}

impl Smoothing {
    fn alpha(self, period: usize) -> f64 {
        match self {
            Smoothing::Wilder => 1.0 / period as f64,
            Smoothing::Ema => 2.0 / (period as f64 + 1.0),
        }
    }
}

impl fmt::Display for Smoothing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Smoothing::Wilder => write!(f, "wilder"),
            Smoothing::Ema => write!(f, "ema"),
        }
    }
}

impl FromStr for Smoothing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wilder" => Ok(Smoothing::Wilder),
            "ema" => Ok(Smoothing::Ema),
            other => Err(format!("Unsupported smoothing: {other} (expected wilder or ema)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RsiError {
    InvalidPeriod,
    InsufficientData { required: usize, actual: usize },
    InvalidInput { index: usize, value: f64 },
}

impl fmt::Display for RsiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RsiError::InvalidPeriod => write!(f, "RSI period must be at least 1"),
            RsiError::InsufficientData { required, actual } => {
                write!(f, "Not enough data: need {} closes, got {}", required, actual)
            }
            RsiError::InvalidInput { index, value } => {
                write!(f, "Invalid close price {} at index {}", value, index)
            }
        }
    }
}

impl std::error::Error for RsiError {}

/// Pure RSI calculator. Holds only its parameters, never any state between calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiEngine {
    period: usize,
    smoothing: Smoothing,
}

impl RsiEngine {
    pub fn new(period: usize, smoothing: Smoothing) -> Self {
        Self { period, smoothing }
    }

    /// Minimum number of closes needed to produce a reading.
    pub fn required_len(&self) -> usize {
        self.period + 1
    }

    /// Returns the RSI of the most recent close.
    ///
    /// The first `period` price changes seed the average gain and loss with a
    /// simple mean; every later change is folded in with the configured
    /// smoothing. A flat series reads 50, a series without losses reads 100.
    pub fn latest(&self, closes: &[f64]) -> Result<f64, RsiError> {
        if self.period == 0 {
            return Err(RsiError::InvalidPeriod);
        }
        if closes.len() < self.required_len() {
            return Err(RsiError::InsufficientData {
                required: self.required_len(),
                actual: closes.len(),
            });
        }
        if let Some((index, &value)) = closes
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite() || **p <= 0.0)
        {
            return Err(RsiError::InvalidInput { index, value });
        }

        let mut changes = closes.windows(2).map(|w| {
            let delta = w[1] - w[0];
            (delta.max(0.0), (-delta).max(0.0))
        });

        let (seed_gain, seed_loss) = changes
            .by_ref()
            .take(self.period)
            .fold((0.0, 0.0), |(g, l), (gain, loss)| (g + gain, l + loss));
        let n = self.period as f64;
        let mut avg_gain = seed_gain / n;
        let mut avg_loss = seed_loss / n;

        let alpha = self.smoothing.alpha(self.period);
        for (gain, loss) in changes {
            avg_gain = gain * alpha + avg_gain * (1.0 - alpha);
            avg_loss = loss * alpha + avg_loss * (1.0 - alpha);
        }

        Ok(rsi_from_averages(avg_gain, avg_loss))
    }
}

impl Default for RsiEngine {
    fn default() -> Self {
        Self::new(14, Smoothing::Wilder)
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
