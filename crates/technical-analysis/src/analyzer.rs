use arena_core::{ArenaError, Bar, MarketSignal, TechnicalSnapshot};

use crate::indicators::*;

/// Computes the fixed indicator panel over an OHLCV window and derives
/// the overall signal by majority vote among the sub-signals.
pub struct TechnicalAnalyzer;

impl TechnicalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Build the panel from a daily OHLCV window (typically 90 trading
    /// days; 52-week fields use whatever depth is available).
    pub fn analyze(&self, bars: &[Bar]) -> Result<TechnicalSnapshot, ArenaError> {
        if bars.len() < 30 {
            return Err(ArenaError::InsufficientData(format!(
                "need at least 30 bars, got {}",
                bars.len()
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last_close = *closes.last().unwrap();

        let sma_20 = sma_series(&closes, 20);
        let sma_50 = sma_series(&closes, 50);
        let sma_200 = sma_series(&closes, 200);
        let ema_12 = ema_series(&closes, 12);
        let ema_26 = ema_series(&closes, 26);
        let macd_panel = macd(&closes, 12, 26, 9);
        let bands = bollinger(&closes, 20, 2.0);
        let stoch = stochastic(bars, 14, 3, 3);
        let adx_panel = adx(bars, 14);
        let rsi_value = rsi(&closes, 14);
        let pivots = pivot_levels(bars, 30.min(bars.len()));

        // 52-week extremes over up to 252 trading days
        let yearly = &bars[bars.len().saturating_sub(252)..];
        let week_52_high = yearly.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let week_52_low = yearly.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

        let overall = self.vote(
            last_close,
            rsi_value,
            macd_panel.as_ref(),
            &sma_20,
            &sma_50,
            adx_panel.as_ref(),
        );

        Ok(TechnicalSnapshot {
            rsi_14: rsi_value,
            macd: macd_panel.as_ref().map(|m| m.line),
            macd_signal: macd_panel.as_ref().map(|m| m.signal),
            macd_histogram: macd_panel.as_ref().map(|m| m.histogram),
            sma_20: sma_20.last().copied(),
            sma_50: sma_50.last().copied(),
            sma_200: sma_200.last().copied(),
            ema_12: ema_12.last().copied(),
            ema_26: ema_26.last().copied(),
            bb_upper: bands.map(|b| b.upper),
            bb_middle: bands.map(|b| b.middle),
            bb_lower: bands.map(|b| b.lower),
            stochastic_k: stoch.map(|s| s.k),
            stochastic_d: stoch.map(|s| s.d),
            adx_14: adx_panel.map(|a| a.adx),
            atr_14: atr(bars, 14),
            obv: obv(bars),
            support: pivots.support,
            resistance: pivots.resistance,
            week_52_high: week_52_high.is_finite().then_some(week_52_high),
            week_52_low: week_52_low.is_finite().then_some(week_52_low),
            change_1d_percentage: percent_change(&closes, 1),
            change_5d_percentage: percent_change(&closes, 5),
            change_20d_percentage: percent_change(&closes, 20),
            overall_signal: Some(overall),
        })
    }

    /// Majority vote among five sub-signals: RSI zone, MACD crossover
    /// sign, price vs SMA-50, golden/death cross, ADX-confirmed trend.
    fn vote(
        &self,
        last_close: f64,
        rsi_value: Option<f64>,
        macd_panel: Option<&Macd>,
        sma_20: &[f64],
        sma_50: &[f64],
        adx_panel: Option<&Adx>,
    ) -> MarketSignal {
        let mut bullish = 0u32;
        let mut bearish = 0u32;

        if let Some(rsi) = rsi_value {
            if rsi < 30.0 {
                bullish += 1; // oversold, reversal candidate
            } else if rsi > 70.0 {
                bearish += 1;
            }
        }

        if let Some(macd) = macd_panel {
            if macd.histogram > 0.0 {
                bullish += 1;
            } else if macd.histogram < 0.0 {
                bearish += 1;
            }
        }

        if let Some(&sma) = sma_50.last() {
            if last_close > sma {
                bullish += 1;
            } else if last_close < sma {
                bearish += 1;
            }
        }

        // Golden/death cross: SMA-20 crossing SMA-50 on the latest bar
        if sma_20.len() >= 2 && sma_50.len() >= 2 {
            let (s20, s50) = (sma_20[sma_20.len() - 1], sma_50[sma_50.len() - 1]);
            let (p20, p50) = (sma_20[sma_20.len() - 2], sma_50[sma_50.len() - 2]);
            if s20 > s50 && p20 <= p50 {
                bullish += 1;
            } else if s20 < s50 && p20 >= p50 {
                bearish += 1;
            }
        }

        if let Some(adx) = adx_panel {
            if adx.adx > 25.0 {
                if adx.plus_di > adx.minus_di {
                    bullish += 1;
                } else {
                    bearish += 1;
                }
            }
        }

        if bullish > bearish {
            MarketSignal::Bullish
        } else if bearish > bullish {
            MarketSignal::Bearish
        } else {
            MarketSignal::Neutral
        }
    }
}

impl Default for TechnicalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn daily_bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "SAP.DE".into(),
                timestamp: Utc::now() - chrono::Duration::days((closes.len() - i) as i64),
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 10_000.0,
            })
            .collect()
    }

    #[test]
    fn rejects_short_windows() {
        let bars = daily_bars(&[100.0; 10]);
        let analyzer = TechnicalAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(&bars),
            Err(ArenaError::InsufficientData(_))
        ));
    }

    #[test]
    fn uptrend_votes_bullish() {
        let closes: Vec<f64> = (0..90).map(|i| 100.0 + i as f64 * 0.8).collect();
        let snapshot = TechnicalAnalyzer::new().analyze(&daily_bars(&closes)).unwrap();
        assert_eq!(snapshot.overall_signal, Some(MarketSignal::Bullish));
        assert!(snapshot.sma_20.is_some());
        assert!(snapshot.sma_50.is_some());
        // only 90 bars: no SMA-200
        assert!(snapshot.sma_200.is_none());
        assert!(snapshot.change_5d_percentage.unwrap() > 0.0);
    }

    #[test]
    fn downtrend_votes_bearish() {
        let closes: Vec<f64> = (0..90).map(|i| 200.0 - i as f64 * 0.8).collect();
        let snapshot = TechnicalAnalyzer::new().analyze(&daily_bars(&closes)).unwrap();
        assert_eq!(snapshot.overall_signal, Some(MarketSignal::Bearish));
    }

    #[test]
    fn week_52_extremes_cover_window() {
        let closes: Vec<f64> = (0..90).map(|i| 100.0 + (i % 10) as f64).collect();
        let snapshot = TechnicalAnalyzer::new().analyze(&daily_bars(&closes)).unwrap();
        let high = snapshot.week_52_high.unwrap();
        let low = snapshot.week_52_low.unwrap();
        assert!(high >= 109.0);
        assert!(low <= 100.0);
    }
}
