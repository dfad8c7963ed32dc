// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA(period); upper/lower = middle ± k * σ. The normalised
// band width `(upper - lower) / middle * 100` feeds the regime classifier.
// =============================================================================

/// Result of a Bollinger Band calculation over the latest window.
#[derive(Debug, Clone, Copy)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width as a percentage of the middle band.
    pub width: f64,
}

impl BollingerResult {
    /// Where the price sits inside the bands: 0.0 at the lower band, 1.0 at
    /// the upper. May exceed the range when price escapes the bands.
    pub fn percent_b(&self, price: f64) -> f64 {
        let span = self.upper - self.lower;
        if span <= 0.0 {
            return 0.5;
        }
        (price - self.lower) / span
    }
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// Returns `None` when there are fewer than `period` closes, the period is
/// zero, or the middle band is degenerate.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerResult {
        upper,
        middle,
        lower,
        width,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_straddle_the_mean() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width > 0.0);
    }

    #[test]
    fn flat_series_collapses_width() {
        let bb = calculate_bollinger(&[100.0; 20], 20, 2.0).unwrap();
        assert!(bb.width.abs() < 1e-10);
    }

    #[test]
    fn insufficient_data_returns_none() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[1.0; 20], 0, 2.0).is_none());
    }

    #[test]
    fn percent_b_maps_band_positions() {
        let bb = BollingerResult {
            upper: 110.0,
            middle: 100.0,
            lower: 90.0,
            width: 20.0,
        };
        assert!((bb.percent_b(90.0) - 0.0).abs() < 1e-12);
        assert!((bb.percent_b(100.0) - 0.5).abs() < 1e-12);
        assert!((bb.percent_b(110.0) - 1.0).abs() < 1e-12);
        assert!(bb.percent_b(115.0) > 1.0);
    }
}
