/// Mean of the trailing `period` values, `None` when the series is too short
pub fn latest_sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    let window = &data[data.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index over the most recent `period` changes.
///
/// Plain averages of gains and losses in the window (no Wilder smoothing).
/// A window without losses reads 100.
pub fn rsi_latest(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let window = &data[data.len() - period - 1..];
    let (gains, losses) = window.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (g + change, l)
        } else {
            (g, l - change)
        }
    });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}
