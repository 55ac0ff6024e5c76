//! Derived series for the Kudos chart.
//!
//! All series are computed in memory from the log; the log itself is never
//! rewritten.

use crate::config::report::DIFF_MA_WINDOW;
use crate::models::Reading;

/// Balance over time plus derived series, one entry per reading.
#[derive(Debug, Clone, PartialEq)]
pub struct KudosSeries {
    /// Seconds since the first reading.
    pub elapsed_secs: Vec<f64>,
    /// The recorded balance.
    pub kudos: Vec<f64>,
    /// Trailing moving average of the balance.
    pub moving_average: Vec<f64>,
    /// Change since the previous reading; undefined for the first.
    pub first_difference: Vec<Option<f64>>,
    /// Trailing moving average of the first difference.
    pub difference_average: Vec<Option<f64>>,
}

impl KudosSeries {
    /// Computes every series for `readings`, in file order.
    #[must_use]
    pub fn compute(readings: &[Reading], ma_window: usize) -> Self {
        let origin = readings.first().map(|r| r.timestamp);
        let elapsed_secs = readings
            .iter()
            .map(|r| {
                origin.map_or(0.0, |start| {
                    #[allow(clippy::cast_precision_loss)]
                    let millis = (r.timestamp - start).num_milliseconds() as f64;
                    millis / 1000.0
                })
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let kudos: Vec<f64> = readings.iter().map(|r| r.value as f64).collect();
        let moving_average = rolling_mean(&kudos, ma_window);
        let first_difference = first_difference(&kudos);
        let difference_average = rolling_mean_sparse(&first_difference, DIFF_MA_WINDOW);

        Self {
            elapsed_secs,
            kudos,
            moving_average,
            first_difference,
            difference_average,
        }
    }

    /// Number of points in each series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kudos.len()
    }

    /// Returns true if there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kudos.is_empty()
    }
}

/// Trailing mean over up to `window` values.
///
/// Leading positions average over however many values are available.
#[must_use]
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut sum = 0.0;
    let mut out = Vec::with_capacity(values.len());

    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        let count = (i + 1).min(window);
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / count as f64;
        out.push(mean);
    }
    out
}

/// Trailing mean over up to `window` positions, skipping undefined values.
///
/// A position whose window holds no defined values is itself undefined.
#[must_use]
pub fn rolling_mean_sparse(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let mut sum = 0.0;
    let mut count = 0_usize;
    let mut out = Vec::with_capacity(values.len());

    for (i, value) in values.iter().enumerate() {
        if let Some(v) = value {
            sum += v;
            count += 1;
        }
        if i >= window {
            if let Some(old) = values[i - window] {
                sum -= old;
                count -= 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = (count > 0).then(|| sum / count as f64);
        out.push(mean);
    }
    out
}

/// Difference between each value and its predecessor.
#[must_use]
pub fn first_difference(values: &[f64]) -> Vec<Option<f64>> {
    std::iter::once(None)
        .chain(values.windows(2).map(|pair| Some(pair[1] - pair[0])))
        .take(values.len())
        .collect()
}
