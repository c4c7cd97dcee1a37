//! Pulse detection by local-maximum search.
//!
//! A sample is a candidate peak when it is strictly greater than both
//! neighbours; the first and last samples never qualify. Candidates below
//! `min_height` are dropped. The remaining peaks are then thinned so that no
//! two are closer than `min_distance` samples: peaks are visited from the
//! tallest down (equal heights in index order) and each one kept removes its
//! lower neighbours inside the window.

/// Sensitivity of the event detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParams {
    /// Minimum amplitude of a peak, inclusive.
    pub min_height: f64,
    /// Minimum separation between two kept peaks, in samples.
    pub min_distance: usize,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            min_height: 2.0,
            min_distance: 2,
        }
    }
}

impl PeakParams {
    pub fn detect(&self, signal: &[f64]) -> Vec<usize> {
        detect_events(signal, self.min_height, self.min_distance)
    }
}

/// Indices of the strict local maxima of `signal`, in increasing order.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    signal
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[1] > w[0] && w[1] > w[2])
        .map(|(i, _)| i + 1)
        .collect()
}

/// Find pulse events in `signal`. Returns strictly increasing indices.
pub fn detect_events(signal: &[f64], min_height: f64, min_distance: usize) -> Vec<usize> {
    #[cfg(feature = "cpu-profiling")]
    let _span = tracy_client::span!("detect_events");

    let peaks: Vec<usize> = local_maxima(signal)
        .into_iter()
        .filter(|&i| signal[i] >= min_height)
        .collect();

    if min_distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    // Tallest first; the stable sort keeps index order among equal heights
    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| signal[peaks[b]].total_cmp(&signal[peaks[a]]));

    let mut keep = vec![true; peaks.len()];
    for &k in &priority {
        if !keep[k] {
            continue;
        }
        let position = peaks[k];

        let mut j = k;
        while j > 0 && position - peaks[j - 1] < min_distance {
            j -= 1;
            keep[j] = false;
        }

        let mut j = k + 1;
        while j < peaks.len() && peaks[j] - position < min_distance {
            keep[j] = false;
            j += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(peak))
        .collect()
}
