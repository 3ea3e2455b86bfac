use crate::model::LatencyResult;

/// Aggregate view of one latency probe.
#[derive(Debug, Clone, PartialEq)]
pub struct DelaySummary {
    pub fastest: String,
    pub fastest_ms: u64,
    pub mean_ms: f64,
    pub median_ms: u64,
    pub measured: usize,
}

/// Summarize a probe result (fastest node, mean, upper median). `None` when there is no data.
pub fn summarize_delays(delays: &LatencyResult) -> Option<DelaySummary> {
    let (fastest, fastest_ms) = delays
        .iter()
        .min_by_key(|(name, ms)| (**ms, name.as_str()))
        .map(|(name, ms)| (name.clone(), *ms))?;

    let mut sorted: Vec<u64> = delays.values().copied().collect();
    sorted.sort_unstable();
    let n = sorted.len();
    // Summed as f64: the control API may report arbitrary values.
    let mean_ms = sorted.iter().map(|&ms| ms as f64).sum::<f64>() / n as f64;
    Some(DelaySummary {
        fastest,
        fastest_ms,
        mean_ms,
        median_ms: sorted[n / 2],
        measured: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_probe_has_no_summary() {
        assert_eq!(summarize_delays(&LatencyResult::new()), None);
    }

    #[test]
    fn picks_fastest_and_averages() {
        let delays: LatencyResult = [("HK", 150), ("JP", 450), ("US", 900), ("SG", 650)]
            .into_iter()
            .map(|(n, ms)| (n.to_string(), ms))
            .collect();
        let s = summarize_delays(&delays).unwrap();
        assert_eq!(s.fastest, "HK");
        assert_eq!(s.fastest_ms, 150);
        assert_eq!(s.measured, 4);
        assert!((s.mean_ms - 537.5).abs() < f64::EPSILON);
        assert_eq!(s.median_ms, 650);
    }

    #[test]
    fn ties_break_by_name() {
        let delays: LatencyResult = [("b", 100), ("a", 100)]
            .into_iter()
            .map(|(n, ms)| (n.to_string(), ms))
            .collect();
        assert_eq!(summarize_delays(&delays).unwrap().fastest, "a");
    }

    #[test]
    fn huge_delays_do_not_overflow() {
        let delays: LatencyResult = [("a", u64::MAX), ("b", u64::MAX)]
            .into_iter()
            .map(|(n, ms)| (n.to_string(), ms))
            .collect();
        let s = summarize_delays(&delays).unwrap();
        assert_eq!(s.mean_ms, u64::MAX as f64);
        assert_eq!(s.median_ms, u64::MAX);
    }
}
