//! Confidence model (C7): five [0,1] quality indicators combined into a
//! single weighted confidence score, §4.6.

use chrono::{NaiveDate, Utc};

use crate::config::ScoringConfig;
use crate::geo;

/// One candidate's worth of confidence-relevant inputs, gathered by the
/// scorer (C6) while it computes kernels, so the confidence model never
/// re-fetches anything.
#[derive(Debug, Clone, Copy)]
pub struct CandidateSummary {
    pub influence: f64,
    pub bearing_deg: f64,
    pub distance_km: f64,
    pub accident_date: NaiveDate,
    pub has_usable_weather_window: bool,
    pub weather_weight: f64,
}

/// Combine the five indicators (§4.6) into overall confidence ∈ [0,1].
/// Returns 0.0 (and all-zero indicators) when `candidates` is empty —
/// the §7 `NoCandidates` case is not an error, just zero confidence.
pub fn compute(candidates: &[CandidateSummary], cfg: &ScoringConfig) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }

    let sample_size = sample_size_indicator(candidates.len());
    let match_quality = match_quality_indicator(candidates);
    let spatial_coverage = spatial_coverage_indicator(candidates);
    let temporal_recency = temporal_recency_indicator(candidates);
    let weather_quality = weather_quality_indicator(candidates);

    (cfg.confidence_weight_sample_size * sample_size
        + cfg.confidence_weight_match_quality * match_quality
        + cfg.confidence_weight_spatial_coverage * spatial_coverage
        + cfg.confidence_weight_temporal_recency * temporal_recency
        + cfg.confidence_weight_weather_quality * weather_quality)
        .clamp(0.0, 1.0)
}

fn sample_size_indicator(n: usize) -> f64 {
    (n as f64 / 30.0).min(1.0)
}

fn match_quality_indicator(candidates: &[CandidateSummary]) -> f64 {
    let mean_influence =
        candidates.iter().map(|c| c.influence).sum::<f64>() / candidates.len() as f64;
    mean_influence.clamp(0.0, 1.0)
}

fn spatial_coverage_indicator(candidates: &[CandidateSummary]) -> f64 {
    let bearings: Vec<f64> = candidates.iter().map(|c| c.bearing_deg).collect();
    let distances: Vec<f64> = candidates.iter().map(|c| c.distance_km).collect();

    let bearing_component = (geo::bearing_std_deg(&bearings) / 90.0).min(1.0);
    let (dist_mean, dist_std) = geo::mean_std(&distances, 0.0);
    let distance_component = if dist_mean > 0.0 {
        (dist_std / dist_mean).min(1.0)
    } else {
        0.0
    };
    (bearing_component + distance_component) / 2.0
}

fn temporal_recency_indicator(candidates: &[CandidateSummary]) -> f64 {
    let today = Utc::now().date_naive();
    let min_days_ago = candidates
        .iter()
        .map(|c| (today - c.accident_date).num_days())
        .min()
        .unwrap_or(i64::MAX);

    if min_days_ago < 365 {
        1.0
    } else if min_days_ago < 3 * 365 {
        0.8
    } else if min_days_ago < 5 * 365 {
        0.6
    } else if min_days_ago < 10 * 365 {
        0.4
    } else {
        0.2
    }
}

fn weather_quality_indicator(candidates: &[CandidateSummary]) -> f64 {
    let usable: Vec<&CandidateSummary> = candidates
        .iter()
        .filter(|c| c.has_usable_weather_window)
        .collect();
    let fraction_usable = usable.len() as f64 / candidates.len() as f64;
    let mean_weather_weight = if usable.is_empty() {
        0.0
    } else {
        usable.iter().map(|c| c.weather_weight).sum::<f64>() / usable.len() as f64
    };
    (fraction_usable + mean_weather_weight) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(days_ago: i64, influence: f64) -> CandidateSummary {
        CandidateSummary {
            influence,
            bearing_deg: 0.0,
            distance_km: 10.0,
            accident_date: Utc::now().date_naive() - Duration::days(days_ago),
            has_usable_weather_window: true,
            weather_weight: 0.8,
        }
    }

    #[test]
    fn no_candidates_is_zero_confidence() {
        let cfg = ScoringConfig::from_env();
        assert_eq!(compute(&[], &cfg), 0.0);
    }

    #[test]
    fn confidence_is_bounded() {
        let cfg = ScoringConfig::from_env();
        let candidates: Vec<CandidateSummary> = (0..40).map(|i| candidate(i * 10, 0.5)).collect();
        let c = compute(&candidates, &cfg);
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn sample_size_saturates_at_thirty() {
        assert_eq!(sample_size_indicator(30), 1.0);
        assert_eq!(sample_size_indicator(60), 1.0);
        assert!((sample_size_indicator(15) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn temporal_recency_step_function() {
        let recent = vec![candidate(10, 0.5)];
        let old = vec![candidate(20 * 365, 0.5)];
        assert_eq!(temporal_recency_indicator(&recent), 1.0);
        assert_eq!(temporal_recency_indicator(&old), 0.2);
    }

    #[test]
    fn weather_quality_zero_when_no_usable_windows() {
        let mut c = candidate(10, 0.5);
        c.has_usable_weather_window = false;
        assert_eq!(weather_quality_indicator(&[c]), 0.0);
    }
}
