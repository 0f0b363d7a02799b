//! Risk classifier: the single place a score becomes a priority tier.
//!
//! RULE: Tiers are derived on every read, never stored next to the score.
//! The queue builder, the explainer and the export all call `classify()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Thresholds ───────────────────────────────────────────────────────────────

/// Scores at or above this are HIGH priority.
pub const HIGH_THRESHOLD: f64 = 0.75;

/// Scores at or above this (and below HIGH) are MODERATE priority.
pub const MODERATE_THRESHOLD: f64 = 0.40;

/// Gauge delta reference on the 0–100 scale: the moderate cutoff.
pub const GAUGE_REFERENCE_PCT: f64 = 40.0;

const HIGH_BAND_FROM_PCT: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    High,
    Moderate,
    Low,
}

/// Map a score in [0,1] to its tier. Evaluated high to low, first match wins.
pub fn classify(score: f64) -> RiskTier {
    if score >= HIGH_THRESHOLD {
        RiskTier::High
    } else if score >= MODERATE_THRESHOLD {
        RiskTier::Moderate
    } else {
        RiskTier::Low
    }
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::High, RiskTier::Moderate, RiskTier::Low];

    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::High     => "HIGH",
            RiskTier::Moderate => "MODERATE",
            RiskTier::Low      => "LOW",
        }
    }

    /// Severity colour used by the table and the gauge bar.
    pub fn colour(&self) -> &'static str {
        match self {
            RiskTier::High     => "red",
            RiskTier::Moderate => "orange",
            RiskTier::Low      => "green",
        }
    }

    /// Gauge band on the percentage scale, lower bound inclusive.
    pub fn band_pct(&self) -> (f64, f64) {
        match self {
            RiskTier::High     => (HIGH_BAND_FROM_PCT, 100.0),
            RiskTier::Moderate => (GAUGE_REFERENCE_PCT, HIGH_BAND_FROM_PCT),
            RiskTier::Low      => (0.0, GAUGE_REFERENCE_PCT),
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH"     => Ok(RiskTier::High),
            "MODERATE" => Ok(RiskTier::Moderate),
            "LOW"      => Ok(RiskTier::Low),
            other      => Err(format!("unknown risk tier '{other}'")),
        }
    }
}

/// One coloured step of the risk gauge.
#[derive(Debug, Clone, Serialize)]
pub struct GaugeBand {
    pub tier:   RiskTier,
    pub from:   f64,
    pub to:     f64,
    pub colour: &'static str,
}

/// Gauge steps from low to high, ready for the renderer.
pub fn gauge_bands() -> Vec<GaugeBand> {
    RiskTier::ALL
        .iter()
        .rev()
        .map(|tier| {
            let (from, to) = tier.band_pct();
            GaugeBand { tier: *tier, from, to, colour: tier.colour() }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_fall_into_the_upper_tier() {
        assert_eq!(classify(0.75), RiskTier::High);
        assert_eq!(classify(0.40), RiskTier::Moderate);
        assert_eq!(classify(0.7499999), RiskTier::Moderate);
        assert_eq!(classify(0.3999999), RiskTier::Low);
    }

    #[test]
    fn extremes_of_the_domain() {
        assert_eq!(classify(0.0), RiskTier::Low);
        assert_eq!(classify(1.0), RiskTier::High);
    }

    #[test]
    fn classify_matches_threshold_rules_on_a_fine_grid() {
        for i in 0..=1000 {
            let s = i as f64 / 1000.0;
            let tier = classify(s);
            assert_eq!(tier == RiskTier::High, s >= 0.75, "score {s}");
            assert_eq!(tier == RiskTier::Moderate, (0.40..0.75).contains(&s), "score {s}");
            assert_eq!(tier == RiskTier::Low, s < 0.40, "score {s}");
        }
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("high".parse::<RiskTier>(), Ok(RiskTier::High));
        assert_eq!(" Moderate ".parse::<RiskTier>(), Ok(RiskTier::Moderate));
        assert_eq!("LOW".parse::<RiskTier>(), Ok(RiskTier::Low));
        assert!("critical".parse::<RiskTier>().is_err());
    }

    #[test]
    fn gauge_bands_cover_the_scale_without_gaps() {
        let bands = gauge_bands();
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0].from, 0.0);
        assert_eq!(bands[2].to, 100.0);
        for pair in bands.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn serializes_as_upper_case_label() {
        let json = serde_json::to_string(&RiskTier::Moderate).unwrap();
        assert_eq!(json, "\"MODERATE\"");
    }
}
