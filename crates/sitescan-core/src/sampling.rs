//! Sampling policy: how many audits each route receives.
//!
//! Precedence per route: a `custom_sampling` override, then a fixed
//! `samples` count, then dynamic sampling when enabled, then 1.

use std::collections::BTreeMap;

use crate::config::ScannerConfig;
use crate::route::Route;

/// Route-count ceilings of each dynamic sampling tier. Past each ceiling the
/// per-route sample count halves.
const DYNAMIC_TIERS: [usize; 3] = [10, 25, 50];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Fixed(u32),
    Dynamic { max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingPolicy {
    mode: Mode,
    overrides: BTreeMap<String, u32>,
}

impl SamplingPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        let mode = match (config.samples, &config.dynamic_sampling) {
            (Some(n), _) => Mode::Fixed(n),
            (None, dynamic) if dynamic.enabled => Mode::Dynamic { max: dynamic.max },
            (None, _) => Mode::Fixed(1),
        };
        Self {
            mode,
            overrides: config.custom_sampling.clone(),
        }
    }

    pub fn fixed(samples: u32) -> Self {
        Self {
            mode: Mode::Fixed(samples),
            overrides: BTreeMap::new(),
        }
    }

    pub fn dynamic(max: u32) -> Self {
        Self {
            mode: Mode::Dynamic { max },
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, path: impl Into<String>, samples: u32) -> Self {
        self.overrides.insert(path.into(), samples);
        self
    }

    /// Sample count for every route of a site with `route_count` routes,
    /// ignoring per-path overrides. Always at least 1.
    pub fn assign_samples(&self, route_count: usize) -> u32 {
        match self.mode {
            Mode::Fixed(n) => n.max(1),
            Mode::Dynamic { max } => dynamic_samples(route_count, max),
        }
    }

    /// Sample count for one route, honouring overrides.
    pub fn samples_for(&self, route: &Route, route_count: usize) -> u32 {
        self.overrides
            .get(&route.path)
            .copied()
            .unwrap_or_else(|| self.assign_samples(route_count))
            .max(1)
    }
}

/// Non-increasing step function of `route_count`, within `[1, max]`.
fn dynamic_samples(route_count: usize, max: u32) -> u32 {
    let tier = DYNAMIC_TIERS
        .iter()
        .take_while(|ceiling| route_count > **ceiling)
        .count() as u32;
    (max >> tier).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynamicSamplingConfig;
    use crate::route::DiscoverySource;

    #[test]
    fn test_fixed_sampling_is_verbatim() {
        let policy = SamplingPolicy::fixed(3);
        assert_eq!(policy.assign_samples(1), 3);
        assert_eq!(policy.assign_samples(10_000), 3);
    }

    #[test]
    fn test_default_config_samples_once() {
        let policy = SamplingPolicy::from_config(&ScannerConfig::default());
        assert_eq!(policy.assign_samples(5), 1);
    }

    #[test]
    fn test_explicit_samples_win_over_dynamic() {
        let config = ScannerConfig {
            samples: Some(2),
            dynamic_sampling: DynamicSamplingConfig { enabled: true, max: 8 },
            ..ScannerConfig::default()
        };
        assert_eq!(SamplingPolicy::from_config(&config).assign_samples(1), 2);
    }

    #[test]
    fn test_dynamic_tiers() {
        let policy = SamplingPolicy::dynamic(8);
        assert_eq!(policy.assign_samples(1), 8);
        assert_eq!(policy.assign_samples(10), 8);
        assert_eq!(policy.assign_samples(11), 4);
        assert_eq!(policy.assign_samples(25), 4);
        assert_eq!(policy.assign_samples(26), 2);
        assert_eq!(policy.assign_samples(51), 1);
        assert_eq!(policy.assign_samples(5_000), 1);
    }

    #[test]
    fn test_dynamic_is_non_increasing_and_bounded() {
        for max in [1, 2, 3, 8, 13] {
            let policy = SamplingPolicy::dynamic(max);
            let mut previous = u32::MAX;
            for route_count in 1..=500 {
                let samples = policy.assign_samples(route_count);
                assert!(samples >= 1 && samples <= max, "{samples} outside [1, {max}]");
                assert!(samples <= previous, "increased at {route_count} routes");
                previous = samples;
            }
        }
    }

    #[test]
    fn test_override_takes_precedence() {
        let policy = SamplingPolicy::dynamic(8).with_override("/pricing", 5);
        let pricing = Route::new("/pricing", DiscoverySource::Manual);
        let about = Route::new("/about", DiscoverySource::Manual);

        assert_eq!(policy.samples_for(&pricing, 400), 5);
        assert_eq!(policy.samples_for(&about, 400), 1);
    }

    #[test]
    fn test_zero_is_clamped_to_one() {
        let policy = SamplingPolicy::fixed(0).with_override("/x", 0);
        assert_eq!(policy.assign_samples(1), 1);
        assert_eq!(
            policy.samples_for(&Route::new("/x", DiscoverySource::Manual), 1),
            1
        );
    }
}
