//! Comfort pattern miner: two-step trigger/action rules from the raw event
//! stream, filtered to actuators the host is allowed to drive.

use crate::utils::error::{CogniError, CogniResult};
use crate::utils::math::mean;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const LOOKAHEAD_EVENTS: usize = 10;
const WINDOW_SECONDS: f64 = 45.0;
const DEBOUNCE_SECONDS: f64 = 1.0;
const MIN_OCCURRENCES: usize = 3;
const MIN_CONFIDENCE: f64 = 0.4;
const MAX_RULES: usize = 5;

const ALLOWED_ACTORS: [&str; 7] = [
    "light",
    "dimmer",
    "blind",
    "lock",
    "thermostat",
    "switch",
    "plug",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComfortEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Unix timestamp, milliseconds.
    pub timestamp: i64,
}

impl ComfortEvent {
    fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComfortRule {
    pub rule: String,
    pub confidence: f64,
    pub count: usize,
    pub time_info: String,
}

#[derive(Debug, Default)]
pub struct ComfortBrain;

impl ComfortBrain {
    pub fn new() -> Self {
        Self
    }

    /// Mine `A -> B` rules: B follows A within the time window, B is a
    /// whitelisted actuator, the pair repeats often enough and the
    /// conditional confidence clears the bar.
    pub fn train(
        &self,
        events: &[ComfortEvent],
        device_map: &HashMap<String, String>,
    ) -> CogniResult<Vec<ComfortRule>> {
        if events.is_empty() {
            return Err(CogniError::InsufficientData {
                reason: "no events to mine".to_string(),
            });
        }

        let mut sorted: Vec<&ComfortEvent> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);

        let mut pair_delays: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut trigger_counts: HashMap<&str, usize> = HashMap::new();

        for (i, trigger) in sorted.iter().enumerate() {
            let name_a = trigger.display_name();
            *trigger_counts.entry(name_a).or_insert(0) += 1;

            for follower in sorted.iter().skip(i + 1).take(LOOKAHEAD_EVENTS - 1) {
                let delta = (follower.timestamp - trigger.timestamp) as f64 / 1000.0;
                if delta > WINDOW_SECONDS {
                    break;
                }
                let name_b = follower.display_name();
                if delta < DEBOUNCE_SECONDS || name_a == name_b {
                    continue;
                }
                if !is_allowed_action(follower, device_map) {
                    continue;
                }
                pair_delays
                    .entry(format!("{name_a} -> {name_b}"))
                    .or_default()
                    .push(delta);
            }
        }

        let mut rules = Vec::new();
        for (rule, delays) in pair_delays {
            let count = delays.len();
            if count < MIN_OCCURRENCES {
                continue;
            }
            let source = rule.split(" -> ").next().unwrap_or_default();
            let occurrences = trigger_counts.get(source).copied().unwrap_or(1).max(1);
            let confidence = count as f64 / occurrences as f64;
            if confidence > MIN_CONFIDENCE {
                let avg = mean(&delays);
                rules.push(ComfortRule {
                    rule,
                    confidence,
                    count,
                    time_info: format!("Ø +{avg:.1}s"),
                });
            }
        }

        rules.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rules.truncate(MAX_RULES);
        info!("comfort mining: {} valid rules", rules.len());
        Ok(rules)
    }
}

/// The consequent must be a known actuator; unknown devices are skipped for
/// safety.
fn is_allowed_action(event: &ComfortEvent, device_map: &HashMap<String, String>) -> bool {
    let Some(id) = event.id.as_deref() else {
        return false;
    };
    device_map
        .get(id)
        .is_some_and(|dtype| ALLOWED_ACTORS.contains(&dtype.as_str()))
}
