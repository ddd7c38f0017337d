//! Health brain: daily-profile anomaly detection, gait and activity trends,
//! longitudinal analysers, the weekly heatmap and room-silence alerts.

use crate::infrastructure::model_store::{HEALTH_MODEL_FILE, ModelStore};
use crate::neural::isolation_forest::IsolationForest;
use crate::utils::error::{CogniError, CogniResult};
use crate::utils::math::{linear_fit, mean, median, moving_average, std_dev};
use chrono::{TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::security::MovementSequence;

const ACTIVITY_SLOTS: usize = 96;
const CONTAMINATION: f64 = 0.1;
const HALLWAY_TOKENS: [&str; 3] = ["flur", "diele", "gang"];
const MIN_GAIT_SAMPLES: usize = 5;
const BASELINE_WINDOW: usize = 14;
const TREND_BAND_PERCENT: f64 = 5.0;

/// Per-day activity summary delivered by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyDigest {
    #[serde(default, rename = "activityVector")]
    pub activity_vector: Option<Vec<f64>>,
    #[serde(default, rename = "eventCount")]
    pub event_count: f64,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub prediction: i32,
    pub info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaitReport {
    pub percent_change: Option<f64>,
    pub sensors: Vec<String>,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub tag: String,
    pub classification: String,
    pub percent_change: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedValue {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongtermReport {
    pub metric: String,
    pub timeline: Vec<String>,
    pub values: Vec<f64>,
    pub baseline: f64,
    pub baseline_std: f64,
    pub moving_average: Vec<f64>,
    pub classification: String,
}

/// Raw host event as stored in a day's `eventHistory`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHeat {
    pub date: String,
    pub counts: Vec<f64>,
    pub relative: Vec<f64>,
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourFlag {
    pub date: String,
    pub hour: u32,
    pub flag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeatmapReport {
    pub baseline: Vec<f64>,
    pub days: Vec<DayHeat>,
    pub flags: Vec<HourFlag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPresence {
    #[serde(rename = "lastActivity_ms")]
    pub last_activity_ms: i64,
    #[serde(rename = "totalMinutes")]
    pub total_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceAlert {
    pub room: String,
    pub hours_silent: f64,
    pub level: String,
}

/// Ratio thresholds for one longitudinal metric.
struct MetricProfile {
    decline_ratio: f64,
    decline_label: &'static str,
    rise_ratio: f64,
}

fn metric_profile(metric: &str) -> Option<MetricProfile> {
    let profile = match metric {
        "longterm_activity" => MetricProfile {
            decline_ratio: 0.7,
            decline_label: "RUECKGANG",
            rise_ratio: 1.3,
        },
        "night_restlessness" => MetricProfile {
            decline_ratio: 0.8,
            decline_label: "RUECKGANG",
            rise_ratio: 1.2,
        },
        "room_mobility" => MetricProfile {
            decline_ratio: 0.6,
            decline_label: "IMMOBIL",
            rise_ratio: 1.4,
        },
        "hygiene_frequency" => MetricProfile {
            decline_ratio: 0.7,
            decline_label: "RUECKGANG",
            rise_ratio: 1.3,
        },
        "ventilation_behavior" => MetricProfile {
            decline_ratio: 0.5,
            decline_label: "RUECKGANG",
            rise_ratio: 1.5,
        },
        "gait_speed_longterm" => MetricProfile {
            decline_ratio: 0.8,
            decline_label: "IMMOBIL",
            rise_ratio: 1.2,
        },
        _ => return None,
    };
    Some(profile)
}

#[derive(Debug, Default)]
pub struct HealthBrain {
    forest: Option<IsolationForest>,
}

impl HealthBrain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.forest.is_some()
    }

    /// 96-slot activity vector per digest; digests without one get a crude
    /// synthesised daytime spread of their event count.
    fn prepare_features(digests: &[DailyDigest]) -> Vec<Vec<f64>> {
        digests
            .iter()
            .map(|digest| match &digest.activity_vector {
                Some(vector) if vector.len() == ACTIVITY_SLOTS => vector.clone(),
                _ => {
                    let mut vector = vec![0.0; ACTIVITY_SLOTS];
                    let level = (digest.event_count / 50.0).floor();
                    for slot in vector.iter_mut().take(80).skip(30) {
                        *slot = level;
                    }
                    vector
                }
            })
            .collect()
    }

    pub fn train(&mut self, digests: &[DailyDigest]) -> CogniResult<usize> {
        let features = Self::prepare_features(digests);
        if features.len() < 2 {
            return Err(CogniError::InsufficientData {
                reason: format!("need at least 2 days of digests, got {}", features.len()),
            });
        }
        let mut rng = rand::thread_rng();
        let forest = IsolationForest::fit(&features, CONTAMINATION, &mut rng)?;
        info!("health anomaly model trained on {} days", features.len());
        self.forest = Some(forest);
        Ok(features.len())
    }

    pub fn analyze(&self, digest: &DailyDigest) -> CogniResult<HealthVerdict> {
        let forest = self
            .forest
            .as_ref()
            .ok_or_else(|| CogniError::not_ready("health"))?;
        let features = Self::prepare_features(std::slice::from_ref(digest));
        let row = &features[0];
        Ok(HealthVerdict {
            prediction: forest.predict(row),
            info: format!("Anomaly Score: {:.3}", forest.score_sample(row)),
        })
    }

    /// Gait speed over hallway-only movement sequences.
    pub fn analyze_gait(&self, sequences: &[MovementSequence]) -> GaitReport {
        let mut durations = Vec::new();
        let mut sensors = Vec::new();

        for sequence in sequences {
            if sequence.steps.len() < 2 {
                continue;
            }
            let all_hallway = sequence.steps.iter().all(|step| {
                let loc = step.loc.to_lowercase();
                HALLWAY_TOKENS.iter().any(|token| loc.contains(token))
            });
            if !all_hallway {
                continue;
            }
            let duration = sequence.steps[sequence.steps.len() - 1].t_delta;
            if duration > 1.0 && duration < 20.0 {
                durations.push(duration);
                for step in &sequence.steps {
                    if !sensors.contains(&step.loc) {
                        sensors.push(step.loc.clone());
                    }
                }
            }
        }

        if durations.len() < MIN_GAIT_SAMPLES {
            return GaitReport {
                percent_change: None,
                sensors,
                proof: format!(
                    "insufficient hallway passes: {} of {MIN_GAIT_SAMPLES} required",
                    durations.len()
                ),
            };
        }

        let Some((slope, intercept)) = linear_fit(&durations) else {
            return GaitReport {
                percent_change: None,
                sensors,
                proof: "degenerate regression".to_string(),
            };
        };
        let mut start = intercept;
        if start == 0.0 {
            start = 0.01;
        }
        let end = slope * (durations.len() - 1) as f64 + intercept;
        let percent_change = (end - start) / start * 100.0;

        let tail: Vec<String> = durations
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|d| format!("{d:.2}"))
            .collect();
        GaitReport {
            percent_change: Some(percent_change),
            sensors,
            proof: format!(
                "n={}, slope={slope:.4}, intercept={intercept:.2}, last=[{}]",
                durations.len(),
                tail.join(", ")
            ),
        }
    }

    /// Linear trend over a daily value series, guarded against a near-zero
    /// baseline.
    pub fn analyze_trend(&self, values: &[f64], tag: &str) -> CogniResult<TrendReport> {
        if values.len() < 3 {
            return Err(CogniError::InsufficientData {
                reason: format!("trend needs at least 3 values, got {}", values.len()),
            });
        }
        let (slope, intercept) = linear_fit(values).ok_or_else(|| {
            CogniError::numeric("trend regression", "degenerate value series")
        })?;

        let start = if intercept.abs() < 0.1 {
            0.1 * intercept.signum()
        } else {
            intercept
        };
        let end = slope * (values.len() - 1) as f64 + intercept;
        let percent_change = (end - start) / start * 100.0;

        let classification = if percent_change > TREND_BAND_PERCENT {
            "Steigend"
        } else if percent_change < -TREND_BAND_PERCENT {
            "Fallend"
        } else {
            "Stabil"
        };
        Ok(TrendReport {
            tag: tag.to_string(),
            classification: classification.to_string(),
            percent_change,
            slope,
        })
    }

    /// Longitudinal analyser family: baseline, spread, moving average and a
    /// first-vs-last-week ratio classification with metric-specific
    /// thresholds.
    pub fn analyze_longterm(
        &self,
        metric: &str,
        series: &[DatedValue],
        weeks: u32,
    ) -> CogniResult<LongtermReport> {
        let profile = metric_profile(metric)
            .ok_or_else(|| CogniError::invalid("metric", format!("unknown metric {metric}")))?;
        if series.is_empty() {
            return Err(CogniError::InsufficientData {
                reason: "empty series".to_string(),
            });
        }

        let mut sorted = series.to_vec();
        sorted.sort_by(|a, b| a.date.cmp(&b.date));
        let keep = (weeks.max(1) as usize) * 7;
        if sorted.len() > keep {
            sorted.drain(..sorted.len() - keep);
        }

        let timeline: Vec<String> = sorted.iter().map(|v| v.date.clone()).collect();
        let values: Vec<f64> = sorted.iter().map(|v| v.value).collect();

        let window_start = values.len().saturating_sub(BASELINE_WINDOW);
        let baseline_window = &values[window_start..];
        let baseline = median(baseline_window).unwrap_or(0.0);
        let baseline_std = std_dev(baseline_window);
        let moving = moving_average(&values, 7);

        let first_week = &values[..values.len().min(7)];
        let last_week = &values[values.len().saturating_sub(7)..];
        let first_mean = mean(first_week);
        let last_mean = mean(last_week);

        let classification = if first_mean.abs() < 1e-9 {
            if last_mean > 1e-9 {
                "STEIGEND"
            } else {
                "STABIL"
            }
        } else {
            let ratio = last_mean / first_mean;
            if ratio <= profile.decline_ratio {
                profile.decline_label
            } else if ratio >= profile.rise_ratio {
                "STEIGEND"
            } else {
                "STABIL"
            }
        };

        Ok(LongtermReport {
            metric: metric.to_string(),
            timeline,
            values,
            baseline,
            baseline_std,
            moving_average: moving,
            classification: classification.to_string(),
        })
    }

    /// Weekly heatmap: hourly motion counts per day against a per-hour
    /// baseline, with rule flags overriding the score on violated
    /// time-of-day windows.
    pub fn analyze_heatmap(&self, history: &BTreeMap<String, Vec<RawEvent>>) -> HeatmapReport {
        if history.is_empty() {
            return HeatmapReport::default();
        }

        let mut day_counts: Vec<(String, [f64; 24])> = Vec::new();
        for (date, events) in history {
            let mut counts = [0.0_f64; 24];
            for event in events {
                if !is_motion_positive(event) {
                    continue;
                }
                if let Some(hour) = event_hour(event) {
                    counts[(hour as usize).min(23)] += 1.0;
                }
            }
            day_counts.push((date.clone(), counts));
        }

        let n_days = day_counts.len() as f64;
        let baseline: Vec<f64> = (0..24)
            .map(|h| day_counts.iter().map(|(_, c)| c[h]).sum::<f64>() / n_days)
            .collect();

        let mut days = Vec::new();
        let mut flags = Vec::new();
        for (date, counts) in &day_counts {
            let mut relative = Vec::with_capacity(24);
            let mut scores = Vec::with_capacity(24);
            for hour in 0..24 {
                let count = counts[hour];
                let base = baseline[hour];

                let rel = if base > 1.0 {
                    100.0 * count / base
                } else if count > 0.0 {
                    (2.0 * count).min(100.0)
                } else {
                    0.0
                };
                relative.push(rel);

                let mut score = if base > 0.0 {
                    -((count - base).abs() / (base + 1.0))
                } else {
                    0.0
                };

                let h = hour as u32;
                if (h >= 22 || h < 6) && count > 2.0 * base {
                    flags.push(HourFlag {
                        date: date.clone(),
                        hour: h,
                        flag: "NIGHT_HIGH_ACTIVITY".to_string(),
                    });
                    score = -0.8;
                } else if (6..10).contains(&h) && count < 0.3 * base && base > 5.0 {
                    flags.push(HourFlag {
                        date: date.clone(),
                        hour: h,
                        flag: "MORNING_NO_ACTIVITY".to_string(),
                    });
                    score = -0.7;
                } else if (10..20).contains(&h) && count < 0.2 * base && base > 3.0 {
                    flags.push(HourFlag {
                        date: date.clone(),
                        hour: h,
                        flag: "DAY_LOW_ACTIVITY".to_string(),
                    });
                    score = score.min(-0.3);
                }
                scores.push(score);
            }
            days.push(DayHeat {
                date: date.clone(),
                counts: counts.to_vec(),
                relative,
                scores,
            });
        }

        HeatmapReport {
            baseline,
            days,
            flags,
        }
    }

    /// Daytime room-silence alerts: YELLOW at four silent hours, RED at
    /// eight. Rooms without meaningful presence history are skipped.
    pub fn check_room_silence(
        &self,
        rooms: &BTreeMap<String, RoomPresence>,
        now_ms: i64,
        hour_of_day: u32,
    ) -> Vec<SilenceAlert> {
        if !(8..22).contains(&hour_of_day) {
            return Vec::new();
        }
        let mut alerts = Vec::new();
        for (room, presence) in rooms {
            if presence.total_minutes < 10.0 {
                continue;
            }
            let hours_silent = (now_ms - presence.last_activity_ms) as f64 / 3_600_000.0;
            let level = if hours_silent >= 8.0 {
                "RED"
            } else if hours_silent >= 4.0 {
                "YELLOW"
            } else {
                continue;
            };
            alerts.push(SilenceAlert {
                room: room.clone(),
                hours_silent: (hours_silent * 10.0).round() / 10.0,
                level: level.to_string(),
            });
        }
        alerts.sort_by(|a, b| {
            b.hours_silent
                .partial_cmp(&a.hours_silent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        alerts
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        if let Some(forest) = self.forest.as_ref() {
            store.save_bin(HEALTH_MODEL_FILE, forest)?;
        }
        Ok(())
    }

    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        if let Some(forest) = store.load_bin::<IsolationForest>(HEALTH_MODEL_FILE)? {
            self.forest = Some(forest);
            debug!("health anomaly model restored");
        }
        Ok(())
    }
}

fn is_motion_positive(event: &RawEvent) -> bool {
    let label = format!(
        "{} {}",
        event.event_type.as_deref().unwrap_or(""),
        event.name.as_deref().unwrap_or("")
    )
    .to_lowercase();
    let motion_like = ["bewegung", "motion", "presence"]
        .iter()
        .any(|token| label.contains(token));
    if !motion_like {
        return false;
    }
    match &event.value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64() == Some(1.0),
        serde_json::Value::String(s) => {
            let s = s.to_lowercase();
            s == "on" || s == "true"
        }
        _ => false,
    }
}

fn event_hour(event: &RawEvent) -> Option<u32> {
    if let Some(hour) = event.hour {
        return (hour < 24).then_some(hour);
    }
    let ts = event.ts?;
    let dt = chrono::Local
        .timestamp_millis_opt(ts)
        .single()?;
    Some(dt.hour())
}
