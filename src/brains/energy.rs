//! Energy brain: per-room thermodynamic identification, ventilation
//! detection, warm-up estimation and model-predictive coasting advice.

use crate::brains::pinn::{PinnBrain, ThermalSample};
use crate::infrastructure::model_store::{ModelStore, ENERGY_MODEL_FILE};
use crate::infrastructure::room_cache::RoomTemperatureCache;
use crate::utils::config::EnergyConfig;
use crate::utils::error::{CogniError, CogniResult};
use crate::utils::math::median;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Shortest usable step between two readings, hours.
const MIN_STEP_HOURS: f64 = 0.01;
/// Shortest gap for the online ventilation gradient, hours (~5 min).
const MIN_VENT_GAP_HOURS: f64 = 0.08;
const COOLING_EVENT_GRADIENT: f64 = -0.01;
const HEATING_EVENT_GRADIENT: f64 = 0.1;
const DEFAULT_HEATING_RATE: f64 = 3.0;
const MAX_WARMUP_MINUTES: i64 = 720;
const MIN_COASTING_MINUTES: i64 = 15;
const MAX_COASTING_MINUTES: i64 = 240;
const PENALTY_SUPPRESSION: f64 = 0.5;

/// One training reading from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    /// Unix timestamp, milliseconds.
    pub ts: i64,
    pub room: String,
    pub t_in: f64,
    #[serde(default)]
    pub valve: Option<f64>,
    #[serde(default)]
    pub t_out: Option<f64>,
    #[serde(default)]
    pub solar: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VentilationAlert {
    pub room: String,
    pub gradient: f64,
    pub drop: f64,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingForecast {
    #[serde(rename = "1h")]
    pub one_hour: f64,
    #[serde(rename = "4h")]
    pub four_hours: f64,
    pub solar_bonus: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupDetail {
    pub phys: i64,
    pub ai: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmupReport {
    pub times: BTreeMap<String, i64>,
    pub sources: BTreeMap<String, String>,
    pub details: BTreeMap<String, WarmupDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoastingProposal {
    pub room: String,
    pub minutes_safe: i64,
    pub target: f64,
    pub current: f64,
    pub savings_msg: String,
}

/// Training outcome: the updated coefficients plus the per-step samples the
/// PINN can learn from.
#[derive(Debug, Clone)]
pub struct EnergyTraining {
    pub insulation: BTreeMap<String, f64>,
    pub heating: BTreeMap<String, f64>,
    pub pinn_samples: Vec<ThermalSample>,
}

/// Persisted shape: `scores` keeps its historical name for the insulation
/// coefficients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EnergyModel {
    scores: BTreeMap<String, f64>,
    heating: BTreeMap<String, f64>,
    penalties: BTreeMap<String, f64>,
}

#[derive(Debug)]
pub struct EnergyBrain {
    config: EnergyConfig,
    insulation: BTreeMap<String, f64>,
    heating: BTreeMap<String, f64>,
    penalties: BTreeMap<String, f64>,
    ready: bool,
}

impl EnergyBrain {
    pub fn new(config: EnergyConfig) -> Self {
        Self {
            config,
            insulation: BTreeMap::new(),
            heating: BTreeMap::new(),
            penalties: BTreeMap::new(),
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn insulation(&self) -> &BTreeMap<String, f64> {
        &self.insulation
    }

    pub fn heating(&self) -> &BTreeMap<String, f64> {
        &self.heating
    }

    pub fn penalties(&self) -> &BTreeMap<String, f64> {
        &self.penalties
    }

    /// Identify per-room insulation loss and heating gain from a batch of
    /// timestamped readings.
    ///
    /// Steps shorter than 0.01 h are discarded, and gradients outside the
    /// physics caps are window-open / rebound artifacts that must not reach
    /// the estimators. When valve positions are present they split the batch
    /// into cooling and heating phases.
    pub fn train(&mut self, points: &[EnergySample]) -> CogniResult<EnergyTraining> {
        if points.is_empty() {
            return Err(CogniError::InsufficientData {
                reason: "empty training batch".to_string(),
            });
        }
        let has_valves = points.iter().any(|p| p.valve.is_some());

        let mut by_room: BTreeMap<&str, Vec<&EnergySample>> = BTreeMap::new();
        for point in points {
            by_room.entry(point.room.as_str()).or_default().push(point);
        }

        let mut new_insulation = BTreeMap::new();
        let mut new_heating = BTreeMap::new();
        let mut pinn_samples = Vec::new();

        for (room, mut readings) in by_room {
            if readings.len() < 2 {
                continue;
            }
            readings.sort_by_key(|p| p.ts);

            let mut cooling = Vec::new();
            let mut heating = Vec::new();
            for pair in readings.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let dt_h = (b.ts - a.ts) as f64 / 3_600_000.0;
                if dt_h <= MIN_STEP_HOURS {
                    continue;
                }
                let gradient = (b.t_in - a.t_in) / dt_h;
                if !gradient.is_finite()
                    || gradient <= self.config.gradient_cap_low
                    || gradient >= self.config.gradient_cap_high
                {
                    continue;
                }

                let valve = b.valve.unwrap_or(0.0);
                let is_heating_phase =
                    !has_valves || valve >= self.config.valve_heating_threshold;
                let is_cooling_phase =
                    !has_valves || valve < self.config.valve_heating_threshold;
                if is_cooling_phase {
                    cooling.push(gradient);
                }
                if is_heating_phase {
                    heating.push(gradient);
                }

                pinn_samples.push(ThermalSample {
                    t_in: a.t_in,
                    t_out: b.t_out.or(a.t_out).unwrap_or(10.0),
                    valve,
                    solar: b.solar.or(a.solar).unwrap_or(false),
                    rate: gradient,
                });
            }

            let cooling_events: Vec<f64> = cooling
                .iter()
                .copied()
                .filter(|&g| g < COOLING_EVENT_GRADIENT)
                .collect();
            if let Some(value) = median(&cooling_events) {
                new_insulation.insert(room.to_string(), value);
            }

            let heating_events: Vec<f64> = heating
                .iter()
                .copied()
                .filter(|&g| g > HEATING_EVENT_GRADIENT)
                .collect();
            match median(&heating_events) {
                Some(value) if value > 0.0 => {
                    new_heating.insert(room.to_string(), value);
                }
                _ => {
                    let fallback = self
                        .heating
                        .get(room)
                        .copied()
                        .unwrap_or(DEFAULT_HEATING_RATE);
                    new_heating.insert(room.to_string(), fallback);
                }
            }
        }

        self.insulation.extend(new_insulation.clone());
        self.heating.extend(new_heating.clone());
        self.ready = true;
        info!(
            "energy training: {} insulation / {} heating coefficients",
            self.insulation.len(),
            self.heating.len()
        );

        Ok(EnergyTraining {
            insulation: new_insulation,
            heating: new_heating,
            pinn_samples,
        })
    }

    /// Online ventilation detection against the shared temperature cache.
    ///
    /// The detector sees the raw extreme gradients that training filters
    /// away. Every latest reading overwrites the cache entry.
    pub fn check_ventilation(
        &self,
        current_temps: &BTreeMap<String, f64>,
        cache: &mut RoomTemperatureCache,
        now_secs: f64,
    ) -> Vec<VentilationAlert> {
        let mut alerts = Vec::new();
        for (room, &t_now) in current_temps {
            if let Some(last) = cache.get(room) {
                let dt_hours = (now_secs - last.ts) / 3600.0;
                if dt_hours > MIN_VENT_GAP_HOURS {
                    let d_temp = t_now - last.value;
                    let gradient = d_temp / dt_hours;
                    if gradient < self.config.ventilation_gradient_alert {
                        alerts.push(VentilationAlert {
                            room: room.clone(),
                            gradient: round2(gradient),
                            drop: round1(d_temp),
                            msg: format!(
                                "Starker Temperatursturz ({}°C/h). Fenster offen?",
                                round1(gradient)
                            ),
                        });
                    }
                }
            }
            cache.record(room, now_secs, t_now);
        }
        alerts
    }

    /// Passive cooling forecast at 1 h and 4 h horizons.
    pub fn predict_cooling(
        &self,
        current_temps: &BTreeMap<String, f64>,
        t_out: f64,
        t_forecast: Option<f64>,
        is_sunny: bool,
        solar_flags: &BTreeMap<String, bool>,
    ) -> BTreeMap<String, CoolingForecast> {
        if !self.ready {
            return BTreeMap::new();
        }
        let t_eff = effective_temp(t_out, t_forecast);

        let mut forecasts = BTreeMap::new();
        for (room, &t_in) in current_temps {
            let solar = is_sunny && solar_flags.get(room).copied().unwrap_or(false);
            let mut rate = self.insulation.get(room).copied().unwrap_or(-0.2);
            if solar {
                rate += 0.5;
            }
            // A warm outside attenuates the loss instead of cooling further.
            if t_eff > t_in && rate < 0.0 {
                rate = rate.abs() * 0.5;
            }
            forecasts.insert(
                room.clone(),
                CoolingForecast {
                    one_hour: round1(t_in + rate),
                    four_hours: round1(t_in + rate * 4.0),
                    solar_bonus: solar,
                },
            );
        }
        forecasts
    }

    /// Hybrid warm-up estimate: physics fallback, PINN override inside its
    /// plausibility band. The band is checked against the raw regressor
    /// output so an implausible rate cannot be laundered in by the clamp.
    pub fn calculate_warmup_times(
        &self,
        current_temps: &BTreeMap<String, f64>,
        targets: Option<&BTreeMap<String, f64>>,
        pinn: Option<&PinnBrain>,
        t_out: f64,
        is_sunny: bool,
        solar_flags: &BTreeMap<String, bool>,
    ) -> WarmupReport {
        let default_target = targets
            .and_then(|t| t.get("default").copied())
            .unwrap_or(self.config.default_target_temp);

        let mut report = WarmupReport::default();
        for (room, &t_in) in current_temps {
            let target = targets
                .and_then(|t| t.get(room).copied())
                .unwrap_or(default_target);
            let diff = target - t_in;

            if diff <= 0.0 {
                report.times.insert(room.clone(), 0);
                report.sources.insert(room.clone(), "TargetReached".to_string());
                report
                    .details
                    .insert(room.clone(), WarmupDetail { phys: 0, ai: None });
                continue;
            }

            let mut power_phys = self.heating.get(room).copied().unwrap_or(DEFAULT_HEATING_RATE);
            if power_phys <= 0.1 {
                power_phys = 1.0;
            }
            let minutes_phys = ((diff / power_phys * 60.0) as i64).min(MAX_WARMUP_MINUTES);

            let mut minutes = minutes_phys;
            let mut source = "Physics".to_string();
            let mut detail = WarmupDetail {
                phys: minutes_phys,
                ai: None,
            };

            if let Some(pinn) = pinn.filter(|p| p.is_ready()) {
                let solar = is_sunny && solar_flags.get(room).copied().unwrap_or(false);
                if let Some(rate) = pinn.predict_raw(t_in, t_out, 100.0, solar) {
                    if rate > 0.2 && rate < 10.0 {
                        let minutes_ai = ((diff / rate * 60.0) as i64).min(MAX_WARMUP_MINUTES);
                        detail.ai = Some(minutes_ai);
                        minutes = minutes_ai;
                        source = "AI (PINN)".to_string();
                    }
                }
            }

            report.times.insert(room.clone(), minutes);
            report.sources.insert(room.clone(), source);
            report.details.insert(room.clone(), detail);
        }
        report
    }

    /// Coasting advice: how long each warm room can float above target
    /// before heating has to resume. Rooms the penalty map marks sensitive
    /// for the current hour are skipped.
    pub fn optimization_advice(
        &self,
        current_temps: &BTreeMap<String, f64>,
        t_out: f64,
        targets: &BTreeMap<String, f64>,
        t_forecast: Option<f64>,
        current_hour: u32,
    ) -> Vec<CoastingProposal> {
        if !self.ready {
            return Vec::new();
        }
        let t_eff = effective_temp(t_out, t_forecast);

        let mut proposals = Vec::new();
        for (room, &t_in) in current_temps {
            let penalty_key = format!("{room}_{current_hour}");
            if self.penalties.get(&penalty_key).copied().unwrap_or(0.0) >= PENALTY_SUPPRESSION {
                debug!("coasting suppressed for {penalty_key}");
                continue;
            }

            let target = targets.get(room).copied().unwrap_or(21.0);
            if t_in <= target {
                continue;
            }
            let mut base_k = self.insulation.get(room).copied().unwrap_or(-0.5);
            if base_k >= 0.0 {
                base_k = -0.5;
            }
            let loss_per_hour = base_k.abs();
            let mut minutes = ((t_in - target) / loss_per_hour * 60.0) as i64;

            // Re-scale from the blended forecast delta to the present one.
            let delta_now = t_in - t_out;
            let delta_eff = t_in - t_eff;
            if delta_eff != 0.0 && delta_now != 0.0 {
                minutes = (minutes as f64 * (delta_now / delta_eff)) as i64;
            }

            if minutes > MIN_COASTING_MINUTES {
                let minutes = minutes.min(MAX_COASTING_MINUTES);
                proposals.push(CoastingProposal {
                    room: room.clone(),
                    minutes_safe: minutes,
                    target,
                    current: t_in,
                    savings_msg: format!("Heizung kann {minutes} min ausbleiben."),
                });
            }
        }
        proposals.sort_by(|a, b| b.minutes_safe.cmp(&a.minutes_safe));
        proposals
    }

    /// Negative reinforcement: the user overrode the advice, so this room
    /// at this hour is sensitive.
    pub fn train_penalty(&mut self, room: &str, hour: u32) -> String {
        let key = format!("{room}_{hour}");
        self.penalties.insert(key.clone(), 1.0);
        key
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        store.save_bin(
            ENERGY_MODEL_FILE,
            &EnergyModel {
                scores: self.insulation.clone(),
                heating: self.heating.clone(),
                penalties: self.penalties.clone(),
            },
        )
    }

    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        if let Some(model) = store.load_bin::<EnergyModel>(ENERGY_MODEL_FILE)? {
            self.insulation = model.scores;
            self.heating = model.heating;
            self.penalties = model.penalties;
            self.ready = true;
        }
        Ok(())
    }
}

fn effective_temp(t_out: f64, t_forecast: Option<f64>) -> f64 {
    match t_forecast {
        Some(forecast) => (t_out + forecast) / 2.0,
        None => t_out,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
