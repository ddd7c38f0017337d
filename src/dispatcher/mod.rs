//! Request dispatcher: owns every engine, parses one command per line,
//! routes it and serialises the responses.
//!
//! Malformed lines are logged and produce no result; engine failures are
//! mapped onto neutral payloads so the loop never dies on a bad request.

/// Tagged wire commands
pub mod command;
/// Response envelopes and transport rendering
pub mod response;

use crate::brains::{
    ComfortBrain, EnergyBrain, GraphEngine, HealthBrain, PinnBrain, SecurityBrain, TrackerBrain,
};
use crate::infrastructure::{ModelStore, RoomTemperatureCache};
use crate::utils::config::DaemonConfig;
use chrono::{Local, Timelike, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub use command::Command;
pub use response::{Envelope, OutputLine};

use response::{ordered_object, to_payload};

pub struct Dispatcher {
    store: ModelStore,
    graph: GraphEngine,
    tracker: TrackerBrain,
    security: SecurityBrain,
    energy: EnergyBrain,
    pinn: PinnBrain,
    health: HealthBrain,
    comfort: ComfortBrain,
    room_cache: RoomTemperatureCache,
}

impl Dispatcher {
    pub fn new(config: &DaemonConfig, store: ModelStore) -> Self {
        Self {
            graph: GraphEngine::new(),
            tracker: TrackerBrain::new(
                config.tracker.num_particles,
                config.tracker.persist_interval_secs,
            ),
            security: SecurityBrain::new(&config.security),
            energy: EnergyBrain::new(config.energy.clone()),
            pinn: PinnBrain::new(),
            health: HealthBrain::new(),
            comfort: ComfortBrain::new(),
            room_cache: RoomTemperatureCache::new(),
            store,
        }
    }

    /// Best-effort restore of every engine; the tracker snapshot doubles as
    /// the topology source for the graph engine.
    pub fn restore(&mut self) {
        if let Err(e) = self.tracker.restore(&self.store) {
            warn!("tracker restore failed: {e}");
        }
        if let Some((rooms, matrix)) = self.tracker.topology() {
            let rows: Vec<Vec<f64>> = (0..matrix.nrows())
                .map(|r| (0..matrix.ncols()).map(|c| matrix[(r, c)]).collect())
                .collect();
            let rooms = rooms.to_vec();
            if let Err(e) = self.graph.set_topology(&rooms, &rows) {
                warn!("topology rebuild from tracker snapshot failed: {e}");
            }
        }
        for (name, result) in [
            ("graph", self.graph.restore(&self.store)),
            ("security", self.security.restore(&self.store)),
            ("energy", self.energy.restore(&self.store)),
            ("pinn", self.pinn.restore(&self.store)),
            ("health", self.health.restore(&self.store)),
        ] {
            if let Err(e) = result {
                warn!("{name} restore failed: {e}");
            }
        }
    }

    /// Process one raw input line into zero or more output lines.
    pub fn handle_line(&mut self, line: &str) -> Vec<OutputLine> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Command>(line) {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                debug!("ignoring malformed command: {e}");
                vec![OutputLine::log(format!("ignoring malformed command: {e}"))]
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Vec<OutputLine> {
        match command {
            Command::Ping => vec![OutputLine::result(
                "PONG",
                json!({ "timestamp": Utc::now().timestamp_millis() }),
            )],

            Command::SetTopology {
                rooms,
                matrix,
                monitored,
            } => self.handle_set_topology(&rooms, &matrix, &monitored),

            Command::SimulateSignal { room } => {
                let hits = self.graph.propagate(&room);
                vec![OutputLine::result("SIGNAL_RESULT", ordered_object(&hits))]
            }

            Command::TrainSecurity { sequences } => self.handle_train_security(&sequences),

            Command::AnalyzeSequence { sequence } => {
                let verdict = self.security.analyze(&sequence, now_secs());
                vec![OutputLine::result("SECURITY_RESULT", to_payload(&verdict))]
            }

            Command::SetLearningMode {
                active,
                duration_min,
                label,
            } => {
                self.security
                    .set_learning_mode(active, duration_min, &label, now_secs());
                let state = if active { "active" } else { "off" };
                vec![OutputLine::log(format!(
                    "learning mode {state} (label={label}, duration={duration_min}min)"
                ))]
            }

            Command::TrackEvent { room, dt } => {
                let estimate = self.tracker.update(room.as_deref(), dt);
                self.tracker.maybe_persist(&self.store);
                vec![OutputLine::result(
                    "TRACKER_RESULT",
                    ordered_object(&estimate),
                )]
            }

            Command::TrainHealth { digests } => {
                let payload = match self.health.train(&digests) {
                    Ok(days) => {
                        self.persist("health", self.health.save(&self.store));
                        json!({ "ok": true, "days": days })
                    }
                    Err(e) => json!({ "ok": false, "error": e.to_string() }),
                };
                vec![OutputLine::result("HEALTH_TRAIN_RESULT", payload)]
            }

            Command::AnalyzeHealth { digest } => {
                let payload = match self.health.analyze(&digest) {
                    Ok(verdict) => to_payload(&verdict),
                    Err(e) => json!({ "prediction": 0, "info": e.to_string() }),
                };
                vec![OutputLine::result("HEALTH_RESULT", payload)]
            }

            Command::AnalyzeGait { sequences } => {
                let report = self.health.analyze_gait(&sequences);
                vec![OutputLine::result("GAIT_RESULT", to_payload(&report))]
            }

            Command::AnalyzeTrend { values, tag } => {
                let payload = match self.health.analyze_trend(&values, &tag) {
                    Ok(report) => to_payload(&report),
                    Err(e) => json!({
                        "tag": tag,
                        "classification": "Stabil",
                        "percent_change": 0.0,
                        "error": e.to_string(),
                    }),
                };
                vec![OutputLine::result("HEALTH_TREND_RESULT", payload)]
            }

            Command::AnalyzeLongterm {
                metric,
                series,
                weeks,
            } => {
                let payload = match self.health.analyze_longterm(&metric, &series, weeks) {
                    Ok(report) => to_payload(&report),
                    Err(e) => json!({ "metric": metric, "error": e.to_string() }),
                };
                vec![OutputLine::result("HEALTH_LONGTERM_RESULT", payload)]
            }

            Command::AnalyzeHeatmap { history } => {
                let report = self.health.analyze_heatmap(&history);
                vec![OutputLine::result("HEATMAP_RESULT", to_payload(&report))]
            }

            Command::CheckSilence { rooms } => {
                let now = Local::now();
                let alerts = self.health.check_room_silence(
                    &rooms,
                    now.timestamp_millis(),
                    now.hour(),
                );
                vec![OutputLine::result(
                    "SILENCE_RESULT",
                    json!({ "alerts": alerts }),
                )]
            }

            Command::TrainEnergy { points } => self.handle_train_energy(&points),

            Command::TrainRlPenalty { room } => {
                let key = self.energy.train_penalty(&room, Local::now().hour());
                self.persist("energy", self.energy.save(&self.store));
                debug!("penalty learned for {key}");
                vec![OutputLine::result(
                    "RL_PENALTY_UPDATE",
                    json!({ "penalties": self.energy.penalties() }),
                )]
            }

            Command::PredictEnergy {
                current_temps,
                t_out,
                t_forecast,
                is_sunny,
                solar_flags,
                warmup_targets,
            } => self.handle_predict_energy(
                &current_temps,
                t_out,
                t_forecast,
                is_sunny,
                &solar_flags,
                warmup_targets.as_ref(),
            ),

            Command::OptimizeEnergy {
                current_temps,
                t_out,
                targets,
                t_forecast,
            } => {
                let proposals = self.energy.optimization_advice(
                    &current_temps,
                    t_out,
                    &targets,
                    t_forecast,
                    Local::now().hour(),
                );
                vec![OutputLine::result(
                    "ENERGY_OPTIMIZE_RESULT",
                    json!({ "proposals": proposals }),
                )]
            }

            Command::TrainComfort { events, device_map } => {
                let payload = match self.comfort.train(&events, &device_map) {
                    Ok(patterns) => json!({ "ok": true, "patterns": patterns }),
                    Err(e) => json!({ "ok": false, "patterns": [], "error": e.to_string() }),
                };
                vec![OutputLine::result("COMFORT_RESULT", payload)]
            }
        }
    }

    fn handle_set_topology(
        &mut self,
        rooms: &[String],
        matrix: &[Vec<f64>],
        monitored: &[String],
    ) -> Vec<OutputLine> {
        match self.graph.set_topology(rooms, matrix) {
            Ok(()) => {
                if let Some(adjacency) = self.graph.adjacency() {
                    self.tracker.set_topology(rooms, adjacency, monitored);
                }
                self.persist("tracker", self.tracker.save(&self.store));
                vec![OutputLine::result(
                    "TOPOLOGY_ACK",
                    json!({ "ok": true, "rooms": rooms.len() }),
                )]
            }
            Err(e) => {
                warn!("topology rejected: {e}");
                vec![OutputLine::result(
                    "TOPOLOGY_ACK",
                    json!({ "ok": false, "error": e.to_string() }),
                )]
            }
        }
    }

    fn handle_train_security(
        &mut self,
        sequences: &[crate::brains::security::MovementSequence],
    ) -> Vec<OutputLine> {
        let payload = match self.security.train(sequences) {
            Ok(summary) => {
                // The same movement batch refreshes the graph's behaviour
                // matrix when a topology is installed.
                let locations: Vec<Vec<String>> =
                    sequences.iter().map(|s| s.locations()).collect();
                if self.graph.is_ready() {
                    match self.graph.train_behavior(&locations) {
                        Ok(transitions) => {
                            debug!("behaviour matrix updated from {transitions} transitions");
                            self.persist("graph", self.graph.save(&self.store));
                        }
                        Err(e) => debug!("behaviour training skipped: {e}"),
                    }
                }
                self.persist("security", self.security.save(&self.store));
                json!({
                    "ok": true,
                    "samples": summary.samples,
                    "threshold": summary.threshold,
                    "loss": summary.loss,
                })
            }
            Err(e) => json!({ "ok": false, "error": e.to_string() }),
        };
        vec![OutputLine::result("TRAINING_COMPLETE", payload)]
    }

    fn handle_train_energy(
        &mut self,
        points: &[crate::brains::energy::EnergySample],
    ) -> Vec<OutputLine> {
        let payload = match self.energy.train(points) {
            Ok(outcome) => {
                let pinn_result = self.pinn.train(&outcome.pinn_samples);
                let (pinn_trained, pinn_loss) = match &pinn_result {
                    Ok(training) => {
                        self.persist("pinn", self.pinn.save(&self.store));
                        (true, Some(training.loss))
                    }
                    Err(e) => {
                        debug!("PINN training skipped: {e}");
                        (false, None)
                    }
                };
                self.persist("energy", self.energy.save(&self.store));
                json!({
                    "ok": true,
                    "insulation": outcome.insulation,
                    "heating": outcome.heating,
                    "pinn_trained": pinn_trained,
                    "pinn_loss": pinn_loss,
                })
            }
            Err(e) => json!({ "ok": false, "error": e.to_string() }),
        };
        vec![OutputLine::result("ENERGY_TRAIN_RESULT", payload)]
    }

    fn handle_predict_energy(
        &mut self,
        current_temps: &BTreeMap<String, f64>,
        t_out: f64,
        t_forecast: Option<f64>,
        is_sunny: bool,
        solar_flags: &BTreeMap<String, bool>,
        warmup_targets: Option<&BTreeMap<String, f64>>,
    ) -> Vec<OutputLine> {
        let mut output = Vec::new();

        let forecasts =
            self.energy
                .predict_cooling(current_temps, t_out, t_forecast, is_sunny, solar_flags);
        output.push(OutputLine::result(
            "ENERGY_PREDICT_RESULT",
            json!({ "forecasts": forecasts }),
        ));

        let alerts = self
            .energy
            .check_ventilation(current_temps, &mut self.room_cache, now_secs());
        for alert in alerts {
            output.push(OutputLine::result("VENTILATION_ALERT", to_payload(&alert)));
        }

        if warmup_targets.is_some() {
            let report = self.energy.calculate_warmup_times(
                current_temps,
                warmup_targets,
                Some(&self.pinn),
                t_out,
                is_sunny,
                solar_flags,
            );
            output.push(OutputLine::result("WARMUP_RESULT", to_payload(&report)));
        }

        let mut rates = BTreeMap::new();
        if self.pinn.is_ready() {
            for (room, &t_in) in current_temps {
                let solar = is_sunny && solar_flags.get(room).copied().unwrap_or(false);
                rates.insert(room.clone(), self.pinn.predict(t_in, t_out, 100.0, solar));
            }
        }
        output.push(OutputLine::result(
            "PINN_PREDICT_RESULT",
            json!({ "ready": self.pinn.is_ready(), "rates": rates }),
        ));

        output.push(OutputLine::result(
            "RL_PENALTY_UPDATE",
            json!({ "penalties": self.energy.penalties() }),
        ));

        output
    }

    fn persist(&self, engine: &str, result: crate::utils::error::CogniResult<()>) {
        if let Err(e) = result {
            warn!("{engine} persistence failed, keeping in-memory state: {e}");
        }
    }
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
