//! Wire commands: one tagged record per request line. Unknown fields are
//! ignored so host-side schema additions stay backward compatible.

use crate::brains::comfort::ComfortEvent;
use crate::brains::energy::EnergySample;
use crate::brains::health::{DailyDigest, DatedValue, RawEvent, RoomPresence};
use crate::brains::security::MovementSequence;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

fn default_label() -> String {
    "manual".to_string()
}

fn default_weeks() -> u32 {
    4
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Ping,
    SetTopology {
        rooms: Vec<String>,
        matrix: Vec<Vec<f64>>,
        #[serde(default)]
        monitored: Vec<String>,
    },
    SimulateSignal {
        room: String,
    },
    TrainSecurity {
        #[serde(default)]
        sequences: Vec<MovementSequence>,
    },
    AnalyzeSequence {
        sequence: MovementSequence,
    },
    SetLearningMode {
        active: bool,
        #[serde(default)]
        duration_min: f64,
        #[serde(default = "default_label")]
        label: String,
    },
    TrackEvent {
        #[serde(default)]
        room: Option<String>,
        #[serde(default)]
        dt: f64,
    },
    TrainHealth {
        #[serde(default)]
        digests: Vec<DailyDigest>,
    },
    AnalyzeHealth {
        digest: DailyDigest,
    },
    AnalyzeGait {
        #[serde(default)]
        sequences: Vec<MovementSequence>,
    },
    AnalyzeTrend {
        #[serde(default)]
        values: Vec<f64>,
        #[serde(default)]
        tag: String,
    },
    AnalyzeLongterm {
        metric: String,
        #[serde(default)]
        series: Vec<DatedValue>,
        #[serde(default = "default_weeks")]
        weeks: u32,
    },
    AnalyzeHeatmap {
        #[serde(default)]
        history: BTreeMap<String, Vec<RawEvent>>,
    },
    CheckSilence {
        #[serde(default)]
        rooms: BTreeMap<String, RoomPresence>,
    },
    TrainEnergy {
        #[serde(default)]
        points: Vec<EnergySample>,
    },
    TrainRlPenalty {
        room: String,
    },
    PredictEnergy {
        #[serde(default)]
        current_temps: BTreeMap<String, f64>,
        t_out: f64,
        #[serde(default)]
        t_forecast: Option<f64>,
        #[serde(default)]
        is_sunny: bool,
        #[serde(default)]
        solar_flags: BTreeMap<String, bool>,
        #[serde(default)]
        warmup_targets: Option<BTreeMap<String, f64>>,
    },
    OptimizeEnergy {
        #[serde(default)]
        current_temps: BTreeMap<String, f64>,
        t_out: f64,
        #[serde(default)]
        targets: BTreeMap<String, f64>,
        #[serde(default)]
        t_forecast: Option<f64>,
    },
    TrainComfort {
        #[serde(default)]
        events: Vec<ComfortEvent>,
        #[serde(default)]
        device_map: HashMap<String, String>,
    },
}
