//! Turns the stored location history into the ETA and density training
//! datasets (`eta_dataset.csv`, `density_dataset.csv`).

use std::{
    collections::BTreeMap,
    f64::consts::PI,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::{
    error::StoreError,
    models::{LocationUpdate, Weather},
    store::UpdateSink,
};

pub const ETA_DATASET: &str = "eta_dataset.csv";
pub const DENSITY_DATASET: &str = "density_dataset.csv";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no location history to export; run the simulator first")]
    Empty,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Calendar features shared by both datasets.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeFeatures {
    time_idx: i64,
    day_of_week: u32,
    time_sin: f64,
    time_cos: f64,
}

impl TimeFeatures {
    /// `time_idx` counts whole minutes since `origin`; the rest is local to `tz`.
    fn at<Tz: TimeZone>(timestamp: DateTime<Utc>, origin: DateTime<Utc>, tz: &Tz) -> Self {
        let local = timestamp.with_timezone(tz);
        let hour = f64::from(local.hour()) + f64::from(local.minute()) / 60.0;
        let angle = 2.0 * PI * hour / 24.0;
        Self {
            time_idx: (timestamp - origin).num_minutes(),
            day_of_week: local.weekday().num_days_from_sunday(),
            time_sin: angle.sin(),
            time_cos: angle.cos(),
        }
    }
}

/// One location sample with its ETA target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtaRow {
    pub time_idx: i64,
    pub timestamp: String,
    pub bus_id: String,
    pub route_id: String,
    pub next_stop: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub distance_remaining: f64,
    /// Empty for samples taken at a stop.
    pub eta_minutes: Option<f64>,
    pub active_buses_on_route: u32,
    pub weather: Weather,
    pub day_of_week: u32,
    pub time_sin: f64,
    pub time_cos: f64,
}

/// Bus density on a route for one minute of history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityRow {
    pub time_idx: i64,
    pub timestamp: String,
    pub route_id: String,
    pub active_buses_on_route: u32,
    pub weather: Weather,
    pub day_of_week: u32,
    pub time_sin: f64,
    pub time_cos: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub eta_rows: usize,
    pub density_rows: usize,
    pub eta_path: PathBuf,
    pub density_path: PathBuf,
}

fn origin(history: &[LocationUpdate]) -> Option<DateTime<Utc>> {
    history.iter().map(|u| u.timestamp).min()
}

fn iso(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn eta_rows<Tz: TimeZone>(history: &[LocationUpdate], tz: &Tz) -> Vec<EtaRow> {
    let Some(origin) = origin(history) else {
        return Vec::new();
    };
    history
        .iter()
        .map(|u| {
            let time = TimeFeatures::at(u.timestamp, origin, tz);
            EtaRow {
                time_idx: time.time_idx,
                timestamp: iso(u.timestamp),
                bus_id: u.bus_id.clone(),
                route_id: u.route_id.clone(),
                next_stop: u.next_stop.clone(),
                latitude: u.latitude,
                longitude: u.longitude,
                speed: u.speed,
                distance_remaining: u.distance_remaining,
                eta_minutes: (u.eta_seconds > 0.0).then(|| u.eta_seconds / 60.0),
                active_buses_on_route: u.active_buses_on_route,
                weather: u.weather,
                day_of_week: time.day_of_week,
                time_sin: time.time_sin,
                time_cos: time.time_cos,
            }
        })
        .collect()
}

/// One row per (minute, route), taken from the earliest sample in that minute.
pub fn density_rows<Tz: TimeZone>(history: &[LocationUpdate], tz: &Tz) -> Vec<DensityRow> {
    let Some(origin) = origin(history) else {
        return Vec::new();
    };
    let mut earliest: BTreeMap<(i64, &str), &LocationUpdate> = BTreeMap::new();
    for update in history {
        let minute = (update.timestamp - origin).num_minutes();
        earliest
            .entry((minute, update.route_id.as_str()))
            .and_modify(|seen| {
                if update.timestamp < seen.timestamp {
                    *seen = update;
                }
            })
            .or_insert(update);
    }

    earliest
        .into_values()
        .map(|u| {
            let time = TimeFeatures::at(u.timestamp, origin, tz);
            DensityRow {
                time_idx: time.time_idx,
                timestamp: iso(u.timestamp),
                route_id: u.route_id.clone(),
                active_buses_on_route: u.active_buses_on_route,
                weather: u.weather,
                day_of_week: time.day_of_week,
                time_sin: time.time_sin,
                time_cos: time.time_cos,
            }
        })
        .collect()
}

/// Writes `rows` with a header line taken from the field names.
pub fn write_csv<W: io::Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Reads the whole history from `sink` and writes both datasets into `out_dir`.
pub async fn export_history<U: UpdateSink, Tz: TimeZone>(
    sink: &U,
    tz: &Tz,
    out_dir: &Path,
) -> Result<ExportSummary, ExportError> {
    let history = sink.location_history().await?;
    if history.is_empty() {
        return Err(ExportError::Empty);
    }
    tracing::info!("exporting {} location samples", history.len());

    let etas = eta_rows(&history, tz);
    let densities = density_rows(&history, tz);

    std::fs::create_dir_all(out_dir)?;
    let eta_path = out_dir.join(ETA_DATASET);
    let density_path = out_dir.join(DENSITY_DATASET);
    write_csv(std::fs::File::create(&eta_path)?, &etas)?;
    write_csv(std::fs::File::create(&density_path)?, &densities)?;

    Ok(ExportSummary {
        eta_rows: etas.len(),
        density_rows: densities.len(),
        eta_path,
        density_path,
    })
}
