use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SimulationConfig,
    density::DensityCounter,
    error::{SimulationError, StoreError},
    models::Bus,
    notify::NotificationEngine,
    route::RouteView,
    simulation::BusSimulation,
    store::{AlertSink, Store},
};

struct BusTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one periodic task per bus and stops them on demand.
///
/// Each task exclusively owns its bus's [`BusSimulation`]; tasks only share
/// the store and the alert sink.
pub struct Simulator<S, A> {
    worker: Worker<S, A>,
    tasks: HashMap<String, BusTask>,
    shutdown: CancellationToken,
}

impl<S: Store, A: AlertSink + 'static> Simulator<S, A> {
    pub fn new(store: Arc<S>, alerts: Arc<A>, config: SimulationConfig) -> Self {
        let worker = Worker {
            density: DensityCounter::new(config.density_window),
            notifier: NotificationEngine::new(config.thresholds),
            config: Arc::new(config),
            store,
            alerts,
        };
        Self {
            worker,
            tasks: HashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.worker.config
    }

    /// Starts simulating `bus`, replacing any task already running for it.
    pub async fn start_bus(&mut self, bus: Bus) {
        self.stop_bus(&bus.id).await;

        let cancel = self.shutdown.child_token();
        let worker = self.worker.clone();
        let bus_id = bus.id.clone();
        let handle = tokio::spawn(worker.run(bus, cancel.clone()));
        self.tasks.insert(bus_id, BusTask { cancel, handle });
    }

    /// Starts every bus the store knows about. Returns how many were started.
    pub async fn start_all(&mut self) -> Result<usize, StoreError> {
        let buses = self.worker.store.list_buses().await?;
        let count = buses.len();
        if count == 0 {
            tracing::warn!("no buses found to simulate");
        }
        for bus in buses {
            self.start_bus(bus).await;
        }
        tracing::info!("simulating {} buses", count);
        Ok(count)
    }

    /// Stops one bus and waits for its task to finish. Returns whether it was known.
    pub async fn stop_bus(&mut self, bus_id: &str) -> bool {
        let Some(task) = self.tasks.remove(bus_id) else {
            return false;
        };
        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            tracing::error!("simulation task for bus {} panicked: {}", bus_id, err);
        }
        true
    }

    /// Buses whose task has not exited.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stops every bus and waits for all tasks to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for (bus_id, task) in self.tasks.drain() {
            if let Err(err) = task.handle.await {
                tracing::error!("simulation task for bus {} panicked: {}", bus_id, err);
            }
        }
        tracing::info!("simulation stopped");
    }
}

struct Worker<S, A> {
    store: Arc<S>,
    alerts: Arc<A>,
    config: Arc<SimulationConfig>,
    density: DensityCounter,
    notifier: NotificationEngine,
}

impl<S, A> Clone for Worker<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            alerts: Arc::clone(&self.alerts),
            config: Arc::clone(&self.config),
            density: self.density,
            notifier: self.notifier.clone(),
        }
    }
}

impl<S: Store, A: AlertSink + 'static> Worker<S, A> {
    async fn prepare(&self, bus: Bus) -> Result<BusSimulation, SimulationError> {
        let route = self.store.route_for_bus(&bus.id).await?;
        let view = RouteView::new(&route)?;
        Ok(BusSimulation::new(bus, view, Arc::clone(&self.config)))
    }

    async fn run(self, bus: Bus, cancel: CancellationToken) {
        let bus_id = bus.id.clone();
        let mut sim = match self.prepare(bus).await {
            Ok(sim) => sim,
            Err(err) => {
                tracing::error!("not simulating bus {}: {}", bus_id, err);
                return;
            }
        };

        if self.config.seed_initial_locations {
            self.seed(&sim).await;
        }

        let delay = sim.draw_start_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
        tracing::info!(
            "bus {} starting on route {} ({} stops, {:.0} m per lap)",
            sim.bus_id(),
            sim.route_id(),
            sim.route().len(),
            sim.route().loop_length_m()
        );

        let mut ticker = interval(self.config.tick_interval);
        // A dwell pushes the whole schedule back instead of bunching ticks up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(dwell) = sim.draw_dwell() {
                tracing::debug!("bus {} dwelling {:.1}s", sim.bus_id(), dwell.as_secs_f64());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(dwell) => {}
                }
            }

            self.step(&mut sim).await;
        }

        tracing::info!("bus {} stopped", sim.bus_id());
    }

    async fn seed(&self, sim: &BusSimulation) {
        let now = Utc::now();
        let active = self
            .density
            .active_buses_on_route(self.store.as_ref(), sim.route_id(), sim.bus_id(), now)
            .await;
        let update = sim.initial_update(now, active);
        if let Err(err) = self.store.append_location_update(&update).await {
            tracing::warn!("seeding location for bus {} failed: {}", sim.bus_id(), err);
        }
    }

    async fn step(&self, sim: &mut BusSimulation) {
        let now = Utc::now();
        let active = self
            .density
            .active_buses_on_route(self.store.as_ref(), sim.route_id(), sim.bus_id(), now)
            .await;
        let update = sim.tick(now, active);

        tracing::debug!(
            "bus {} -> {:.5}, {:.5} | eta {:.1}s | speed {:.1} m/s | {} | active {}",
            update.bus_id,
            update.latitude,
            update.longitude,
            update.eta_seconds,
            update.speed,
            update.weather,
            update.active_buses_on_route
        );

        if let Err(err) = self.store.append_location_update(&update).await {
            tracing::warn!("storing location for bus {} failed: {}", update.bus_id, err);
        }

        let report = self
            .notifier
            .dispatch(&update, self.store.as_ref(), self.alerts.as_ref())
            .await;
        if report.failed > 0 || report.save_failed > 0 {
            tracing::warn!("notifications for bus {}: {:?}", update.bus_id, report);
        }
    }
}
