use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bus_spy::{
    config::{DwellPolicy, SimulationConfig},
    error::AlertError,
    memory::MemoryStore,
    models::{Bus, Route, SeedData, Stop},
    scheduler::Simulator,
    speed::SpeedParams,
    store::{AlertSink, SubscriptionStore},
};

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
}

impl AlertSink for RecordingSink {
    async fn send_alert(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

fn stop(name: &str, lon: f64, order: u32) -> Stop {
    Stop {
        name: name.to_string(),
        latitude: 0.0,
        longitude: lon,
        order,
    }
}

/// Two stops about 1112 m apart on the equator.
fn line_network() -> SeedData {
    SeedData {
        routes: vec![Route {
            id: "L1".to_string(),
            route_no: 1,
            variant: None,
            stops: vec![stop("S0", 0.0, 1), stop("S1", 0.01, 2)],
        }],
        buses: vec![Bus {
            id: "BUS1".to_string(),
            route_id: "L1".to_string(),
            driver_name: Some("Ravi".to_string()),
        }],
    }
}

fn walking_pace() -> SimulationConfig {
    SimulationConfig {
        tick_interval: Duration::from_secs(1),
        steps_per_segment: 10,
        dwell: DwellPolicy::disabled(),
        start_jitter: Duration::ZERO,
        position_jitter_m: 0.0,
        seed_initial_locations: false,
        speed: SpeedParams::constant(1.0),
        rng_seed: Some(7),
        ..SimulationConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn approaching_bus_triggers_each_alert_once() {
    let store = Arc::new(MemoryStore::from_seed(line_network()));
    let near = store.create_subscription("919000000001", "BUS1", "S1").await.unwrap();
    let far = store.create_subscription("919000000002", "BUS1", "S0").await.unwrap();
    let sink = Arc::new(RecordingSink::default());

    let mut simulator = Simulator::new(Arc::clone(&store), Arc::clone(&sink), walking_pace());
    simulator.start_all().await.unwrap();
    // One lap: S0 -> S1 then S1 -> S0, eleven ticks each.
    tokio::time::sleep(Duration::from_millis(21_500)).await;
    simulator.shutdown().await;

    let sent = sink.sent.lock().unwrap().clone();
    let to_near: Vec<&String> = sent
        .iter()
        .filter(|(phone, _)| phone == "919000000001")
        .map(|(_, message)| message)
        .collect();
    assert_eq!(to_near.len(), 2, "{sent:?}");
    assert!(to_near[0].contains("about 10 minutes away from S1"));
    assert!(to_near[1].contains("about 5 minutes away from S1"));

    // Heading back to S0 the bus is at most ~1112 s away, so both fire there too.
    let to_far = sent.iter().filter(|(phone, _)| phone == "919000000002").count();
    assert_eq!(to_far, 2);

    assert!(store.subscription(near.id).await.unwrap().is_exhausted());
    assert!(store.subscription(far.id).await.unwrap().is_exhausted());

    let updates = store.updates_for("BUS1").await;
    assert_eq!(updates.len(), 22);
    assert!(updates.iter().all(|u| u.active_buses_on_route == 1));
    assert!(updates.iter().all(|u| (u.speed - 1.0).abs() < f64::EPSILON));
}

#[tokio::test(start_paused = true)]
async fn eta_falls_to_zero_at_the_stop() {
    let store = Arc::new(MemoryStore::from_seed(line_network()));
    let mut simulator = Simulator::new(
        Arc::clone(&store),
        Arc::new(RecordingSink::default()),
        walking_pace(),
    );
    simulator.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    simulator.shutdown().await;

    let updates = store.updates_for("BUS1").await;
    assert_eq!(updates.len(), 11);
    let first = &updates[0];
    assert!((first.distance_remaining - 1111.95).abs() < 0.5);
    assert!((first.eta_seconds - first.distance_remaining).abs() < 1e-9);

    for pair in updates.windows(2) {
        assert!(pair[1].eta_seconds < pair[0].eta_seconds);
    }
    let arrived = updates.last().unwrap();
    assert_eq!(arrived.next_stop, "S1");
    assert_eq!(arrived.eta_seconds, 0.0);
    assert_eq!((arrived.latitude, arrived.longitude), (0.0, 0.01));
}
