// PostgreSQL-backed store: routes, buses, location history and subscriptions

use std::{collections::HashSet, env};

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};

use crate::{
    error::StoreError,
    models::{Bus, LocationUpdate, Route, SeedData, Stop, Subscription, Weather},
    store::{RouteSource, SubscriptionStore, UpdateSink},
};

#[derive(Debug, FromRow)]
struct RouteRow {
    id: String,
    route_no: i32,
    variant: Option<String>,
}

#[derive(Debug, FromRow)]
struct StopRow {
    name: String,
    latitude: f64,
    longitude: f64,
    stop_order: i32,
}

#[derive(Debug, FromRow)]
struct BusRow {
    id: String,
    route_id: String,
    driver_name: Option<String>,
}

#[derive(Debug, FromRow)]
struct LocationRow {
    bus_id: String,
    route_id: String,
    next_stop: String,
    latitude: f64,
    longitude: f64,
    speed: f64,
    distance_remaining: f64,
    eta_seconds: f64,
    active_buses_on_route: i32,
    weather: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: i64,
    phone: String,
    bus_id: String,
    stop_name: String,
    notified10: bool,
    notified5: bool,
}

impl From<BusRow> for Bus {
    fn from(row: BusRow) -> Self {
        Bus {
            id: row.id,
            route_id: row.route_id,
            driver_name: row.driver_name,
        }
    }
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription::restore(
            row.id,
            row.phone,
            row.bus_id,
            row.stop_name,
            row.notified10,
            row.notified5,
        )
    }
}

impl TryFrom<StopRow> for Stop {
    type Error = StoreError;

    fn try_from(row: StopRow) -> Result<Self, Self::Error> {
        let order = u32::try_from(row.stop_order).map_err(|_| {
            StoreError::InvalidData(format!("stop {} has order {}", row.name, row.stop_order))
        })?;
        Ok(Stop {
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            order,
        })
    }
}

impl TryFrom<LocationRow> for LocationUpdate {
    type Error = StoreError;

    fn try_from(row: LocationRow) -> Result<Self, Self::Error> {
        let weather = row
            .weather
            .parse::<Weather>()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        Ok(LocationUpdate {
            bus_id: row.bus_id,
            route_id: row.route_id,
            next_stop: row.next_stop,
            timestamp: row.recorded_at,
            latitude: row.latitude,
            longitude: row.longitude,
            speed: row.speed,
            distance_remaining: row.distance_remaining,
            eta_seconds: row.eta_seconds,
            active_buses_on_route: u32::try_from(row.active_buses_on_route).unwrap_or(0),
            weather,
        })
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::InvalidData(format!("{what} {value} is out of range")))
}

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to `DATABASE_URL`.
    ///
    /// # Errors
    /// Returns StoreError if the variable is missing or the connection fails
    pub async fn new() -> Result<Self, StoreError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            StoreError::InvalidData("DATABASE_URL environment variable not set".to_string())
        })?;
        Self::connect(&database_url).await
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created");
        Ok(Self { pool })
    }

    /// Creates the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // query() takes one statement; the migration has several.
        let mut conn = self.pool.acquire().await?;
        let migration_sql = include_str!("../migrations/20250301_create_bus_tracking.sql");
        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Upserts routes (replacing their stops) and buses in one transaction.
    pub async fn seed(&self, seed: &SeedData) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for route in &seed.routes {
            sqlx::query(
                r#"
                INSERT INTO routes (id, route_no, variant)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET route_no = EXCLUDED.route_no, variant = EXCLUDED.variant
                "#,
            )
            .bind(&route.id)
            .bind(to_i32(route.route_no, "route number")?)
            .bind(&route.variant)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM stops WHERE route_id = $1")
                .bind(&route.id)
                .execute(&mut *tx)
                .await?;

            for stop in &route.stops {
                sqlx::query(
                    r#"
                    INSERT INTO stops (route_id, name, latitude, longitude, stop_order)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(&route.id)
                .bind(&stop.name)
                .bind(stop.latitude)
                .bind(stop.longitude)
                .bind(to_i32(stop.order, "stop order")?)
                .execute(&mut *tx)
                .await?;
            }
        }

        for bus in &seed.buses {
            sqlx::query(
                r#"
                INSERT INTO buses (id, route_id, driver_name)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET route_id = EXCLUDED.route_id, driver_name = EXCLUDED.driver_name
                "#,
            )
            .bind(&bus.id)
            .bind(&bus.route_id)
            .bind(&bus.driver_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            "Seeded {} routes and {} buses",
            seed.routes.len(),
            seed.buses.len()
        );
        Ok(())
    }

    async fn route(&self, route_id: &str) -> Result<Option<Route>, StoreError> {
        let Some(row) = sqlx::query_as::<_, RouteRow>("SELECT id, route_no, variant FROM routes WHERE id = $1")
            .bind(route_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let stops = sqlx::query_as::<_, StopRow>(
            "SELECT name, latitude, longitude, stop_order FROM stops WHERE route_id = $1 ORDER BY stop_order",
        )
        .bind(route_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Stop::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Route {
            id: row.id,
            route_no: u32::try_from(row.route_no)
                .map_err(|_| StoreError::InvalidData(format!("route number {}", row.route_no)))?,
            variant: row.variant,
            stops,
        }))
    }
}

impl RouteSource for Database {
    async fn list_buses(&self) -> Result<Vec<Bus>, StoreError> {
        let buses = sqlx::query_as::<_, BusRow>("SELECT id, route_id, driver_name FROM buses ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(buses.into_iter().map(Bus::from).collect())
    }

    async fn route_for_bus(&self, bus_id: &str) -> Result<Route, StoreError> {
        let bus = sqlx::query_as::<_, BusRow>("SELECT id, route_id, driver_name FROM buses WHERE id = $1")
            .bind(bus_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::BusNotFound(bus_id.to_string()))?;

        self.route(&bus.route_id)
            .await?
            .ok_or_else(|| StoreError::RouteNotFound(bus_id.to_string()))
    }
}

impl UpdateSink for Database {
    async fn append_location_update(&self, update: &LocationUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO locations (
                bus_id, route_id, next_stop, latitude, longitude, speed,
                distance_remaining, eta_seconds, active_buses_on_route, weather, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&update.bus_id)
        .bind(&update.route_id)
        .bind(&update.next_stop)
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(update.speed)
        .bind(update.distance_remaining)
        .bind(update.eta_seconds)
        .bind(to_i32(update.active_buses_on_route, "active bus count")?)
        .bind(update.weather.as_str())
        .bind(update.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_distinct_bus_ids(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT bus_id FROM locations WHERE route_id = $1 AND recorded_at >= $2",
        )
        .bind(route_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn latest_location(&self, bus_id: &str) -> Result<Option<LocationUpdate>, StoreError> {
        sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT bus_id, route_id, next_stop, latitude, longitude, speed,
                   distance_remaining, eta_seconds, active_buses_on_route, weather, recorded_at
            FROM locations
            WHERE bus_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(bus_id)
        .fetch_optional(&self.pool)
        .await?
        .map(LocationUpdate::try_from)
        .transpose()
    }

    async fn location_history(&self) -> Result<Vec<LocationUpdate>, StoreError> {
        sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT bus_id, route_id, next_stop, latitude, longitude, speed,
                   distance_remaining, eta_seconds, active_buses_on_route, weather, recorded_at
            FROM locations
            ORDER BY recorded_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LocationUpdate::try_from)
        .collect()
    }
}

impl SubscriptionStore for Database {
    async fn create_subscription(
        &self,
        phone: &str,
        bus_id: &str,
        stop_name: &str,
    ) -> Result<Subscription, StoreError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO subscriptions (phone, bus_id, stop_name)
            VALUES ($1, $2, $3)
            RETURNING id, phone, bus_id, stop_name, notified10, notified5
            "#,
        )
        .bind(phone)
        .bind(bus_id)
        .bind(stop_name)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Subscription {} created for bus {} at {}", row.id, bus_id, stop_name);
        Ok(row.into())
    }

    async fn find_subscriptions(
        &self,
        bus_id: &str,
        stop_name: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, phone, bus_id, stop_name, notified10, notified5
            FROM subscriptions
            WHERE bus_id = $1 AND stop_name = $2
            ORDER BY id
            "#,
        )
        .bind(bus_id)
        .bind(stop_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        // OR keeps a flag set by a concurrent writer.
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET notified10 = notified10 OR $2,
                notified5 = notified5 OR $3
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.notified10())
        .bind(subscription.notified5())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SubscriptionNotFound(subscription.id));
        }
        Ok(())
    }
}
