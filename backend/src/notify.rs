use crate::{
    models::{LocationUpdate, Subscription},
    store::{AlertSink, SubscriptionStore},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub ten_minutes_secs: f64,
    pub five_minutes_secs: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            ten_minutes_secs: 600.0,
            five_minutes_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    TenMinutes,
    FiveMinutes,
}

impl AlertKind {
    fn minutes(self) -> u32 {
        match self {
            AlertKind::TenMinutes => 10,
            AlertKind::FiveMinutes => 5,
        }
    }

    fn already_sent(self, subscription: &Subscription) -> bool {
        match self {
            AlertKind::TenMinutes => subscription.notified10(),
            AlertKind::FiveMinutes => subscription.notified5(),
        }
    }

    fn mark_sent(self, subscription: &mut Subscription) {
        match self {
            AlertKind::TenMinutes => subscription.mark_notified10(),
            AlertKind::FiveMinutes => subscription.mark_notified5(),
        }
    }

    pub fn message(self, update: &LocationUpdate) -> String {
        let eta_minutes = (update.eta_seconds / 60.0).ceil().max(1.0);
        format!(
            "Bus {} is about {} minutes away from {} (ETA {:.0} min).",
            update.bus_id,
            self.minutes(),
            update.next_stop,
            eta_minutes
        )
    }
}

/// Alerts `subscription` is due for on this update, ten-minute first.
///
/// Returns nothing when the subscription is for another bus or stop.
pub fn evaluate(
    update: &LocationUpdate,
    subscription: &Subscription,
    thresholds: &AlertThresholds,
) -> Vec<AlertKind> {
    if subscription.bus_id != update.bus_id || subscription.stop_name != update.next_stop {
        return Vec::new();
    }

    let mut due = Vec::with_capacity(2);
    if update.eta_seconds <= thresholds.ten_minutes_secs
        && !AlertKind::TenMinutes.already_sent(subscription)
    {
        due.push(AlertKind::TenMinutes);
    }
    if update.eta_seconds <= thresholds.five_minutes_secs
        && !AlertKind::FiveMinutes.already_sent(subscription)
    {
        due.push(AlertKind::FiveMinutes);
    }
    due
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
    pub saved: usize,
    pub save_failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationEngine {
    thresholds: AlertThresholds,
}

impl NotificationEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Sends every alert `update` makes due and persists the flags.
    ///
    /// Subscriptions are handled one by one; a failed send or save only
    /// affects the subscription it belongs to. The two thresholds are
    /// independent: a failed ten-minute alert is retried on the next update
    /// while the five-minute one still goes out.
    pub async fn dispatch<S, A>(&self, update: &LocationUpdate, store: &S, alerts: &A) -> DispatchReport
    where
        S: SubscriptionStore,
        A: AlertSink,
    {
        let mut report = DispatchReport::default();
        let subscriptions = match store
            .find_subscriptions(&update.bus_id, &update.next_stop)
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::warn!(
                    "subscription lookup for bus {} at {} failed: {}",
                    update.bus_id,
                    update.next_stop,
                    err
                );
                return report;
            }
        };

        for mut subscription in subscriptions {
            report.matched += 1;
            self.notify_one(update, &mut subscription, store, alerts, &mut report)
                .await;
        }
        report
    }

    async fn notify_one<S, A>(
        &self,
        update: &LocationUpdate,
        subscription: &mut Subscription,
        store: &S,
        alerts: &A,
        report: &mut DispatchReport,
    ) where
        S: SubscriptionStore,
        A: AlertSink,
    {
        let due = evaluate(update, subscription, &self.thresholds);
        if due.is_empty() {
            return;
        }

        let mut changed = false;
        for kind in due {
            match alerts
                .send_alert(&subscription.phone, &kind.message(update))
                .await
            {
                Ok(()) => {
                    kind.mark_sent(subscription);
                    changed = true;
                    report.sent += 1;
                    tracing::info!(
                        "{:?} alert sent to {} for bus {} at {}",
                        kind,
                        subscription.phone,
                        update.bus_id,
                        update.next_stop
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        "{:?} alert to {} (subscription {}) failed: {}",
                        kind,
                        subscription.phone,
                        subscription.id,
                        err
                    );
                }
            }
        }

        if !changed {
            return;
        }
        match store.save_subscription(subscription).await {
            Ok(()) => report.saved += 1,
            Err(err) => {
                report.save_failed += 1;
                tracing::warn!("saving subscription {} failed: {}", subscription.id, err);
            }
        }
    }
}
