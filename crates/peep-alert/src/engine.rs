use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use peep_common::types::{
    format_sql_datetime, AlertInstance, AlertRule, NewAlertRule, NewNotificationChannel,
    NotificationChannel,
};
use peep_common::window::parse_window;
use peep_notify::channel::ChannelTransport;
use peep_notify::dispatch::dispatch;
use peep_storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::interval;

/// Evaluation settings. `cooldown_secs = 0` keeps the default behavior of
/// firing on every over-threshold tick.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            cooldown_secs: 0,
        }
    }
}

/// Consecutive all-failed ticks tolerated before the engine task gives up
/// on an unreadable store.
const MAX_CONSECUTIVE_STORE_FAILURES: u32 = 10;

pub struct AlertEngine {
    store: Arc<Store>,
    rules: RwLock<HashMap<i64, AlertRule>>,
    channels: RwLock<HashMap<i64, NotificationChannel>>,
    config: EngineConfig,
}

impl AlertEngine {
    /// Load rules and channels from the store. When no channels exist at
    /// all, an enabled desktop channel is created so a fresh install still
    /// surfaces alerts somewhere.
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Result<Self> {
        let rules: HashMap<i64, AlertRule> = store
            .list_rules()?
            .into_iter()
            .map(|rule| (rule.id, rule))
            .collect();

        let mut channels: HashMap<i64, NotificationChannel> = HashMap::new();
        for mut channel in store.list_channels()? {
            if channel.enabled {
                if let Err(e) = ChannelTransport::from_channel(&channel) {
                    tracing::error!(
                        channel = %channel.name,
                        kind = %channel.kind,
                        error = %e,
                        "Notification channel config invalid, disabling"
                    );
                    channel.enabled = false;
                }
            }
            channels.insert(channel.id, channel);
        }

        if channels.is_empty() {
            let default = store.insert_channel(&NewNotificationChannel {
                name: "Desktop Notifications".to_string(),
                kind: peep_common::types::ChannelKind::Desktop,
                config: HashMap::new(),
                enabled: true,
            })?;
            tracing::info!(id = default.id, "Created default desktop notification channel");
            channels.insert(default.id, default);
        }

        tracing::info!(
            rules = rules.len(),
            channels = channels.len(),
            "Alert engine loaded"
        );

        Ok(Self {
            store,
            rules: RwLock::new(rules),
            channels: RwLock::new(channels),
            config,
        })
    }

    pub async fn rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by_key(|rule| rule.id);
        rules
    }

    pub async fn channels(&self) -> Vec<NotificationChannel> {
        let mut channels: Vec<NotificationChannel> =
            self.channels.read().await.values().cloned().collect();
        channels.sort_by_key(|channel| channel.id);
        channels
    }

    /// Add a rule, rejecting it before anything is persisted when the
    /// composed query does not produce a single scalar.
    pub async fn add_rule(&self, rule: NewAlertRule) -> Result<AlertRule> {
        let probe = build_time_query(&rule.query, &rule.window, Utc::now());
        self.store.run_scalar(&probe)?;

        let rule = self.store.insert_rule(&rule)?;
        self.rules.write().await.insert(rule.id, rule.clone());
        tracing::info!(rule = %rule.name, id = rule.id, "Alert rule added");
        Ok(rule)
    }

    pub async fn remove_rule(&self, rule_id: i64) -> Result<bool> {
        let deleted = self.store.delete_rule(rule_id)?;
        if deleted {
            self.rules.write().await.remove(&rule_id);
        }
        Ok(deleted)
    }

    pub async fn set_rule_enabled(&self, rule_id: i64, enabled: bool) -> Result<bool> {
        let updated = self.store.set_rule_enabled(rule_id, enabled)?;
        if updated {
            if let Some(rule) = self.rules.write().await.get_mut(&rule_id) {
                rule.enabled = enabled;
            }
        }
        Ok(updated)
    }

    /// Add a channel, rejecting it before anything is persisted when
    /// required config keys for its kind are missing.
    pub async fn add_channel(&self, channel: NewNotificationChannel) -> Result<NotificationChannel> {
        ChannelTransport::from_channel(&NotificationChannel {
            id: 0,
            name: channel.name.clone(),
            kind: channel.kind,
            config: channel.config.clone(),
            enabled: channel.enabled,
        })?;

        let channel = self.store.insert_channel(&channel)?;
        self.channels
            .write()
            .await
            .insert(channel.id, channel.clone());
        tracing::info!(channel = %channel.name, kind = %channel.kind, "Notification channel added");
        Ok(channel)
    }

    pub async fn remove_channel(&self, channel_id: i64) -> Result<bool> {
        let deleted = self.store.delete_channel(channel_id)?;
        if deleted {
            self.channels.write().await.remove(&channel_id);
        }
        Ok(deleted)
    }

    /// Run the evaluation ticker until `shutdown` flips. An in-flight tick
    /// finishes before the task exits. Returns an error only when the store
    /// stays unreadable across consecutive ticks.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            tick_secs = self.config.tick_secs,
            cooldown_secs = self.config.cooldown_secs,
            "Alert engine started"
        );
        let mut tick = interval(std::time::Duration::from_secs(self.config.tick_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick; rules get a full interval of data.
        tick.tick().await;

        let mut consecutive_failures = 0u32;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.check_rules().await {
                        consecutive_failures = 0;
                    } else {
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                            anyhow::bail!(
                                "store unreadable for {consecutive_failures} consecutive ticks"
                            );
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Alert engine stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Evaluate every enabled rule once. Returns false only when there were
    /// rules to evaluate and no store interaction succeeded.
    pub async fn check_rules(&self) -> bool {
        let rules: Vec<AlertRule> = {
            let rules = self.rules.read().await;
            rules.values().filter(|r| r.enabled).cloned().collect()
        };
        if rules.is_empty() {
            return true;
        }

        let mut any_store_ok = false;
        for rule in &rules {
            if self.evaluate_rule(rule).await {
                any_store_ok = true;
            }
        }
        any_store_ok
    }

    /// Evaluate one rule; fires when the count meets the threshold. Returns
    /// whether any store interaction succeeded.
    async fn evaluate_rule(&self, rule: &AlertRule) -> bool {
        let now = Utc::now();
        let evaluated = build_time_query(&rule.query, &rule.window, now);

        let count = match self.store.run_scalar(&evaluated) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(rule = %rule.name, error = %e, "Rule evaluation failed");
                // last_check still advances on a failed evaluation.
                return self.touch_last_check(rule.id, now).await;
            }
        };

        self.touch_last_check(rule.id, now).await;
        tracing::debug!(rule = %rule.name, count, threshold = rule.threshold, "Rule evaluated");

        if count >= rule.threshold {
            self.fire(rule, count).await;
        }
        true
    }

    async fn touch_last_check(&self, rule_id: i64, at: DateTime<Utc>) -> bool {
        if let Some(rule) = self.rules.write().await.get_mut(&rule_id) {
            rule.last_check = Some(at);
        }
        match self.store.update_rule_check_time(rule_id, at) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(rule_id, error = %e, "Failed to persist last_check");
                false
            }
        }
    }

    /// Persist an alert instance and fan out to every enabled channel, one
    /// dispatch task per channel. A channel failure never blocks the rest.
    async fn fire(&self, rule: &AlertRule, count: i64) {
        let now = Utc::now();

        if self.config.cooldown_secs > 0 {
            let last_alert = self
                .rules
                .read()
                .await
                .get(&rule.id)
                .and_then(|r| r.last_alert);
            let in_cooldown = last_alert.is_some_and(|last| {
                now - last < Duration::seconds(self.config.cooldown_secs as i64)
            });
            if in_cooldown {
                tracing::debug!(rule = %rule.name, "Alert suppressed (cooldown)");
                return;
            }
        }

        let mut instance = AlertInstance {
            id: 0,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            count,
            threshold: rule.threshold,
            query: rule.query.clone(),
            fired_at: now,
            resolved: false,
        };
        match self.store.insert_alert_instance(&instance) {
            Ok(id) => instance.id = id,
            Err(e) => {
                tracing::error!(rule = %rule.name, error = %e, "Failed to persist alert instance");
                return;
            }
        }

        if let Some(cached) = self.rules.write().await.get_mut(&rule.id) {
            cached.last_alert = Some(now);
        }
        if let Err(e) = self.store.update_rule_fire_time(rule.id, now) {
            tracing::error!(rule = %rule.name, error = %e, "Failed to persist last_alert");
        }

        tracing::warn!(
            rule = %rule.name,
            count,
            threshold = rule.threshold,
            alert_id = instance.id,
            "Alert fired"
        );

        let channels: Vec<NotificationChannel> = {
            let channels = self.channels.read().await;
            channels.values().filter(|c| c.enabled).cloned().collect()
        };

        let mut tasks = JoinSet::new();
        for channel in channels {
            let store = self.store.clone();
            let instance = instance.clone();
            tasks.spawn(async move {
                dispatch(&store, &instance, &channel).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// Bound a rule's query to its trailing window ending now.
///
/// Joins with `AND` when the query already contains a `WHERE` (any case),
/// otherwise appends a fresh `WHERE` clause.
pub fn build_time_query(query: &str, window: &str, now: DateTime<Utc>) -> String {
    let cutoff = format_sql_datetime(now - parse_window(window));
    if query.to_uppercase().contains("WHERE") {
        format!("{query} AND timestamp >= '{cutoff}'")
    } else {
        format!("{query} WHERE timestamp >= '{cutoff}'")
    }
}
