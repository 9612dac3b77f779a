use chrono::{DateTime, Utc};
use peep_common::types::{AlertInstance, Severity};

/// The synthesized notification content, identical across transports.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub count: i64,
    pub threshold: i64,
    /// `count / threshold`, the severity ladder input.
    pub ratio: f64,
    pub fired_at: DateTime<Utc>,
}

impl AlertMessage {
    pub fn from_instance(instance: &AlertInstance) -> Self {
        let severity = if instance.count >= instance.threshold * 2 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let body = format!(
            "Alert threshold exceeded!\n\nRule: {rule}\nQuery: {query}\nCount: {count}\nThreshold: {threshold}\nTime: {time}",
            rule = instance.rule_name,
            query = instance.query,
            count = instance.count,
            threshold = instance.threshold,
            time = instance.fired_at.to_rfc3339(),
        );
        Self {
            title: format!("Alert: {}", instance.rule_name),
            body,
            severity,
            count: instance.count,
            threshold: instance.threshold,
            ratio: instance.count as f64 / instance.threshold as f64,
            fired_at: instance.fired_at,
        }
    }

    /// Color hint for rich webhook payloads.
    pub fn ratio_color(&self) -> &'static str {
        match self.ratio {
            r if r >= 3.0 => "danger",
            r if r >= 2.0 => "warning",
            r if r >= 1.5 => "#ffcc00",
            _ => "good",
        }
    }

    /// Human severity label on the same ladder as [`Self::ratio_color`].
    pub fn ratio_label(&self) -> &'static str {
        match self.ratio {
            r if r >= 3.0 => "Critical",
            r if r >= 2.0 => "High",
            r if r >= 1.5 => "Medium",
            _ => "Low",
        }
    }
}
