//! Synthetic fixture generators.
//!
//! Produces plausible cluster logs and incident tickets for seeding a demo
//! index: one log file or ticket file per date, deterministic file naming so
//! regeneration overwrites rather than accumulates.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::Ticket;

const NAMESPACES: &[&str] = &["payments", "checkout", "inventory", "auth", "monitoring"];
const APPLICATIONS: &[&str] = &[
    "payments-api",
    "checkout-web",
    "inventory-sync",
    "auth-service",
    "metrics-agent",
];
const NODES: &[&str] = &["aks-node-1", "aks-node-2", "aks-node-3", "aks-node-4"];
const TICKET_TYPES: &[&str] = &[
    "DatabaseTimeout",
    "HighCPU",
    "HighMemory",
    "PodCrash",
    "AuthFailure",
];

const LOG_TEMPLATES: &[(&str, &str)] = &[
    ("ERROR", "db: connection refused connecting to postgres"),
    ("ERROR", "pod {pod} crashed with exit code 137 (OOMKilled)"),
    ("ERROR", "auth: token validation failed for service account"),
    ("WARN", "node {node} under disk pressure, evicting pods"),
    ("WARN", "cpu usage above 90% on {app}"),
    ("WARN", "readiness probe failed for {pod}, retrying"),
    ("INFO", "deployment {app} rolled out successfully"),
    ("INFO", "horizontal pod autoscaler scaled {app} to 3 replicas"),
    ("DEBUG", "reconcile loop completed for {app} in 42ms"),
];

/// Generate a day of log lines, returning the written file path.
pub fn generate_logs(dir: &Path, date: NaiveDate, num: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let mut rng = rand::thread_rng();
    let mut lines = Vec::with_capacity(num);

    for i in 0..num {
        let timestamp = spread_timestamp(date, i, num);
        let (severity, template) = LOG_TEMPLATES.choose(&mut rng).unwrap();
        let app = APPLICATIONS.choose(&mut rng).unwrap();
        let namespace = NAMESPACES.choose(&mut rng).unwrap();
        let node = NODES.choose(&mut rng).unwrap();
        let pod = format!("{}-{}", app, rng.gen_range(0..4));

        let message = template
            .replace("{app}", app)
            .replace("{pod}", &pod)
            .replace("{node}", node);
        lines.push(format!(
            "{} [{}] namespace={} pod={} node={} {}",
            timestamp.to_rfc3339(),
            severity,
            namespace,
            pod,
            node,
            message
        ));
    }

    let path = dir.join(format!("logs_{}.log", date.format("%Y-%m-%d")));
    std::fs::write(&path, lines.join("\n") + "\n")
        .with_context(|| format!("Failed to write log file: {}", path.display()))?;
    tracing::info!(path = %path.display(), lines = num, "generated log file");
    Ok(path)
}

/// Generate a day of incident tickets, returning the written file path.
pub fn generate_tickets(dir: &Path, date: NaiveDate, num: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create ticket directory: {}", dir.display()))?;

    let mut rng = rand::thread_rng();
    let tickets: Vec<Ticket> = (0..num)
        .map(|i| {
            let ticket_type = *TICKET_TYPES.choose(&mut rng).unwrap();
            let application = *APPLICATIONS.choose(&mut rng).unwrap();
            let (message, suggested_action) = ticket_body(ticket_type, application);

            Ticket {
                ticket_id: format!("INC{:09}", i + 1),
                timestamp: spread_timestamp(date, i, num),
                namespace: NAMESPACES.choose(&mut rng).unwrap().to_string(),
                pod: format!("{}-{}", application, rng.gen_range(0..4)),
                application: application.to_string(),
                node: NODES.choose(&mut rng).unwrap().to_string(),
                ticket_type: ticket_type.to_string(),
                message,
                suggested_action,
                trace_id: Uuid::new_v4().to_string(),
            }
        })
        .collect();

    let path = dir.join(format!("tickets_{}.json", date.format("%Y-%m-%d")));
    std::fs::write(&path, serde_json::to_string_pretty(&tickets)?)
        .with_context(|| format!("Failed to write ticket file: {}", path.display()))?;
    tracing::info!(path = %path.display(), tickets = num, "generated ticket file");
    Ok(path)
}

/// Spread `num` events evenly across the day.
fn spread_timestamp(date: NaiveDate, i: usize, num: usize) -> DateTime<Utc> {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
    let step_secs = 86_400 / num.max(1) as i64;
    start + Duration::seconds(step_secs * i as i64)
}

fn ticket_body(ticket_type: &str, application: &str) -> (String, String) {
    match ticket_type {
        "DatabaseTimeout" => (
            format!("{} reported database connection timeouts", application),
            "Check DB connection pool settings and network policies".to_string(),
        ),
        "HighCPU" => (
            format!("{} CPU usage exceeded 90% for over 10 minutes", application),
            "Scale the deployment or review recent code changes".to_string(),
        ),
        "HighMemory" => (
            format!("{} memory usage approaching container limit", application),
            "Raise the memory limit or investigate a leak".to_string(),
        ),
        "PodCrash" => (
            format!("{} pod crashed and entered CrashLoopBackOff", application),
            "Inspect pod logs and recent image changes".to_string(),
        ),
        "AuthFailure" => (
            format!("{} rejected requests with authentication failures", application),
            "Verify service account tokens and RBAC bindings".to_string(),
        ),
        other => (
            format!("{} raised an unclassified incident: {}", application, other),
            "Triage manually".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
    }

    #[test]
    fn test_generated_logs_parse_and_name_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_logs(dir.path(), date(), 24).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "logs_2026-08-20.log"
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 24);
        for line in &lines {
            assert!(line.starts_with("2026-08-20T"), "bad timestamp: {}", line);
            assert!(
                ["[ERROR]", "[WARN]", "[INFO]", "[DEBUG]"]
                    .iter()
                    .any(|s| line.contains(s)),
                "no severity: {}",
                line
            );
        }
    }

    #[test]
    fn test_generated_tickets_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_tickets(dir.path(), date(), 10).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "tickets_2026-08-20.json"
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let tickets: Vec<Ticket> = serde_json::from_str(&content).unwrap();
        assert_eq!(tickets.len(), 10);
        assert_eq!(tickets[0].ticket_id, "INC000000001");
        assert_eq!(tickets[9].ticket_id, "INC000000010");

        for ticket in &tickets {
            assert!(TICKET_TYPES.contains(&ticket.ticket_type.as_str()));
            assert!(!ticket.message.is_empty());
            assert!(!ticket.suggested_action.is_empty());
            assert_eq!(ticket.timestamp.date_naive(), date());
        }

        // camelCase on the wire
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert!(raw[0].get("ticketId").is_some());
        assert!(raw[0].get("suggestedAction").is_some());
    }

    #[test]
    fn test_timestamps_spread_across_the_day() {
        let a = spread_timestamp(date(), 0, 24);
        let b = spread_timestamp(date(), 23, 24);
        assert_eq!(a.to_rfc3339(), "2026-08-20T00:00:00+00:00");
        assert!(b > a);
        assert_eq!(b.date_naive(), date());
    }
}
