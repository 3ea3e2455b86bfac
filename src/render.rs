//! Text rendering for the console and one-shot commands.
//!
//! Every function returns pre-formatted lines; callers decide where they go.

use crate::lifecycle::StatusSnapshot;
use crate::metrics;
use crate::model::{AppConfig, ConfigProfile, LatencyResult, LatencyTier, ProxyGroup};
use time::macros::format_description;

pub(crate) fn profile_lines(profiles: &[ConfigProfile], active: Option<&str>) -> Vec<String> {
    if profiles.is_empty() {
        return vec!["No profiles. Add one with `add`.".into()];
    }
    profiles
        .iter()
        .map(|p| {
            let marker = if Some(p.id.as_str()) == active { '*' } else { ' ' };
            match created_at(&p.id) {
                Some(created) => format!(
                    "{marker} {:<15} {}  ({}, added {created})",
                    p.id, p.name, p.path
                ),
                None => format!("{marker} {:<15} {}  ({})", p.id, p.name, p.path),
            }
        })
        .collect()
}

/// Ids are creation times in Unix milliseconds.
fn created_at(id: &str) -> Option<String> {
    let millis: i128 = id.parse().ok()?;
    let at = time::OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).ok()?;
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))
        .ok()
}

pub(crate) fn status_line(status: &StatusSnapshot) -> String {
    let basis = if status.is_busy() {
        "in flight"
    } else if status.confirmed {
        "confirmed"
    } else {
        "provisional"
    };
    format!("Service: {} ({basis})", status.label())
}

fn delay_text(millis: u64) -> String {
    format!("{millis} ms, {}", LatencyTier::classify(millis).label())
}

pub(crate) fn group_lines(groups: &[ProxyGroup]) -> Vec<String> {
    if groups.is_empty() {
        return vec![
            "No selectable groups (is sing-box running with a clash_api section?)".into(),
        ];
    }
    let mut lines = Vec::new();
    for g in groups {
        let current = g.current.as_deref().unwrap_or("-");
        let mut head = format!("{} [{}] now: {current}", g.name, g.group_type.display_name());
        if let Some(ms) = g.last_delay() {
            head.push_str(&format!(" ({})", delay_text(ms)));
        }
        if g.udp {
            head.push_str(" udp");
        }
        lines.push(head);
        for member in &g.members {
            let marker = if Some(member.as_str()) == g.current.as_deref() {
                '>'
            } else {
                ' '
            };
            lines.push(format!("  {marker} {member}"));
        }
    }
    lines
}

pub(crate) fn delay_lines(group: &str, delays: &LatencyResult) -> Vec<String> {
    let Some(summary) = metrics::summarize_delays(delays) else {
        return vec![format!("{group}: no latency data")];
    };
    let mut lines = vec![format!("{group}:")];
    let mut ordered: Vec<_> = delays.iter().collect();
    ordered.sort_by_key(|(name, ms)| (**ms, name.as_str()));
    for (node, ms) in ordered {
        lines.push(format!("  {node:<24} {}", delay_text(*ms)));
    }
    lines.push(format!(
        "fastest {} ({} ms), mean {:.0} ms, median {} ms over {} nodes",
        summary.fastest, summary.fastest_ms, summary.mean_ms, summary.median_ms, summary.measured
    ));
    lines
}

pub(crate) fn settings_lines(app: &AppConfig) -> Vec<String> {
    vec![
        format!("config_dir:   {}", app.config_dir),
        format!("singbox_path: {}", app.singbox_path),
    ]
}
