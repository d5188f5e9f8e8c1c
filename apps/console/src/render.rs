//! Plain-text rendering of panel snapshots for the console.

use servo_core::{ActuatorView, FineTuneRequest, PresetLoadReport, SkipReason};
use servo_sync::{Notice, NoticeLevel, PanelSnapshot};

/// One line per actuator.
///
/// ```text
/// [x] Schulter Horizontal [LEFT ARM]   35.0° (confirmed 30.0°) *  412 mA  [-90, 90]
/// ```
pub fn actuator_line(view: &ActuatorView) -> String {
    let enabled = if view.enabled { "[x]" } else { "[ ]" };
    let badges = view
        .group
        .as_ref()
        .map(|g| format!(" [{}]", g.badges().join(" ")))
        .unwrap_or_default();
    let pending = if view.pending { " *" } else { "" };
    let current = view
        .current_ma
        .map(|ma| format!("{:>6.0} mA", ma))
        .unwrap_or_else(|| "     - mA".to_string());

    let mut line = format!(
        "{} {}{} {:>7.1}°",
        enabled, view.name, badges, view.displayed_angle
    );
    if (view.displayed_angle - view.confirmed_angle).abs() > f64::EPSILON {
        line.push_str(&format!(" (confirmed {:.1}°)", view.confirmed_angle));
    }
    line.push_str(&format!(
        "{}  {}  [{}, {}]",
        pending, current, view.min_deg, view.max_deg
    ));
    line
}

pub fn status_line(snapshot: &PanelSnapshot) -> String {
    let mut line = format!("{} | link: {}", snapshot.status_label, snapshot.link);
    if let Some(batch) = &snapshot.batch_label {
        line.push_str(&format!(" | {}", batch));
    }
    if let Some(total) = snapshot.total_current_ma {
        line.push_str(&format!(" | total {:.0} mA", total));
    }
    line
}

pub fn panel(snapshot: &PanelSnapshot) -> String {
    let mut out = status_line(snapshot);
    if snapshot.actuators.is_empty() {
        out.push_str("\n(no servos configured yet)");
    }
    for view in &snapshot.actuators {
        out.push('\n');
        out.push_str(&actuator_line(view));
    }
    for request in &snapshot.fine_tunes {
        out.push('\n');
        out.push_str(&fine_tune_prompt(request));
    }
    out
}

pub fn fine_tune_prompt(request: &FineTuneRequest) -> String {
    format!(
        "#{} fine-tune {} from {:.1}°: answer with 'delta {} <deg>'",
        request.ticket, request.name, request.base_angle, request.ticket
    )
}

pub fn notice_line(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "ERROR",
    };
    format!("{} [{}] {}", notice.at.format("%H:%M:%S"), tag, notice.message)
}

pub fn load_report(report: &PresetLoadReport) -> String {
    let mut out = format!("Loaded '{}': {} command(s) sent", report.name, report.emitted.len());
    for (name, reason) in &report.skipped {
        let why = match reason {
            SkipReason::UnknownActuator => "not in this rig".to_string(),
            SkipReason::Rejected(reason) => reason.clone(),
        };
        out.push_str(&format!("\n  skipped {}: {}", name, why));
    }
    out
}
