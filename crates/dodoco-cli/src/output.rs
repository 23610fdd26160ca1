//! Formatted output helpers for CLI commands.
//!
//! Every command prints either a JSON document or a fixed-width table.

use dodoco_orchestrator::orchestrator::CascadeReport;
use dodoco_orchestrator::view::{ContainerView, PortView};
use serde::Serialize;

/// Prints any serializable value as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats port mappings as `22/tcp->50001, 22/udp->50002`.
#[must_use]
pub fn format_ports(ports: &[PortView]) -> String {
    if ports.is_empty() {
        return "-".into();
    }
    ports
        .iter()
        .map(|p| format!("{}/{}->{}", p.container_port, p.protocol, p.exposed_port))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prints one container, as JSON or as labelled lines.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_view(view: &ContainerView, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(view);
    }
    println!("ID:          {}", view.id);
    println!("Name:        {}", view.name);
    if let Some(description) = &view.description {
        println!("Description: {description}");
    }
    println!("Project:     {} ({})", view.project.name, view.project.id);
    println!("State:       {}", view.state);
    println!("Image:       {} (version {})", view.current_image, view.version);
    println!("Started as:  {}", view.start_image_name);
    println!("Engine name: {}", view.engine_container_name);
    println!(
        "Engine id:   {}",
        view.engine_container_id.as_deref().unwrap_or("-")
    );
    println!("Ports:       {}", format_ports(&view.ports));
    println!("Created:     {} by user {}", view.created_at.to_rfc3339(), view.created_by);
    Ok(())
}

/// Prints containers as a table.
pub fn print_table(views: &[ContainerView]) {
    if views.is_empty() {
        println!("No containers found.");
        return;
    }
    println!(
        "{:<6} {:<16} {:<14} {:<8} {:<32} {}",
        "ID", "NAME", "STATE", "VERSION", "IMAGE", "PORTS"
    );
    for v in views {
        println!(
            "{:<6} {:<16} {:<14} {:<8} {:<32} {}",
            v.id,
            v.name,
            v.state,
            v.version,
            v.current_image,
            format_ports(&v.ports)
        );
    }
}

/// Prints the outcome of a project freeze or delete.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_cascade(report: &CascadeReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!(
        "Project {}: destroyed {} containers, {} failures.",
        report.project_id,
        report.destroyed.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  {}: {}", failure.id, failure.error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use dodoco_common::types::Protocol;

    use super::*;

    #[test]
    fn format_ports_empty() {
        assert_eq!(format_ports(&[]), "-");
    }

    #[test]
    fn format_ports_lists_bindings() {
        let ports = [
            PortView {
                container_port: 22,
                protocol: Protocol::Tcp,
                exposed_port: 50001,
            },
            PortView {
                container_port: 22,
                protocol: Protocol::Udp,
                exposed_port: 50002,
            },
        ];
        assert_eq!(format_ports(&ports), "22/tcp->50001, 22/udp->50002");
    }
}
