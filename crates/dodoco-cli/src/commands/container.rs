//! `dodoco container` — Container lifecycle commands.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use dodoco_common::types::{PortSpec, ProtocolSpec, RecordId, StopMode};
use dodoco_orchestrator::CreateRequest;

use super::Context;
use crate::output;

/// Arguments for the `container` command.
#[derive(Args, Debug)]
pub struct ContainerArgs {
    /// Action to perform.
    #[command(subcommand)]
    pub action: ContainerAction,
}

/// Container actions.
#[derive(Subcommand, Debug)]
pub enum ContainerAction {
    /// Create a container in a project.
    Create {
        /// Owning project id.
        #[arg(long)]
        project: i64,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Image as `name[:tag]`.
        #[arg(long, default_value = "ubuntu")]
        image: String,
        /// Free-form description.
        #[arg(long)]
        description: Option<String>,
        /// Port to publish as `PORT[/tcp|udp|stcp|all]`. Repeatable.
        #[arg(short, long = "port")]
        ports: Vec<PortSpec>,
        /// Start the container after creating it.
        #[arg(long)]
        start: bool,
    },
    /// Start a container, recreating its instance if it vanished.
    Start {
        /// Container id.
        id: i64,
    },
    /// Stop a container.
    Stop {
        /// Container id.
        id: i64,
        /// `immediate`, `graceful-blocking`, or `graceful-async`.
        #[arg(long, default_value = "graceful-blocking")]
        mode: StopMode,
        /// Grace period in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Pause a running container.
    Pause {
        /// Container id.
        id: i64,
    },
    /// Restart a container.
    Restart {
        /// Container id.
        id: i64,
        /// Grace period in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Snapshot a container into a new image version.
    Commit {
        /// Container id.
        id: i64,
        /// Dockerfile-style instructions applied to the snapshot.
        #[arg(long)]
        changes: Option<String>,
        /// Start the recreated instance.
        #[arg(long)]
        start: bool,
    },
    /// Destroy a container and its port mappings.
    Destroy {
        /// Container id.
        id: i64,
        /// Kill instead of stopping gracefully.
        #[arg(short, long)]
        force: bool,
    },
    /// Publish another port.
    AddPort {
        /// Container id.
        id: i64,
        /// Port inside the container.
        container_port: u16,
        /// `tcp`, `udp`, `stcp`, or `all`.
        #[arg(long, default_value = "tcp")]
        protocol: ProtocolSpec,
        /// Host port. Allocated when omitted.
        #[arg(long)]
        exposed: Option<u16>,
        /// Start the recreated instance.
        #[arg(long)]
        start: bool,
    },
    /// Check one container against the engine.
    Reconcile {
        /// Container id.
        id: i64,
    },
    /// Show one container.
    Show {
        /// Container id.
        id: i64,
    },
    /// List containers.
    List {
        /// Only containers of this project.
        #[arg(long)]
        project: Option<i64>,
    },
    /// Run a command inside a running container.
    Exec {
        /// Container id.
        id: i64,
        /// Keep stdout and stderr interleaved.
        #[arg(long)]
        no_demux: bool,
        /// Command to execute.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Copy a local file into a container directory.
    Push {
        /// Container id.
        id: i64,
        /// Local file.
        file: PathBuf,
        /// Destination directory inside the container.
        #[arg(default_value = "/root")]
        dest: String,
    },
}

/// Executes the `container` command.
///
/// # Errors
///
/// Returns an error if the orchestrator rejects the operation.
pub fn execute(ctx: &Context, args: ContainerArgs) -> anyhow::Result<()> {
    let orch = &ctx.orchestrator;
    match args.action {
        ContainerAction::Create {
            project,
            name,
            image,
            description,
            ports,
            start,
        } => {
            let record = orch.create(
                ctx.requester,
                &CreateRequest {
                    project_id: project,
                    name,
                    description,
                    image,
                    ports,
                    start,
                },
            )?;
            output::print_view(&orch.describe(record.id)?, ctx.json)?;
        }
        ContainerAction::Start { id } => {
            orch.start(RecordId::new(id))?;
            println!("Container {id} started.");
        }
        ContainerAction::Stop { id, mode, timeout } => {
            orch.stop(RecordId::new(id), mode, timeout.map(Duration::from_secs))?;
            println!("Container {id} stop requested.");
        }
        ContainerAction::Pause { id } => {
            orch.pause(RecordId::new(id))?;
            println!("Container {id} paused.");
        }
        ContainerAction::Restart { id, timeout } => {
            orch.restart(RecordId::new(id), timeout.map(Duration::from_secs))?;
            println!("Container {id} restarted.");
        }
        ContainerAction::Commit { id, changes, start } => {
            let record = orch.commit(RecordId::new(id), changes.as_deref(), start)?;
            println!(
                "Container {id} committed as {} (version {}).",
                record.current_image(),
                record.version
            );
        }
        ContainerAction::Destroy { id, force } => {
            let outcome = orch.destroy(RecordId::new(id), force)?;
            if ctx.json {
                output::print_json(&outcome)?;
            } else {
                println!("Container {id}: {outcome:?}");
            }
        }
        ContainerAction::AddPort {
            id,
            container_port,
            protocol,
            exposed,
            start,
        } => {
            let mappings =
                orch.add_port_mapping(RecordId::new(id), container_port, protocol, exposed, start)?;
            for m in &mappings {
                println!("{} -> {}", m.binding_key(), m.exposed_port);
            }
        }
        ContainerAction::Reconcile { id } => {
            if orch.reconcile(RecordId::new(id))? {
                println!("Container {id} is in sync.");
            } else {
                println!("Container {id} had no instance and was removed.");
            }
        }
        ContainerAction::Show { id } => {
            output::print_view(&orch.describe(RecordId::new(id))?, ctx.json)?;
        }
        ContainerAction::List { project } => {
            let views = orch.list(project)?;
            if ctx.json {
                output::print_json(&views)?;
            } else {
                output::print_table(&views);
            }
        }
        ContainerAction::Exec {
            id,
            no_demux,
            command,
        } => {
            let out = orch.exec(RecordId::new(id), &command, !no_demux)?;
            if !out.stdout.is_empty() {
                print!("{}", out.stdout);
            }
            if !out.stderr.is_empty() {
                #[allow(clippy::print_stderr)]
                {
                    eprint!("{}", out.stderr);
                }
            }
            if out.exit_code != 0 {
                std::process::exit(i32::try_from(out.exit_code).unwrap_or(1));
            }
        }
        ContainerAction::Push { id, file, dest } => {
            let bytes = orch.push_file(RecordId::new(id), &file, &dest)?;
            println!("Uploaded {} ({bytes} bytes) to {dest}.", file.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use dodoco_common::types::Protocol;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> ContainerAction {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            Command::Container(c) => c.action,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn create_parses_repeated_ports() {
        let action = parse(&[
            "dodoco", "container", "create", "--project", "1", "--name", "box", "-p", "22/all",
            "-p", "8080",
        ]);
        let ContainerAction::Create { ports, image, .. } = action else {
            panic!("expected create");
        };
        assert_eq!(image, "ubuntu");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].protocol, ProtocolSpec::All);
        assert_eq!(ports[1].protocol, ProtocolSpec::One(Protocol::Tcp));
    }

    #[test]
    fn stop_mode_defaults_to_graceful_blocking() {
        let action = parse(&["dodoco", "container", "stop", "3"]);
        assert!(matches!(
            action,
            ContainerAction::Stop {
                id: 3,
                mode: StopMode::GracefulBlocking,
                timeout: None
            }
        ));
    }

    #[test]
    fn exec_keeps_trailing_arguments() {
        let action = parse(&["dodoco", "container", "exec", "2", "ls", "-la", "/"]);
        let ContainerAction::Exec { command, no_demux, .. } = action else {
            panic!("expected exec");
        };
        assert_eq!(command, vec!["ls", "-la", "/"]);
        assert!(!no_demux);
    }

    #[test]
    fn bad_port_spec_is_rejected() {
        assert!(
            Cli::try_parse_from(["dodoco", "container", "create", "--project", "1", "--name", "x", "-p", "0/tcp"])
                .is_err()
        );
    }
}
