//! vmkite CLI
//!
//! Operator commands for inspecting the cluster and managing VMs by hand.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vmkite_vsphere::ConnectionParams;

#[derive(Parser)]
#[command(name = "vmkite")]
#[command(about = "Manage vmkite VMs on vSphere", long_about = None)]
struct Cli {
    /// vCenter/ESXi host
    #[arg(long, env = "VS_HOST")]
    vs_host: String,

    #[arg(long, env = "VS_USER")]
    vs_user: String,

    #[arg(long, env = "VS_PASS", hide_env_values = true)]
    vs_pass: String,

    /// Skip TLS certificate verification
    #[arg(long, env = "VS_INSECURE")]
    vs_insecure: bool,

    /// Inventory path of the cluster
    #[arg(
        long,
        env = "VM_CLUSTER_PATH",
        default_value = "/MacStadium - Vegas/host/XSERVE_Cluster"
    )]
    cluster_path: String,

    /// Folder managed VMs live in
    #[arg(long, env = "VM_PATH", default_value = "/MacStadium - Vegas/vm")]
    vm_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmkite_vsphere=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config {
        connection: ConnectionParams {
            host: cli.vs_host,
            user: cli.vs_user,
            pass: cli.vs_pass,
            insecure: cli.vs_insecure,
        },
        cluster_path: cli.cluster_path,
        vm_path: cli.vm_path,
    };

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const CONNECTION: [&str; 7] = [
        "vmkite",
        "--vs-host",
        "vcenter.local",
        "--vs-user",
        "admin",
        "--vs-pass",
        "secret",
    ];

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(CONNECTION.iter().chain(args)).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_status() {
        assert!(matches!(
            parse(&["status", "--json"]).command,
            Commands::Status { json: true }
        ));
        assert!(matches!(
            parse(&["status"]).command,
            Commands::Status { json: false }
        ));
    }

    #[test]
    fn test_parse_clone_vm() {
        let cli = parse(&[
            "clone-vm",
            "macos-14",
            "vmkite-test",
            "--snapshot",
            "pre-command",
            "--guest-info",
            "a=1",
            "--guest-info",
            "b=2",
        ]);

        match cli.command {
            Commands::CloneVm(args) => {
                assert_eq!(args.source, "macos-14");
                assert_eq!(args.name, "vmkite-test");
                assert_eq!(args.snapshot.as_deref(), Some("pre-command"));
                assert_eq!(
                    args.vm.guest_info,
                    vec![
                        ("a".to_string(), "1".to_string()),
                        ("b".to_string(), "2".to_string())
                    ]
                );
            }
            _ => panic!("expected clone-vm"),
        }
    }

    #[test]
    fn test_rejects_malformed_guest_info() {
        let args = CONNECTION
            .iter()
            .chain(&["clone-vm", "src", "dst", "--guest-info", "novalue"]);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
