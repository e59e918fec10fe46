use std::time::Duration;

use clap::Parser;
use orchestrator::ClusterSpec;
use orchestrator::Credentials;
use orchestrator::PortPlan;
use orchestrator::SpecError;
use orchestrator::DEFAULT_IMAGE;
use orchestrator::DEFAULT_NAMESPACE;
use orchestrator::DEFAULT_NODES_NUMBER;
use orchestrator::DEFAULT_NODE_PORT_BASE;
use orchestrator::DEFAULT_OPENED_PORTS;
use orchestrator::DEFAULT_PORT_BASE;
use orchestrator::DEFAULT_SECRET_NAME;
use orchestrator::DEFAULT_SSH_USERNAME;

#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    #[arg(long, env = "MASSA_TEST_FRAMEWORK_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long, env = "MASSA_TEST_FRAMEWORK_NODES_NUMBER", default_value_t = DEFAULT_NODES_NUMBER)]
    pub nodes_number: usize,

    #[arg(
        long = "external-ip",
        env = "MASSA_TEST_FRAMEWORK_EXTERNAL_I_PS",
        value_delimiter = ',',
        required = true,
        help = "External IPs the node services are exposed on, comma separated"
    )]
    pub external_ips: Vec<String>,

    #[arg(long, env = "MASSA_TEST_FRAMEWORK_SSH_USERNAME", default_value = DEFAULT_SSH_USERNAME)]
    pub ssh_username: String,

    #[arg(long, env = "MASSA_TEST_FRAMEWORK_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    #[arg(long, env = "MASSA_TEST_FRAMEWORK_SSH_AUTHORIZED_KEYS")]
    pub ssh_authorized_keys: Option<String>,

    #[arg(
        long,
        env = "MASSA_TEST_FRAMEWORK_SSH_EXISTING_SECRET",
        default_value = DEFAULT_SECRET_NAME,
        help = "Name of the secret holding the SSH credentials"
    )]
    pub ssh_secret_name: String,

    #[arg(long, env = "MASSA_TEST_FRAMEWORK_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_OPENED_PORTS,
        help = "Container ports opened on every node, comma separated"
    )]
    pub opened_ports: Vec<u16>,

    #[arg(long, default_value_t = DEFAULT_PORT_BASE)]
    pub port_base: u16,

    #[arg(long, default_value_t = DEFAULT_NODE_PORT_BASE)]
    pub node_port_base: u16,

    #[arg(long, help = "Let the platform pick node ports")]
    pub auto_node_ports: bool,

    #[arg(
        long,
        env = "MASSA_TEST_FRAMEWORK_STARTUP_PODS_TIMEOUT",
        default_value_t = 3,
        help = "Seconds each pod gets to start running"
    )]
    pub startup_pods_timeout: u64,

    #[arg(
        long,
        env = "MASSA_TEST_FRAMEWORK_STARTUP_SERVICES_TIMEOUT",
        default_value_t = 3,
        help = "Seconds each service gets to resolve its ports"
    )]
    pub startup_services_timeout: u64,
}

impl ClusterArgs {
    pub fn into_spec(self) -> Result<ClusterSpec, SpecError> {
        let credentials = Credentials {
            username: self.ssh_username,
            password: self.ssh_password,
            authorized_keys: self.ssh_authorized_keys,
            secret_name: self.ssh_secret_name,
        };

        let ports = PortPlan::new(self.opened_ports, self.port_base);
        let ports = if self.auto_node_ports {
            ports.without_node_ports()
        } else {
            ports.with_node_port_base(self.node_port_base)
        };

        ClusterSpec::builder(self.external_ips, credentials)
            .namespace(self.namespace)
            .nodes_number(self.nodes_number)
            .image(self.image)
            .ports(ports)
            .startup_pods_timeout(Duration::from_secs(self.startup_pods_timeout))
            .startup_services_timeout(Duration::from_secs(self.startup_services_timeout))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::cli::Cli;
    use crate::config::cli::Commands;

    fn launch_args(args: &[&str]) -> ClusterArgs {
        let cli = Cli::try_parse_from(
            ["massa-cluster", "launch"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .expect("valid arguments");
        match cli.command {
            Commands::Launch(args) => *args,
            _ => panic!("expected launch"),
        }
    }

    #[test]
    fn launch_defaults_follow_the_node_profile() {
        let spec = launch_args(&["--external-ip", "10.0.0.1", "--ssh-password", "secret"])
            .into_spec()
            .expect("valid spec");

        assert_eq!(spec.namespace(), "massa-simulator");
        assert_eq!(spec.nodes_number(), 3);
        assert_eq!(spec.ports().opened_ports().to_vec(), DEFAULT_OPENED_PORTS.to_vec());
        assert_eq!(spec.ports().node_port_base(), Some(30001));
        assert_eq!(spec.startup_pods_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn external_ips_and_ports_are_comma_separated() {
        let spec = launch_args(&[
            "--external-ip",
            "10.0.0.1,10.0.0.2",
            "--ssh-authorized-keys",
            "ssh-ed25519 AAAA",
            "--opened-ports",
            "22,33035",
            "--auto-node-ports",
            "--namespace",
            "t1",
        ])
        .into_spec()
        .expect("valid spec");

        assert_eq!(
            spec.external_ips().to_vec(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
        assert_eq!(spec.ports().opened_ports().to_vec(), vec![22, 33035]);
        assert_eq!(spec.ports().node_port_base(), None);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let parsed = Cli::try_parse_from(["massa-cluster", "--poll-interval-ms", "0", "pods"]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from(["massa-cluster", "--poll-interval-ms", "1", "pods"])
            .expect("valid arguments");
        assert_eq!(cli.poll_interval_ms, 1);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = launch_args(&["--external-ip", "10.0.0.1"])
            .into_spec()
            .unwrap_err();

        assert!(matches!(err, SpecError::MissingCredentials));
    }
}
