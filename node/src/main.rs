use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use custody_consensus::{ConsensusConfig, CustodyError, Role};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod devnet;
mod version;

use devnet::Devnet;
use version::{git_commit_hash, CUSTODY_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/devnet.toml";
const DEMO_PRODUCT_ID: &str = "P1";

/// Application configuration
#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,

    // Devnet
    nodes: usize,
    base_port: u16,
    /// Role layout cycled over the nodes; empty means the default rotation.
    roles: Vec<Role>,
    demo: bool,

    // Logging & metrics
    log_level: String,
    log_format: String,
    prometheus_enabled: bool,

    consensus: ConsensusConfig,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            path.exists().then_some(path)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("CUSTODY"));
        let config = builder.build()?;

        let defaults = ConsensusConfig::default();
        let consensus = ConsensusConfig {
            verifier_count: get_u64_value(
                &config,
                &["verifier_count", "consensus.verifier_count"],
                defaults.verifier_count as u64,
            ) as usize,
            batch_size: get_u64_value(
                &config,
                &["batch_size", "consensus.batch_size"],
                defaults.batch_size as u64,
            ) as usize,
            proposal_interval_ms: get_u64_value(
                &config,
                &["proposal_interval_ms", "consensus.proposal_interval_ms"],
                defaults.proposal_interval_ms,
            ),
            proposal_timeout_ms: get_u64_value(
                &config,
                &["proposal_timeout_ms", "consensus.proposal_timeout_ms"],
                defaults.proposal_timeout_ms,
            ),
            registration_delay_ms: get_u64_value(
                &config,
                &["registration_delay_ms", "consensus.registration_delay_ms"],
                defaults.registration_delay_ms,
            ),
            voting_delay_ms: get_u64_value(
                &config,
                &["voting_delay_ms", "consensus.voting_delay_ms"],
                defaults.voting_delay_ms,
            ),
            election_delay_ms: get_u64_value(
                &config,
                &["election_delay_ms", "consensus.election_delay_ms"],
                defaults.election_delay_ms,
            ),
            max_stake: get_u64_value(
                &config,
                &["max_stake", "consensus.max_stake"],
                defaults.max_stake,
            ),
            slash_penalty: get_u64_value(
                &config,
                &["slash_penalty", "consensus.slash_penalty"],
                defaults.slash_penalty,
            ),
        };

        let base_port = get_u64_value(&config, &["base_port"], 3000);
        let base_port = u16::try_from(base_port)
            .map_err(|_| anyhow::anyhow!("BASE_PORT {base_port} does not fit a port number"))?;

        let roles = match get_string_value(&config, &["roles"]) {
            Some(raw) => parse_roles(&raw).with_context(|| format!("invalid ROLES '{raw}'"))?,
            None => Vec::new(),
        };

        Ok(Self {
            config_path: resolved_path,
            nodes: get_u64_value(&config, &["nodes"], 3) as usize,
            base_port,
            roles,
            demo: get_bool_value(&config, &["demo"], false),
            log_level: get_string_value(&config, &["log_level"]).unwrap_or_else(|| "info".into()),
            log_format: get_string_value(&config, &["log_format"])
                .unwrap_or_else(|| "pretty".into()),
            prometheus_enabled: get_bool_value(&config, &["prometheus_enabled"], true),
            consensus,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            anyhow::bail!("NODES must be greater than zero");
        }
        if usize::from(u16::MAX - self.base_port) < self.nodes - 1 {
            anyhow::bail!(
                "{} nodes starting at port {} exceed the port range",
                self.nodes,
                self.base_port
            );
        }
        if self.demo {
            let assigned: Vec<Role> = (0..self.nodes)
                .map(|index| devnet::role_at(&self.roles, index))
                .collect();
            for role in [Role::Manufacturer, Role::Distributor, Role::Consumer] {
                if !assigned.contains(&role) {
                    anyhow::bail!("the demo needs at least one {role} node");
                }
            }
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json'");
        }
        self.consensus.validate()?;
        Ok(())
    }
}

/// Parse a comma-separated role list such as `manufacturer,consumer`.
fn parse_roles(raw: &str) -> Result<Vec<Role>, CustodyError> {
    raw.split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::parse)
        .collect()
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_u64_value(config: &Config, keys: &[&str], default: u64) -> u64 {
    keys.iter()
        .find_map(|key| {
            config
                .get_int(key)
                .ok()
                .and_then(|value| u64::try_from(value).ok())
        })
        .unwrap_or(default)
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn build_cli() -> Command {
    Command::new("custody-node")
        .version(CUSTODY_VERSION)
        .about("Supply-chain custody ledger: local DPoS devnet")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("nodes")
                .short('n')
                .long("nodes")
                .value_name("COUNT")
                .value_parser(value_parser!(usize))
                .help("Number of nodes to run in this process"),
        )
        .arg(
            Arg::new("base-port")
                .long("base-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Port number the first node is named after"),
        )
        .arg(
            Arg::new("roles")
                .long("roles")
                .value_name("LIST")
                .value_parser(parse_roles)
                .help("Comma-separated roles assigned to the nodes in turn"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .action(ArgAction::SetTrue)
                .help("Walk one product through manufacture, dispatch and receipt, then exit"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics recorder"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(nodes) = matches.get_one::<usize>("nodes") {
        config.nodes = *nodes;
    }

    if let Some(base_port) = matches.get_one::<u16>("base-port") {
        config.base_port = *base_port;
    }

    if let Some(roles) = matches.get_one::<Vec<Role>>("roles") {
        config.roles = roles.clone();
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if matches.get_flag("demo") {
        config.demo = true;
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    init_logging(&config)?;
    let metrics_handle = init_metrics(&config);

    info!(
        version = CUSTODY_VERSION,
        commit = git_commit_hash(),
        config = ?config.config_path,
        nodes = config.nodes,
        "starting custody devnet"
    );
    debug!(consensus = ?config.consensus, "consensus configuration");

    let devnet = Devnet::launch(
        config.nodes,
        config.base_port,
        &config.roles,
        &config.consensus,
    )?;

    if config.demo {
        tokio::select! {
            result = devnet::run_demo(&devnet, DEMO_PRODUCT_ID, &config.consensus) => {
                match result {
                    Ok(()) => {
                        for node in devnet.nodes() {
                            println!("{}", serde_json::to_string_pretty(&node.snapshot())?);
                        }
                    }
                    Err(err) => warn!(error = %err, "demo did not complete"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("demo interrupted");
            }
        }
    } else {
        info!("custody devnet is running; press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutting down custody devnet");
    devnet.shutdown();
    if let Some(handle) = metrics_handle {
        debug!(metrics = %handle.render(), "final metrics");
    }
    Ok(())
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics recorder disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics recorder registered");
            custody_consensus::metrics::describe();
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics recorder: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn fixture_config(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join(name)
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn devnet_fixture_loads_network_defaults() {
        let path = fixture_config("devnet.toml");
        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.nodes, 3);
        assert_eq!(config.base_port, 3000);
        assert!(config.roles.is_empty());
        assert_eq!(config.log_format, "pretty");
        assert!(config.prometheus_enabled);
        assert_eq!(config.consensus, ConsensusConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            "nodes = 5\nlog_format = \"json\"\n\n[consensus]\nverifier_count = 3\nproposal_interval_ms = 500\n",
        );
        let config = AppConfig::load(file.path().to_str()).unwrap();

        assert_eq!(config.nodes, 5);
        assert_eq!(config.log_format, "json");
        assert_eq!(config.consensus.verifier_count, 3);
        assert_eq!(config.consensus.proposal_interval_ms, 500);
        assert_eq!(config.consensus.batch_size, 5);
        assert_eq!(config.consensus.slash_penalty, 10);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AppConfig::load(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn cli_overrides_file_values() {
        let file = write_config("nodes = 4\n");
        let path = file.path().to_str().unwrap().to_string();
        let matches = build_cli()
            .try_get_matches_from([
                "custody-node",
                "--config",
                path.as_str(),
                "--nodes",
                "6",
                "--log-level",
                "debug",
                "--demo",
                "--disable-metrics",
            ])
            .unwrap();

        let config = load_config_with_overrides(&matches).unwrap();
        assert_eq!(config.nodes, 6);
        assert_eq!(config.log_level, "debug");
        assert!(config.demo);
        assert!(!config.prometheus_enabled);
    }

    #[test]
    fn role_layout_comes_from_file_or_cli() {
        let file = write_config("roles = \"consumer, Manufacturer,distributor\"\n");
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(
            config.roles,
            vec![Role::Consumer, Role::Manufacturer, Role::Distributor]
        );
        assert!(config.validate().is_ok());

        let path = file.path().to_str().unwrap().to_string();
        let matches = build_cli()
            .try_get_matches_from([
                "custody-node",
                "--config",
                path.as_str(),
                "--roles",
                "manufacturer,consumer",
            ])
            .unwrap();
        let config = load_config_with_overrides(&matches).unwrap();
        assert_eq!(config.roles, vec![Role::Manufacturer, Role::Consumer]);
    }

    #[test]
    fn unknown_roles_are_rejected() {
        let file = write_config("roles = \"manufacturer,courier\"\n");
        let err = AppConfig::load(file.path().to_str()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown role: courier"));

        assert!(build_cli()
            .try_get_matches_from(["custody-node", "--roles", "courier"])
            .is_err());
    }

    #[test]
    fn validation_rejects_unusable_devnets() {
        let file = write_config("nodes = 2\ndemo = true\n");
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("nodes = 4\ndemo = true\nroles = \"manufacturer,consumer\"\n");
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("nodes = 0\n");
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("[consensus]\nmax_stake = 0\n");
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert!(config.validate().is_err());
    }
}
