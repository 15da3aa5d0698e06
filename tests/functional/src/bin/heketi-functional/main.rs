
use anyhow::anyhow;
use clap::Parser;
use functional::{config::Transport, Environment, Scenario, ScenarioDriver, TestConfig};
use printer::{OutputFormat, Reports, ScenarioList};
use sim_cluster::SimCluster;
use std::{io::IsTerminal, path::PathBuf};
use strum::IntoEnumIterator;
use utils::tracing_telemetry::{FmtLayer, FmtStyle, TracingTelemetry};

#[derive(Parser, Debug)]
#[clap(name = utils::package_description!(), version = utils::version_info_str!())]
struct CliArgs {
    /// Configuration of the environment under test.
    #[clap(long, short, env = utils::CONFIG_ENV, required_unless_present_any = ["simulate", "list"])]
    config: Option<PathBuf>,

    /// Comma separated scenarios to run, all those enabled by default when unset.
    #[clap(long, short, value_delimiter = ',')]
    scenario: Vec<Scenario>,

    /// Run against an in-memory cluster instead of the configured environment.
    #[clap(long)]
    simulate: bool,

    /// Number of gluster servers of the in-memory cluster.
    #[clap(long, default_value = "3")]
    sim_nodes: usize,

    /// Issue the heketi requests through the REST api or through heketi-cli.
    #[clap(long)]
    transport: Option<Transport>,

    /// Timeout for each heketi request.
    #[clap(long)]
    request_timeout: Option<humantime::Duration>,

    /// Timeout for a rebalance to complete.
    #[clap(long)]
    rebalance_timeout: Option<humantime::Duration>,

    /// The output format of the results, viz table, json, yaml.
    #[clap(long, short, default_value = "table")]
    output: OutputFormat,

    /// Style of the traces, printed to stderr when RUST_LOG is set.
    #[clap(long, default_value = "compact")]
    log_style: FmtStyle,

    /// List the scenarios and exit.
    #[clap(long)]
    list: bool,
}

impl CliArgs {
    fn args() -> Self {
        CliArgs::parse()
    }

    /// Apply the command line overrides to the configuration.
    fn configure(&self, mut config: TestConfig) -> TestConfig {
        if let Some(transport) = self.transport {
            config.heketi.transport = transport;
        }
        if let Some(timeout) = self.request_timeout {
            config.heketi.timeout = timeout.into();
        }
        if let Some(timeout) = self.rebalance_timeout {
            config.rebalance.timeout = timeout.into();
        }
        config
    }

    fn scenarios(&self) -> Vec<Scenario> {
        if self.scenario.is_empty() {
            Scenario::defaults()
        } else {
            self.scenario.clone()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::args();
    let writer = match std::env::var_os("RUST_LOG") {
        Some(_) => FmtLayer::Stderr,
        None => FmtLayer::None,
    };
    TracingTelemetry::builder()
        .with_writer(writer)
        .with_style(args.log_style)
        .with_colours(std::io::stderr().is_terminal())
        .init("heketi-functional");

    if args.list {
        return args.output.print(&ScenarioList::new(Scenario::iter()));
    }

    // the simulated cluster lives as long as the driver
    let (_cluster, environment, config) = if args.simulate {
        let cluster = SimCluster::builder().with_nodes(args.sim_nodes).build();
        let config = args.configure(TestConfig::simulated(&cluster));
        let environment = Environment::simulated(&cluster, &config).await?;
        (Some(cluster), environment, config)
    } else {
        let path = args
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("A configuration file is required, see --config"))?;
        let config = args.configure(TestConfig::from_file(path)?);
        let environment = Environment::connect(&config).await?;
        (None, environment, config)
    };

    let driver = ScenarioDriver::new(environment, config);
    let mut reports = Vec::new();
    for scenario in args.scenarios() {
        reports.push(driver.run(scenario).await);
    }
    let reports = Reports(reports);
    args.output.print(&reports)?;

    match reports.failed() {
        0 => Ok(()),
        failed => Err(anyhow!("{failed} of {} scenarios failed", reports.0.len())),
    }
}
