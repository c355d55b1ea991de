//! This program builds the resource graph for a single-instance Dify web
//! server on AWS: a two-zone network, the perimeters around it, the instance
//! itself and an HTTPS load balancer in front of it. The graph is printed as
//! a template a declarative provisioning backend can deploy, or checked
//! against the live account.

mod checks;
mod gatherer;
mod topology;
mod types;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use itertools::Itertools;
use log::{error, info};
use std::path::PathBuf;
use std::process::exit;

use crate::topology::{
    PerimeterLayout, Topology, TopologyConfigBuilder, DEFAULT_ALLOWED_CIDR, DEFAULT_KEY_NAME,
    DEFAULT_SUBNET1_CIDR, DEFAULT_SUBNET2_CIDR, DEFAULT_VPC_CIDR,
};
use crate::types::{Environment, TopologyError};

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Deployable template document.
    Json,
    /// Resources in construction order.
    Graph,
    Summary,
    Checks,
    Debug,
}

#[derive(Args, Debug, Clone)]
struct SynthArgs {
    #[arg(short, long, value_enum, env = "DIFY_ENVIRONMENT")]
    environment: Option<Environment>,
    /// Certificate for the HTTPS listener.
    #[arg(long, env = "CERTIFICATE_ARN", default_value = "")]
    certificate_arn: String,
    #[arg(long, default_value = DEFAULT_VPC_CIDR)]
    vpc_cidr: String,
    #[arg(long, default_value = DEFAULT_SUBNET1_CIDR)]
    subnet1_cidr: String,
    #[arg(long, default_value = DEFAULT_SUBNET2_CIDR)]
    subnet2_cidr: String,
    /// Range allowed to reach the load balancer.
    #[arg(long, default_value = DEFAULT_ALLOWED_CIDR)]
    allowed_cidr: String,
    /// Range allowed to reach SSH on the instance. Repeat for several.
    #[arg(long = "admin-cidr")]
    administrators: Vec<String>,
    #[arg(long, default_value = DEFAULT_KEY_NAME)]
    key_name: String,
    #[arg(long, default_value = topology::compute::DEFAULT_INSTANCE_TYPE)]
    instance_type: String,
    /// Availability zones to place the subnets in. Looked up in the
    /// configured region when not given.
    #[arg(long, value_delimiter = ',')]
    zones: Vec<String>,
    /// Key the instance perimeter to --allowed-cidr instead of the load
    /// balancer perimeter.
    #[arg(long)]
    legacy_perimeter: bool,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Build the resource graph.
    Synth(SynthArgs),
    /// Look up the deployed outputs of an environment.
    Status {
        #[arg(short, long, value_enum, env = "DIFY_ENVIRONMENT")]
        environment: Environment,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Builds the AWS resource graph for a Dify web server.",
    long_about = "Builds the AWS resource graph for a Dify web server. AWS configuration must be setup to look up availability zones or deployed resources."
)]
struct Options {
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn summary(topology: &Topology) -> String {
    let mut lines = vec![format!(
        "{} ({} resources)",
        topology.graph.description,
        topology.graph.resources.len()
    )];
    for (type_name, count) in topology
        .graph
        .resources
        .iter()
        .map(|r| r.type_name())
        .counts()
        .into_iter()
        .sorted()
    {
        lines.push(format!("  {:<45} {}", type_name, count));
    }
    lines.push("Outputs:".to_string());
    for output in topology.outputs.iter() {
        lines.push(format!(
            "  {:<20} {} (export {})",
            output.logical_id, output.value, output.export_name
        ));
    }
    lines.join("\n")
}

fn render(topology: &Topology, format: &OutputFormat) -> Result<String, TopologyError> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&topology.graph.to_template()?)?,
        OutputFormat::Graph => serde_json::to_string_pretty(&topology.graph)?,
        OutputFormat::Summary => summary(topology),
        OutputFormat::Checks => checks::verify_graph(&topology.graph, topology.environment)
            .iter()
            .map(|r| r.to_string())
            .join("\n"),
        OutputFormat::Debug => format!("{:#?}", topology),
    };
    Ok(text)
}

async fn synth(args: SynthArgs) -> Result<(), TopologyError> {
    let layout = if args.legacy_perimeter {
        PerimeterLayout::Legacy
    } else {
        PerimeterLayout::Shared
    };

    let mut builder = TopologyConfigBuilder::default();
    if let Some(environment) = args.environment {
        builder.environment(environment);
    }
    let mut config = builder
        .certificate_arn(args.certificate_arn)
        .vpc_cidr(args.vpc_cidr)
        .subnet1_cidr(args.subnet1_cidr)
        .subnet2_cidr(args.subnet2_cidr)
        .availability_zones(args.zones)
        .allowed_cidr(args.allowed_cidr)
        .administrators(args.administrators)
        .key_name(args.key_name)
        .instance_type(args.instance_type)
        .layout(layout)
        .build()
        .map_err(|e| TopologyError::Config(e.to_string()))?;
    topology::preflight(&config)?;

    if config.availability_zones.is_empty() {
        info!("No zones given, looking them up");
        config.availability_zones = gatherer::aws::gather_zones().await?;
    }

    let topology = topology::assemble(&config)?;
    let text = render(&topology, &args.format)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, text + "\n")?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

async fn status(environment: Environment, json: bool) -> Result<(), TopologyError> {
    let status = gatherer::aws::gather_status(environment).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    let show = |v: &Option<String>| match v {
        Some(v) => v.green().to_string(),
        None => "not deployed".red().to_string(),
    };
    println!("Environment:      {}", environment);
    println!(
        "ALBEndpoint:      {} ({})",
        show(&status.load_balancer_dns_name),
        status.load_balancer_state.as_deref().unwrap_or("-")
    );
    println!("InstanceId:       {}", show(&status.instance_id));
    println!(
        "InstancePublicIP: {} ({})",
        show(&status.instance_public_address),
        status.instance_state.as_deref().unwrap_or("-")
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let options = Options::parse();
    env_logger::Builder::new()
        .filter_level(options.verbose.log_level_filter())
        .init();

    let result = match options.command {
        Command::Synth(args) => synth(args).await,
        Command::Status { environment, json } => status(environment, json).await,
    };
    if let Err(e) = result {
        error!("{:?}", e);
        eprintln!("{}", e.to_string().red());
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        let config = TopologyConfigBuilder::default()
            .environment(Environment::Dev)
            .certificate_arn("arn:aws:acm:us-east-1:123456789012:certificate/abc")
            .availability_zones(vec!["us-east-1a".to_string(), "us-east-1b".to_string()])
            .administrators(vec!["203.0.113.7/32".to_string()])
            .build()
            .unwrap();
        topology::assemble(&config).unwrap()
    }

    #[test]
    fn test_cli_parses_synth() {
        let options = Options::try_parse_from([
            "dify-topology",
            "synth",
            "--environment",
            "prod",
            "--certificate-arn",
            "arn:cert",
            "--admin-cidr",
            "1.1.1.1/32",
            "--admin-cidr",
            "2.2.2.2/32",
            "--zones",
            "eu-west-1a,eu-west-1b",
            "--format",
            "summary",
        ])
        .unwrap();
        let Command::Synth(args) = options.command else {
            panic!("expected synth");
        };
        assert_eq!(args.environment, Some(Environment::Prod));
        assert_eq!(args.administrators, vec!["1.1.1.1/32", "2.2.2.2/32"]);
        assert_eq!(args.zones, vec!["eu-west-1a", "eu-west-1b"]);
        assert_eq!(args.vpc_cidr, DEFAULT_VPC_CIDR);
        assert!(!args.legacy_perimeter);
    }

    fn synth_args(argv: &[&str]) -> SynthArgs {
        let mut full = vec!["dify-topology", "synth"];
        full.extend_from_slice(argv);
        let options = Options::try_parse_from(full).unwrap();
        let Command::Synth(args) = options.command else {
            panic!("expected synth");
        };
        args
    }

    #[tokio::test]
    async fn test_synth_checks_configuration_before_zone_lookup() {
        let mut args = synth_args(&["--admin-cidr", "1.1.1.1/32"]);
        args.environment = None;
        assert!(args.zones.is_empty());
        assert!(matches!(
            synth(args).await,
            Err(TopologyError::MissingEnvironment)
        ));

        let mut args = synth_args(&["--environment", "dev", "--admin-cidr", "1.1.1.1/32"]);
        args.certificate_arn = String::new();
        assert!(matches!(
            synth(args).await,
            Err(TopologyError::MissingCertificate)
        ));

        let mut args = synth_args(&["--environment", "dev", "--certificate-arn", "arn:cert"]);
        args.administrators.clear();
        assert!(matches!(
            synth(args).await,
            Err(TopologyError::EmptyAllowList)
        ));
    }

    #[test]
    fn test_summary_lists_outputs() {
        let text = summary(&topology());
        assert!(text.contains("AWS::EC2::Subnet"));
        assert!(text.contains("DifyALBDnsName-dev"));
        assert!(text.contains("${DifyWebServerInstanceDev}"));
    }

    #[test]
    fn test_render_formats() {
        let topology = topology();
        let template: serde_json::Value =
            serde_json::from_str(&render(&topology, &OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(
            template["Resources"]["DifyVPCDev"]["Type"],
            serde_json::json!("AWS::EC2::VPC")
        );
        let graph: serde_json::Value =
            serde_json::from_str(&render(&topology, &OutputFormat::Graph).unwrap()).unwrap();
        assert_eq!(graph["Resources"][0]["LogicalId"], serde_json::json!("DifyVPCDev"));
        let checks = render(&topology, &OutputFormat::Checks).unwrap();
        assert!(checks.contains("All logical IDs are unique"));
    }
}
