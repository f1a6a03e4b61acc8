// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runs a local cluster of consensus nodes until all honest nodes decide.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use benor::cluster::LocalCluster;
use benor::network::simulated::SimulatedNetworkCore;
use benor::{All2All, ClusterConfig, NodeId, Value, logging};
use clap::{Parser, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::{Context, bail};
use fastrace::collector::Config;
use fastrace_opentelemetry::OpenTelemetryReporter;
use log::{info, warn};
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use rand::Rng;
use serde_json::json;

/// Randomized binary consensus on a local cluster.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Cluster config file (TOML). Replaces all other cluster options.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Total number of nodes `N`.
    #[arg(long, default_value_t = 4)]
    nodes: usize,
    /// Fault bound `F`.
    #[arg(long, default_value_t = 1)]
    max_faulty: usize,
    /// IDs of faulty nodes.
    #[arg(long, value_delimiter = ',')]
    faulty: Vec<NodeId>,
    /// Initial bits of all nodes. Random if omitted.
    #[arg(long, value_delimiter = ',')]
    initial: Vec<Value>,
    /// Transport the nodes talk over.
    #[arg(long, value_enum, default_value_t = NetworkKind::Simulated)]
    network: NetworkKind,
    /// How long to wait for all honest nodes to decide.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    /// Exports spans to this OTLP collector, e.g. `http://127.0.0.1:4317`.
    #[arg(long)]
    otlp_endpoint: Option<String>,
    /// Logs with timestamps and targets instead of the minimal layout.
    #[arg(long)]
    full_log_layout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum NetworkKind {
    Simulated,
    Udp,
}

#[tokio::main]
async fn main() -> Result<()> {
    // enable fancy `color_eyre` error messages
    color_eyre::install()?;

    let args = Args::parse();

    // enable `fastrace` tracing
    if let Some(endpoint) = &args.otlp_endpoint {
        enable_otlp_reporter(endpoint)?;
    }

    if args.full_log_layout {
        logging::enable_logforth_stderr();
    } else {
        logging::enable_logforth();
    }

    let config = cluster_config(&args)?;
    info!(
        "running {} nodes with fault bound {} ({} faulty) over {:?} network",
        config.num_nodes(),
        config.max_faulty,
        config.faulty_ids().count(),
        args.network,
    );
    let timeout = Duration::from_secs(args.timeout_secs);
    match args.network {
        NetworkKind::Simulated => {
            let core = Arc::new(SimulatedNetworkCore::new());
            run_cluster(LocalCluster::simulated(config, core).await?, timeout).await?;
        }
        NetworkKind::Udp => run_cluster(LocalCluster::udp(config).await?, timeout).await?,
    }

    fastrace::flush();

    Ok(())
}

fn enable_otlp_reporter(endpoint: &str) -> Result<()> {
    let reporter = OpenTelemetryReporter::new(
        SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.to_string())
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .with_timeout(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT)
            .build()
            .context("initialize otlp exporter")?,
        Cow::Owned(
            Resource::builder()
                .with_attributes([KeyValue::new("service.name", "benor")])
                .build(),
        ),
        InstrumentationScope::builder("benor")
            .with_version(env!("CARGO_PKG_VERSION"))
            .build(),
    );
    fastrace::set_reporter(reporter, Config::default());
    Ok(())
}

fn cluster_config(args: &Args) -> Result<ClusterConfig> {
    if let Some(path) = &args.config {
        return ClusterConfig::from_file(path)
            .with_context(|| format!("can not load config {}", path.display()));
    }
    let initial_values = if args.initial.is_empty() {
        let mut rng = rand::rng();
        (0..args.nodes)
            .map(|_| Value::from(rng.random::<bool>()))
            .collect()
    } else if args.initial.len() == args.nodes {
        args.initial.clone()
    } else {
        bail!(
            "got {} initial values for {} nodes",
            args.initial.len(),
            args.nodes
        );
    };
    Ok(ClusterConfig::new(
        initial_values,
        &args.faulty,
        args.max_faulty,
    )?)
}

async fn run_cluster<A>(mut cluster: LocalCluster<A>, timeout: Duration) -> Result<()>
where
    A: All2All + Send + Sync + 'static,
{
    cluster.spawn();
    cluster.start_all().await;
    let all_decided = cluster.wait_for_decisions(timeout).await;

    let states = cluster.states().await;
    let report = cluster
        .nodes()
        .iter()
        .zip(&states)
        .map(|(node, state)| json!({ "id": node.id(), "status": node.status(), "state": state }))
        .collect::<Vec<_>>();
    println!("{}", serde_json::to_string_pretty(&report)?);

    let decisions = cluster.decisions().await;
    match decisions.first() {
        Some((_, value)) if decisions.iter().all(|(_, v)| v == value) => {
            info!("{} honest nodes agreed on {value}", decisions.len());
        }
        Some(_) => warn!("honest nodes disagree: {decisions:?}"),
        None => warn!("no honest node decided"),
    }
    if !all_decided {
        warn!("timed out after {timeout:?}");
    }

    cluster.stop_all().await;
    cluster.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args() {
        let args = Args::try_parse_from([
            "benor",
            "--nodes",
            "4",
            "--faulty",
            "3",
            "--initial",
            "0,1,1,0",
            "--network",
            "udp",
            "--full-log-layout",
        ])
        .unwrap();
        assert_eq!(args.network, NetworkKind::Udp);
        assert!(args.full_log_layout);
        assert_eq!(args.initial, vec![Value::Zero, Value::One, Value::One, Value::Zero]);

        let config = cluster_config(&args).unwrap();
        assert_eq!(config.faulty_ids().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["benor"]).unwrap();
        assert_eq!(args.network, NetworkKind::Simulated);
        assert!(!args.full_log_layout);
        let config = cluster_config(&args).unwrap();
        assert_eq!(config.num_nodes(), 4);
        assert_eq!(config.max_faulty, 1);
    }

    #[test]
    fn initial_values_must_match_nodes() {
        let args = Args::try_parse_from(["benor", "--nodes", "4", "--initial", "0,1"]).unwrap();
        assert!(cluster_config(&args).is_err());
        assert!(Args::try_parse_from(["benor", "--initial", "0,2"]).is_err());
    }
}
