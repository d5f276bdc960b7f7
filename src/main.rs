use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mysql_k8s::config::{
    ordinal_from_hostname, render_mycnf, render_proxysql, write_config, MyCnfParams,
    ProxySqlParams, ProxyUser,
};
use mysql_k8s::controller::{self, topology};
use mysql_k8s::crd::{ClusterMode, ProxySqlSpec};
use mysql_k8s::Error;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Render my.cnf for one database pod
    RenderMycnf(RenderMycnfArgs),
    /// Render proxysql.cnf for one proxy pod
    RenderProxysql(RenderProxysqlArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace, home of the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Only reconcile MysqlClusters in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Listen address of the health and metrics server
    #[cfg(feature = "rest-api")]
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    api_addr: std::net::SocketAddr,
}

/// Cluster shape shared by both renderers
#[derive(Parser, Debug)]
struct ClusterArgs {
    #[arg(long, env = "CLUSTER_MODE", default_value = "MGRSP")]
    mode: ClusterMode,

    /// MysqlCluster name
    #[arg(long, env = "CLUSTER_NAME")]
    cluster: String,

    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Database member count
    #[arg(long, env = "CLUSTER_REPLICAS", default_value_t = 3)]
    replicas: i32,

    #[arg(long, env = "MYSQL_PORT", default_value_t = 3306)]
    port: u16,

    /// Write here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl ClusterArgs {
    fn member_hosts(&self) -> Vec<String> {
        (0..self.replicas)
            .map(|i| topology::member_host(&self.cluster, &self.namespace, i))
            .collect()
    }
}

#[derive(Parser, Debug)]
struct RenderMycnfArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Pod hostname; its ordinal suffix picks the server id
    #[arg(long, env = "HOSTNAME")]
    hostname: String,

    /// Group replication group UUID
    #[arg(long, env = "GROUP_NAME")]
    group_name: Option<String>,

    /// Extra mysqld variable as KEY=VALUE, repeatable
    #[arg(long = "set", value_parser = parse_key_value)]
    overrides: Vec<(String, String)>,
}

#[derive(Parser, Debug)]
struct RenderProxysqlArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[arg(long, env = "PROXYSQL_REPLICAS", default_value_t = 2)]
    proxy_replicas: i32,

    #[arg(long, env = "PROXYSQL_ADMIN_PORT", default_value_t = 6032)]
    admin_port: u16,

    #[arg(long, env = "PROXYSQL_PORT", default_value_t = 6033)]
    proxy_port: u16,

    #[arg(long, default_value_t = 10)]
    writer_hostgroup: i64,

    #[arg(long, default_value_t = 20)]
    reader_hostgroup: i64,

    #[arg(long, default_value_t = 1000)]
    max_connections: i64,

    #[arg(long, env = "PROXYSQL_ADMIN_USER", default_value = "admin")]
    admin_user: String,

    #[arg(long, env = "PROXYSQL_ADMIN_PASSWORD", default_value = "admin", hide_env_values = true)]
    admin_password: String,

    /// Account used to monitor backends and routed as the root user
    #[arg(long, env = "MYSQL_ROOT_USER", default_value = "root")]
    root_user: String,

    #[arg(long, env = "MYSQL_ROOT_PASSWORD", hide_env_values = true)]
    root_password: String,

    #[arg(long, env = "APP_USER")]
    app_user: Option<String>,

    #[arg(long, env = "APP_PASSWORD", hide_env_values = true)]
    app_password: Option<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("mysql-k8s Operator v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Features: rest-api={}, metrics={}",
                cfg!(feature = "rest-api"),
                cfg!(feature = "metrics")
            );
            Ok(())
        }
        Commands::Run(run_args) => {
            init_tracing(args.log_json, BoxMakeWriter::new(std::io::stdout));
            run_operator(run_args).await
        }
        Commands::RenderMycnf(render_args) => {
            init_tracing(args.log_json, BoxMakeWriter::new(std::io::stderr));
            run_render_mycnf(render_args)
        }
        Commands::RenderProxysql(render_args) => {
            init_tracing(args.log_json, BoxMakeWriter::new(std::io::stderr));
            run_render_proxysql(render_args)
        }
    }
}

fn init_tracing(json: bool, writer: BoxMakeWriter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .init();
    }
}

fn emit(output: Option<&PathBuf>, contents: &str) -> Result<(), Error> {
    match output {
        Some(path) => write_config(path, contents),
        None => {
            print!("{contents}");
            Ok(())
        }
    }
}

fn run_render_mycnf(args: RenderMycnfArgs) -> Result<(), Error> {
    let ordinal = ordinal_from_hostname(&args.hostname)?;
    let ordinal_i32 = i32::try_from(ordinal)
        .map_err(|_| Error::ConfigError(format!("ordinal {ordinal} out of range")))?;

    let params = MyCnfParams {
        mode: args.cluster.mode,
        ordinal,
        report_host: topology::member_host(&args.cluster.cluster, &args.cluster.namespace, ordinal_i32),
        port: args.cluster.port,
        peers: args.cluster.member_hosts(),
        group_name: args.group_name,
        overrides: args.overrides,
    };
    let doc = render_mycnf(&params)?;

    info!(
        "Rendered my.cnf for {} (server id {})",
        params.report_host,
        params.server_id()
    );
    emit(args.cluster.output.as_ref(), &doc.to_string())
}

fn run_render_proxysql(args: RenderProxysqlArgs) -> Result<(), Error> {
    let spec = ProxySqlSpec {
        replicas: args.proxy_replicas,
        admin_port: args.admin_port,
        port: args.proxy_port,
        writer_hostgroup: args.writer_hostgroup,
        reader_hostgroup: args.reader_hostgroup,
        max_connections: args.max_connections,
    };
    let mut params = ProxySqlParams::from_spec(
        &spec,
        args.cluster.mode,
        (args.admin_user.as_str(), args.admin_password.as_str()),
        (args.root_user.as_str(), args.root_password.as_str()),
    );

    params.backends = args
        .cluster
        .member_hosts()
        .into_iter()
        .map(|host| (host, args.cluster.port))
        .collect();
    params.peers = (0..args.proxy_replicas)
        .map(|i| topology::proxy_host(&args.cluster.cluster, &args.cluster.namespace, i))
        .collect();
    params.users.push(ProxyUser {
        username: args.root_user.clone(),
        password: args.root_password.clone(),
        default_hostgroup: args.writer_hostgroup,
    });
    if let (Some(username), Some(password)) = (args.app_user, args.app_password) {
        params.users.push(ProxyUser {
            username,
            password,
            default_hostgroup: args.writer_hostgroup,
        });
    }

    let doc = render_proxysql(&params)?;
    info!(
        "Rendered proxysql.cnf with {} backend(s) and {} peer(s)",
        params.backends.len(),
        params.peers.len()
    );
    emit(args.cluster.output.as_ref(), &doc.to_string())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    info!("Starting mysql-k8s Operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));

    tokio::spawn(
        controller::LeaderElector::new(
            client.clone(),
            &args.namespace,
            &holder_identity,
            Arc::clone(&is_leader),
        )
        .run(),
    );

    tokio::spawn(controller::run_retention_sweeper(
        client.clone(),
        args.watch_namespace.clone(),
        Arc::clone(&is_leader),
    ));

    let state = Arc::new(controller::ControllerState::new(
        client.clone(),
        args.namespace.clone(),
        args.watch_namespace.clone(),
        Arc::clone(&is_leader),
    ));

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let addr = args.api_addr;
        tokio::spawn(async move {
            if let Err(e) = mysql_k8s::rest_api::run_server(api_state, addr).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    controller::run_controller(state).await
}
