//! Binary entry point (SPEC_FULL §0.4).
//!
//! `ccproxy serve [--config PATH] [--host H] [--port P] [--api-key KEY]`
//! runs the gateway; `ccproxy provider list|add|remove` are thin CLI
//! wrappers around the running instance's `/providers` admin endpoint.
//! Flags are parsed by hand, matching the teacher's dependency-free CLI
//! surface rather than pulling in an argument-parsing crate for four
//! flags.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ccproxy::config::{self, AppConfig};
use ccproxy::gateway;
use ccproxy::observability;
use ccproxy::Pipeline;

/// Grace window before in-flight requests are forcibly dropped on
/// shutdown (spec §5 "grace window (default 30 s) before forced
/// cancellation").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") | None => serve(args.get(2..).unwrap_or_default()),
        Some("provider") => provider_command(args.get(2..).unwrap_or_default()),
        Some(other) => {
            eprintln!("unknown subcommand '{other}'; usage: ccproxy [serve|provider] ...");
            std::process::exit(2);
        }
    }
}

#[derive(Default)]
struct ServeFlags {
    config_path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
}

fn parse_flags(args: &[String]) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        if let Some(name) = flag.strip_prefix("--") {
            if let Some(value) = iter.next() {
                out.insert(name.to_string(), value.clone());
            }
        }
    }
    out
}

fn serve(args: &[String]) {
    let raw = parse_flags(args);
    let flags = ServeFlags {
        config_path: raw.get("config").cloned(),
        host: raw.get("host").cloned(),
        port: raw.get("port").and_then(|v| v.parse().ok()),
        api_key: raw.get("api-key").cloned(),
    };

    let mut config = config::load_config(flags.config_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH))
        .unwrap_or_else(|err| {
            eprintln!("failed to load config: {err}");
            std::process::exit(1);
        });
    if let Some(host) = flags.host {
        config.server.host = host;
    }
    if let Some(port) = flags.port {
        config.server.port = port;
    }
    if let Some(api_key) = flags.api_key {
        config.server.apikey = Some(api_key);
    }

    observability::init_tracing(&config.server.log);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the async runtime");
    runtime.block_on(run_server(config));
}

async fn run_server(config: AppConfig) {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("invalid host/port in configuration");

    let pipeline = Arc::new(Pipeline::new(config).unwrap_or_else(|err| {
        eprintln!("failed to initialize pipeline: {err}");
        std::process::exit(1);
    }));

    let app = gateway::router(pipeline);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "ccproxy listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server loop exited unexpectedly");
}

/// Resolves once a termination signal arrives, after arming a watchdog
/// that force-exits the process if in-flight requests haven't drained
/// within [`SHUTDOWN_GRACE`] (spec §5's grace-window guarantee; axum's own
/// graceful shutdown has no built-in upper bound).
async fn shutdown_signal() {
    wait_for_termination().await;
    tracing::info!(grace_seconds = SHUTDOWN_GRACE.as_secs(), "shutdown signal received, draining in-flight requests");
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::warn!("grace window elapsed with requests still in flight, forcing shutdown");
        std::process::exit(0);
    });
}

async fn wait_for_termination() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn provider_command(args: &[String]) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build the async runtime");
    runtime.block_on(async {
        match args.first().map(String::as_str) {
            Some("list") => provider_list(args.get(1..).unwrap_or_default()).await,
            Some("add") => provider_add(args.get(1..).unwrap_or_default()).await,
            Some("remove") => provider_remove(args.get(1..).unwrap_or_default()).await,
            _ => {
                eprintln!("usage: ccproxy provider <list|add|remove> [--base-url URL] [--api-key KEY] ...");
                std::process::exit(2);
            }
        }
    });
}

fn admin_client(raw: &std::collections::HashMap<String, String>) -> (reqwest::Client, String, Option<String>) {
    let base_url = raw
        .get("base-url")
        .cloned()
        .unwrap_or_else(|| "http://127.0.0.1:8787".to_string());
    (reqwest::Client::new(), base_url, raw.get("api-key").cloned())
}

fn with_auth(mut req: reqwest::RequestBuilder, api_key: &Option<String>) -> reqwest::RequestBuilder {
    if let Some(key) = api_key {
        req = req.header("x-api-key", key);
    }
    req
}

async fn provider_list(args: &[String]) {
    let raw = parse_flags(args);
    let (client, base_url, api_key) = admin_client(&raw);
    let req = with_auth(client.get(format!("{base_url}/providers")), &api_key);
    print_admin_response(req.send().await).await;
}

async fn provider_add(args: &[String]) {
    let raw = parse_flags(args);
    let (client, base_url, api_key) = admin_client(&raw);
    let descriptor = serde_json::json!({
        "name": raw.get("name"),
        "dialect": raw.get("dialect"),
        "api_base_url": raw.get("api-base-url"),
        "api_key": raw.get("provider-api-key"),
    });
    let req = with_auth(client.post(format!("{base_url}/providers")).json(&descriptor), &api_key);
    print_admin_response(req.send().await).await;
}

async fn provider_remove(args: &[String]) {
    let raw = parse_flags(args);
    let (client, base_url, api_key) = admin_client(&raw);
    let Some(name) = raw.get("name") else {
        eprintln!("usage: ccproxy provider remove --name NAME [--base-url URL] [--api-key KEY]");
        std::process::exit(2);
    };
    let req = with_auth(client.delete(format!("{base_url}/providers/{name}")), &api_key);
    print_admin_response(req.send().await).await;
}

async fn print_admin_response(result: Result<reqwest::Response, reqwest::Error>) {
    match result {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("{status}: {body}");
        }
        Err(err) => {
            eprintln!("request failed: {err}");
            std::process::exit(1);
        }
    }
}
