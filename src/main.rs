use color_eyre::eyre::{Result, WrapErr, eyre};
use relaysrv::{RelayServer, RelayServerTrait, ServerConfig};
use std::net::SocketAddr;
use tracing::info;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("relaysrv=info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let positional: Vec<&str> = args
        .iter()
        .skip(1)
        .map(String::as_str)
        .filter(|a| !a.starts_with("--"))
        .collect();
    let flag = |name: &str| args.iter().any(|a| a == name);

    let (Some(port), Some(origin)) = (positional.first(), positional.get(1)) else {
        usage(&args[0]);
        std::process::exit(1);
    };

    let port: u16 = port
        .parse()
        .wrap_err_with(|| format!("Invalid port {port}"))?;
    let origin = Url::parse(origin).wrap_err_with(|| format!("Invalid origin URL {origin}"))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(eyre!("Origin URL must use http or https, got {}", origin.scheme()));
    }

    let mut config = ServerConfig::new(origin);
    config.bind_addr = SocketAddr::from(([127, 0, 0, 1], port));
    config.ignore_ssl_errors = flag("--insecure");
    config.debug = flag("--debug");

    info!(
        address = %config.bind_addr,
        origin = %config.origin,
        max_connections = config.max_connections,
        insecure = config.ignore_ssl_errors,
        "Starting relay server"
    );

    let server = RelayServer::new(config);
    server.run().await.wrap_err("Failed to run relay server")?;

    Ok(())
}

fn usage(program: &str) {
    eprintln!("Usage: {program} <port> <origin-url> [--insecure] [--debug]");
    eprintln!("  port:        Port to bind to on 127.0.0.1");
    eprintln!("  origin-url:  Base URL every request path is relayed to");
    eprintln!("  --insecure:  Skip TLS certificate verification for https origins");
    eprintln!("  --debug:     Trace origin traffic under the relaysrv::wire target");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program} 8080 http://127.0.0.1:3000          # Relay to a local backend");
    eprintln!("  {program} 8443 https://example.com --insecure # Relay to https without verification");
}
