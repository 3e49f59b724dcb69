use clap::Parser;
use std::env;
use std::net::Ipv4Addr;
use std::process;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use dnsshim::forwarding::UdpUpstream;
use dnsshim::server::{listen_udp, Mode};
use dnsshim::settings::{ResolverAddress, Settings};

fn begin_logging() {
    let log_format = env::var("RUST_LOG_FORMAT").unwrap_or_default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logger = tracing_subscriber::fmt().with_env_filter(filter);

    if log_format.split(',').any(|f| f == "json") {
        logger.json().init();
    } else {
        logger.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A tiny DNS forwarder.
///
/// dnsshim listens for DNS queries over UDP.  If a resolver is given
/// every question is forwarded to it, separately, and the answers are
/// put back together.  Otherwise every question is answered with the
/// same address.
///
/// Settings are read from the config file, then `DNSSHIM_*`
/// environment variables, then these flags.
struct Args {
    /// Upstream resolver to forward questions to, as host:port
    #[clap(short, long)]
    resolver: Option<ResolverAddress>,

    /// Interface to listen on [default: 127.0.0.1]
    #[clap(short, long)]
    interface: Option<Ipv4Addr>,

    /// Port to listen on [default: 2053]
    #[clap(short, long)]
    port: Option<u16>,

    /// Path to a YAML configuration file
    #[clap(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let mut settings = match Settings::new(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::error!(%error, "could not load settings");
            process::exit(1);
        }
    };
    if let Some(resolver) = args.resolver {
        settings.resolver = Some(resolver);
    }
    if let Some(interface) = args.interface {
        settings.listen_address = interface;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    let mode = match &settings.resolver {
        Some(resolver) => match resolver.resolve().await {
            Ok(address) => {
                tracing::info!(%resolver, %address, "forwarding to upstream resolver");
                Mode::Forward(UdpUpstream {
                    address,
                    timeout: settings.upstream_timeout(),
                })
            }
            Err(error) => {
                tracing::error!(%resolver, %error, "could not resolve upstream resolver");
                process::exit(1);
            }
        },
        None => {
            tracing::info!(address = %settings.local_address, "answering locally");
            Mode::Local(settings.static_answer())
        }
    };

    tracing::info!(interface = %settings.listen_address, port = %settings.port, "binding DNS socket");

    let socket = match UdpSocket::bind((settings.listen_address, settings.port)).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "could not bind UDP socket");
            process::exit(1);
        }
    };

    let error = listen_udp(mode, socket).await;
    tracing::error!(%error, "UDP socket failed");
    process::exit(1);
}
