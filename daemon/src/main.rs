//! Spica host binary
//!
//! Loads the TOML host configuration, wires the built-in connectivity suite
//! and host sensors into an engine, and serves it over HTTP until Ctrl+C.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use daemon::config;
use daemon::{Host, HostError, Result};
use schema::HostConfig;
use spica_core::{
    CheckFailure, Engine, EngineOptions, Outcome, ParamSpec, ProbeClient, Resolver, WarmupTracker,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "spica", about = "HTTP-exposed diagnostic check host")]
struct Args {
    /// Path to the TOML host configuration; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Built-in suite probing the target application over its base address
struct Connectivity {
    client: Arc<ProbeClient>,
}

fn build_engine(config: &HostConfig) -> Result<Engine> {
    let mut engine = Engine::new(EngineOptions {
        check_root: config.check_root.clone(),
        sensor_root: config.sensor_root.clone(),
        public_base: config::effective_public_base(config),
    });

    for target in &config.targets {
        engine.add_target(&target.environment, &target.application, &target.base_address)?;
    }

    engine.suite(
        |resolver: &Resolver<'_>| {
            Ok(Connectivity {
                client: resolver.resolve::<ProbeClient>()?,
            })
        },
        |suite| {
            suite.tag("connectivity");
            suite.check(
                "http_reachable",
                vec![ParamSpec::new("path", "/")],
                |suite, ctx| async move {
                    let path = ctx.param_str("path");
                    let (status, _body) = suite.client.get(&path).await?;
                    ctx.log(format!("GET {} -> {}", path, status));
                    if status >= 500 {
                        return Err(CheckFailure::new(format!(
                            "application returned {}",
                            status
                        )));
                    }
                    Outcome::value(status)
                },
            );
            suite.check("get_target", vec![], |_suite, ctx| async move {
                Outcome::value(ctx.target().info())
            });
        },
    );

    let started = Instant::now();
    engine.sensor("uptime_seconds", "host", move || async move {
        Ok(started.elapsed().as_secs())
    });

    let warmup = Arc::new(WarmupTracker::with_reset(
        spica_core::warmup::DEFAULT_RESET_INTERVAL,
    ));
    let reader = warmup.clone();
    engine.sensor("warmed_up", "host", move || {
        let reader = reader.clone();
        async move { Ok(reader.is_ready()) }
    });
    warmup.mark_ready();

    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => config::load_from_toml_path(path)?,
        None => HostConfig::default(),
    };

    info!("Starting Spica host");
    let engine = build_engine(&config)?;
    let addr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| HostError::Config(format!("invalid bind address: {}", e)))?;

    Host::new(engine, addr)
        .serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
            }
        })
        .await?;

    info!("Host stopped");
    Ok(())
}
