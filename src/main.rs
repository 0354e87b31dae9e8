use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cloudflare_exporter::{
    new_http_listener, BuildError, CloudflareClient, Collector, ExporterConfig, RawConfig,
    Registry, ScrapeHandle,
};

/// How often the Cloudflare API is polled for fresh values.
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = cloudflare_exporter::opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            process::exit(1);
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    let config = match ExporterConfig::from_raw(RawConfig::from_matches(&matches)) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        error!(%err, "failed to start exporter");
        process::exit(1);
    }
}

fn run(config: ExporterConfig) -> Result<(), BuildError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

    let registry = Arc::new(Registry::new());

    let (client, exporter) = {
        let _guard = runtime.enter();
        let client = CloudflareClient::new(config.auth.clone())?;
        let exporter = new_http_listener(ScrapeHandle::new(registry.clone()), config.listen_addr)?;
        (client, exporter)
    };

    let collector = Collector::new(Box::new(client), registry, &config);

    info!("serving metrics at http://{}/metrics", config.listen_addr);

    runtime.spawn(async move {
        if let Err(err) = exporter.await {
            error!(%err, "scrape listener terminated");
        }
    });

    runtime.block_on(update_loop(collector));

    Ok(())
}

/// Refreshes all targets immediately, then again after every refresh interval.
async fn update_loop(collector: Collector) {
    loop {
        collector.update().await;
        tokio::time::sleep(REFRESH_INTERVAL).await;
    }
}
