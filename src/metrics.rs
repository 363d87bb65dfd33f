use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::thread;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).unwrap_or_else(|e| panic!("metric {name}: {e}"));
    let _ = REGISTRY.register(Box::new(c.clone()));
    c
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).unwrap_or_else(|e| panic!("metric {name}: {e}"));
    let _ = REGISTRY.register(Box::new(c.clone()));
    c
}

/// Accepted work results, labelled by source (`peer`, `dpow`, `local`).
pub static WORK_RESULTS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("pippin_work_results_total", "Accepted work results by source", &["source"]));
/// Races where no remote source answered.
pub static WORK_RACE_EXHAUSTED: Lazy<IntCounter> =
    Lazy::new(|| counter("pippin_work_race_exhausted_total", "Work races that fell back to local work"));
pub static LOCAL_WORK_SOLVED: Lazy<IntCounter> =
    Lazy::new(|| counter("pippin_local_work_solved_total", "Local proof-of-work solutions"));
pub static BLOCKS_PUBLISHED: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("pippin_blocks_published_total", "Blocks accepted by the node", &["subtype"]));
pub static PROCESS_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| counter("pippin_process_failures_total", "Blocks the node refused or failed to process"));

pub fn serve(cfg: crate::config::Metrics) -> Result<()> {
    // Force registration before the first scrape.
    Lazy::force(&WORK_RESULTS);
    Lazy::force(&WORK_RACE_EXHAUSTED);
    Lazy::force(&LOCAL_WORK_SOLVED);
    Lazy::force(&BLOCKS_PUBLISHED);
    Lazy::force(&PROCESS_FAILURES);

    let header = "Content-Type: text/plain; version=0.0.4; charset=utf-8"
        .parse::<tiny_http::Header>()
        .map_err(|_| anyhow::anyhow!("invalid metrics content type header"))?;
    let bind_addr = cfg.bind.clone();
    thread::spawn(move || {
        let server = match tiny_http::Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(bind = %bind_addr, error = %e, "🔥 could not start metrics server");
                return;
            }
        };
        tracing::info!(bind = %bind_addr, "📈 metrics endpoint listening");

        for request in server.incoming_requests() {
            let mut buffer = vec![];
            let encoder = TextEncoder::new();
            let metric_families = REGISTRY.gather();
            if encoder.encode(&metric_families, &mut buffer).is_err() {
                tracing::error!("🔥 could not encode metrics");
                continue;
            }
            let response = tiny_http::Response::from_data(buffer).with_header(header.clone());
            let _ = request.respond(response);
        }
    });

    Ok(())
}
