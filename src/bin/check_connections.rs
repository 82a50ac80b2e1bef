//! Connection smoke test: prints one line per check and always exits 0

use covid_ingest::config::{load_config, PipelineConfig};
use covid_ingest::diagnostics::run_diagnostics;
use covid_ingest::logger::init_logging;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            println!("[FAIL] configuration: {} (using defaults)", e);
            PipelineConfig::default()
        }
    };
    init_logging(&config.log_level);

    let results = run_diagnostics(&config).await;
    for result in &results {
        println!("{}", result);
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    println!("{} checks, {} failed", results.len(), failed);
}
