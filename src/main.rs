use std::process::ExitCode;

use covid_ingest::config::load_config;
use covid_ingest::logger::init_logging;
use covid_ingest::IngestRun;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level);

    let run = match covid_ingest::run(&config).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!("Could not start pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&run);
    if run.result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_summary(run: &IngestRun) {
    let IngestRun { result, context } = run;

    println!();
    println!("Run {} ({:.2}s)", context.run_id(), result.total_duration.as_secs_f64());
    for stage in &result.stage_results {
        let status = match (stage.success, stage.gating) {
            (true, _) => "ok",
            (false, true) => "FAILED",
            (false, false) => "warning",
        };
        match &stage.error {
            Some(error) => println!("  {:<24} {:<8} {}", stage.stage_name, status, error),
            None => println!("  {:<24} {}", stage.stage_name, status),
        }
    }

    if let Some(failed) = result.failed_stage() {
        println!("Pipeline FAILED at '{}'", failed.stage_name);
        return;
    }

    println!("Pipeline completed successfully");
    if let Ok(table) = context.table() {
        println!("  Table:   {}", table);
    }
    if let Ok(staged) = context.staged() {
        println!("  Staged:  {}", staged.uri());
    }
    if let Some(rows) = context.loaded_rows() {
        println!("  Rows:    {}", rows);
    }
    if let Some(report) = context.quality() {
        for check in &report.checks {
            match (&check.outcome, &check.error) {
                (Some(outcome), _) => println!("  {}", outcome),
                (None, Some(error)) => println!("  {} failed: {}", check.name, error),
                (None, None) => {}
            }
        }
    }
}
