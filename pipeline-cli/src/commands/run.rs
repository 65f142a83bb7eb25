// Run command
// Executes a definition, streams progress and prints the final report

use crate::cli::RunArgs;
use crate::commands::{report_error, request};
use crate::output;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use pipeline_engine::{
    progress_channel, Engine, EngineConfig, ProgressReceiver, RunReport, RunStatus,
    TriggerContext,
};
use tokio_util::sync::CancellationToken;

pub async fn execute(args: &RunArgs, mut config: EngineConfig) -> Result<i32> {
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max.max(1);
    }
    if args.strict {
        config.strict_conditions = true;
    }

    let request = request(&args.definition).with_trigger(TriggerContext::new(
        args.branch.clone(),
        args.reason.clone(),
        args.repository.clone(),
    ));

    let (tx, rx) = progress_channel();
    let engine = Engine::new(config).with_progress(tx);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("interrupt received, canceling run");
            on_interrupt.cancel();
        }
    });

    let renderer = tokio::spawn(render(rx, args.quiet));
    let result = engine.run(&request, cancel).await;
    drop(engine);
    // The channel closes once the engine and its units are gone
    let _ = renderer.await;

    let report = match result {
        Ok(report) => report,
        Err(err) => return Ok(report_error(&err)),
    };

    summarize(&report);

    if let Some(path) = &args.report {
        let json = report.to_json().wrap_err("failed to serialize run report")?;
        std::fs::write(path, json)
            .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
        output::info(&format!("report written to {}", path.display()));
    }

    Ok(report.exit_code())
}

async fn render(mut rx: ProgressReceiver, quiet: bool) {
    while let Some(event) = rx.recv().await {
        output::event(&event, quiet);
    }
}

fn summarize(report: &RunReport) {
    eprintln!();
    output::header(&format!("Summary for '{}'", report.pipeline));
    for unit in &report.units {
        let reason = match (&unit.reason, unit.status) {
            (Some(reason), RunStatus::Skipped | RunStatus::Failed | RunStatus::Canceled) => {
                format!("  \x1b[2m{}\x1b[0m", reason)
            }
            _ => String::new(),
        };
        eprintln!("  {} {}{}", output::status_label(unit.status), unit.name, reason);
    }

    let counts: Vec<String> = report
        .counts()
        .iter()
        .map(|(status, count)| format!("{} {}", count, status.to_lowercase()))
        .collect();
    eprintln!();
    let line = format!(
        "{} in {:.1}s ({})",
        report.outcome,
        report.duration.as_secs_f64(),
        counts.join(", ")
    );
    if report.outcome.is_success() {
        output::success(&line);
    } else {
        output::failure(&line);
    }
}
