//! CLI command implementations.
//!
//! Each `run_*` function backs one `bugseek` subcommand and prints to stdout.
//! `--json` variants print one JSON document so output can be piped.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use bugseek_core::models::{AnalysisResult, AnalysisType, ServiceStatus};
use bugseek_core::store::AnalysisSink;

use crate::app::App;
use crate::config::Config;

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

pub async fn run_analyze(config: &Config, incident_id: &str, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let cancel = interrupt_token();
    let report = app
        .analyzer
        .analyze(incident_id, &cancel)
        .await
        .with_context(|| format!("Cannot analyze incident {}", incident_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.view())?);
        return Ok(());
    }

    print_result(&report.result);
    for issue in &report.ai_issues {
        println!("ai fallback ({}): {}", issue.step.as_str(), issue.error);
    }
    for (step, err) in report.persist_failures() {
        println!("not stored ({}): {}", step.as_str(), err);
    }
    Ok(())
}

pub async fn run_similar(
    config: &Config,
    incident_id: &str,
    threshold: Option<f64>,
    json: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let report = app
        .similarity
        .find_similar(incident_id, threshold)
        .await
        .with_context(|| format!("Cannot search incidents similar to {}", incident_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.matches.is_empty() {
        println!("No similar incidents (threshold {}).", report.threshold);
        return Ok(());
    }
    println!(
        "{} similar incident(s) for {} (threshold {}, showing {}):",
        report.total_found,
        incident_id,
        report.threshold,
        report.matches.len()
    );
    for (i, m) in report.matches.iter().enumerate() {
        println!(
            "{}. {:.4}  {}  [{}]",
            i + 1,
            m.score,
            m.target_incident_id,
            m.confidence.as_str()
        );
    }
    if report.persist_failures > 0 {
        println!("warning: {} match(es) not stored", report.persist_failures);
    }
    Ok(())
}

pub async fn run_show_analysis(config: &Config, incident_id: &str, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let Some(result) = app
        .store
        .get_analysis_result(incident_id, AnalysisType::Complete)
        .await?
    else {
        println!("No analysis for incident {}.", incident_id);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

pub async fn run_health(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let check = app.check_ai(config).await;
    println!("{}", serde_json::to_string_pretty(&check)?);
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    match app.service_status().await? {
        Some(status) => print_status(&status),
        None => println!("No AI calls recorded yet."),
    }
    Ok(())
}

fn print_result(r: &AnalysisResult) {
    println!("--- Analysis ---");
    println!("incident:     {}", r.incident_id);
    println!("status:       {}", r.status);
    println!("attempt:      {}", r.attempt);
    println!(
        "pattern:      {}",
        r.error_pattern.as_deref().unwrap_or("none")
    );
    println!(
        "category:     {}",
        r.error_category.as_deref().unwrap_or("general")
    );
    if let Some(sev) = r.estimated_severity {
        println!("severity:     {}", sev);
    }
    if let Some(sev) = r.ai_severity {
        println!("ai severity:  {}", sev);
    }
    println!("confidence:   {:.2}", r.confidence);
    if let Some(model) = &r.model_used {
        println!("model:        {}", model);
    }
    println!("tokens:       {}", r.tokens_used);
    println!("cost:         {:.6}", r.estimated_cost);
    if let Some(err) = &r.error_message {
        println!("error:        {}", err);
    }
    println!();

    if let Some(summary) = &r.summary {
        println!("--- Summary ---");
        println!("{}", summary);
        if let Some(root) = &r.root_cause {
            println!("root cause: {}", root);
        }
        if !r.keywords.is_empty() {
            println!("keywords: {}", r.keywords.join(", "));
        }
        println!();
    }

    if !r.solutions.is_empty() {
        println!("--- Solutions ({}) ---", r.solutions.len());
        for (i, s) in r.solutions.iter().enumerate() {
            println!(
                "{}. {} [{} / priority {} / difficulty {} / risk {}]",
                i + 1,
                s.description,
                s.category,
                s.priority,
                s.difficulty,
                s.risk
            );
            for step in &s.steps {
                println!("    - {}", step);
            }
        }
    }
}

fn print_status(s: &ServiceStatus) {
    println!("endpoint:     {}", s.identity.endpoint);
    println!("model:        {}", s.identity.model);
    println!("connected:    {}", s.is_connected);
    if let Some(at) = s.last_check_at {
        println!("last check:   {}", at.to_rfc3339());
    }
    if let Some(at) = s.last_success_at {
        println!("last success: {}", at.to_rfc3339());
    }
    if let Some(err) = &s.last_error {
        println!("last error:   {}", err);
    }
    println!("calls:        {}", s.total_calls);
    println!("tokens:       {}", s.total_tokens);
    println!("cost:         {:.6}", s.estimated_cost);
}
