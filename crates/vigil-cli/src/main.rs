mod cli;
mod dispatch;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use serde_json::json;
use vigil_core::{
    now_us, validate_sample, Collaborators, DetectorConfig, Engine, Feedback, Outcome, Sample, SessionId,
    SubjectId, VigilConfig, US_PER_SEC,
};
use vigil_store::SqliteStore;

use crate::cli::{BaselineCommand, Cli, Commands};
use crate::dispatch::StdoutDispatcher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .format_target(false)
        .init();

    let config = VigilConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let detector = config.detector.clone();
    let store = Arc::new(
        SqliteStore::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?,
    );
    let engine = Engine::new(
        config,
        Collaborators {
            baselines: store.clone(),
            history: store.clone(),
            rate_limits: store.clone(),
            dispatcher: Arc::new(StdoutDispatcher),
            alerts: store.clone(),
        },
    );

    match cli.command {
        Commands::Baseline(BaselineCommand::Set { subject, bpm }) => {
            anyhow::ensure!(bpm.is_finite() && bpm > 0.0, "baseline must be a positive BPM value");
            store.set_baseline(&SubjectId::new(subject), bpm, now_us())?;
        }
        Commands::Baseline(BaselineCommand::Show { subject }) => {
            match store.get_baseline(&SubjectId::new(subject.clone()))? {
                Some(b) => println!("{}", serde_json::to_string(&b)?),
                None => println!("no baseline for {subject}"),
            }
        }
        Commands::Ingest { file, subject, session, replay } => {
            let subject = SubjectId::new(subject);
            let session = session.map(SessionId::from_string).unwrap_or_default();
            ingest(&engine, &store, &detector, &file, &subject, &session, replay)?;
        }
        Commands::Feedback { subject, severity, response } => {
            let feedback = Feedback { subject: SubjectId::new(subject), severity, response };
            engine.record_feedback(&feedback, now_us())?;
        }
        Commands::Status { subject } => {
            for st in engine.cooldowns(&SubjectId::new(subject), now_us())? {
                println!(
                    "{}",
                    json!({
                        "severity": st.severity,
                        "basis": st.basis,
                        "cooldown_secs": st.cooldown_us / US_PER_SEC,
                        "remaining_secs": st.remaining_us / US_PER_SEC,
                        "last_notification": st.last_notification_us.map(format_ts),
                        "last_response": st.last_response.map(|r| json!({
                            "response": r.response,
                            "at": format_ts(r.ts_us),
                        })),
                    })
                );
            }
        }
        Commands::Alerts { subject, limit } => {
            for alert in store.alerts_for(&SubjectId::new(subject), limit)? {
                println!(
                    "{}  {:<15} {:<9} {}",
                    format_ts(alert.evaluated_at_us),
                    alert.decision.label(),
                    alert.result.severity.map(|s| s.as_str()).unwrap_or("-"),
                    alert.result.reason
                );
            }
        }
    }
    Ok(())
}

fn ingest(
    engine: &Engine,
    store: &SqliteStore,
    detector: &DetectorConfig,
    file: &std::path::Path,
    subject: &SubjectId,
    session: &SessionId,
    replay: bool,
) -> Result<()> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let mut counts = std::collections::BTreeMap::<&'static str, usize>::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed sample", file.display(), lineno + 1))?;
        // rejected samples never reach the history window
        if let Err(e) = validate_sample(&sample, detector) {
            log::debug!("{}:{}: rejected: {e}", file.display(), lineno + 1);
            *counts.entry("rejected").or_default() += 1;
            continue;
        }
        store.insert_sample(subject, session, &sample)?;
        let now = if replay { sample.ts_us } else { now_us() };
        let label = match engine.process(subject, session, &sample, now) {
            Ok(Outcome::Skipped { reason }) => {
                log::debug!("{}:{}: skipped: {reason}", file.display(), lineno + 1);
                "skipped"
            }
            Ok(outcome) => outcome.label(),
            Err(e) => {
                log::warn!("{}:{}: {e}", file.display(), lineno + 1);
                "error"
            }
        };
        *counts.entry(label).or_default() += 1;
    }
    log::info!("ingest finished for {subject}/{session}: {counts:?}");
    Ok(())
}

fn format_ts(ts_us: i64) -> String {
    Utc.timestamp_micros(ts_us)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts_us.to_string())
}
