mod cli;
mod config;
mod error;
mod events;
mod logging;
mod migration;
mod model;
mod remote;
mod util;

use anyhow::{bail, Result};
use clap::Parser;

use cli::Cli;
use events::{EventSink, FanoutSink, JsonlSink, TracingSink};
use migration::comments::ReplayLedger;
use migration::MigrationDriver;
use remote::bitrix::BitrixClient;
use remote::jira::JiraClient;
use remote::retry::RetryPolicy;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_file)?;

    let needs_source = cli.step != migration::Step::Groups;
    let config = config::load_config(cli.config.as_deref(), needs_source)?;
    let retry = RetryPolicy::from(&config.retry);
    let timeout = config.retry.timeout();
    let jira = JiraClient::new(&config.jira, retry.clone(), timeout)?;
    let bitrix = BitrixClient::new(&config.bitrix, retry, timeout)?;

    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingSink)];
    if let Some(path) = &cli.events {
        sinks.push(Box::new(JsonlSink::open(path)?));
    }
    let sink = FanoutSink::new(sinks);

    tracing::info!("Starting migration from Jira to Bitrix24");
    let mut driver = MigrationDriver::new(
        &jira,
        &bitrix,
        &sink,
        cli.run_options(config.bitrix.department_id),
    );
    if let Some(path) = &cli.comment_ledger {
        driver = driver.with_comment_ledger(ReplayLedger::open(path)?);
    }

    let summary = driver.run().await?;
    tracing::info!(
        users_created = summary.users_created,
        users_existing = summary.users_existing,
        tasks_created = summary.tasks_created,
        tasks_replaced = summary.tasks_replaced,
        tasks_kept = summary.tasks_kept,
        comments_posted = summary.comments_posted,
        comments_skipped = summary.comments_skipped,
        failures = summary.failures,
        "Migration finished"
    );

    if summary.has_failures() {
        bail!("{} item(s) failed to migrate", summary.failures);
    }
    Ok(())
}
