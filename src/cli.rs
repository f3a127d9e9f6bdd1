use clap::Parser;
use std::path::PathBuf;

use crate::migration::{FailurePolicy, RunOptions, Step};

#[derive(Debug, Parser)]
#[command(
    name = "jira2bitrix",
    version,
    about = "Migrate Jira users, issues and comments into a Bitrix24 portal"
)]
pub struct Cli {
    /// Which stage to run
    #[arg(long, value_enum, default_value = "all")]
    pub step: Step,
    /// Jira project key to migrate (default: every project)
    #[arg(long)]
    pub project: Option<String>,
    /// Bitrix24 workgroup id attached to created tasks
    #[arg(long)]
    pub group: Option<u64>,
    /// Config file (default: ~/.jira2bitrix/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Run log, appended to
    #[arg(long, default_value = "migration.log")]
    pub log_file: PathBuf,
    /// Also write structured events as JSON lines
    #[arg(long)]
    pub events: Option<PathBuf>,
    /// Keep tasks that already exist instead of replacing them
    #[arg(long)]
    pub keep_existing: bool,
    /// Skip failed users and issues instead of aborting
    #[arg(long)]
    pub keep_going: bool,
    /// Record replayed comments here and skip them on later runs
    #[arg(long)]
    pub comment_ledger: Option<PathBuf>,
}

impl Cli {
    pub fn run_options(&self, department_id: u64) -> RunOptions {
        RunOptions {
            step: self.step,
            project: self.project.clone(),
            group: self.group,
            delete_if_exists: !self.keep_existing,
            failure_policy: if self.keep_going {
                FailurePolicy::SkipItem
            } else {
                FailurePolicy::Abort
            },
            department_id,
        }
    }
}
