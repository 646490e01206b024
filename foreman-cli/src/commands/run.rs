//! Run command - Create a Jules session and follow it to completion

use std::sync::Arc;

use anyhow::anyhow;
use clap::Args;
use foreman_api::HttpTransport;
use foreman_core::{
    Activity, ActivityKind, CliOverrides, Config, HandlerError, Secrets, SessionState,
    WorkerManager, WorkerStatus,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// The task prompt describing what to accomplish
    #[arg(short, long)]
    pub prompt: String,

    /// Source repository, e.g. "sources/github/owner/repo"
    #[arg(short, long)]
    pub source: String,

    /// Session title (defaults to a prefix of the prompt)
    #[arg(short, long)]
    pub title: Option<String>,

    /// Starting branch (defaults to main)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Approve generated plans without asking
    #[arg(long)]
    pub auto_approve: bool,
}

/// Operator answer to a plan prompt
#[derive(Debug, PartialEq, Eq)]
enum PlanAnswer {
    Approve,
    Reject(String),
}

fn parse_answer(line: &str) -> PlanAnswer {
    match line.trim() {
        "y" | "Y" | "yes" | "approve" => PlanAnswer::Approve,
        "" | "n" | "N" | "no" => PlanAnswer::Reject("Rejected by operator".to_string()),
        feedback => PlanAnswer::Reject(feedback.to_string()),
    }
}

fn print_activity(session_id: &str, activity: &Activity) {
    let time = activity
        .create_time
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    println!("[{}] {} {}", time, session_id, activity.summary());
}

fn print_status(status: &WorkerStatus) {
    println!();
    println!("Session {}", status.session_id);
    println!("  Title: {}", status.title);
    println!("  Branch: {}", status.branch);
    println!("  State: {} ({})", status.state, status.state.description());
    println!("  Activities: {}", status.activity_count);
    if let Some(reason) = &status.blocker_reason {
        println!("  Blocked: {}", reason);
    }
    if let Some(error) = &status.error_message {
        println!("  Error: {}", error);
    }
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, verbose: bool, config: Config) -> anyhow::Result<()> {
        let config = config.with_cli_overrides(CliOverrides {
            auto_approve: self.auto_approve.then_some(true),
            ..CliOverrides::default()
        });

        let api_key = Secrets::load()?.api_key().ok_or_else(|| {
            anyhow!(
                "Jules API key not found. Set JULES_API_KEY environment variable \
                 or run `foreman secrets init` and add it to the secrets file"
            )
        })?;

        let transport = HttpTransport::new(&config.api, &api_key)?;
        let manager = WorkerManager::new(&config, Arc::new(transport));

        let (plan_tx, mut plan_rx) = mpsc::unbounded_channel();
        manager.dispatcher().add_handler(
            move |session_id: &str, activity: &Activity| -> Result<(), HandlerError> {
                print_activity(session_id, activity);
                if let ActivityKind::PlanGenerated { steps, .. } = &activity.kind {
                    plan_tx.send(*steps)?;
                }
                Ok(())
            },
        );

        if verbose {
            tracing::info!(
                source = %self.source,
                auto_approve = config.polling.auto_approve,
                "Starting foreman run"
            );
        }

        println!("Foreman Run");
        println!("===========");
        println!();
        println!("Prompt: {}", self.prompt);
        println!("Source: {}", self.source);
        println!();

        let session_id = manager
            .create_worker(
                self.prompt.clone(),
                self.source.clone(),
                self.title.clone(),
                self.branch.clone(),
            )
            .await?;
        println!("Session {} created, polling every {:?}", session_id, config.polling.interval);
        println!("(Ctrl-C cancels the session)");
        println!();

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let auto_approve = config.polling.auto_approve;

        let status = loop {
            tokio::select! {
                status = manager.wait_for_completion(&session_id) => break status?,
                Some(steps) = plan_rx.recv(), if !auto_approve => {
                    println!();
                    println!("Plan with {} step(s) is waiting for approval.", steps);
                    println!("Approve? [y/N, or type feedback to reject]");
                    let line = stdin.next_line().await?.unwrap_or_default();
                    let result = match parse_answer(&line) {
                        PlanAnswer::Approve => manager.approve_plan(&session_id).await,
                        PlanAnswer::Reject(feedback) => {
                            manager.reject_plan(&session_id, &feedback).await
                        }
                    };
                    match result {
                        Ok(status) => println!("Session is now {}", status.state),
                        Err(e) => println!("Could not answer plan: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("Cancelling session {}...", session_id);
                    break manager.cancel_session(&session_id).await?;
                }
            }
        };

        print_status(&status);
        println!();
        println!("{}", manager.metrics());
        manager.shutdown().await;

        if status.state == SessionState::Completed {
            Ok(())
        } else {
            Err(anyhow!("Session {} ended in state {}", session_id, status.state))
        }
    }
}
