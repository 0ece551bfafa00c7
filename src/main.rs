use std::env;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use resv_eng::Engine;
use resv_eng::csv::{read_commands, write_balances};
use resv_eng::jobs::{self, JobFailure, JobHandler, JobQueue, Notification};
use resv_eng::VenueId;

/// Stand-in collaborators for the replay binary: notifications are logged,
/// geocoding is not configured.
struct LogHandler;

impl JobHandler for LogHandler {
    async fn notify(&mut self, notification: &Notification) -> Result<(), JobFailure> {
        info!(?notification, "notification delivered");
        Ok(())
    }

    async fn geocode(&mut self, _venue: VenueId, _address: &str) -> Result<(f64, f64), JobFailure> {
        Err(JobFailure("no geocoder configured".to_string()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let path = env::args().nth(1).expect("usage: resv-eng <journal.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let (job_queue, job_receiver) = JobQueue::unbounded();
    tokio::spawn(jobs::run_worker(job_receiver, LogHandler));

    let mut engine = Engine::new().with_jobs(job_queue);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in read_commands(&path) {
            match result {
                Ok(cmd) => {
                    cmd_sender.send(cmd).await.unwrap();
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;

    let mut balances: Vec<_> = engine.ledger().balances().collect();
    balances.sort_by_key(|(user, _)| *user);
    write_balances(balances);
}
