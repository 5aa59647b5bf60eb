mod logging;

use anyhow::Result;
use logging::LogFormat;
use ranging::{
    BtleRadio, DisplayState, Orchestrator, PermissionManager, Platform, RangingRateTier,
    UnavailableRanging, WorkflowConfig, WorkflowUpdate,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};

const HELP: &str = "Commands: start | rate <normal|frequent|infrequent> | status | quit";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let format = LogFormat::from_env();
    logging::init_logging(format);
    let json = format == LogFormat::Json;

    tracing::info!("Starting ranging console");

    let config = WorkflowConfig::from_env()?;
    tracing::info!(
        service = %config.scan.filter.service_uuid,
        timeout_secs = config.scan.timeout.as_secs(),
        rate = %config.initial_rate,
        "Configuration loaded successfully"
    );

    let permissions = Arc::new(PermissionManager::new());
    permissions.request_all().await?;

    let (bonds, _) = broadcast::channel(16);
    let radio = Arc::new(BtleRadio::new().with_bond_notifications(bonds.clone()));
    let platform = Platform {
        scanner: radio.clone(),
        links: radio,
        ranging: Arc::new(UnavailableRanging::new()),
        bonds,
        permissions,
    };

    let (mut orchestrator, handle) = Orchestrator::new(platform, config);
    let updates = orchestrator
        .take_updates()
        .ok_or_else(|| anyhow::anyhow!("update stream already taken"))?;

    let workflow = tokio::spawn(orchestrator.run());
    let printer = tokio::spawn(print_updates(updates, handle.display(), json));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (None, _) => {}
            (Some("start"), _) => handle.start_workflow()?,
            (Some("rate"), Some(tier)) => match tier.parse::<RangingRateTier>() {
                Ok(tier) => handle.set_rate_tier(tier)?,
                Err(e) => eprintln!("{}", e),
            },
            (Some("status"), _) => print_display(&handle.display().borrow(), json),
            (Some("quit") | Some("exit"), _) => break,
            (Some(_), _) => eprintln!("{}", HELP),
        }
    }

    handle.shutdown()?;
    workflow.await?;
    printer.await?;

    tracing::info!("Ranging console stopped");
    Ok(())
}

async fn print_updates(
    mut updates: mpsc::UnboundedReceiver<WorkflowUpdate>,
    display: watch::Receiver<DisplayState>,
    json: bool,
) {
    while let Some(update) = updates.recv().await {
        if json {
            print_display(&display.borrow(), true);
            continue;
        }
        match update {
            WorkflowUpdate::State(state) => println!("[{}]", state),
            WorkflowUpdate::Status(status) => println!("{}", status),
            WorkflowUpdate::Distance(sample) => println!("Distance: {}", sample.display()),
            WorkflowUpdate::Rejected(e) => println!("{}", e.user_message()),
        }
    }
}

fn print_display(display: &DisplayState, json: bool) {
    if json {
        match serde_json::to_string(display) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize display state: {}", e),
        }
    } else {
        println!(
            "{} | {} | {}",
            display.connection, display.status, display.distance
        );
    }
}
