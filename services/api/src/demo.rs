use crate::infra::StaticDirectory;
use chrono::Utc;
use clap::Args;
use dataspace_registry::config::RegistrationConfig;
use dataspace_registry::error::AppError;
use dataspace_registry::registration::{
    ClaimPolicy, InMemoryParticipantStore, ParticipantStatusView, RegistrationService,
    RegistrationStateMachine,
};
use std::sync::Arc;

const SAMPLE_DIDS: [&str; 3] = ["did:example:alice", "did:example:bob", "did:example:carol"];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// DIDs to register (repeatable). Defaults to alice, bob and carol.
    #[arg(long = "did")]
    pub(crate) dids: Vec<String>,
    /// Additional DIDs the stand-in directory should treat as dataspace members.
    #[arg(long = "member")]
    pub(crate) members: Vec<String>,
    /// Upper bound on poll cycles before the demo gives up.
    #[arg(long, default_value_t = 50)]
    pub(crate) max_cycles: usize,
    /// Print final statuses as JSON instead of a table.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        dids,
        members,
        max_cycles,
        json,
    } = args;

    let dids = if dids.is_empty() {
        SAMPLE_DIDS.iter().map(|did| did.to_string()).collect()
    } else {
        dids
    };

    let directory = members.iter().fold(
        StaticDirectory::closed()
            .with_entry("did:example:alice", true)
            .with_entry("did:example:carol", false),
        |directory, did| directory.with_entry(did, true),
    );

    let config = RegistrationConfig::default();
    let store = Arc::new(InMemoryParticipantStore::new());
    let service = RegistrationService::new(store.clone(), config.stall_threshold);
    let step = chrono::Duration::milliseconds(config.backoff.cap.as_millis() as i64);
    let machine = RegistrationStateMachine::new(
        store,
        Arc::new(directory),
        Arc::new(ClaimPolicy::default()),
        config,
    );

    if !json {
        println!("Dataspace registration demo");
    }

    let mut submitted = Vec::new();
    for did in &dids {
        match service.submit_registration(did).await {
            Ok(record) => {
                if !json {
                    println!("  Submitted {did} as {}", record.participant_id);
                }
                submitted.push(record.participant_id);
            }
            Err(err) => {
                if !json {
                    println!("  Submission rejected: {err}");
                }
            }
        }
    }

    let mut now = Utc::now();
    let mut cycles = 0;
    while cycles < max_cycles {
        let report = machine.run_cycle(now).await?;
        if report.leased == 0 {
            break;
        }
        cycles += 1;
        now += step;
    }

    let mut views: Vec<ParticipantStatusView> = Vec::with_capacity(submitted.len());
    for participant_id in &submitted {
        views.push(service.get_status(participant_id).await?);
    }

    if json {
        let rendered = serde_json::to_string_pretty(&views)
            .map_err(|err| AppError::Io(std::io::Error::from(err)))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("\nSettled after {cycles} poll cycles:");
    for view in &views {
        println!(
            "  {:<24} {:<22} {:<24} retries={}",
            view.did.as_str(),
            view.state.label(),
            format!("{:?}", view.status),
            view.retry_count
        );
        if let Some(detail) = &view.error_detail {
            println!("      {detail}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_runs_with_sample_participants() {
        let args = DemoArgs {
            json: true,
            max_cycles: 20,
            ..DemoArgs::default()
        };
        run_demo(args).await.expect("demo completes");
    }

    #[tokio::test]
    async fn demo_reports_rejected_submissions_without_failing() {
        let args = DemoArgs {
            dids: vec!["not-a-did".to_string(), "did:example:dave".to_string()],
            members: vec!["did:example:dave".to_string()],
            max_cycles: 20,
            json: false,
        };
        run_demo(args).await.expect("demo completes");
    }
}
