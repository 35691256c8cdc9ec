use loan_conversation_engine::{
    conversation::ConversationMachine,
    persistence::{ContextPersistenceService, FileKeyValueStore, HttpRunIdSource, StorageKeys},
    verification::VerificationEvent,
    ConversationEvent, ConversationSession, EngineConfig, EntityExtractor, VerificationPhase,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
Type what the customer says. Commands:
  /verify        run the camera verification to completion
  /event NAME    send a conversation event (e.g. SIMULATION_PRESENTED)
  /stages        list the dialogue stages
  /context       show the collected fields
  /reset         forget this conversation
  /quit          save and exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env()?;

    info!("Loan Conversation Engine console starting");

    // Create components
    let store = Arc::new(FileKeyValueStore::open(&config.store_dir).await?);
    let run_ids = Arc::new(HttpRunIdSource::new(config.run_id_url.clone(), config.run_id_timeout)?);
    info!(store = %store.root().display(), run_id_url = %run_ids.url(), "Using local storage");
    let persistence = ContextPersistenceService::with_keys(
        store,
        run_ids,
        StorageKeys::with_prefix(&config.storage_prefix),
    );

    let mut session = ConversationSession::new(Arc::new(EntityExtractor::new()));

    // Without a run id we cannot tell whether storage is stale, so leave it alone.
    let online = match session.rehydrate(&persistence).await {
        Ok(restored) => {
            if restored {
                println!("Resumed previous conversation at {}", session.stage());
            } else {
                println!("Starting a new conversation");
            }
            true
        }
        Err(e) => {
            warn!("Run-id server unavailable, stored conversation left untouched: {}", e);
            println!("Starting a new conversation (offline, nothing will be saved)");
            false
        }
    };
    println!("{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) => break,
            ("/help", _) => println!("{}", HELP),
            ("/stages", _) => println!("{}", ConversationMachine::stage_catalog_markdown()),
            ("/context", _) => println!("{}", serde_json::to_string_pretty(session.context())?),
            ("/reset", _) => {
                session.reset();
                println!("Conversation cleared");
            }
            ("/verify", _) => {
                let phase = session.verification_state().value;
                if phase == VerificationPhase::Idle || phase.is_terminal() {
                    session.apply_verification(VerificationEvent::Start);
                }
                session.apply_verification(VerificationEvent::Progress { step: 2 });
                session.apply_verification(VerificationEvent::Progress { step: 3 });
                let phase = session.apply_verification(VerificationEvent::Complete);
                println!("verification: {:?} | stage: {}", phase, session.stage());
            }
            ("/event", name) => match name.parse::<ConversationEvent>() {
                Ok(event) => println!("stage: {}", session.dispatch(event)),
                Err(e) => println!("{}", e),
            },
            _ => {
                let outcome = session.handle_utterance(line);
                println!(
                    "extracted: {}",
                    serde_json::to_string(&outcome.processing.entities)?
                );
                println!(
                    "recommended: {} (confidence {:.2}, skip ahead: {}) | stage: {}",
                    outcome.processing.recommended_state,
                    outcome.processing.confidence,
                    outcome.processing.should_advance_state,
                    outcome.stage
                );
                println!("  {}", ConversationMachine::description(outcome.stage));
                if !outcome.processing.conflicting_entities.is_empty() {
                    println!("changed confirmed fields: {:?}", outcome.processing.conflicting_entities);
                }
            }
        }

        if session.stage().is_terminal() {
            println!("Conversation ended at {}; /reset to start over", session.stage());
        }

        if online {
            session.save(&persistence, None).await?;
        }
    }

    if online {
        session.save(&persistence, None).await?;
    }
    info!(session_id = %session.session_id(), stage = %session.stage(), "Console closed");

    Ok(())
}
