use std::sync::Arc;

use tickgate::kernel::config::KernelConfig;
use tickgate::kernel::event::{PacketType, Payload};
use tickgate::kernel::time::SystemClock;
use tickgate::services::llm::client::LlmProducer;
use tickgate::Reactor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("Tick kernel booting...");

    // 2. Config + Reactor
    let config = KernelConfig::from_env()?;
    let agent_id = std::env::var("TICKGATE_AGENT_ID").unwrap_or_else(|_| "agent-1".to_string());
    let llm_url = std::env::var("TICKGATE_LLM_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    let mut reactor = Reactor::new(config, Arc::new(SystemClock), LlmProducer::new(&llm_url));
    reactor.bind_agent(agent_id);

    // The single observable action of each tick
    let _speech = reactor.bus.subscribe(PacketType::SpeechEmitted, |packet| {
        if let Payload::SpeechEmitted { text, origin, .. } = &packet.payload {
            println!("[{:?}] {}", origin, text);
        }
    });
    let _thoughts = reactor.bus.subscribe(PacketType::InternalThought, |packet| {
        if let Payload::InternalThought { thought, .. } = &packet.payload {
            tracing::debug!(trace_id = ?packet.trace_id, "unspoken thought: {}", thought);
        }
    });

    // 3. Control tokens
    let autonomy_off = CancellationToken::new();
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    // 4. Spawn Input Reader (Stdin)
    let (tx_input, rx_input) = mpsc::channel(100);
    {
        let autonomy_off = autonomy_off.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            let mut lines = reader.lines();

            println!("Type to talk. '/quiet' disables autonomy, '/quit' exits.");

            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                match line.as_str() {
                    "" => continue,
                    "/quiet" => autonomy_off.cancel(),
                    "/quit" => {
                        shutdown.cancel();
                        break;
                    }
                    _ => {
                        if let Err(e) = tx_input.send(line).await {
                            tracing::error!("Failed to send input: {}", e);
                            break;
                        }
                    }
                }
            }
        });
    }

    // 5. Run Kernel
    tracing::info!("Kernel loop active.");
    reactor.run(rx_input, autonomy_off, shutdown).await;

    let snap = reactor.telemetry.snapshot();
    tracing::info!(
        ticks = snap.tick_stats.ended,
        spoke = snap.gate_stats.spoke,
        deduped = snap.commit_stats.deduped,
        "session finished"
    );
    Ok(())
}
