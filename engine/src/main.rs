mod cli;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{Instrument, info, warn};

use cli::{Cli, Command, parse_tick_line};
use common::logger::{TraceId, init_logger, root_span};
use engine::{EngineConfig, VolatilityEngine};

async fn print_json<T: Serialize>(out: &mut tokio::io::Stdout, value: &T) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Stream ticks from stdin until EOF or Ctrl-C.
async fn ingest_stdin(engine: &VolatilityEngine) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        };
        let Some(line) = line else { break };

        let tick = match parse_tick_line(&line) {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(reason) => {
                warn!(%reason, "skipping unparsable input line");
                continue;
            }
        };

        match engine.ingest(&tick.pair, tick.price, tick.ts_ms).await {
            Ok(Some(record)) => print_json(&mut out, &record).await?,
            Ok(None) => {}
            Err(e) => warn!(pair = %tick.pair, error = %e, "tick not processed"),
        }
    }

    for pair in engine.active_pairs() {
        if let Err(e) = engine.retry_pending(&pair).await {
            warn!(%pair, error = %e, "records left unpersisted at shutdown");
        }
    }

    info!(counters = ?engine.counters().snapshot(), "ingestion finished");
    Ok(())
}

async fn run(cli: Cli, cfg: EngineConfig) -> anyhow::Result<()> {
    let engine = VolatilityEngine::from_config(&cfg).await?;
    let query = engine.query();
    let mut out = tokio::io::stdout();

    match cli.command.unwrap_or(Command::Ingest) {
        Command::Ingest => ingest_stdin(&engine).await?,
        Command::Latest { pair } => print_json(&mut out, &query.get_latest(&pair).await?).await?,
        Command::History { pair, limit } => {
            for record in query.get_history(&pair, limit).await? {
                print_json(&mut out, &record).await?;
            }
        }
        Command::Term { pair, horizons } => {
            for point in query.get_term_structure(&pair, &horizons).await? {
                print_json(&mut out, &point).await?;
            }
        }
        Command::Regime { pair } => {
            let regime = query.get_regime(&pair).await?;
            out.write_all(format!("{pair} {regime}\n").as_bytes()).await?;
        }
        Command::Pairs => {
            for pair in query.list_pairs().await? {
                out.write_all(format!("{pair}\n").as_bytes()).await?;
            }
        }
    }

    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = EngineConfig::from_env()?;
    cli.apply(&mut cfg);

    init_logger("volatility-engine", cfg.json_logs);

    let trace_id = TraceId::new();
    info!(%trace_id, store = ?cfg.store, "Starting volatility engine...");

    run(cli, cfg)
        .instrument(root_span("volatility-engine", &trace_id))
        .await
}
