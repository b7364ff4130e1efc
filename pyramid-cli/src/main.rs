//! pyramid: replay extracted journal evidence through the pyramid engine
//!
//! Reads evidence records (one JSON object per line), optionally applies
//! answers, then prints collection stats and the next question to ask.
//! With `--snapshots` the collection is restored before and persisted after
//! the replay, so successive runs accumulate.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use pyramid_core::{AnswerToQuestion, ScheduledQuestion};
use pyramid_engine::{
    CollectionStats, EngineConfig, ExtractedEvidence, JsonFileSnapshotStore, PyramidEngine,
};

#[derive(Parser)]
#[command(name = "pyramid")]
#[command(about = "Accumulate knowledge pyramids from extracted journal evidence")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "PYRAMID_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest evidence (and answers) and report the next question
    Replay {
        /// Evidence records, one JSON object per line
        #[arg(short, long)]
        evidence: PathBuf,

        /// Answers to apply after the evidence, one JSON object per line
        #[arg(short, long)]
        answers: Option<PathBuf>,

        /// Snapshot directory to restore from and persist to
        #[arg(short, long, env = "PYRAMID_SNAPSHOT_DIR")]
        snapshots: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    Config,
}

/// Printed after a replay.
#[derive(Serialize)]
struct ReplaySummary {
    ingested: usize,
    rejected: usize,
    answered: usize,
    created: Vec<String>,
    stats: CollectionStats,
    next_question: Option<ScheduledQuestion>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("pyramid_engine={}", config.general.log_level).parse()?)
                .add_directive(format!("pyramid_core={}", config.general.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
        Command::Replay {
            evidence,
            answers,
            snapshots,
        } => {
            let summary = replay(config, &evidence, answers.as_deref(), snapshots.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(EngineConfig::from_yaml(&content)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn replay(
    config: EngineConfig,
    evidence_path: &Path,
    answers_path: Option<&Path>,
    snapshot_dir: Option<&Path>,
) -> anyhow::Result<ReplaySummary> {
    let engine = PyramidEngine::with_config(config)?;

    let store = match snapshot_dir {
        Some(dir) => {
            let store = JsonFileSnapshotStore::open(dir).await?;
            let restored = engine.restore(&store).await?;
            info!(restored, dir = %dir.display(), "Restored snapshots");
            Some(store)
        }
        None => None,
    };

    let mut ingested = 0;
    let mut rejected = 0;
    let mut created = Vec::new();
    for (line_no, value) in read_json_lines(evidence_path)? {
        let outcome = match value {
            Ok(value) => match ExtractedEvidence::from_json(&value) {
                Ok(evidence) => engine.ingest(evidence).await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };
        match outcome {
            Ok(report) => {
                ingested += 1;
                created.extend(report.created);
            }
            Err(e) => {
                rejected += 1;
                warn!(line = line_no, error = %e, "Evidence rejected");
            }
        }
    }

    let mut answered = 0;
    if let Some(path) = answers_path {
        for (line_no, value) in read_json_lines(path)? {
            let value = value.with_context(|| format!("parsing {}", path.display()))?;
            let answer: AnswerToQuestion = serde_json::from_value(value)
                .with_context(|| format!("{}:{}: malformed answer", path.display(), line_no))?;
            engine
                .answer(answer)
                .await
                .with_context(|| format!("{}:{}: answer rejected", path.display(), line_no))?;
            answered += 1;
        }
    }

    if let Some(store) = &store {
        engine.persist(store).await?;
    }

    Ok(ReplaySummary {
        ingested,
        rejected,
        answered,
        created,
        stats: engine.stats().await,
        next_question: engine.next_global_question().await,
    })
}

type JsonLine = (usize, anyhow::Result<serde_json::Value>);

/// Non-blank lines of a JSONL file with 1-based line numbers. Each line
/// parses on its own; only an unreadable file is an error here.
fn read_json_lines(path: &Path) -> anyhow::Result<Vec<JsonLine>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_json_lines(&content))
}

fn parse_json_lines(content: &str) -> Vec<JsonLine> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let value = serde_json::from_str(line)
                .with_context(|| format!("line {} is not valid JSON", index + 1));
            (index + 1, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_lines_skips_blanks() {
        let lines = parse_json_lines("{\"a\":1}\n\n  \n{\"b\":2}\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, 1);
        assert_eq!(lines[1].0, 4);
        assert!(lines.iter().all(|(_, value)| value.is_ok()));
    }

    #[test]
    fn test_parse_json_lines_reports_line() {
        let lines = parse_json_lines("{}\nnot json\n{}\n");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].1.is_ok());
        let err = lines[1].1.as_ref().unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(lines[2].1.is_ok());
    }

    #[tokio::test]
    async fn test_replay_counts_garbage_line_as_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = dir.path().join("evidence.jsonl");
        std::fs::write(
            &evidence,
            concat!(
                "{\"entry_id\":\"e1\",\"occurred_at\":\"2024-03-11T09:00:00Z\",\"subject_refs\":[\"[[Bob]]\"]}\n",
                "not json\n",
                "{\"entry_id\":\"e2\",\"occurred_at\":\"2024-03-12T09:00:00Z\",\"subject_refs\":[\"[[Bob]]\"]}\n",
            ),
        )
        .unwrap();

        let summary = replay(EngineConfig::default(), &evidence, None, None)
            .await
            .unwrap();
        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_replay_garbage_answer_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = dir.path().join("evidence.jsonl");
        std::fs::write(
            &evidence,
            "{\"entry_id\":\"e1\",\"occurred_at\":\"2024-03-11T09:00:00Z\"}\n",
        )
        .unwrap();
        let answers = dir.path().join("answers.jsonl");
        std::fs::write(&answers, "not json\n").unwrap();

        let result = replay(EngineConfig::default(), &evidence, Some(&answers), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_replay_accumulates_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = dir.path().join("evidence.jsonl");
        std::fs::write(
            &evidence,
            concat!(
                "{\"entry_id\":\"e1\",\"occurred_at\":\"2024-03-11T09:00:00Z\",\"subject_refs\":[\"[[Bob]]\"]}\n",
                "{\"entry_id\":\"e2\",\"occurred_at\":\"2024-03-12T09:00:00Z\",\"subject_refs\":[\"[[Bob]]\"]}\n",
                "{\"occurred_at\":\"2024-03-12T10:00:00Z\"}\n",
            ),
        )
        .unwrap();
        let snapshots = dir.path().join("snapshots");

        let first = replay(EngineConfig::default(), &evidence, None, Some(&snapshots))
            .await
            .unwrap();
        assert_eq!(first.ingested, 2);
        assert_eq!(first.rejected, 1);
        assert_eq!(first.stats.total, 0);

        let more = dir.path().join("more.jsonl");
        std::fs::write(
            &more,
            "{\"entry_id\":\"e3\",\"occurred_at\":\"2024-03-13T09:00:00Z\",\"subject_refs\":[\"[[Bob]]\"]}\n",
        )
        .unwrap();
        let second = replay(EngineConfig::default(), &more, None, Some(&snapshots))
            .await
            .unwrap();
        // Buffered mentions are not persisted; only pyramids are.
        assert_eq!(second.stats.total, 0);

        let config = EngineConfig::from_yaml("creation:\n  relationship_threshold: 2\n").unwrap();
        let third = replay(config, &evidence, None, Some(&snapshots)).await.unwrap();
        assert_eq!(third.created, vec!["relationship_bob"]);
        assert_eq!(third.stats.total, 1);
        assert!(snapshots.join("relationship_bob.json").exists());
    }
}
