use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docqa_cli::console::{answer_json, render_answer};
use docqa_cli::{Cli, Session, run_console};
use docqa_rag::{OpenAiBackend, QaPipeline, ServiceConfig, UploadedDocument};
use docqa_telemetry::{TelemetryConfig, init_telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(
        TelemetryConfig::default().default_directive(cli.log_level.as_str()).json(cli.json_logs),
    )?;

    let config = cli.rag_config()?;
    let backend = OpenAiBackend::new(config.request_timeout())?;
    let pipeline = QaPipeline::builder()
        .config(config)
        .service_config(ServiceConfig::from_env())
        .backend(Arc::new(backend))
        .build()?;

    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;
    let filename = cli
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .context("document path has no usable file name")?;
    let document = UploadedDocument::new(bytes, filename);
    info!(filename, bytes = document.bytes.len(), "document read");

    let mut session = Session::new(pipeline, document, cli.model.clone())
        .with_credentials(cli.api_key.clone(), cli.endpoint.clone())
        .with_retry(cli.retry_policy());
    if let Some(path) = &cli.history {
        session = session.with_history(path.clone())?;
    }

    match cli.question.as_deref() {
        Some(question) => {
            let result = session.ask(question).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&answer_json(&result))?);
            } else {
                println!("{}", render_answer(&result));
            }
        }
        None => run_console(&mut session, cli.json).await?,
    }

    Ok(())
}
