use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;

mod cli;
mod config;
mod embed;
mod fragment;
mod generate;
mod index;
mod index_storage;
mod ingest;
mod llm;
mod parser;
mod retrieve;
mod session;
#[cfg(test)]
mod testutil;

use config::Config;
use embed::clip::ClipEmbedder;
use fragment::FragmentPayload;
use generate::ResponseAssembler;
use index_storage::SessionStorage;
use llm::OpenAiGenerator;
use parser::PdfParser;
use retrieve::QueryInput;
use session::DocumentSession;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load_with(&args.data_dir)?;

    let embedder = Arc::new(ClipEmbedder::new(
        &config.embedding_model,
        args.data_dir.clone(),
        Some(Duration::from_secs(config.model_download_timeout_secs)),
    )?);

    let storage = SessionStorage::new(args.data_dir.join("session"));
    let session = DocumentSession::new(config.clone(), embedder);

    match args.command {
        cli::Command::Ingest { path } => {
            let report = session.load_document(&PdfParser, &path, true)?;
            session.persist(&storage)?;

            println!(
                "indexed {} fragments from {} pages ({} skipped, {} warnings)",
                session.fragment_count(),
                report.pages_total,
                report.pages_failed,
                report.warnings.len()
            );
            Ok(())
        }

        cli::Command::Ask { question, image, k } => {
            session.restore(&storage).context(
                "no usable session found, run `docq ingest <document>` first",
            )?;
            let input = query_input(&session, question, image)?;

            let generator = Arc::new(OpenAiGenerator::from_env(&config.llm_model)?);
            let assembler = ResponseAssembler::new(generator, session.generation_timeout());

            let answer = session.ask(&assembler, &input, k)?;

            // the retrieval context is worth showing even when generation
            // failed
            print!("{}", render_answer(&answer));

            if !answer.success {
                bail!(
                    "generation failed: {}",
                    answer.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            Ok(())
        }

        cli::Command::Search { query, image, k } => {
            session.restore(&storage).context(
                "no usable session found, run `docq ingest <document>` first",
            )?;
            let input = query_input(&session, query, image)?;

            let result = session.retrieve(&input, k)?;

            let hits: Vec<serde_json::Value> = result
                .hits
                .iter()
                .map(|hit| {
                    let mut value = json!({
                        "id": hit.fragment.id,
                        "score": hit.score,
                        "modality": hit.fragment.modality().to_string(),
                        "page": hit.fragment.locator.page + 1,
                    });
                    match &hit.fragment.payload {
                        FragmentPayload::Text { content } => {
                            value["content"] = json!(content);
                        }
                        FragmentPayload::Image { width, height, .. } => {
                            value["dimensions"] = json!(format!("{width}x{height}"));
                        }
                    }
                    value
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
    }
}

/// Format an answer for the terminal: the generated text (when there is
/// one), then the sources it was grounded on.
fn render_answer(answer: &generate::Answer) -> String {
    let mut out = String::new();

    if let Some(text) = &answer.text {
        out.push_str(text);
        out.push('\n');
    }

    if !answer.provenance.is_empty() {
        let pages: Vec<String> = answer
            .provenance
            .iter()
            .map(|f| format!("{} (page {})", f.modality(), f.locator.page + 1))
            .collect();
        out.push_str(&format!("\nsources: {}\n", pages.join(", ")));
    }

    out
}

/// Resolve the text/image flags into a single-modality query probe.
fn query_input(
    session: &DocumentSession,
    text: Option<String>,
    image: Option<PathBuf>,
) -> anyhow::Result<QueryInput> {
    match (text, image) {
        (_, Some(path)) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read query image {}", path.display()))?;
            Ok(session.prepare_query_image(&bytes)?)
        }
        (Some(text), None) => Ok(QueryInput::Text(text)),
        (None, None) => bail!("provide a query text or --image"),
    }
}
