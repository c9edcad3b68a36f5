use anyhow::bail;
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use variant_submit::config::ClientConfig;
use variant_submit::models::FileCandidate;
use variant_submit::services::credentials::HttpCredentialIssuer;
use variant_submit::services::orchestrator::{AttemptInput, Orchestrator, OrchestratorState};
use variant_submit::services::submission::HttpJobSubmitter;
use variant_submit::services::upload::HttpStorageUploader;

/// Upload a VCF and its index (or point at one already in storage) and
/// submit it for processing.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Compressed VCF to upload (*.vcf.gz)
    #[arg(long, requires = "index", conflicts_with = "location")]
    vcf: Option<PathBuf>,

    /// Index of the VCF (*.vcf.gz.tbi or *.vcf.gz.csi)
    #[arg(long, requires = "vcf")]
    index: Option<PathBuf>,

    /// Already-resident data, as s3://bucket/path.vcf.gz
    #[arg(long)]
    location: Option<String>,

    /// Identity forwarded with the submission
    #[arg(long)]
    caller_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "submit=info,variant_submit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env();

    let input = match (args.vcf, args.index, args.location) {
        (Some(vcf), Some(index), None) => AttemptInput::Files(vec![
            FileCandidate::from_path(&vcf).await?,
            FileCandidate::from_path(&index).await?,
        ]),
        (None, None, Some(location)) => AttemptInput::Locator(location),
        _ => bail!("Pass either --vcf and --index, or --location"),
    };

    let client = reqwest::Client::new();
    let mut orchestrator = Orchestrator::new(
        Arc::new(HttpCredentialIssuer::new(
            client.clone(),
            &config.frontend_api_url,
            config.grant_validity_secs,
            config.max_file_size,
        )),
        Arc::new(HttpStorageUploader::new(client.clone())),
        Arc::new(HttpJobSubmitter::new(client, &config.backend_api_url)),
        config.max_file_size,
    );

    let mut states = orchestrator.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last_decile = None;
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                OrchestratorState::Uploading { percent } => {
                    let decile = (percent / 10.0) as u8;
                    if last_decile != Some(decile) {
                        last_decile = Some(decile);
                        info!("⬆️  {:.1}% uploaded", percent);
                    }
                }
                state if state.is_terminal() => break,
                _ => {}
            }
        }
    });

    let outcome = orchestrator
        .submit(input, args.caller_id.as_deref())
        .await;
    let _ = watcher.await;

    match outcome {
        Ok(job) => {
            info!("🎉 Submitted as job {}", job.id);
            println!("{}", job.id);
            Ok(())
        }
        Err(e) => bail!("Submission failed, please retry: {}", e),
    }
}
