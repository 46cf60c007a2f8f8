use std::path::Path;
use std::process::Command;

use roomrec_worker::SessionSettings;

const REQUIRED_ENV: &[&str] = &[
    "AWS_DEFAULT_REGION",
    "AWS_ACCESS_KEY",
    "AWS_SECRET_ACCESS_KEY",
    "QUEUE_URL",
    "BUCKET_NAME",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_ACCOUNT_AUTH_TOKEN",
    "TWILIO_KEY_SID",
    "TWILIO_KEY_SECRET",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = SessionSettings::from_env();

    println!(
        "roomrec-selfcheck: starting with work_dir={}",
        settings.work_dir.display()
    );
    ensure_workdir(&settings.work_dir).await?;
    ensure_encoder(&settings.encoder_program)?;
    ensure_env_present(REQUIRED_ENV)?;

    println!("roomrec-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_encoder(program: &str) -> anyhow::Result<()> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", program, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            program,
            output.status
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = vars
        .iter()
        .copied()
        .filter(|var| std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true))
        .collect();

    if !missing.is_empty() {
        return Err(anyhow::anyhow!(
            "missing required env vars: {}",
            missing.join(", ")
        ));
    }
    Ok(())
}
