use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use beatvault::audio_codec::SymphoniaCodec;
use beatvault::config::Config;
use beatvault::identity::{StaticIdentity, UserId};
use beatvault::uploads::{MediaFile, TrackUpload, UploadService};

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise info level for this crate
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "beatvault=info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 5 {
        print_usage(program_name(&args));
        std::process::exit(1);
    }

    let audio_path = PathBuf::from(&args[1]);
    let title = args[2].clone();
    let cover_path = args.get(3).filter(|p| !p.is_empty()).map(PathBuf::from);
    let tags = args.get(4).cloned();

    if let Err(e) = publish(&audio_path, title, cover_path.as_deref(), tags).await {
        error!("Publish failed: {}", e);
        std::process::exit(1);
    }
}

async fn publish(
    audio_path: &Path,
    title: String,
    cover_path: Option<&Path>,
    tags: Option<String>,
) -> Result<(), String> {
    let config = Config::load().map_err(|e| format!("Invalid configuration: {}", e))?;
    let user_id = config
        .user_id
        .clone()
        .ok_or_else(|| "BEATVAULT_USER_ID must be set".to_string())?;
    let user = UserId::new(user_id).map_err(|e| e.to_string())?;

    let objects = config
        .open_object_store()
        .await
        .map_err(|e| format!("Failed to open object store: {}", e))?;
    let database = config
        .open_database()
        .await
        .map_err(|e| format!("Failed to open database: {}", e))?;

    // Ctrl-C rolls back whatever already landed
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling upload");
            on_interrupt.cancel();
        }
    });

    let service = UploadService::new(
        objects,
        Arc::new(database),
        Arc::new(StaticIdentity::signed_in(user)),
        Arc::new(SymphoniaCodec::new()),
    )
    .with_buckets(config.buckets.clone())
    .with_watermark(config.watermark)
    .with_saga_options(config.saga_options().cancel_with(cancel));

    let audio = MediaFile::from_path(audio_path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", audio_path.display(), e))?;
    let mut upload = TrackUpload::new(title, audio);
    if let Some(path) = cover_path {
        let cover = MediaFile::from_path(path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        upload = upload.cover(cover);
    }
    if let Some(tags) = tags {
        upload = upload.tags(tags);
    }

    info!("Publishing {}", audio_path.display());
    let published = service
        .publish_track(upload)
        .await
        .map_err(|e| e.to_string())?;

    println!("Track id:  {}", published.track_id);
    println!("Audio URL: {}", published.audio_url);
    if let Some(cover_url) = &published.cover_url {
        println!("Cover URL: {}", cover_url);
    }
    if !published.tags.is_empty() {
        println!("Tags:      {}", published.tags.join(", "));
    }
    Ok(())
}

/// argv[0], which the OS does not guarantee to pass
fn program_name(args: &[String]) -> &str {
    args.first().map_or("publish_track", String::as_str)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <audio-file> <title> [cover-image] [tags]", program);
    eprintln!();
    eprintln!("Watermarks the audio file and publishes it as BEATVAULT_USER_ID.");
    eprintln!("Tags are comma-separated.");
    eprintln!();
    eprintln!("Example: {} night_drive.wav \"Night Drive\" cover.png \"lofi, chill\"", program);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name_without_argv() {
        assert_eq!(program_name(&[]), "publish_track");
        assert_eq!(program_name(&["./pt".to_string()]), "./pt");
    }
}
