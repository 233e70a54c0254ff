#![allow(dead_code)]

use beatvault::audio_codec::{AudioCodec, SymphoniaCodec, TargetFormat};
use beatvault::uploads::MediaFile;
use beatvault::watermark::AudioBuffer;
use std::path::{Path, PathBuf};

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One second of a quiet 440 Hz tone, stereo, 44.1 kHz
pub fn test_tone(format: TargetFormat) -> MediaFile {
    let sample_rate = 44100;
    let channel: Vec<f32> = (0..sample_rate as usize)
        .map(|i| 0.25 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
        .collect();
    let buffer = AudioBuffer::new(vec![channel.clone(), channel], sample_rate).unwrap();
    let bytes = SymphoniaCodec::new().encode(&buffer, format).unwrap();
    MediaFile::new(
        format!("tone.{}", format.extension()),
        format.content_type(),
        bytes,
    )
}

pub fn cover_image() -> MediaFile {
    MediaFile::new("cover.png", "image/png", b"\x89PNG\r\n\x1a\nnot really".to_vec())
}

/// Every regular file below `root`, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
