use std::env;
use std::path::PathBuf;

use library::Library;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "music_structure.json".to_string());

    let library = Library::open(
        PathBuf::from(&music_root),
        PathBuf::from(&index_path),
        common::default_extensions(),
    );
    let stats = library.rescan()?;
    info!("Wrote {}", library.store().recovery_path().display());

    println!(
        "Indexed: {} artists, {} albums, {} tracks ({} skipped)",
        stats.artists, stats.albums, stats.tracks, stats.skipped
    );

    Ok(())
}
