use anyhow::Result;

/// Every observer runs on a single cooperative event loop. Persistence calls and the display
/// refresh interleave on it, they never run in parallel.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
