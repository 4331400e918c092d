/// Deterministic, non-repeating-per-chunk content so misplaced chunks are detected.
pub fn source_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

pub async fn create_source_file(
    dir: &std::path::Path,
    name: &str,
    size: usize,
) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, source_bytes(size)).await?;
    Ok(path)
}

/// Creates `<tmp>/src/<name>` with `size` bytes and an empty `<tmp>/dst` directory.
pub async fn setup_copy_dirs(
    tmp_dir: &std::path::Path,
    name: &str,
    size: usize,
) -> anyhow::Result<(std::path::PathBuf, std::path::PathBuf)> {
    let src_dir = tmp_dir.join("src");
    let dst_dir = tmp_dir.join("dst");
    tokio::fs::create_dir(&src_dir).await?;
    tokio::fs::create_dir(&dst_dir).await?;
    let src = create_source_file(&src_dir, name, size).await?;
    Ok((src, dst_dir))
}
