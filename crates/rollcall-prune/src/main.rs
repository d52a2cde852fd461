use anyhow::{Context, Result};
use rollcall_core::{Config, FaceStore};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = Config::load(None).context("failed to load configuration")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    prune(&config.store_path, &mut stdin.lock(), &mut stdout)
}

/// One pass: list labels, read names to delete, filter, save.
fn prune<R: BufRead, W: Write>(store_path: &Path, input: &mut R, out: &mut W) -> Result<()> {
    if !store_path.exists() {
        tracing::warn!(path = %store_path.display(), "face store missing, nothing to prune");
        writeln!(out, "File {} does not exist.", store_path.display())?;
        return Ok(());
    }

    let mut store = FaceStore::load(store_path).context("failed to load face store")?;

    writeln!(out, "Current names in database:")?;
    for (idx, label) in store.labels().enumerate() {
        writeln!(out, "{idx}: {label}")?;
    }

    write!(out, "Enter names to remove (comma-separated): ")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;

    let names = parse_names(&line);
    if names.is_empty() {
        tracing::info!("no names given, store left untouched");
        writeln!(out, "No names specified. Exiting.")?;
        return Ok(());
    }

    let removed = store.remove(&names);
    for name in names.iter().filter(|n| !removed.contains(n)) {
        tracing::warn!(name = %name, "no enrolled face with this name");
    }
    for label in &removed {
        writeln!(out, "Removing: {label}")?;
    }

    store.save().context("failed to save face store")?;
    tracing::info!(
        path = %store_path.display(),
        removed = removed.len(),
        remaining = store.len(),
        "pruned face store"
    );
    writeln!(out, "Updated data saved to {}.", store_path.display())?;
    writeln!(out, "Done.")?;
    Ok(())
}

/// Split a comma-separated list, trimming whitespace and dropping blanks.
fn parse_names(line: &str) -> Vec<String> {
    line.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
