//! Command-line driver for the in-memory key/value store.
//!
//! Every subcommand builds a fresh store, runs a fixed workload against it,
//! and prints what it observed.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use common::{Config, WatermarkPolicy};
use kv::Kv;
use storage::Meta;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_VALUE_SIZE: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "kv", about = "Copy-on-write B+Tree key/value store")]
struct Args {
    /// Tracing filter, e.g. `info` or `btree=trace`
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
    /// Drop retired pages instead of recycling them through the free list
    #[arg(long, global = true)]
    no_recycle: bool,
    /// When retired pages become reusable
    #[arg(long, global = true, value_enum, default_value_t = CliWatermark::PerWrite)]
    watermark: CliWatermark,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliWatermark {
    PerWrite,
    Manual,
}

impl From<CliWatermark> for WatermarkPolicy {
    fn from(value: CliWatermark) -> Self {
        match value {
            CliWatermark::PerWrite => WatermarkPolicy::PerWrite,
            CliWatermark::Manual => WatermarkPolicy::Manual,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set, read, and delete a handful of keys
    Demo,
    /// Insert sequential keys, delete the even ones, and report the tree shape
    Load {
        #[arg(long)]
        count: u32,
        #[arg(long, default_value_t = DEFAULT_VALUE_SIZE)]
        value_size: usize,
    },
    /// Write the meta page of the demo store to a file
    Meta {
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = Config::builder()
        .recycle_pages(!args.no_recycle)
        .watermark(args.watermark.into())
        .build();
    let mut out = io::stdout().lock();
    match args.command {
        Command::Demo => run_demo(config, &mut out),
        Command::Load { count, value_size } => run_load(config, count, value_size, &mut out),
        Command::Meta { out: path } => run_meta(config, &path, &mut out),
    }
}

fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_new(level).context("invalid log level")?)
        .with_target(true)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {e}"))
}

fn demo_store(config: Config) -> Result<Kv> {
    let kv = Kv::new(config)?;
    kv.set(b"a", b"1")?;
    kv.set(b"b", b"2")?;
    kv.set(b"c", b"3")?;
    Ok(kv)
}

fn run_demo(config: Config, out: &mut impl Write) -> Result<()> {
    let kv = demo_store(config)?;
    for key in ["a", "b", "c", "z"] {
        match kv.get(key.as_bytes())? {
            Some(value) => writeln!(out, "{key} = {}", String::from_utf8_lossy(&value))?,
            None => writeln!(out, "{key} not found")?,
        }
    }
    let found = kv.del(b"b")?;
    writeln!(out, "deleted b: {found}")?;
    writeln!(out, "pages allocated: {}", kv.pages_allocated())?;
    Ok(())
}

fn run_load(config: Config, count: u32, value_size: usize, out: &mut impl Write) -> Result<()> {
    let kv = Kv::new(config)?;
    let value = vec![b'v'; value_size];
    for i in 0..count {
        kv.set(&i.to_be_bytes(), &value)
            .with_context(|| format!("failed to insert key {i}"))?;
    }
    let mut deleted = 0u32;
    for i in (0..count).step_by(2) {
        if kv.del(&i.to_be_bytes())? {
            deleted += 1;
        }
    }
    info!(count, deleted, "kv.load.done");

    writeln!(out, "inserted: {count}")?;
    writeln!(out, "deleted: {deleted}")?;
    writeln!(out, "height: {}", kv.height()?)?;
    writeln!(out, "pages allocated: {}", kv.pages_allocated())?;
    writeln!(out, "free pages: {}", kv.free_pages())?;
    Ok(())
}

fn run_meta(config: Config, path: &Path, out: &mut impl Write) -> Result<()> {
    let kv = demo_store(config)?;
    let meta = Meta::decode(&kv.save_meta())?;
    meta.save_to(path)
        .with_context(|| format!("failed to write meta page to {}", path.display()))?;
    writeln!(
        out,
        "wrote meta page to {} (root {}, flushed {})",
        path.display(),
        meta.root,
        meta.flushed
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    fn output(run: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        run(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_load_with_defaults() {
        let args = Args::try_parse_from(["kv", "load", "--count", "10"]).unwrap();
        assert_eq!(args.log_level, DEFAULT_LOG_LEVEL);
        assert!(matches!(
            args.command,
            Command::Load {
                count: 10,
                value_size: DEFAULT_VALUE_SIZE
            }
        ));
    }

    #[test]
    fn demo_prints_lookups() {
        let text = output(|out| run_demo(Config::default(), out));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            &lines[..5],
            &["a = 1", "b = 2", "c = 3", "z not found", "deleted b: true"]
        );
        assert!(lines[5].starts_with("pages allocated: "));
    }

    #[test]
    fn load_reports_shape() {
        let config = Config::builder().recycle_pages(false).build();
        let text = output(|out| run_load(config, 200, 100, out));
        assert!(text.contains("inserted: 200"));
        assert!(text.contains("deleted: 100"));
        assert!(text.contains("free pages: 0"));
    }

    #[test]
    fn meta_file_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.page");
        output(|out| run_meta(Config::default(), &path, out));

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), storage::PAGE_SIZE);
        let meta = Meta::load_from(&path).unwrap();
        assert!(!meta.root.is_none());
        assert!(meta.flushed > meta.root.0);
    }

    #[test]
    fn meta_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("meta.page");
        let err = run_meta(Config::default(), &path, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("failed to write meta page"));
        assert!(matches!(
            err.downcast_ref::<common::DbError>(),
            Some(common::DbError::Io(_))
        ));
    }
}
