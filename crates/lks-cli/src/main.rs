#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use lks::{ChunkHandle, ChunkManifest, ChunkStoreConfig, LksError, StructureReport};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct InfoOutput {
    block_size: u32,
    physical_block_size: u32,
    seek_start: u64,
    blocks: u64,
    free_blocks: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(env::args().skip(1).collect()) {
        eprintln!("error: {error:#}");
        std::process::exit(exit_code(&error));
    }
}

/// The errno of the first `LksError` in the chain, or 1.
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<LksError>())
        .map_or(1, LksError::to_errno)
}

fn run(mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        print_usage();
        return Ok(());
    }
    let command = args.remove(0);

    match command.as_str() {
        "init" => {
            let block_size = take_option(&mut args, "--block-size")?
                .map(|raw| parse_number::<u32>(&raw, "--block-size"))
                .transpose()?;
            let seek_start = take_explicit_seek_start(&mut args)?;
            let mut config = take_config(&mut args)?;
            let [path] = positionals::<1>(args, "init <path>")?;

            if let Some(block_size) = block_size {
                config.block_size = block_size;
            }
            if let Some(seek_start) = seek_start {
                config.seek_start = seek_start;
            }
            init(Path::new(&path), &config)
        }
        "put" => {
            let seek_start = take_seek_start(&mut args)?;
            let [path, file] = positionals::<2>(args, "put <path> <file>")?;
            put(Path::new(&path), seek_start, Path::new(&file))
        }
        "get" => {
            let seek_start = take_seek_start(&mut args)?;
            let (path, handle, out) = match args.len() {
                2 => (args[0].clone(), args[1].clone(), None),
                3 => (args[0].clone(), args[1].clone(), Some(args[2].clone())),
                _ => bail!("usage: get <path> <handle> [<out>]"),
            };
            let handle = parse_handle(&handle)?;
            get(Path::new(&path), seek_start, handle, out.as_deref().map(Path::new))
        }
        "rm" => {
            let seek_start = take_seek_start(&mut args)?;
            let [path, handle] = positionals::<2>(args, "rm <path> <handle>")?;
            rm(Path::new(&path), seek_start, parse_handle(&handle)?)
        }
        "check" => {
            let json = take_flag(&mut args, "--json");
            let seek_start = take_seek_start(&mut args)?;
            let manifest = take_option(&mut args, "--manifest")?;
            let [path] = positionals::<1>(args, "check <path>")?;
            check(Path::new(&path), seek_start, manifest.as_deref().map(Path::new), json)
        }
        "recover" => {
            let json = take_flag(&mut args, "--json");
            let strict_flag = take_flag(&mut args, "--strict");
            let seek_start = take_explicit_seek_start(&mut args)?;
            let config = take_config(&mut args)?;
            let Some(manifest) = take_option(&mut args, "--manifest")? else {
                bail!("recover requires --manifest <file>");
            };
            let [path] = positionals::<1>(args, "recover <path>")?;
            let strict = strict_flag || config.strict_recovery;
            let seek_start = seek_start.unwrap_or(config.seek_start);
            recover(Path::new(&path), seek_start, Path::new(&manifest), strict, json)
        }
        "info" => {
            let json = take_flag(&mut args, "--json");
            let seek_start = take_seek_start(&mut args)?;
            let [path] = positionals::<1>(args, "info <path>")?;
            info(Path::new(&path), seek_start, json)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("lks\n");
    println!("USAGE:");
    println!("  lks init <path> [--block-size N] [--seek-start N] [--config <json>]");
    println!("  lks put <path> <file> [--seek-start N]");
    println!("  lks get <path> <handle> [<out>] [--seek-start N]");
    println!("  lks rm <path> <handle> [--seek-start N]");
    println!("  lks check <path> [--manifest <json>] [--seek-start N] [--json]");
    println!(
        "  lks recover <path> --manifest <json> [--strict] [--config <json>] [--seek-start N] [--json]"
    );
    println!("  lks info <path> [--seek-start N] [--json]");
}

// ── Argument helpers ────────────────────────────────────────────────────────

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|arg| arg != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|arg| arg == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{name} requires a value");
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn take_explicit_seek_start(args: &mut Vec<String>) -> Result<Option<u64>> {
    take_option(args, "--seek-start")?
        .map(|raw| parse_number(&raw, "--seek-start"))
        .transpose()
}

fn take_seek_start(args: &mut Vec<String>) -> Result<u64> {
    take_explicit_seek_start(args).map(|seek_start| seek_start.unwrap_or(0))
}

/// `--config <json>`, or the defaults.
fn take_config(args: &mut Vec<String>) -> Result<ChunkStoreConfig> {
    match take_option(args, "--config")? {
        Some(path) => load_json(Path::new(&path)),
        None => Ok(ChunkStoreConfig::default()),
    }
}

fn positionals<const N: usize>(args: Vec<String>, usage: &str) -> Result<[String; N]> {
    if let Some(unknown) = args.iter().find(|arg| arg.starts_with("--")) {
        bail!("unknown option: {unknown}");
    }
    args.try_into()
        .map_err(|_| anyhow::anyhow!("usage: {usage}"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("{what}: invalid number '{raw}'"))
}

fn parse_handle(raw: &str) -> Result<ChunkHandle> {
    parse_number(raw, "handle").map(ChunkHandle)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn open(path: &Path, seek_start: u64) -> Result<lks::ChunkFile> {
    lks::open_file(path, seek_start)
        .with_context(|| format!("failed to open chunk store {}", path.display()))
}

fn print_report(report: &StructureReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize report")?
        );
    } else {
        println!("{report}");
        for handle in &report.released {
            println!("released: {handle}");
        }
    }
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────────────

fn init(path: &Path, config: &ChunkStoreConfig) -> Result<()> {
    let store = lks::create_file(path, config)
        .with_context(|| format!("failed to create chunk store {}", path.display()))?;
    store.close()?;
    println!(
        "initialized {}: block_size={} seek_start={}",
        path.display(),
        config.block_size,
        config.seek_start
    );
    Ok(())
}

fn put(path: &Path, seek_start: u64, file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let mut store = open(path, seek_start)?;
    let handle = store.store(&bytes)?;
    store.close()?;
    println!("{handle}");
    Ok(())
}

fn get(path: &Path, seek_start: u64, handle: ChunkHandle, out: Option<&Path>) -> Result<()> {
    let store = open(path, seek_start)?;
    let bytes = store
        .get(handle)
        .with_context(|| format!("failed to read chunk {handle}"))?;
    match out {
        Some(out) => std::fs::write(out, &bytes)
            .with_context(|| format!("failed to write {}", out.display()))?,
        None => std::io::stdout().lock().write_all(&bytes)?,
    }
    Ok(())
}

fn rm(path: &Path, seek_start: u64, handle: ChunkHandle) -> Result<()> {
    let mut store = open(path, seek_start)?;
    let freed = store
        .release(handle)
        .with_context(|| format!("failed to release chunk {handle}"))?;
    store.close()?;
    println!("released chunk {handle}: {freed} blocks freed");
    Ok(())
}

fn check(path: &Path, seek_start: u64, manifest: Option<&Path>, json: bool) -> Result<()> {
    let manifest = manifest.map(load_json::<ChunkManifest>).transpose()?;
    let store = open(path, seek_start)?;
    let report = store
        .verify(manifest.as_ref())
        .context("structure check failed")?;
    print_report(&report, json)
}

fn recover(path: &Path, seek_start: u64, manifest: &Path, strict: bool, json: bool) -> Result<()> {
    let manifest = load_json::<ChunkManifest>(manifest)?;
    let mut store = open(path, seek_start)?;
    let report = store
        .recover(Some(&manifest), strict)
        .context("recovery failed")?;
    store.close()?;
    print_report(&report, json)
}

fn info(path: &Path, seek_start: u64, json: bool) -> Result<()> {
    let store = open(path, seek_start)?;
    let output = InfoOutput {
        block_size: store.block_size(),
        physical_block_size: store.block_size().saturating_add(lks::LINK_OVERHEAD_U32),
        seek_start: store.seek_start(),
        blocks: store.next_block_number()?.0,
        free_blocks: store.free_list_len()?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("linkstore chunk file");
        println!("block_size: {}", output.block_size);
        println!("physical_block_size: {}", output.physical_block_size);
        println!("seek_start: {}", output.seek_start);
        println!("blocks: {}", output.blocks);
        println!("free_blocks: {}", output.free_blocks);
    }
    Ok(())
}
