use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use clap::Args;
use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::ObjectType;
use git_pack::write::{build_pack_index, PackWriter};

#[derive(Args)]
pub struct PackObjectsArgs {
    /// Write the pack to stdout
    #[arg(long)]
    stdout: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Window size for delta compression
    #[arg(long, default_value = "10")]
    window: u32,

    /// Maximum delta chain depth
    #[arg(long, default_value = "50")]
    depth: u32,

    /// Do not create an empty pack
    #[arg(long)]
    non_empty: bool,

    /// Base name for .pack and .idx output files
    base_name: Option<String>,
}

/// Pack the objects listed on stdin as `<type> <path>` lines, where `<path>`
/// names a file holding that object's raw (pre-header) content.
///
/// Unlike `git pack-objects`, this has no object database to resolve bare
/// OIDs against, so it takes content directly — the same way `hash-object`
/// and `mktree` already do in this CLI.
pub fn run(args: &PackObjectsArgs) -> Result<i32> {
    let stderr = io::stderr();
    let mut err = stderr.lock();

    let mut objects: Vec<(ObjectType, Vec<u8>)> = Vec::new();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (type_str, path) = line
            .split_once(' ')
            .ok_or_else(|| anyhow::anyhow!("expected '<type> <path>', got '{}'", line))?;
        let obj_type = match type_str {
            "blob" => ObjectType::Blob,
            "tree" => ObjectType::Tree,
            "commit" => ObjectType::Commit,
            "tag" => ObjectType::Tag,
            other => bail!("unknown object type: {}", other),
        };
        let data = std::fs::read(path)?;
        objects.push((obj_type, data));
    }

    if args.non_empty && objects.is_empty() {
        bail!("no objects to pack");
    }

    let tmp_dir = tempfile::tempdir()?;
    let base_name = if args.stdout {
        tmp_dir.path().join("pack").to_string_lossy().to_string()
    } else {
        args.base_name.clone().unwrap_or_else(|| "pack".to_string())
    };

    let pack_path = format!("{}.pack", base_name);
    let idx_path = format!("{}.idx", base_name);

    let mut writer = PackWriter::new(&pack_path)?;
    let mut seen = HashSet::new();
    let mut written = 0usize;
    for (obj_type, data) in &objects {
        let type_str = std::str::from_utf8(obj_type.as_bytes())?;
        let oid = Hasher::hash_object(HashAlgorithm::Sha1, type_str, data)?;
        if !seen.insert(oid) {
            continue;
        }
        writer.add_object(*obj_type, data)?;
        written += 1;
    }

    let mut entries: Vec<(ObjectId, u64, u32)> = writer
        .entries()
        .map(|(oid, off, crc)| (*oid, off, crc))
        .collect();

    let (pack_path_out, checksum) = writer.finish()?;
    build_pack_index(std::path::Path::new(&idx_path), &mut entries, &checksum)?;

    if args.stdout {
        let pack_data = std::fs::read(&pack_path_out)?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&pack_data)?;
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", checksum.to_hex())?;
    }

    if !args.quiet {
        writeln!(
            err,
            "Total {} (delta 0), reused 0, window {}, depth {}",
            written, args.window, args.depth
        )?;
    }

    Ok(0)
}
