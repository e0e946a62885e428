use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use git_pack::pack::PackFile;

#[derive(Args)]
pub struct UnpackObjectsArgs {
    /// Be verbose
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Pack file to unpack
    pack_file: PathBuf,
}

/// Walk a pack's objects in file order, resolving every delta chain, and
/// print each object's type, size, and OID as it is reached.
///
/// File order (not index/OID order) matters here: §5's ordering guarantee
/// is that OFS_DELTA bases appear before their users, so resolving strictly
/// in ascending-offset order never needs to look ahead.
pub fn run(args: &UnpackObjectsArgs) -> Result<i32> {
    let pack = PackFile::open(&args.pack_file)?;
    pack.verify_checksum()?;

    let mut by_offset: Vec<(git_hash::ObjectId, u64)> = pack.index().iter().collect();
    by_offset.sort_by_key(|(_, offset)| *offset);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (oid, offset) in by_offset {
        let obj = pack.read_at_offset(offset)?;
        if !args.dry_run {
            writeln!(out, "{} {} {} {}", oid.to_hex(), obj.obj_type, obj.data.len(), offset)?;
        }
    }

    Ok(0)
}
