use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use git_pack::write::index_pack_file;

#[derive(Args)]
pub struct IndexPackArgs {
    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Write the index to the specified file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep the pack file after indexing (write a .keep file)
    #[arg(long)]
    keep: bool,

    /// Keep message
    #[arg(long = "keep", value_name = "MSG")]
    keep_msg: Option<String>,

    /// Read pack from stdin
    #[arg(long)]
    stdin: bool,

    /// Pack file path
    pack_file: Option<PathBuf>,
}

pub fn run(args: &IndexPackArgs) -> Result<i32> {
    let stderr = io::stderr();
    let mut err = stderr.lock();

    let pack_path = if args.stdin {
        let tmp_dir = tempfile::tempdir()?;
        let tmp_path = tmp_dir.path().join("tmp_pack.pack");
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        std::fs::write(&tmp_path, &data)?;
        let path = tmp_path.clone();
        std::mem::forget(tmp_dir);
        path
    } else if let Some(ref path) = args.pack_file {
        path.clone()
    } else {
        bail!("need a pack file or --stdin");
    };

    let idx_path = if let Some(ref output) = args.output {
        output.clone()
    } else {
        let mut p = pack_path.clone();
        p.set_extension("idx");
        p
    };

    if args.verbose {
        writeln!(err, "indexing {}", pack_path.display())?;
    }

    let pack_checksum = index_pack_file(&pack_path, &idx_path)?;

    if args.keep || args.keep_msg.is_some() {
        let mut keep_path = pack_path.clone();
        keep_path.set_extension("keep");
        let msg = args.keep_msg.as_deref().unwrap_or("");
        std::fs::write(&keep_path, msg)?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "pack\t{}", pack_checksum.to_hex())?;

    Ok(0)
}
