use std::io::{self, Read, Write};

use anyhow::Result;
use clap::Args;
use git_hash::hasher::Hasher;
use git_hash::HashAlgorithm;
use git_object::ObjectType;

#[derive(Args)]
pub struct HashObjectArgs {
    /// Read the object content from stdin
    #[arg(long)]
    stdin: bool,

    /// Object type (default: blob)
    #[arg(short = 't', default_value = "blob")]
    obj_type: ObjectType,

    /// Files whose content to hash
    #[arg(value_name = "file")]
    files: Vec<String>,
}

pub fn run(args: &HashObjectArgs) -> Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.stdin {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        writeln!(out, "{}", hash(&args.obj_type, &data)?.to_hex())?;
    }

    for file in &args.files {
        let data = std::fs::read(file)?;
        writeln!(out, "{}", hash(&args.obj_type, &data)?.to_hex())?;
    }

    Ok(0)
}

fn hash(obj_type: &ObjectType, data: &[u8]) -> Result<git_hash::ObjectId> {
    let type_str = std::str::from_utf8(obj_type.as_bytes())?;
    Ok(Hasher::hash_object(HashAlgorithm::Sha1, type_str, data)?)
}
