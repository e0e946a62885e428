use std::io::{self, Read, Write};

use anyhow::Result;
use clap::Args;
use git_hash::HashAlgorithm;
use git_object::{Object, Tag};

#[derive(Args)]
pub struct MktagArgs {
    // No arguments — reads tag content from stdin
}

pub fn run(_args: &MktagArgs) -> Result<i32> {
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;

    let tag = Tag::parse(&data)?;
    let obj = Object::Tag(tag);
    let oid = obj.compute_oid(HashAlgorithm::Sha1)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", oid.to_hex())?;

    Ok(0)
}
