use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use git_ref::{FilesRefStore, RefStore, Reference};

use super::git_dir;
use crate::Cli;

#[derive(Args)]
pub struct ForEachRefArgs {
    /// Format string for output
    #[arg(long, default_value = "%(objectname)\t%(refname)")]
    format: String,

    /// Sort key (refname or -refname)
    #[arg(long)]
    sort: Option<String>,

    /// Maximum number of refs to show
    #[arg(long)]
    count: Option<usize>,

    /// Pattern to filter refs (e.g., refs/heads/)
    #[arg(value_name = "pattern")]
    pattern: Option<String>,
}

pub fn run(args: &ForEachRefArgs, cli: &Cli) -> Result<i32> {
    let refs = FilesRefStore::new(git_dir(cli));
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let prefix = args.pattern.as_deref();

    let mut entries: Vec<Reference> = Vec::new();
    for ref_result in refs.iter(prefix)? {
        let reference = ref_result?;
        let name = reference.name().as_str();
        if name == "HEAD" || !name.starts_with("refs/") {
            continue;
        }
        entries.push(reference);
    }

    match args.sort.as_deref() {
        Some("-refname") => entries.sort_by(|a, b| b.name().as_str().cmp(a.name().as_str())),
        _ => entries.sort_by(|a, b| a.name().as_str().cmp(b.name().as_str())),
    }

    if let Some(count) = args.count {
        entries.truncate(count);
    }

    for reference in &entries {
        let oid = match &reference {
            Reference::Direct { target, .. } => *target,
            Reference::Symbolic { .. } => match reference.peel_to_oid(&refs) {
                Ok(oid) => oid,
                Err(_) => continue,
            },
        };

        writeln!(out, "{}", format_ref(&args.format, reference, &oid))?;
    }

    Ok(0)
}

fn format_ref(format: &str, reference: &Reference, oid: &git_hash::ObjectId) -> String {
    let refname = reference.name().as_str();
    let short_name = reference.name().short_name();

    format
        .replace("%(refname)", refname)
        .replace(
            "%(refname:short)",
            std::str::from_utf8(short_name.as_bytes()).unwrap_or(refname),
        )
        .replace("%(objectname)", &oid.to_hex())
        .replace("%(objectname:short)", &oid.to_hex()[..7])
}
