use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use git_ref::{FilesRefStore, RefName, RefStore, Reference};

use super::git_dir;
use crate::Cli;

#[derive(Args)]
pub struct ShowRefArgs {
    /// Show HEAD reference as well
    #[arg(long)]
    head: bool,

    /// Only show heads (refs/heads/)
    #[arg(long)]
    heads: bool,

    /// Only show tags (refs/tags/)
    #[arg(long)]
    tags: bool,

    /// Verify that the given refs exist
    #[arg(long)]
    verify: bool,

    /// Be quiet (for --verify)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Patterns or refs to verify
    #[arg(value_name = "pattern")]
    patterns: Vec<String>,
}

pub fn run(args: &ShowRefArgs, cli: &Cli) -> Result<i32> {
    let refs = FilesRefStore::new(git_dir(cli));
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.verify {
        return verify_refs(args, &refs, &mut out);
    }

    let mut found_any = false;

    if args.head {
        if let Some(oid) = refs.resolve_to_oid(&RefName::new("HEAD")?)? {
            writeln!(out, "{} HEAD", oid.to_hex())?;
            found_any = true;
        }
    }

    let prefix = if args.heads {
        Some("refs/heads/")
    } else if args.tags {
        Some("refs/tags/")
    } else {
        Some("refs/")
    };

    for ref_result in refs.iter(prefix)? {
        let reference = ref_result?;
        let oid = match &reference {
            Reference::Direct { target, .. } => *target,
            Reference::Symbolic { .. } => match reference.peel_to_oid(&refs) {
                Ok(oid) => oid,
                Err(_) => continue,
            },
        };

        let refname = reference.name().as_str();

        if !args.patterns.is_empty() {
            let matches = args
                .patterns
                .iter()
                .any(|p| refname.starts_with(p.as_str()) || refname == p);
            if !matches {
                continue;
            }
        }

        writeln!(out, "{} {}", oid.to_hex(), refname)?;
        found_any = true;
    }

    // show-ref returns 1 if no refs were found
    if found_any {
        Ok(0)
    } else {
        Ok(1)
    }
}

fn verify_refs(args: &ShowRefArgs, refs: &FilesRefStore, out: &mut impl Write) -> Result<i32> {
    let mut all_ok = true;

    for pattern in &args.patterns {
        let refname = match RefName::new(pattern.as_str()) {
            Ok(r) => r,
            Err(_) => {
                if !args.quiet {
                    eprintln!("fatal: '{}' - not a valid ref", pattern);
                }
                all_ok = false;
                continue;
            }
        };
        match refs.resolve_to_oid(&refname)? {
            Some(oid) => {
                if !args.quiet {
                    writeln!(out, "{} {}", oid.to_hex(), pattern)?;
                }
            }
            None => {
                if !args.quiet {
                    eprintln!("fatal: '{}' - not a valid ref", pattern);
                }
                all_ok = false;
            }
        }
    }

    if all_ok {
        Ok(0)
    } else {
        Ok(128)
    }
}
