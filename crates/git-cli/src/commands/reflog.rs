use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use bstr::BString;
use clap::Args;
use git_ref::reflog::read_reflog;
use git_ref::RefName;
use git_utils::date::DateFormat;

use super::git_dir;
use crate::Cli;

#[derive(Args)]
pub struct ReflogArgs {
    /// Subcommand (show, expire, delete). Default: show
    subcommand: Option<String>,

    /// Ref name (defaults to HEAD)
    #[arg(long, value_name = "ref")]
    ref_name: Option<String>,

    /// Additional arguments
    args: Vec<String>,
}

pub fn run(args: &ReflogArgs, cli: &Cli) -> Result<i32> {
    let dir = git_dir(cli);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let subcmd = args.subcommand.as_deref().unwrap_or("show");

    match subcmd {
        "show" => reflog_show(&dir, args, &mut out),
        "expire" => reflog_expire(&dir, args, &mut out),
        "delete" => reflog_delete(&dir, args, &mut out),
        // If the "subcommand" is actually a ref name, treat as show
        other => {
            let ref_name = other;
            reflog_show_ref(&dir, ref_name, &mut out)
        }
    }
}

fn reflog_show(dir: &Path, args: &ReflogArgs, out: &mut impl Write) -> Result<i32> {
    let ref_str = if !args.args.is_empty() {
        args.args[0].as_str()
    } else if let Some(ref name) = args.ref_name {
        name.as_str()
    } else {
        "HEAD"
    };

    reflog_show_ref(dir, ref_str, out)
}

fn reflog_show_ref(dir: &Path, ref_str: &str, out: &mut impl Write) -> Result<i32> {
    let ref_name = resolve_reflog_name(ref_str)?;
    let entries = read_reflog(dir, &ref_name)?;

    let display_name = if ref_str == "HEAD" {
        "HEAD".to_string()
    } else {
        ref_str.to_string()
    };

    for (i, entry) in entries.iter().enumerate() {
        let hex = entry.new_oid.to_hex();
        let short = &hex[..7.min(hex.len())];
        let _date = entry.identity.date.format(DateFormat::Relative);
        let message = String::from_utf8_lossy(&entry.message);

        writeln!(
            out,
            "{} {}@{{{}}}: {}",
            short, display_name, i, message
        )?;
    }

    Ok(0)
}

fn reflog_expire(dir: &Path, args: &ReflogArgs, out: &mut impl Write) -> Result<i32> {
    let ref_str = args
        .ref_name
        .as_deref()
        .or_else(|| args.args.first().map(String::as_str))
        .unwrap_or("HEAD");
    let ref_name = resolve_reflog_name(ref_str)?;

    let expire_timestamp = args
        .args
        .iter()
        .find_map(|a| a.parse::<i64>().ok())
        .unwrap_or(0);

    let removed = git_ref::reflog::expire_reflog(dir, &ref_name, expire_timestamp)?;
    writeln!(out, "{}: {} entries expired", ref_str, removed)?;
    Ok(0)
}

fn reflog_delete(dir: &Path, args: &ReflogArgs, out: &mut impl Write) -> Result<i32> {
    let spec = args
        .args
        .first()
        .ok_or_else(|| anyhow::anyhow!("usage: reflog delete <ref>@{{<n>}}"))?;

    let (ref_str, index) = parse_at_spec(spec)?;
    let ref_name = resolve_reflog_name(ref_str)?;
    git_ref::reflog::delete_reflog_entry(dir, &ref_name, index)?;
    writeln!(out, "{}@{{{}}}: entry deleted", ref_str, index)?;
    Ok(0)
}

/// Parse `<ref>@{<n>}`, defaulting the ref portion to HEAD if absent.
fn parse_at_spec(spec: &str) -> Result<(&str, usize)> {
    let (ref_part, rest) = spec
        .split_once("@{")
        .ok_or_else(|| anyhow::anyhow!("expected '<ref>@{{<n>}}', got '{}'", spec))?;
    let index_str = rest
        .strip_suffix('}')
        .ok_or_else(|| anyhow::anyhow!("expected '<ref>@{{<n>}}', got '{}'", spec))?;
    let index: usize = index_str.parse()?;
    let ref_str = if ref_part.is_empty() { "HEAD" } else { ref_part };
    Ok((ref_str, index))
}

fn resolve_reflog_name(name: &str) -> Result<RefName> {
    if name == "HEAD" {
        Ok(RefName::new(BString::from("HEAD"))?)
    } else if name.starts_with("refs/") {
        Ok(RefName::new(BString::from(name))?)
    } else {
        // Try as branch name
        Ok(RefName::new(BString::from(format!("refs/heads/{}", name)))?)
    }
}
