use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use bstr::ByteSlice;
use clap::Args;
use git_hash::ObjectId;
use git_pack::pack::PackFile;

#[derive(Args)]
pub struct CatFileArgs {
    /// Show object type
    #[arg(short = 't', conflicts_with_all = ["size", "pretty"])]
    type_only: bool,

    /// Show object size
    #[arg(short = 's', conflicts_with_all = ["type_only", "pretty"])]
    size: bool,

    /// Pretty-print the object content
    #[arg(short = 'p', conflicts_with_all = ["type_only", "size"])]
    pretty: bool,

    /// Pack file to read the object from
    #[arg(long)]
    pack: PathBuf,

    /// Object ID (40-hex OID)
    object: String,
}

pub fn run(args: &CatFileArgs) -> Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let pack = PackFile::open(&args.pack)?;
    let oid = ObjectId::from_hex(&args.object)?;
    let obj = pack
        .read_object(&oid)?
        .ok_or_else(|| anyhow::anyhow!("object not found in pack: {}", oid.to_hex()))?;

    if args.type_only {
        writeln!(out, "{}", obj.obj_type)?;
        return Ok(0);
    }

    if args.size {
        writeln!(out, "{}", obj.data.len())?;
        return Ok(0);
    }

    let parsed = git_object::Object::parse_content(obj.obj_type, &obj.data)?;
    if args.pretty {
        pretty_print(&parsed, &mut out)?;
        return Ok(0);
    }

    out.write_all(&obj.data)?;
    Ok(0)
}

fn pretty_print(obj: &git_object::Object, out: &mut impl Write) -> Result<()> {
    match obj {
        git_object::Object::Blob(blob) => {
            out.write_all(&blob.data)?;
        }
        git_object::Object::Tree(tree) => {
            for entry in tree.iter() {
                let type_name = if entry.mode.is_tree() {
                    "tree"
                } else if entry.mode.is_gitlink() {
                    "commit"
                } else {
                    "blob"
                };
                writeln!(
                    out,
                    "{:06o} {} {}\t{}",
                    entry.mode.raw(),
                    type_name,
                    entry.oid.to_hex(),
                    entry.name.as_bstr(),
                )?;
            }
        }
        git_object::Object::Commit(commit) => {
            writeln!(out, "tree {}", commit.tree.to_hex())?;
            for parent in &commit.parents {
                writeln!(out, "parent {}", parent.to_hex())?;
            }
            writeln!(out, "author {}", commit.author.to_bytes().as_bstr())?;
            writeln!(out, "committer {}", commit.committer.to_bytes().as_bstr())?;
            if let Some(ref gpgsig) = commit.gpgsig {
                write!(out, "gpgsig ")?;
                out.write_all(gpgsig)?;
                writeln!(out)?;
            }
            for (key, value) in &commit.extra_headers {
                writeln!(out, "{} {}", key.as_bstr(), value.as_bstr())?;
            }
            writeln!(out)?;
            out.write_all(&commit.message)?;
        }
        git_object::Object::Tag(tag) => {
            writeln!(out, "object {}", tag.target.to_hex())?;
            writeln!(out, "type {}", tag.target_type)?;
            writeln!(out, "tag {}", tag.tag_name.as_bstr())?;
            if let Some(ref tagger) = tag.tagger {
                writeln!(out, "tagger {}", tagger.to_bytes().as_bstr())?;
            }
            writeln!(out)?;
            out.write_all(&tag.message)?;
        }
    }
    Ok(())
}
