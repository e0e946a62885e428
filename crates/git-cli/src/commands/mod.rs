pub mod cat_file;
pub mod check_ref_format;
pub mod commit_tree;
pub mod for_each_ref;
pub mod hash_object;
pub mod index_pack;
pub mod mktag;
pub mod mktree;
pub mod pack_objects;
pub mod pktline;
pub mod reflog;
pub mod show_ref;
pub mod symbolic_ref;
pub mod unpack_objects;
pub mod update_ref;
pub mod verify_pack;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::Cli;

#[derive(Subcommand)]
pub enum Commands {
    /// Compute the object ID for a blob/tree/commit/tag's canonical bytes
    HashObject(hash_object::HashObjectArgs),
    /// Show a packed object's type, size, or pretty-printed content
    CatFile(cat_file::CatFileArgs),
    /// Build a tree object from ls-tree formatted text
    Mktree(mktree::MktreeArgs),
    /// Build a tag object from tag-formatted text
    Mktag(mktag::MktagArgs),
    /// Build a commit object from a tree, parents, and a message
    CommitTree(commit_tree::CommitTreeArgs),
    /// Build a pack from a list of objects, with delta selection
    PackObjects(pack_objects::PackObjectsArgs),
    /// Build a .idx file for an existing .pack file
    IndexPack(index_pack::IndexPackArgs),
    /// Verify a pack's checksum and, optionally, list its objects
    VerifyPack(verify_pack::VerifyPackArgs),
    /// Iterate a pack's objects in file order, resolving delta chains
    UnpackObjects(unpack_objects::UnpackObjectsArgs),
    /// List references in a ref store
    ShowRef(show_ref::ShowRefArgs),
    /// Output the object name and ref name of each ref
    ForEachRef(for_each_ref::ForEachRefArgs),
    /// Update the object name stored in a ref, with CAS
    UpdateRef(update_ref::UpdateRefArgs),
    /// Read, create, or delete a symbolic ref
    SymbolicRef(symbolic_ref::SymbolicRefArgs),
    /// Ensure that a reference name is well formed
    CheckRefFormat(check_ref_format::CheckRefFormatArgs),
    /// Show the reflog of a ref
    Reflog(reflog::ReflogArgs),
    /// Encode/decode pkt-line frames and inspect capability advertisements
    PktLine(pktline::PktLineArgs),
}

/// Resolve the git directory for ref/reflog subcommands: `--git-dir` if
/// given, else `.git` under the current directory.
pub fn git_dir(cli: &Cli) -> PathBuf {
    cli.git_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".git"))
}

pub fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::HashObject(args) => hash_object::run(args),
        Commands::CatFile(args) => cat_file::run(args),
        Commands::Mktree(args) => mktree::run(args),
        Commands::Mktag(args) => mktag::run(args),
        Commands::CommitTree(args) => commit_tree::run(args),
        Commands::PackObjects(args) => pack_objects::run(args),
        Commands::IndexPack(args) => index_pack::run(args),
        Commands::VerifyPack(args) => verify_pack::run(args),
        Commands::UnpackObjects(args) => unpack_objects::run(args),
        Commands::ShowRef(args) => show_ref::run(args, &cli),
        Commands::ForEachRef(args) => for_each_ref::run(args, &cli),
        Commands::UpdateRef(args) => update_ref::run(args, &cli),
        Commands::SymbolicRef(args) => symbolic_ref::run(args, &cli),
        Commands::CheckRefFormat(args) => check_ref_format::run(args),
        Commands::Reflog(args) => reflog::run(args, &cli),
        Commands::PktLine(args) => pktline::run(args),
    }
}
