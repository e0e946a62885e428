//! Integration tests for refspec matching/expansion as used by a push flow.

use git_protocol::refspec::{expand_all, RefSpec};

#[test]
fn refspec_standard_fetch() {
    let spec = RefSpec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
    assert!(spec.force);
    assert_eq!(
        spec.expand("refs/heads/main"),
        Some("refs/remotes/origin/main".into())
    );
    assert_eq!(
        spec.expand("refs/heads/feature/long-name"),
        Some("refs/remotes/origin/feature/long-name".into())
    );
}

#[test]
fn refspec_standard_push() {
    let spec = RefSpec::parse("refs/heads/main:refs/heads/main").unwrap();
    assert!(spec.matches("refs/heads/main"));
    assert_eq!(spec.expand("refs/heads/main"), Some("refs/heads/main".into()));
    assert!(!spec.matches("refs/heads/develop"));
}

#[test]
fn batch_expand_push_refspecs() {
    let specs = vec![
        RefSpec::parse("refs/heads/main:refs/heads/main").unwrap(),
        RefSpec::parse("+refs/heads/release/*:refs/heads/release/*").unwrap(),
    ];
    let local_refs = [
        "refs/heads/main",
        "refs/heads/release/1.0",
        "refs/heads/scratch",
    ];

    let mapped = expand_all(local_refs, &specs);
    assert_eq!(mapped.len(), 2);
    assert_eq!(mapped[0], ("refs/heads/main".into(), "refs/heads/main".into()));
    assert_eq!(
        mapped[1],
        ("refs/heads/release/1.0".into(), "refs/heads/release/1.0".into())
    );
}

#[test]
fn delete_refspec_has_no_source_wildcard() {
    // A bare-destination refspec (e.g. used to delete a remote ref as
    // `:refs/heads/gone`) has an empty source and a destination.
    let spec = RefSpec::parse(":refs/heads/gone").unwrap();
    assert_eq!(spec.source, "");
    assert_eq!(spec.destination.as_deref(), Some("refs/heads/gone"));
}
