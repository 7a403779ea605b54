//! Resolver contract tests: list ordering, uniqueness, set semantics,
//! inheritance, deletion, and export hygiene, exercised through the
//! public API against a scratch store directory.

use cairn_store::resolver::{Resolver, INHERIT};

fn open_in(dir: &tempfile::TempDir) -> Resolver {
    Resolver::open_default(dir.path()).expect("open resolver")
}

#[test]
fn successive_adds_list_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"s1", b"p", b"v1", false).unwrap();
    r.add(b"s1", b"p", b"v2", false).unwrap();
    assert_eq!(
        r.resolve_list(b"s1", b"p", true).unwrap(),
        vec![b"v2".to_vec(), b"v1".to_vec()]
    );
}

#[test]
fn unique_add_twice_keeps_single_value() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"s1", b"p", b"v1", true).unwrap();
    r.add(b"s1", b"p", b"v1", true).unwrap();
    assert_eq!(r.resolve_list(b"s1", b"p", true).unwrap(), vec![b"v1".to_vec()]);
}

#[test]
fn unique_add_sees_inherited_values() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"child", INHERIT, b"parent", false).unwrap();
    r.add(b"parent", b"p", b"shared", false).unwrap();
    // The value is visible through inheritance, so the unique add skips.
    r.add(b"child", b"p", b"shared", true).unwrap();
    assert_eq!(
        r.resolve_list(b"child", b"p", false).unwrap(),
        Vec::<Vec<u8>>::new()
    );
}

#[test]
fn inheritance_walk_and_suppression() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"s2", INHERIT, b"s1", false).unwrap();
    r.add(b"s1", b"colour", b"red", false).unwrap();
    assert_eq!(
        r.resolve_list(b"s2", b"colour", true).unwrap(),
        vec![b"red".to_vec()]
    );
    assert_eq!(
        r.resolve_list(b"s2", b"colour", false).unwrap(),
        Vec::<Vec<u8>>::new()
    );
}

#[test]
fn set_overwrites_and_set_again_replaces() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.set(b"s1", b"p", b"x").unwrap();
    assert_eq!(r.resolve_list(b"s1", b"p", true).unwrap(), vec![b"x".to_vec()]);
    r.set(b"s1", b"p", b"y").unwrap();
    assert_eq!(r.resolve_list(b"s1", b"p", true).unwrap(), vec![b"y".to_vec()]);
}

#[test]
fn delete_then_add_starts_fresh_list() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    for v in [b"a".as_slice(), b"b", b"c"] {
        r.add(b"s", b"p", v, false).unwrap();
    }
    r.delete(b"s", b"p").unwrap();
    assert_eq!(
        r.resolve_list(b"s", b"p", false).unwrap(),
        Vec::<Vec<u8>>::new()
    );
    r.add(b"s", b"p", b"fresh", false).unwrap();
    assert_eq!(
        r.resolve_list(b"s", b"p", false).unwrap(),
        vec![b"fresh".to_vec()]
    );
}

#[test]
fn export_all_urns_never_leaks_hidden_keys() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"urn:one", b"p", b"v", false).unwrap();
    r.lock(b"urn:one", 'r').unwrap();
    r.release(b"urn:one", 'r').unwrap();
    r.set(b"urn:two", b"q", b"w").unwrap();

    for urn in r.export_all_urns().unwrap() {
        assert_ne!(urn.first(), Some(&b'_'), "leaked hidden key: {urn:?}");
    }
    assert_eq!(
        r.export_all_urns().unwrap(),
        vec![b"urn:one".to_vec(), b"urn:two".to_vec()]
    );
}

#[test]
fn export_dict_matches_resolve_list() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"s", b"name", b"alice", false).unwrap();
    r.add(b"s", b"tag", b"one", false).unwrap();
    r.add(b"s", b"tag", b"two", false).unwrap();

    let dict = r.export_dict(b"s").unwrap();
    for (attr, values) in &dict {
        assert_eq!(values, &r.resolve_list(b"s", attr, false).unwrap());
    }
    assert_eq!(dict.len(), 2);
}

#[test]
fn values_are_opaque_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    let binary: Vec<u8> = (0u8..=255).collect();
    r.add(b"s", b"blob", &binary, false).unwrap();
    assert_eq!(r.resolve_list(b"s", b"blob", false).unwrap(), vec![binary]);
}

#[test]
fn empty_value_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let r = open_in(&dir);
    r.add(b"s", b"empty", b"", false).unwrap();
    assert_eq!(
        r.resolve_list(b"s", b"empty", false).unwrap(),
        vec![Vec::<u8>::new()]
    );
}
