//! RDF export contract: exclusion sets, the volatile namespace, and
//! triple shape, driven through the public serializer API.

use cairn_store::rdf::{RdfFormat, RdfSerializer};
use cairn_store::resolver::Resolver;
use std::cell::RefCell;
use std::rc::Rc;

fn export(resolver: &Resolver, urn: &[u8], exclude: &[&[u8]], format: RdfFormat) -> String {
    let out = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&out);
    let mut serializer = RdfSerializer::new(
        resolver,
        move |bytes: &[u8]| captured.borrow_mut().extend_from_slice(bytes),
        "",
        format,
    );
    serializer.serialize_urn(urn, exclude).expect("serialize");
    serializer.close();
    let bytes = out.borrow().clone();
    String::from_utf8(bytes).expect("utf8")
}

#[test]
fn exports_asserted_triples_and_hides_volatile() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    r.add(b"s1", b"name", b"alice", false).unwrap();
    r.add(b"s1", b"aff4volatile:tmp", b"secret", false).unwrap();

    let out = export(&r, b"s1", &[], RdfFormat::Turtle);
    assert!(out.contains("<s1> <name> \"alice\" .\n"), "got: {out}");
    assert!(!out.contains("aff4volatile:tmp"), "got: {out}");
    assert!(!out.contains("secret"), "got: {out}");
}

#[test]
fn exclude_set_filters_exact_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    r.add(b"s1", b"size", b"12", false).unwrap();
    r.add(b"s1", b"sizeof", b"13", false).unwrap();

    let out = export(&r, b"s1", &[b"size"], RdfFormat::NTriples);
    assert!(!out.contains("<size>"), "excluded predicate leaked: {out}");
    assert!(out.contains("<sizeof> \"13\""), "prefix-sharing predicate lost: {out}");
}

#[test]
fn every_list_value_becomes_a_triple() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    for v in [b"one".as_slice(), b"two", b"three"] {
        r.add(b"s", b"tag", v, false).unwrap();
    }
    let out = export(&r, b"s", &[], RdfFormat::NTriples);
    assert_eq!(out.matches("<s> <tag>").count(), 3, "got: {out}");
    for v in ["one", "two", "three"] {
        assert!(out.contains(&format!("\"{v}\"")), "missing {v}: {out}");
    }
}

#[test]
fn attributes_of_other_subjects_do_not_bleed_in() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    // Interleave attribute creation so the two subjects' attribute IDs
    // interleave too; the ID scan must still select only s1's entries.
    r.add(b"s1", b"a1", b"v1", false).unwrap();
    r.add(b"s2", b"b1", b"w1", false).unwrap();
    r.add(b"s1", b"a2", b"v2", false).unwrap();
    r.add(b"s2", b"b2", b"w2", false).unwrap();

    let out = export(&r, b"s1", &[], RdfFormat::NTriples);
    assert!(out.contains("\"v1\"") && out.contains("\"v2\""), "got: {out}");
    assert!(!out.contains("\"w1\"") && !out.contains("\"w2\""), "got: {out}");
}

#[test]
fn unknown_subject_fails_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    let out = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&out);
    let mut serializer = RdfSerializer::new(
        &r,
        move |bytes: &[u8]| captured.borrow_mut().extend_from_slice(bytes),
        "",
        RdfFormat::Turtle,
    );
    assert!(serializer.serialize_urn(b"nope", &[]).is_err());
}

#[test]
fn lock_anchors_do_not_appear_in_export() {
    let dir = tempfile::tempdir().unwrap();
    let r = Resolver::open_default(dir.path()).unwrap();
    r.add(b"s", b"name", b"alice", false).unwrap();
    r.lock(b"s", 'w').unwrap();
    r.lock(b"s", 'r').unwrap();
    r.release(b"s", 'r').unwrap();
    r.release(b"s", 'w').unwrap();

    let out = export(&r, b"s", &[], RdfFormat::NTriples);
    // The anchor attributes are real registry entries; an embedder that
    // does not want them exported excludes them explicitly.
    let filtered = export(&r, b"s", &[b"__WLOCK", b"__RLOCK"], RdfFormat::NTriples);
    assert!(out.contains("\"alice\""));
    assert!(!filtered.contains("__WLOCK") && !filtered.contains("__RLOCK"), "got: {filtered}");
    assert!(filtered.contains("\"alice\""));
}
