//! Tiny binary that performs one store operation and prints the result.
//!
//! Used by the cross-process tests to verify that a second process sees
//! interned IDs and appended values through the on-disk store alone.
//!
//! Usage:
//!   `store_fixture <dir> intern <urn>`
//!   `store_fixture <dir> add <urn> <attr> <value-hex>`
//!   `store_fixture <dir> list <urn> <attr>`
//!
//! Output: `key=value` lines —
//!   `id=<u32>`           (intern, add)
//!   `values=<json>`      (list; JSON array of hex strings, head first)

use cairn_store::resolver::Resolver;
use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let dir = args.get(1).expect("usage: store_fixture <dir> <op> ...");
    let op = args.get(2).expect("missing operation").as_str();

    let resolver = Resolver::open_default(Path::new(dir)).expect("open store");

    match op {
        "intern" => {
            let urn = args.get(3).expect("intern needs <urn>");
            let id = resolver
                .get_id_by_urn(urn.as_bytes(), true)
                .expect("intern urn");
            println!("id={id}");
        }
        "add" => {
            let urn = args.get(3).expect("add needs <urn>");
            let attr = args.get(4).expect("add needs <attr>");
            let value = hex::decode(args.get(5).expect("add needs <value-hex>"))
                .expect("value is valid hex");
            resolver
                .add(urn.as_bytes(), attr.as_bytes(), &value, false)
                .expect("add value");
            let id = resolver
                .get_id_by_urn(urn.as_bytes(), false)
                .expect("fetch id");
            println!("id={id}");
        }
        "list" => {
            let urn = args.get(3).expect("list needs <urn>");
            let attr = args.get(4).expect("list needs <attr>");
            let values = resolver
                .resolve_list(urn.as_bytes(), attr.as_bytes(), true)
                .expect("resolve list");
            let encoded: Vec<String> = values.iter().map(hex::encode).collect();
            println!(
                "values={}",
                serde_json::to_string(&encoded).expect("encode values")
            );
        }
        other => panic!("unknown operation: {other}"),
    }
}
