use std::path::PathBuf;

use isslive::{Catalog, Session};

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

#[allow(dead_code)]
pub fn fixture_session(db: &str) -> Session {
    let catalog = Catalog::with_file(fixture_path(db), false).expect("fixture catalog");
    Session::new(catalog)
}
