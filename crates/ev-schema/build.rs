//! Precomputes the MD5 identity of each embedded schema at build time, the
//! same role `generated/schema/*.h` plays in the original C++ build: a
//! constant baked in alongside the schema text itself, so a runtime
//! recomputation can be checked against it as a build-pipeline sanity
//! check rather than trusted blindly.

use std::env;
use std::fs;
use std::path::Path;

fn schema_md5(path: &str) -> String {
    let bytes = fs::read(path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
    format!("{:x}", md5::compute(&bytes))
}

fn main() {
    let manifest_md5 = schema_md5("src/schemas/manifest.schema.json");
    let interface_md5 = schema_md5("src/schemas/interface.schema.json");
    let config_md5 = schema_md5("src/schemas/config.schema.json");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR set by cargo");
    let dest = Path::new(&out_dir).join("schema_hashes.rs");

    let contents = format!(
        "pub const MANIFEST_SCHEMA_MD5: &str = \"{manifest_md5}\";\n\
         pub const INTERFACE_SCHEMA_MD5: &str = \"{interface_md5}\";\n\
         pub const CONFIG_SCHEMA_MD5: &str = \"{config_md5}\";\n"
    );

    fs::write(&dest, contents).unwrap_or_else(|e| panic!("failed to write {}: {e}", dest.display()));

    println!("cargo:rerun-if-changed=src/schemas/manifest.schema.json");
    println!("cargo:rerun-if-changed=src/schemas/interface.schema.json");
    println!("cargo:rerun-if-changed=src/schemas/config.schema.json");
}
