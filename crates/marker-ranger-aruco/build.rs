//! Generates `builtins.rs` from the dictionary tables in `data/`.

use serde::Deserialize;
use std::{env, fmt::Write as _, fs, path::PathBuf};

#[derive(Deserialize)]
struct DictionaryFile {
    name: String,
    marker_size: usize,
    max_correction_bits: u8,
    codes: Vec<u64>,
}

const SOURCES: &[&str] = &["DICT_4X4_50", "DICT_4X4_100"];

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let mut src = String::new();
    let mut names = Vec::new();

    for source in SOURCES {
        let path = manifest_dir.join("data").join(format!("{source}_CODES.json"));
        println!("cargo:rerun-if-changed={}", path.display());

        let raw = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
        let dict: DictionaryFile = serde_json::from_str(&raw)
            .unwrap_or_else(|e| panic!("parse {}: {e}", path.display()));
        assert_eq!(dict.name, *source, "{} declares a different name", path.display());
        assert!(
            dict.marker_size * dict.marker_size <= 64,
            "{} bits do not fit in u64",
            dict.name
        );

        let codes = dict
            .codes
            .iter()
            .map(|c| format!("0x{c:x}"))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            src,
            "const {name}_CODES: [u64; {n}] = [{codes}];\n\
             /// Built-in `{name}` dictionary.\n\
             pub const {name}: crate::Dictionary = crate::Dictionary {{\n    \
             name: \"{name}\",\n    marker_size: {size},\n    \
             max_correction_bits: {mcb},\n    codes: &{name}_CODES,\n}};\n",
            name = dict.name,
            n = dict.codes.len(),
            size = dict.marker_size,
            mcb = dict.max_correction_bits,
        )
        .expect("write to string");
        names.push(dict.name);
    }

    writeln!(
        src,
        "/// Every embedded dictionary, in declaration order.\n\
         pub const ALL: &[crate::Dictionary] = &[{}];\n",
        names.join(", ")
    )
    .expect("write to string");

    src.push_str(
        "/// Look up an embedded dictionary by its OpenCV-style name (e.g. `DICT_4X4_50`).\n\
         pub fn builtin_dictionary(name: &str) -> Option<crate::Dictionary> {\n    \
         ALL.iter().copied().find(|d| d.name.eq_ignore_ascii_case(name))\n}\n",
    );

    fs::write(out_dir.join("builtins.rs"), src).expect("write builtins.rs");
}
