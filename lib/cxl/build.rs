use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

#[derive(Deserialize)]
struct FlagFile {
    constants: BTreeMap<String, String>,
}

fn parse_value(text: &str) -> Result<u64, std::num::ParseIntError> {
    let clean = text.trim().replace('_', "");
    match clean.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => clean.parse(),
    }
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let flags_str =
        fs::read_to_string(PathBuf::from(&manifest_dir).join("cxl_flags.json")).unwrap();
    let flags: FlagFile = serde_json::from_str(&flags_str).unwrap();
    make_flags(&flags, PathBuf::from(out_dir).join("build_flags.rs"));
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=cxl_flags.json");
}

fn make_flags(flags: &FlagFile, path: PathBuf) {
    let mut s = String::new();
    for (key, value) in &flags.constants {
        let value = parse_value(value)
            .unwrap_or_else(|err| panic!("Invalid value for flag '{}': {:?}", key, err));
        s += format!("pub const {}: u64 = {:#x};\n", key, value).as_str();
    }
    fs::write(path, s).unwrap();
}
