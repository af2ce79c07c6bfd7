use std::path::PathBuf;
use std::{env, fs};

fn main() {
    // Put memory.x on the linker search path for the demo firmware. The
    // copy is harmless for host test builds, which never link it.
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
}
