fn main() {
    println!("cargo:rerun-if-env-changed=OPENALPR_LIB_DIR");

    // Only needed when linking the real engine
    if std::env::var_os("CARGO_FEATURE_ENGINE_OPENALPR").is_some() {
        if let Ok(dir) = std::env::var("OPENALPR_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
        }
    }
}
