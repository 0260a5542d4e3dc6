fn main() {
    // libmp3lame ships without a pkg-config file on most distros; fall
    // back to plain linking when the probe fails.
    if pkg_config::Config::new().probe("mp3lame").is_err() {
        if let Ok(dir) = std::env::var("MP3LAME_LIB_DIR") {
            println!("cargo:rustc-link-search=native={dir}");
        }
        println!("cargo:rustc-link-lib=mp3lame");
    }
    println!("cargo:rerun-if-env-changed=MP3LAME_LIB_DIR");
}
