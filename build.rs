//! Build script: forwards build-time release identity into the compile environment.
//!
//! Release builds set `URLNAV_BUILD_VERSION`, `URLNAV_RELEASE_OWNER` and
//! `URLNAV_RELEASE_PROJECT`; the library reads them back with `option_env!`.

const FORWARDED: [&str; 3] = [
    "URLNAV_BUILD_VERSION",
    "URLNAV_RELEASE_OWNER",
    "URLNAV_RELEASE_PROJECT",
];

fn main() {
    for key in FORWARDED {
        println!("cargo::rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            let value = value.trim();
            if !value.is_empty() {
                println!("cargo::rustc-env={key}={value}");
            }
        }
    }
}
