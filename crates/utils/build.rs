use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=VERSION");
    if let Ok(version) = env::var("VERSION") {
        println!("cargo:rustc-env=IMAGE_VERSION={version}");
    }
}
