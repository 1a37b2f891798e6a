//! `helmcue version` - print build metadata.

pub fn run() {
    println!("helmcue version {}", env!("CARGO_PKG_VERSION"));
    if let Some(hash) = option_env!("HELMCUE_BUILD_COMMIT") {
        println!("{:>16} {}", "vcs.revision", hash);
    }
    println!("{:>16} {}", "target", std::env::consts::ARCH);
    println!("{:>16} {}", "os", std::env::consts::OS);
}
