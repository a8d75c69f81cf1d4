//! `orches version`.

const GIT_REF: Option<&str> = option_env!("ORCHES_GIT_REF");
const BUILD_TIME: Option<&str> = option_env!("ORCHES_BUILD_TIME");

pub fn run() {
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("gitref: {}", GIT_REF.unwrap_or("unknown"));
    println!("buildtime: {}", BUILD_TIME.unwrap_or("unknown"));
}
