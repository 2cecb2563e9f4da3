fn main() {
    if let Err(err) = fingerprint_demo_lib::run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
