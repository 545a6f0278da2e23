fn main() {
    if let Err(err) = adaptive_dash::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
