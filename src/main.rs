fn main() {
    if let Err(err) = symbol_placement::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
