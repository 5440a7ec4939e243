fn main() {
    if let Err(error) = vibetable::run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
