fn main() {
    if let Err(err) = clinic_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
