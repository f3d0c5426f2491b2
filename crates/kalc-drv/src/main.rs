fn main() {
    if let Err(e) = kalc_drv::main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
