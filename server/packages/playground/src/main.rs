fn main() {
    if let Err(err) = playground::cli::run_playground() {
        tracing::error!(error = %err, "playground failed");
        std::process::exit(1);
    }
}
