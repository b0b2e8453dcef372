#[tokio::main]
async fn main() {
    if let Err(error) = signal_desk_lib::run().await {
        tracing::error!(%error, "signal desk exited with an error");
        eprintln!("signal-desk: {error}");
        std::process::exit(1);
    }
}
