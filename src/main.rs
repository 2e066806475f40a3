use apitoll::run;

#[tokio::main]
async fn main() {
    match run::run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("apitoll failed to start: {e}");
            std::process::exit(1);
        }
    }
}
