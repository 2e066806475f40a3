use apitoll_facilitator::run;

#[tokio::main]
async fn main() {
    match run::run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("apitoll-facilitator failed to start: {e}");
            std::process::exit(1);
        }
    }
}
