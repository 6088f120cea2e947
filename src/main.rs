use devo_sdk::app;

#[tokio::main]
async fn main() {
    let code = app::main().await;
    std::process::exit(code);
}
