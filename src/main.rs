#[tokio::main]
async fn main() -> anyhow::Result<()> {
    browsion_query_lib::init_tracing();

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => browsion_query_lib::run().await?,
        Some("check") => browsion_query_lib::check().await?,
        Some(other) => anyhow::bail!("unknown command '{}' (expected 'serve' or 'check')", other),
    }
    Ok(())
}
