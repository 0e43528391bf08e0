#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reminder_engine_lib::run().await
}
