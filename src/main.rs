#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carlist::app::run().await
}
