mod bus;
mod drivers;
mod host;
mod resolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
