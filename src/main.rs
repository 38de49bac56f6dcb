use roomfleet::handler::RoomDefinition;
use roomfleet::matchmaker::Matchmaker;
use roomfleet::presence::LocalPresence;
use roomfleet::registry::LocalRegistryDriver;
use roomfleet::rooms::echo;
use roomfleet::transport::http;
use roomfleet::utils::generate_id;
use std::sync::Arc;

#[actix::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let presence = Arc::new(LocalPresence::new());
    let driver = Arc::new(LocalRegistryDriver::new());
    let process_id = format!("process-{}", generate_id(6));
    let matchmaker = Matchmaker::new(process_id, presence, driver);

    matchmaker
        .define(RoomDefinition::new("echo", Box::new(echo::factory)).max_clients(4))
        .await;
    matchmaker.clone().spawn_reservation_sweeper();

    let server_matchmaker = matchmaker.clone();
    let bind_addr = std::env::var("ROOMFLEET_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down, disconnecting local rooms");
            if let Err(err) = server_matchmaker.graceful_shutdown().await {
                log::error!("graceful shutdown failed: {err}");
            }
            std::process::exit(0);
        }
    });

    log::info!("listening on {bind_addr}");
    http::start(matchmaker, &bind_addr).await
}
