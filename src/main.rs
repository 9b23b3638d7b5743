use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use wallet_ledger::config::Config;
use wallet_ledger::database::connect::{create_db_connection_pool, run_migrations};
use wallet_ledger::database::memory::MemoryStore;
use wallet_ledger::database::postgres::PgStore;
use wallet_ledger::database::Store;
use wallet_ledger::engine::PaymentService;
use wallet_ledger::gateway::HttpGateway;
use wallet_ledger::notify::LogNotifier;
use wallet_ledger::{routes, sweeper};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("wallet-ledger".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;
    info!(gateway = ?config.gateway, sweeper = ?config.sweeper, "starting");

    let store = match &config.database_url {
        Some(url) => {
            let db = create_db_connection_pool(url)?;
            run_migrations(&db)?;
            Store::Postgres(PgStore::new(db))
        }
        None => {
            warn!("DATABASE_URL is not set, balances are kept in memory only");
            Store::Memory(MemoryStore::new())
        }
    };
    let gateway = HttpGateway::new(&config.gateway)?;
    let service = PaymentService::new(Arc::new(store), Arc::new(gateway), Arc::new(LogNotifier));

    if config.sweeper.enabled {
        sweeper::spawn(service.clone(), config.sweeper.clone());
    }

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .wrap(TracingLogger::default())
            .app_data(Data::new(service.clone()))
            .configure(routes::configure)
    });

    server.bind(&config.bind_address)?.run().await?;
    Ok(())
}
