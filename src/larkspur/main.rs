// Copyright: Oleander Transit Dashboard contributors
// Larkspur: HTTP surface over the live tracking core

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_unit_value,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect
)]

use actix_web::middleware::DefaultHeaders;
use actix_web::{App, HttpResponse, HttpServer, Responder, middleware, web};
use clap::Parser;
use oleander::change_feed::spawn_change_listener;
use oleander::datasource::{MemorySource, TransitSource, spawn_demo_feed};
use oleander::models::Notice;
use oleander::pg_source::PgSource;
use oleander::search::search_transit;
use oleander::selection::SelectionContext;
use oleander::sync::SyncController;
use oleander::{CHANGE_COALESCE_WINDOW_MS, STOP_FOCUS_ZOOM};
use serde_derive::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const NOTICE_BUFFER_LEN: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "larkspur", about = "Oleander live tracking API server")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8181)]
    port: u16,
    /// Serve the built-in demo dataset with a simulated live feed instead of
    /// connecting to postgres.
    #[arg(long)]
    demo: bool,
}

struct AppState {
    controller: Arc<SyncController>,
    selection: Arc<SelectionContext>,
    notices: Arc<RwLock<VecDeque<Notice>>>,
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain"))
        .body("Hello from the Oleander Larkspur endpoint!")
}

#[actix_web::get("/snapshot")]
async fn snapshot(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.controller.snapshot())
}

#[actix_web::get("/routes")]
async fn routes(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.controller.snapshot().routes)
}

#[actix_web::get("/stops")]
async fn stops(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.controller.snapshot().stops)
}

#[derive(Deserialize)]
struct SearchQuery {
    text: String,
}

#[actix_web::get("/search")]
async fn search(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> impl Responder {
    let snap = state.controller.snapshot();
    let results = search_transit(&query.text, &snap.routes, &snap.stops);
    HttpResponse::Ok().json(results)
}

#[actix_web::get("/selection")]
async fn selection(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.selection.current())
}

#[actix_web::get("/notices")]
async fn notices(state: web::Data<AppState>) -> impl Responder {
    let buffer = state.notices.read().unwrap();
    HttpResponse::Ok().json(buffer.iter().cloned().collect::<Vec<Notice>>())
}

#[actix_web::post("/refresh")]
async fn refresh(state: web::Data<AppState>) -> impl Responder {
    match state.controller.refresh().await {
        Ok(()) => HttpResponse::Ok().json(state.controller.snapshot()),
        // The previous snapshot is still being served; tell the caller the
        // refresh itself failed.
        Err(error) => HttpResponse::BadGateway().json(serde_json::json!({
            "error": error.to_string(),
        })),
    }
}

#[derive(Deserialize)]
struct SelectVehicleBody {
    vehicle_id: String,
}

#[actix_web::post("/select_vehicle")]
async fn select_vehicle(
    state: web::Data<AppState>,
    body: web::Json<SelectVehicleBody>,
) -> impl Responder {
    state.selection.select_vehicle(&body.vehicle_id);
    HttpResponse::Ok().json(state.selection.current())
}

#[actix_web::post("/deselect")]
async fn deselect(state: web::Data<AppState>) -> impl Responder {
    state.selection.deselect();
    HttpResponse::Ok().json(state.selection.current())
}

#[derive(Deserialize)]
struct FocusBody {
    lat: f64,
    lon: f64,
    zoom: Option<u8>,
}

#[actix_web::post("/focus")]
async fn focus(state: web::Data<AppState>, body: web::Json<FocusBody>) -> impl Responder {
    state
        .selection
        .focus_on(body.lat, body.lon, body.zoom.unwrap_or(STOP_FOCUS_ZOOM));
    HttpResponse::Ok().json(state.selection.current())
}

#[actix_web::post("/search_select")]
async fn search_select(
    state: web::Data<AppState>,
    body: web::Json<oleander::models::SearchResult>,
) -> impl Responder {
    state.selection.apply_search_result(&body);
    HttpResponse::Ok().json(state.selection.current())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let args = Args::parse();

    let source: Arc<dyn TransitSource> = if args.demo || std::env::var("DATABASE_URL").is_err() {
        tracing::info!("running in demo mode with the built-in dataset");
        let memory = Arc::new(MemorySource::with_demo_data());
        // Detached for the process lifetime.
        let _ = spawn_demo_feed(memory.clone(), Duration::from_secs(3));
        memory
    } else {
        let database_url = std::env::var("DATABASE_URL")?;
        tracing::info!("connecting to postgres");
        Arc::new(PgSource::connect(&database_url).await?)
    };

    let controller = Arc::new(SyncController::new(source.clone()));
    let selection_ctx = Arc::new(SelectionContext::new(
        controller.snapshot_rx(),
        controller.notice_sender(),
    ));

    if let Err(error) = controller.fetch_all().await {
        tracing::warn!(%error, "initial fetch failed, serving empty snapshot until the feed recovers");
    }

    let subscription = source
        .subscribe_changes()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let _listener = spawn_change_listener(
        controller.clone(),
        subscription,
        Duration::from_millis(CHANGE_COALESCE_WINDOW_MS),
    );

    let notice_buffer = Arc::new(RwLock::new(VecDeque::with_capacity(NOTICE_BUFFER_LEN)));
    {
        let notice_buffer = notice_buffer.clone();
        let mut notice_rx = controller.notices();
        let _ = tokio::spawn(async move {
            loop {
                match notice_rx.recv().await {
                    Ok(notice) => {
                        tracing::info!(title = %notice.title, body = %notice.body, "notice");
                        let mut buffer = notice_buffer.write().unwrap();
                        if buffer.len() == NOTICE_BUFFER_LEN {
                            buffer.pop_front();
                        }
                        buffer.push_back(notice);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notice stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let state = web::Data::new(AppState {
        controller,
        selection: selection_ctx,
        notices: notice_buffer,
    });

    tracing::info!(host = %args.host, port = args.port, "larkspur listening");
    HttpServer::new(move || {
        App::new()
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Server", "Oleander")),
            )
            .wrap(middleware::Compress::default())
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(snapshot)
            .service(routes)
            .service(stops)
            .service(search)
            .service(selection)
            .service(notices)
            .service(refresh)
            .service(select_vehicle)
            .service(deselect)
            .service(focus)
            .service(search_select)
    })
    .bind((args.host.as_str(), args.port))?
    .run()
    .await?;

    Ok(())
}
