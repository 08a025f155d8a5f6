use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
    HeaderValue,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use relaygate::error::DispatchError;
use relaygate::introspection::spawn_schema_polling;
use relaygate::{ErrorInfo, FederationGateway, GatewayConfig, GatewayError, GraphQLRequest, MergedResponse};

type ResponseBody = BoxBody<Bytes, hyper::Error>;

#[derive(Parser, Debug)]
#[command(name = "relaygate", about = "Federated GraphQL query dispatcher")]
struct Args {
    /// Gateway configuration file.
    #[arg(short, long, default_value = "gateway.yaml")]
    config: PathBuf,

    /// Overrides `listen` from the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

fn full<T: Into<Bytes>>(value: T) -> ResponseBody {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<ResponseBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn respond_json(status: StatusCode, body: &impl Serialize) -> Response<ResponseBody> {
    match serde_json::to_vec(body) {
        Ok(json) => respond(status, "application/json", json),
        Err(error) => {
            tracing::error!(%error, "failed to serialize response");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "Internal Server Error")
        }
    }
}

fn bad_request(message: impl Into<String>) -> Response<ResponseBody> {
    respond_json(
        StatusCode::BAD_REQUEST,
        &MergedResponse::from_errors(vec![ErrorInfo::new(message)]),
    )
}

fn error_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Plan(_) => StatusCode::BAD_REQUEST,
        GatewayError::RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Dispatch(DispatchError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Dispatch(DispatchError::InvalidPlan(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn execute(req: Request<Incoming>, gateway: Arc<FederationGateway>) -> Response<ResponseBody> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => return bad_request(format!("Failed to read request body: {error}")),
    };
    let request: GraphQLRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => return bad_request(format!("Invalid JSON request: {error}")),
    };
    if request.query.trim().is_empty() {
        return bad_request("Must provide query string.");
    }

    // Dropped with the connection when the client goes away.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match gateway.handle_request_with_cancellation(request, cancel).await {
        Ok(response) => respond_json(StatusCode::OK, &response),
        Err(error) => {
            if !error.is_client_error() {
                tracing::warn!(%error, "request failed");
            }
            respond_json(
                error_status(&error),
                &MergedResponse::from_errors(vec![error.to_error_info()]),
            )
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<ResponseBody>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => execute(req, gateway).await,

        (&Method::OPTIONS, _) => {
            let mut response = respond(StatusCode::NO_CONTENT, "text/plain", "");
            let headers = response.headers_mut();
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST, OPTIONS"));
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type, Authorization"),
            );
            response
        }

        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relaygate=info")))
        .init();

    let args = Args::parse();
    let config = Arc::new(GatewayConfig::from_file(&args.config)?);
    let gateway = Arc::new(FederationGateway::from_config(&config).await?);

    let shutdown = CancellationToken::new();
    let polling = config.poll_interval().map(|interval| {
        spawn_schema_polling(
            Arc::clone(gateway.registry()),
            Arc::clone(&config),
            reqwest::Client::new(),
            interval,
            shutdown.clone(),
        )
    });

    let addr = args.listen.unwrap_or(config.listen);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "relaygate listening on http://{addr}/graphql");

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        };
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, Arc::clone(&gateway)));

            if let Err(error) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%remote, %error, "error serving connection");
            }
        });
    }

    shutdown.cancel();
    if let Some(polling) = polling {
        polling.await?;
    }
    Ok(())
}
