//! Query API
//!
//! The read surface of the service: one query endpoint accepting the request
//! either as GET parameters or as an FDSN-style POST body, plus the
//! peer-facing `/localconfig` and `/dc` documents and a version probe.
//! Resolver and input errors map onto HTTP status codes here; nothing below
//! this layer knows about HTTP.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::Command;
use crate::config::Listener as ListenerConfig;
use crate::merge::RequestMerge;
use crate::render::{OutputFormat, render};
use crate::resolver::{ResolveError, resolve};
use crate::snapshot::RoutingState;
use crate::stations::GeoRectangle;
use crate::stream::Stream;
use crate::table::Service;
use crate::window::{TimeWindow, parse_timestamp};

/// Requests with a longer URI are refused with 414.
pub const MAX_URI_BYTES: usize = 2000;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("unparseable time '{0}'")]
    BadTime(String),

    #[error("'start' must be before 'end'")]
    InvertedWindow,

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown format '{0}'")]
    BadFormat(String),

    #[error("'alternative' must be literally 'true' or 'false'")]
    BadAlternative,

    #[error("alternative routes cannot be rendered in 'get' format")]
    AlternativeWithGet,

    #[error("bad coordinate '{0}'")]
    BadCoordinate(String),

    #[error("malformed request line '{0}'")]
    BadRequestLine(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Input(#[from] QueryError),

    #[error("no routes match the request")]
    NoRoutes,

    #[error("request URI exceeds {MAX_URI_BYTES} bytes")]
    UriTooLarge,

    #[error("the routing service is not ready yet")]
    NotReady,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoRoutes => ApiError::NoRoutes,
        }
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NoRoutes => return StatusCode::NO_CONTENT.into_response(),
            ApiError::Input(_) => StatusCode::BAD_REQUEST,
            ApiError::UriTooLarge => StatusCode::URI_TOO_LONG,
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// A fully validated query.
#[derive(Debug, PartialEq)]
pub struct QueryRequest {
    pub stream: Stream,
    pub window: TimeWindow,
    pub services: Vec<Service>,
    pub format: OutputFormat,
    pub alternative: bool,
    pub geo: Option<GeoRectangle>,
}

/// Normalizes short and long parameter spellings onto one name.
fn canonical(key: &str) -> &str {
    match key {
        "network" => "net",
        "station" => "sta",
        "location" => "loc",
        "channel" => "cha",
        "starttime" => "start",
        "endtime" => "end",
        "minlatitude" => "minlat",
        "maxlatitude" => "maxlat",
        "minlongitude" => "minlon",
        "maxlongitude" => "maxlon",
        other => other,
    }
}

/// Validates and assembles a query from decoded key/value pairs.
pub fn parse_query(pairs: &[(String, String)]) -> Result<QueryRequest, QueryError> {
    let mut codes = ["*", "*", "*", "*"].map(String::from);
    let mut start = None;
    let mut end = None;
    let mut service_list = "dataselect".to_string();
    let mut format_name = "xml".to_string();
    let mut alternative = false;
    let mut bounds: [Option<f64>; 4] = [None; 4];

    for (key, value) in pairs {
        let value = value.trim();
        match canonical(key) {
            "net" if !value.is_empty() => codes[0] = value.to_string(),
            "sta" if !value.is_empty() => codes[1] = value.to_string(),
            "loc" if !value.is_empty() => codes[2] = value.to_string(),
            "cha" if !value.is_empty() => codes[3] = value.to_string(),
            "net" | "sta" | "loc" | "cha" => {}
            "start" => {
                start =
                    Some(parse_timestamp(value).map_err(|_| QueryError::BadTime(value.into()))?);
            }
            "end" => {
                end = Some(parse_timestamp(value).map_err(|_| QueryError::BadTime(value.into()))?);
            }
            "service" => service_list = value.to_string(),
            "format" => format_name = value.to_string(),
            "alternative" => {
                alternative = match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(QueryError::BadAlternative),
                };
            }
            "minlat" => bounds[0] = Some(coordinate(value)?),
            "maxlat" => bounds[1] = Some(coordinate(value)?),
            "minlon" => bounds[2] = Some(coordinate(value)?),
            "maxlon" => bounds[3] = Some(coordinate(value)?),
            other => return Err(QueryError::UnknownParameter(other.to_string())),
        }
    }

    let window = TimeWindow::new(start, end).map_err(|_| QueryError::InvertedWindow)?;

    let mut services = Vec::new();
    for name in service_list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match Service::from_name(name) {
            Service::Other(unknown) => return Err(QueryError::UnknownService(unknown)),
            service => services.push(service),
        }
    }
    if services.is_empty() {
        services.push(Service::Dataselect);
    }

    let format = OutputFormat::from_name(&format_name)
        .ok_or_else(|| QueryError::BadFormat(format_name.clone()))?;
    if alternative && format == OutputFormat::Get {
        return Err(QueryError::AlternativeWithGet);
    }

    let geo = if bounds.iter().any(Option::is_some) {
        Some(GeoRectangle {
            min_lat: bounds[0].unwrap_or(-90.0),
            max_lat: bounds[1].unwrap_or(90.0),
            min_lon: bounds[2].unwrap_or(-180.0),
            max_lon: bounds[3].unwrap_or(180.0),
        })
    } else {
        None
    };

    let [net, sta, loc, cha] = codes;
    Ok(QueryRequest {
        stream: Stream::new(net, sta, loc, cha),
        window,
        services,
        format,
        alternative,
        geo,
    })
}

fn coordinate(value: &str) -> Result<f64, QueryError> {
    value
        .parse::<f64>()
        .map_err(|_| QueryError::BadCoordinate(value.to_string()))
}

/// Parses a POST body: leading `key=value` option lines, then newline
/// delimited `net sta loc cha start end` rows.
pub fn parse_post(body: &str) -> Result<(QueryRequest, Vec<(Stream, TimeWindow)>), QueryError> {
    let mut options: Vec<(String, String)> = Vec::new();
    let mut rows: Vec<(Stream, TimeWindow)> = Vec::new();
    let mut in_header = true;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if in_header && let Some((key, value)) = line.split_once('=') {
            if key.contains(char::is_whitespace) {
                return Err(QueryError::BadRequestLine(line.to_string()));
            }
            options.push((key.trim().to_string(), value.trim().to_string()));
            continue;
        }
        in_header = false;

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[net, sta, loc, cha, start, end] = tokens.as_slice() else {
            return Err(QueryError::BadRequestLine(line.to_string()));
        };
        let loc = if loc == "--" { "" } else { loc };
        let start = parse_timestamp(start).map_err(|_| QueryError::BadTime(start.to_string()))?;
        let end = parse_timestamp(end).map_err(|_| QueryError::BadTime(end.to_string()))?;
        let window =
            TimeWindow::new(Some(start), Some(end)).map_err(|_| QueryError::InvertedWindow)?;
        rows.push((Stream::new(net, sta, loc, cha), window));
    }

    if rows.is_empty() {
        return Err(QueryError::BadRequestLine("empty request body".into()));
    }
    let request = parse_query(&options)?;
    Ok((request, rows))
}

pub struct AppState {
    pub routing: RoutingState,
    pub refresh: mpsc::Sender<Command>,
    pub routing_file: PathBuf,
    pub datacenter_file: Option<PathBuf>,
}

pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", get(query_get).post(query_post))
        .route("/refresh", post(trigger_refresh))
        .route("/localconfig", get(localconfig))
        .route("/dc", get(datacenter))
        .route("/version", get(version))
        .with_state(app)
}

pub async fn serve(listener: &ListenerConfig, app: Arc<AppState>) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(app)).await?;
    Ok(())
}

fn respond(request: &QueryRequest, merge: &RequestMerge, datacenters: &[String]) -> Response {
    match render(request.format, merge, datacenters) {
        Ok(body) => (
            [(header::CONTENT_TYPE, request.format.content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("render failure: {err}");
            ApiError::Internal(err.to_string()).into_response()
        }
    }
}

async fn query_get(State(app): State<Arc<AppState>>, uri: Uri) -> Result<Response, ApiError> {
    if uri.to_string().len() > MAX_URI_BYTES {
        return Err(ApiError::UriTooLarge);
    }
    if !app.routing.is_ready() {
        return Err(ApiError::NotReady);
    }

    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(
        uri.query().unwrap_or("").as_bytes(),
    )
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let request = parse_query(&pairs)?;

    let snapshot = app.routing.current();
    let merge = resolve(
        &snapshot,
        &request.stream,
        &request.window,
        &request.services,
        request.geo.as_ref(),
        request.alternative,
    )?;
    Ok(respond(&request, &merge, &snapshot.datacenters))
}

async fn query_post(State(app): State<Arc<AppState>>, body: String) -> Result<Response, ApiError> {
    if !app.routing.is_ready() {
        return Err(ApiError::NotReady);
    }
    let (request, rows) = parse_post(&body)?;

    let snapshot = app.routing.current();
    let mut merge = RequestMerge::new();
    for (stream, window) in &rows {
        match resolve(
            &snapshot,
            stream,
            window,
            &request.services,
            request.geo.as_ref(),
            request.alternative,
        ) {
            Ok(partial) => merge.extend(partial),
            // A row nothing serves is fine as long as some row resolves.
            Err(ResolveError::NoRoutes) => {}
        }
    }
    if merge.is_empty() {
        return Err(ApiError::NoRoutes);
    }
    Ok(respond(&request, &merge, &snapshot.datacenters))
}

/// Triggers an immediate harvest through the refresh worker and waits for the
/// outcome. Concurrent calls share one build via the state's build lock.
async fn trigger_refresh(State(app): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    let (done, result) = oneshot::channel();
    app.refresh
        .send(Command::Refresh(done))
        .await
        .map_err(|_| ApiError::Internal("refresh worker is not running".into()))?;
    match result.await {
        Ok(Ok(())) => Ok("refreshed\n"),
        Ok(Err(err)) => Err(ApiError::Internal(err.to_string())),
        Err(_) => Err(ApiError::Internal("refresh worker dropped the request".into())),
    }
}

async fn localconfig(State(app): State<Arc<AppState>>) -> Response {
    match std::fs::read_to_string(&app.routing_file) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/xml")], body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn datacenter(State(app): State<Arc<AppState>>) -> Response {
    let Some(path) = &app.datacenter_file else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match std::fs::read_to_string(path) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let request = parse_query(&[]).unwrap();
        assert_eq!(request.stream, Stream::new("*", "*", "*", "*"));
        assert_eq!(request.window, TimeWindow::open());
        assert_eq!(request.services, vec![Service::Dataselect]);
        assert_eq!(request.format, OutputFormat::Xml);
        assert!(!request.alternative);
        assert!(request.geo.is_none());
    }

    #[test]
    fn test_aliases_are_equivalent() {
        let short = parse_query(&pairs(&[
            ("net", "GE"),
            ("sta", "APE"),
            ("start", "2004-01-01"),
        ]))
        .unwrap();
        let long = parse_query(&pairs(&[
            ("network", "GE"),
            ("station", "APE"),
            ("starttime", "2004-01-01"),
        ]))
        .unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        assert_eq!(
            parse_query(&pairs(&[("quality", "B")])),
            Err(QueryError::UnknownParameter("quality".into()))
        );
    }

    #[test]
    fn test_inverted_window_rejected() {
        assert_eq!(
            parse_query(&pairs(&[("start", "2004-01-01"), ("end", "2003-12-31")])),
            Err(QueryError::InvertedWindow)
        );
    }

    #[test]
    fn test_bad_time_rejected() {
        assert_eq!(
            parse_query(&pairs(&[("start", "not-a-date")])),
            Err(QueryError::BadTime("not-a-date".into()))
        );
    }

    #[test]
    fn test_alternative_must_be_literal() {
        assert_eq!(
            parse_query(&pairs(&[("alternative", "1")])),
            Err(QueryError::BadAlternative)
        );
        assert!(parse_query(&pairs(&[("alternative", "true")])).unwrap().alternative);
        assert!(!parse_query(&pairs(&[("alternative", "false")])).unwrap().alternative);
    }

    #[test]
    fn test_alternative_incompatible_with_get_format() {
        assert_eq!(
            parse_query(&pairs(&[("alternative", "true"), ("format", "get")])),
            Err(QueryError::AlternativeWithGet)
        );
    }

    #[test]
    fn test_unknown_service_and_format_rejected() {
        assert_eq!(
            parse_query(&pairs(&[("service", "dataselect,telepathy")])),
            Err(QueryError::UnknownService("telepathy".into()))
        );
        assert_eq!(
            parse_query(&pairs(&[("format", "text")])),
            Err(QueryError::BadFormat("text".into()))
        );
    }

    #[test]
    fn test_geo_bounds_default_open() {
        let request = parse_query(&pairs(&[("minlat", "-10"), ("maxlat", "10")])).unwrap();
        let rect = request.geo.unwrap();
        assert_eq!(rect.min_lat, -10.0);
        assert_eq!(rect.max_lat, 10.0);
        assert_eq!(rect.min_lon, -180.0);
        assert_eq!(rect.max_lon, 180.0);

        assert_eq!(
            parse_query(&pairs(&[("minlat", "south")])),
            Err(QueryError::BadCoordinate("south".into()))
        );
    }

    #[test]
    fn test_parse_post_body() {
        let body = "\
format=json
service=dataselect,station

GE APE -- BHZ 2004-01-01T00:00:00 2005-01-01T00:00:00
CH LIENZ * HHZ 2004-01-01T00:00:00 2005-01-01T00:00:00
";
        let (request, rows) = parse_post(body).unwrap();
        assert_eq!(request.format, OutputFormat::Json);
        assert_eq!(request.services.len(), 2);
        assert_eq!(rows.len(), 2);
        // '--' means blank location, normalized to the wildcard pattern.
        assert_eq!(rows[0].0, Stream::new("GE", "APE", "*", "BHZ"));

        assert_eq!(
            parse_post("GE APE -- BHZ 2004-01-01\n"),
            Err(QueryError::BadRequestLine("GE APE -- BHZ 2004-01-01".into()))
        );
        assert!(parse_post("format=json\n").is_err());
    }

    #[tokio::test]
    async fn test_refresh_endpoint_reports_missing_worker() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let app = Arc::new(AppState {
            routing: RoutingState::empty(),
            refresh: tx,
            routing_file: PathBuf::from("routing.xml"),
            datacenter_file: None,
        });
        assert!(matches!(
            trigger_refresh(State(app)).await,
            Err(ApiError::Internal(_))
        ));
    }
}
