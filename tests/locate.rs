//! End-to-end runs against local stub services.
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use oca_locator::location::AlephProvider;
use oca_locator::{
    AsnInfo, AsnLookup, DnsLookup, Geocoder, Location, LocationEngine, LocationProvider,
    LocatorConfig, LocatorError, OcaLocator, PublicIpSource, ResolutionMethod, NETFLIX_ASN,
};
use std::sync::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HOMEPAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Internet Speed Test | Fast.com</title></head>
<body><div id="speed-value">0</div><script src="/app-ed402d.js"></script></body></html>"#;

const APP_JS: &str =
    r#"!function(){var e={apiEndpoint:"api.fast.com/netflix/speedtest/v2",https:!0,token:"YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm",urlCount:5}}();"#;

const STANDARD: &str = "ipv4-c001-ord001-ix.1.oca.nflxvideo.net";
const TAGGED: &str = "ipv6-c002-ord001-ix.1.oca.nflxvideo.net";
const UNKNOWN: &str = "ipv4-c099-zzz001-ix.1.oca.nflxvideo.net";
const PTR: &str = "ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn target(hostname: &str) -> serde_json::Value {
    json!({
        "url": format!("https://{}/speedtest?c=us&n=7922&v=5&e=1700000000", hostname),
        "location": {"city": "Chicago", "country": "US"}
    })
}

/// fast.com homepage and script, plus a speed-test endpoint answering with `targets`.
fn fast_com(targets: Vec<serde_json::Value>, api_hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/", get(|| async { Html(HOMEPAGE) }))
        .route("/app-ed402d.js", get(|| async { APP_JS }))
        .route(
            "/netflix/speedtest/v2",
            get(move || {
                let targets = targets.clone();
                let api_hits = api_hits.clone();
                async move {
                    api_hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"client": {"ip": "203.0.113.9"}, "targets": targets}))
                }
            }),
        )
}

fn config(base: &str) -> LocatorConfig {
    LocatorConfig {
        fast_com_url: base.to_string(),
        speedtest_api_url: format!("{}/netflix/speedtest/v2", base),
        request_timeout: Duration::from_secs(5),
        backoff_ms: 10,
        max_retries: 3,
        deadline: Duration::from_secs(10),
        ptr_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

struct StubPublicIp;

#[async_trait]
impl PublicIpSource for StubPublicIp {
    async fn public_ip(&self) -> Result<IpAddr, LocatorError> {
        Ok("203.0.113.9".parse().unwrap())
    }
}

struct StubDns {
    addrs: HashMap<String, IpAddr>,
    delay: Option<Duration>,
}

impl StubDns {
    fn new() -> Self {
        let mut addrs = HashMap::new();
        addrs.insert(STANDARD.to_string(), "198.38.96.10".parse().unwrap());
        addrs.insert(TAGGED.to_string(), "45.57.120.66".parse().unwrap());
        StubDns { addrs, delay: None }
    }
}

#[async_trait]
impl DnsLookup for StubDns {
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, LocatorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.addrs.get(hostname) {
            Some(ip) => Ok(vec![*ip]),
            None => Err(LocatorError::Timeout(format!("no answer for {}", hostname))),
        }
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>, LocatorError> {
        Ok((ip.to_string() == "45.57.120.66").then(|| PTR.to_string()))
    }
}

struct StubWhois;

#[async_trait]
impl AsnLookup for StubWhois {
    async fn lookup(&self, _ip: IpAddr) -> Result<AsnInfo, LocatorError> {
        Ok(AsnInfo {
            asn: Some(7922),
            as_name: Some("COMCAST-7922 - Comcast Cable Communications, LLC, US".to_string()),
            country: Some("US".to_string()),
            bgp_prefix: Some("198.38.96.0/24".to_string()),
            ..Default::default()
        })
    }
}

/// Knows the standard OCA under the ISP's ASN and the PTR name under Netflix's ASN.
struct StubPrimary;

#[async_trait]
impl LocationProvider for StubPrimary {
    async fn locate(
        &self,
        hostname: &str,
        asn: Option<u32>,
        _ip: Option<&str>,
    ) -> Result<Option<Location>, LocatorError> {
        let known = (hostname == STANDARD && asn == Some(7922))
            || (hostname == PTR && asn == Some(NETFLIX_ASN));
        Ok(known.then(|| Location {
            latitude: Some(41.978252),
            longitude: Some(-87.90923),
            city: Some("Chicago, IL".to_string()),
            country: Some("US".to_string()),
            iata_code: Some("ORD".to_string()),
        }))
    }
}

struct NoGeocoder;

#[async_trait]
impl Geocoder for NoGeocoder {
    async fn geocode(&self, _query: &str) -> Result<Option<Location>, LocatorError> {
        Ok(None)
    }
}

fn locator(config: LocatorConfig, dns: StubDns) -> OcaLocator {
    OcaLocator::with_config(config)
        .unwrap()
        .public_ip_source(Arc::new(StubPublicIp))
        .dns(Arc::new(dns))
        .whois(Arc::new(StubWhois))
        .primary_provider(Arc::new(StubPrimary))
        .geocoder(Arc::new(NoGeocoder))
}

#[tokio::test]
async fn test_one_record_per_candidate_in_order() {
    let hits = Arc::new(AtomicUsize::new(0));
    let targets = vec![
        target(STANDARD),
        target(TAGGED),
        target(UNKNOWN),
        target(STANDARD),
    ];
    let base = serve(fast_com(targets, hits.clone())).await;

    let result = locator(config(&base), StubDns::new())
        .locate()
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(result.token, "YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm");
    assert_eq!(result.network.asn, Some(7922));
    assert_eq!(result.records.len(), 4);
    let hostnames: Vec<&str> = result.records.iter().map(|r| r.hostname.as_str()).collect();
    assert_eq!(hostnames, vec![STANDARD, TAGGED, UNKNOWN, STANDARD]);

    let standard = &result.records[0];
    assert_eq!(standard.method, ResolutionMethod::PrimaryApi);
    assert_eq!(standard.ip.unwrap().to_string(), "198.38.96.10");
    assert_eq!(standard.asn, Some(7922));
    assert_eq!(standard.city(), Some("Chicago, IL"));
    assert_eq!(standard.metadata["location"]["city"], "Chicago");

    let nat64 = &result.records[1];
    assert_eq!(nat64.method, ResolutionMethod::Nat64Ptr);
    assert_eq!(nat64.original_domain.as_deref(), Some(TAGGED));
    assert_eq!(nat64.ptr_hostname.as_deref(), Some(PTR));

    let unknown = &result.records[2];
    assert_eq!(unknown.method, ResolutionMethod::Unresolved);
    assert!(unknown.ip.is_none());
    assert!(unknown.location.is_none());

    assert_eq!(result.records[3], result.records[0]);
    assert_eq!(result.resolved_count(), 3);

    let json = serde_json::to_string(&result).unwrap();
    assert!(!json.contains("YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm"));
}

#[tokio::test]
async fn test_missing_token_fails_run() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_api = hits.clone();
    let router = Router::new()
        .route("/", get(|| async { Html(HOMEPAGE) }))
        .route(
            "/app-ed402d.js",
            get(|| async { r#"!function(){var e={apiEndpoint:"api.fast.com"}}();"# }),
        )
        .route(
            "/netflix/speedtest/v2",
            get(move || {
                let hits = hits_api.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!([]))
                }
            }),
        );
    let base = serve(router).await;

    let res = locator(config(&base), StubDns::new()).locate().await;
    assert!(matches!(res, Err(LocatorError::TokenNotFound(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_script_element_fails_run() {
    let router = Router::new().route(
        "/",
        get(|| async { Html("<html><body>We'll be right back</body></html>") }),
    );
    let base = serve(router).await;

    let res = locator(config(&base), StubDns::new()).token().await;
    assert!(matches!(res, Err(LocatorError::TokenNotFound(_))));
}

#[tokio::test]
async fn test_fixed_script_url_skips_homepage() {
    let router = Router::new().route("/static/app.js", get(|| async { APP_JS }));
    let base = serve(router).await;

    let config = LocatorConfig {
        script_url: Some(format!("{}/static/app.js", base)),
        ..config(&base)
    };
    let token = locator(config, StubDns::new()).token().await.unwrap();
    assert_eq!(token, "YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm");
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_api = hits.clone();
    let router = Router::new()
        .route("/", get(|| async { Html(HOMEPAGE) }))
        .route("/app-ed402d.js", get(|| async { APP_JS }))
        .route(
            "/netflix/speedtest/v2",
            get(move || {
                let hits = hits_api.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::FORBIDDEN, "token expired")
                }
            }),
        );
    let base = serve(router).await;

    let res = locator(config(&base), StubDns::new()).locate().await;
    assert!(matches!(res, Err(LocatorError::CandidateFetchError(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_api = hits.clone();
    let router = Router::new()
        .route("/", get(|| async { Html(HOMEPAGE) }))
        .route("/app-ed402d.js", get(|| async { APP_JS }))
        .route(
            "/netflix/speedtest/v2",
            get(move || {
                let hits = hits_api.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                    } else {
                        (StatusCode::OK, Json(json!([target(STANDARD)])))
                    }
                }
            }),
        );
    let base = serve(router).await;

    let result = locator(config(&base), StubDns::new())
        .locate()
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(result.records.len(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_api = hits.clone();
    let router = Router::new()
        .route("/", get(|| async { Html(HOMEPAGE) }))
        .route("/app-ed402d.js", get(|| async { APP_JS }))
        .route(
            "/netflix/speedtest/v2",
            get(move || {
                let hits = hits_api.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }
            }),
        );
    let base = serve(router).await;

    let res = locator(config(&base), StubDns::new()).locate().await;
    assert!(matches!(res, Err(LocatorError::CandidateFetchError(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_deadline_keeps_every_record() {
    let hits = Arc::new(AtomicUsize::new(0));
    let targets = vec![target(STANDARD), target(TAGGED), target(UNKNOWN)];
    let base = serve(fast_com(targets, hits)).await;

    let config = LocatorConfig {
        deadline: Duration::from_secs(2),
        concurrency: 2,
        ..config(&base)
    };
    let dns = StubDns {
        delay: Some(Duration::from_secs(30)),
        ..StubDns::new()
    };

    let started = std::time::Instant::now();
    let result = locator(config, dns).locate().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.records.len(), 3);
    assert!(result
        .records
        .iter()
        .all(|r| r.method == ResolutionMethod::Unresolved && r.ip.is_none()));
}

#[tokio::test]
async fn test_empty_candidate_list() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fast_com(vec![], hits)).await;

    let result = locator(config(&base), StubDns::new())
        .locate()
        .await
        .unwrap();
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn test_lookup_without_oca_asn_uses_network_asn() {
    let config = LocatorConfig {
        lookup_oca_asn: false,
        ..config("http://127.0.0.1:9")
    };
    let records = locator(config, StubDns::new())
        .locate_hostnames(&[STANDARD.to_string()])
        .await;
    assert_eq!(records.len(), 1);
    // no per-OCA ASN, but the local network's AS7922 still reaches the provider
    assert!(records[0].asn.is_none());
    assert_eq!(records[0].method, ResolutionMethod::PrimaryApi);
}

#[tokio::test]
async fn test_slow_primary_answer_is_retried_under_same_asn() {
    let asns: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(vec![]));
    let asns_api = asns.clone();
    let router = Router::new().route(
        "/api/query",
        post(move |Json(query): Json<serde_json::Value>| {
            let asns = asns_api.clone();
            async move {
                let hit = {
                    let mut asns = asns.lock().unwrap();
                    asns.push(query["asn"].clone());
                    asns.len() - 1
                };
                if hit == 0 {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                Json(json!({
                    "ptr_record": STANDARD,
                    "asn": query["asn"],
                    "location_info": {
                        "city": "Chicago", "state": "IL", "region": "", "country": "US",
                        "latitude": 41.978252, "longitude": -87.90923
                    },
                    "regular_expression": "",
                    "geo_hint": "ord",
                    "ip": ""
                }))
            }
        }),
    );
    let base = serve(router).await;

    let config = LocatorConfig {
        aleph_api_url: format!("{}/api/query", base),
        request_timeout: Duration::from_secs(1),
        max_retries: 3,
        backoff_ms: 10,
        ..Default::default()
    };
    let engine = LocationEngine::new(
        Arc::new(AlephProvider::new(&config).unwrap()),
        Arc::new(NoGeocoder),
        Arc::new(StubDns::new()),
        &config,
    );

    let resolution = engine
        .resolve(STANDARD, Some("198.38.96.10"), Some(7922))
        .await;
    assert_eq!(resolution.method, ResolutionMethod::PrimaryApi);
    assert_eq!(
        asns.lock().unwrap().as_slice(),
        &[json!(7922), json!(7922)]
    );
}
