use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use road_analytics::api::{ApiConfig, ApiHandle, ApiServer};
use road_analytics::config::StreamConfig;
use road_analytics::orchestrator::Orchestrator;
use road_analytics::roi::RoiPolygon;

fn stream(name: &str) -> StreamConfig {
    StreamConfig::new(
        name,
        format!("stub://{}?frames=10&width=120&height=80", name),
        0.03,
        RoiPolygon::new(vec![(0, 0), (600, 0), (600, 400), (0, 400)]).unwrap(),
    )
}

struct TestApi {
    orchestrator: Arc<Orchestrator>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn spawn(names: &[&str]) -> Result<Self> {
        let orchestrator = Arc::new(Orchestrator::new(
            names.iter().map(|name| stream(name)).collect(),
        )?);
        let api_handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            Arc::clone(&orchestrator),
        )
        .spawn()?;
        Ok(Self {
            orchestrator,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle.as_ref().map(|h| h.addr).unwrap()
    }

    fn request(&self, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.addr())?;
        write!(
            stream,
            "{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n",
            method, path
        )?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let split = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| anyhow::anyhow!("no header terminator"))?;
        let headers = String::from_utf8_lossy(&response[..split]).to_string();
        Ok((headers, response[split + 4..].to_vec()))
    }

    fn get_json(&self, path: &str) -> Result<(String, Value)> {
        let (headers, body) = self.request("GET", path)?;
        Ok((headers, serde_json::from_slice(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn lists_roads_and_serves_zero_summaries() -> Result<()> {
    let api = TestApi::spawn(&["Van Quan", "Nga Tu So"])?;

    let (headers, body) = api.get_json("/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body["status"], "ok");

    let (_, body) = api.get_json("/road_names")?;
    assert_eq!(body["road_names"], serde_json::json!(["Van Quan", "Nga Tu So"]));
    let (_, alias) = api.get_json("/road_name")?;
    assert_eq!(alias, body);

    let (headers, body) = api.get_json("/info/Van%20Quan")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: application/json"));
    for key in ["count_car", "count_motor", "speed_car", "speed_motor"] {
        assert_eq!(body[key], 0, "{} should default to zero", key);
    }

    let (headers, body) = api.request("GET", "/frames/Nga%20Tu%20So")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert!(body.is_empty());
    Ok(())
}

#[test]
fn info_without_a_name_covers_every_road() -> Result<()> {
    let api = TestApi::spawn(&["Van Quan", "Nga Tu So"])?;

    let (headers, body) = api.get_json("/info")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: application/json"));
    let roads = body.as_object().expect("object keyed by road name");
    assert_eq!(roads.len(), 2);
    for name in ["Van Quan", "Nga Tu So"] {
        assert_eq!(
            roads[name],
            serde_json::to_value(api.orchestrator.get_info(name)?)?
        );
        assert_eq!(roads[name]["count_car"], 0);
    }

    let (_, trailing) = api.get_json("/info/")?;
    assert_eq!(trailing, body);
    Ok(())
}

#[test]
fn unknown_roads_paths_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::spawn(&["Van Quan"])?;

    let (headers, body) = api.get_json("/info/van%20quan")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    assert_eq!(body["error"], "not_found");

    let (headers, _) = api.get_json("/frames/Kim%20Ma")?;
    assert!(headers.starts_with("HTTP/1.1 404"));

    let (headers, _) = api.get_json("/events")?;
    assert!(headers.starts_with("HTTP/1.1 404"));

    let (headers, body) = api.get_json("/info/%FF")?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(body["error"], "bad_request");

    let (headers, body) = api.request("POST", "/info/Van%20Quan")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    assert_eq!(
        serde_json::from_slice::<Value>(&body)?["error"],
        "method_not_allowed"
    );
    Ok(())
}

#[test]
fn serves_latest_frame_once_published() -> Result<()> {
    let api = TestApi::spawn(&["Van Quan"])?;
    api.orchestrator.start()?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while api.orchestrator.get_frame("Van Quan")?.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let (headers, body) = api.request("GET", "/frames/Van%20Quan")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);

    api.orchestrator.shutdown(Duration::from_secs(5));
    Ok(())
}
