use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use road_analytics::config::StreamConfig;
use road_analytics::detect::{
    BoundingBox, DetectionCapability, TrackId, TrackedObject, VehicleClass,
};
use road_analytics::frame::Frame;
use road_analytics::orchestrator::{
    DetectorFactory, Orchestrator, OrchestratorOptions, QueryError, WorkerState,
};
use road_analytics::roi::RoiPolygon;
use road_analytics::worker::RenderOptions;

type Script = Box<dyn Fn(u64) -> Vec<TrackedObject> + Send>;

/// Capability replaying detections keyed by frame sequence number.
struct Scripted {
    script: Script,
}

impl DetectionCapability for Scripted {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<TrackedObject>> {
        Ok((self.script)(frame.sequence))
    }

    fn speed_of(&self, _track_id: TrackId) -> Option<u32> {
        None
    }
}

fn scripted(script: Script) -> Result<Box<dyn DetectionCapability>> {
    Ok(Box::new(Scripted { script }))
}

fn object(track_id: TrackId, class: VehicleClass, cx: f32, cy: f32, speed: u32) -> TrackedObject {
    TrackedObject {
        track_id,
        class,
        bbox: BoundingBox::new(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0),
        speed: Some(speed),
    }
}

fn full_frame() -> RoiPolygon {
    RoiPolygon::new(vec![(0, 0), (600, 0), (600, 400), (0, 400)]).unwrap()
}

fn stub_stream(name: &str, frames: u64, roi: RoiPolygon) -> StreamConfig {
    StreamConfig::new(
        name,
        format!("stub://{}?frames={}&width=120&height=80", name, frames),
        0.03,
        roi,
    )
}

fn options(detectors: DetectorFactory) -> OrchestratorOptions {
    OrchestratorOptions {
        render: RenderOptions {
            annotator: None,
            ..RenderOptions::default()
        },
        detector_factory: detectors,
        ..OrchestratorOptions::default()
    }
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn stationary_samples_do_not_drag_the_average_down() {
    // Ten frames with one car at 20 km/h, then one frame with the car at 0.
    let detectors: DetectorFactory = Arc::new(|_config: &StreamConfig| {
        let script: Script = Box::new(|sequence| {
            let speed = if sequence % 11 == 10 { 0 } else { 20 };
            vec![object(1, VehicleClass::Car, 300.0, 200.0, speed)]
        });
        scripted(script)
    });
    let stream =
        stub_stream("Van Quan", 11, full_frame()).with_window(Duration::from_millis(300));
    let orchestrator = Orchestrator::with_options(vec![stream], options(detectors)).unwrap();
    orchestrator.start().unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        !orchestrator.get_info("Van Quan").unwrap().is_zero()
    }));
    let info = orchestrator.get_info("Van Quan").unwrap();
    assert_eq!(info.count(VehicleClass::Car), 1);
    assert_eq!(info.avg_speed(VehicleClass::Car), 20);
    assert_eq!(info.count(VehicleClass::Motorbike), 0);
    assert_eq!(info.avg_speed(VehicleClass::Motorbike), 0);

    let report = orchestrator.shutdown(Duration::from_secs(5));
    assert_eq!(report.graceful, vec!["Van Quan".to_string()]);
    assert!(report.forced.is_empty());
}

#[test]
fn failed_source_stays_listed_with_zero_summary() {
    let broken = StreamConfig::new(
        "Broken Road",
        "rtsp://camera.invalid/live",
        0.03,
        full_frame(),
    )
    .with_window(Duration::from_millis(50));
    let healthy = stub_stream("Healthy Road", 20, full_frame());
    let orchestrator = Orchestrator::with_options(
        vec![broken, healthy],
        OrchestratorOptions {
            render: RenderOptions {
                annotator: None,
                ..RenderOptions::default()
            },
            ..OrchestratorOptions::default()
        },
    )
    .unwrap();
    orchestrator.start().unwrap();

    assert_eq!(
        orchestrator.list_stream_names(),
        vec!["Broken Road".to_string(), "Healthy Road".to_string()]
    );
    assert!(wait_until(Duration::from_secs(5), || {
        orchestrator
            .worker_states()
            .iter()
            .any(|(name, state)| name == "Broken Road" && *state == WorkerState::Exited)
    }));
    for _ in 0..5 {
        assert!(orchestrator.get_info("Broken Road").unwrap().is_zero());
        assert!(orchestrator.get_frame("Broken Road").unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(40));
    }
    assert!(wait_until(Duration::from_secs(10), || {
        !orchestrator.get_frame("Healthy Road").unwrap().is_empty()
    }));
    let jpeg = orchestrator.get_frame("Healthy Road").unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    orchestrator.shutdown(Duration::from_secs(5));
}

#[test]
fn streams_never_see_each_others_detections() {
    let left = RoiPolygon::new(vec![(0, 0), (290, 0), (290, 400), (0, 400)]).unwrap();
    let right = RoiPolygon::new(vec![(310, 0), (600, 0), (600, 400), (310, 400)]).unwrap();
    let detectors: DetectorFactory = Arc::new(|config: &StreamConfig| {
        let script: Script = if config.name == "west" {
            Box::new(|_| vec![object(1, VehicleClass::Car, 100.0, 200.0, 30)])
        } else {
            // Two motorbikes inside the east polygon, one fast car outside it.
            Box::new(|sequence| {
                vec![
                    object(1, VehicleClass::Motorbike, 400.0, 150.0, 50),
                    object(2, VehicleClass::Motorbike, 500.0, 250.0, 50),
                    object(3, VehicleClass::Car, 100.0, 200.0, 90 + (sequence % 3) as u32),
                ]
            })
        };
        scripted(script)
    });
    let streams = vec![
        stub_stream("west", 7, left).with_window(Duration::from_millis(250)),
        stub_stream("east", 13, right).with_window(Duration::from_millis(250)),
    ];
    let orchestrator = Orchestrator::with_options(streams, options(detectors)).unwrap();
    orchestrator.start().unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        !orchestrator.get_info("west").unwrap().is_zero()
            && !orchestrator.get_info("east").unwrap().is_zero()
    }));
    let west = orchestrator.get_info("west").unwrap();
    assert_eq!(west.count(VehicleClass::Car), 1);
    assert_eq!(west.avg_speed(VehicleClass::Car), 30);
    assert_eq!(west.count(VehicleClass::Motorbike), 0);

    let east = orchestrator.get_info("east").unwrap();
    assert_eq!(east.count(VehicleClass::Motorbike), 2);
    assert_eq!(east.avg_speed(VehicleClass::Motorbike), 50);
    assert_eq!(east.count(VehicleClass::Car), 0);
    assert_eq!(east.avg_speed(VehicleClass::Car), 0);

    orchestrator.shutdown(Duration::from_secs(5));
}

#[test]
fn queries_are_exact_and_default_to_zero() {
    let orchestrator =
        Orchestrator::new(vec![stub_stream("Van Quan", 5, full_frame())]).unwrap();
    orchestrator.start().unwrap();

    // The default 30 s window cannot have closed yet.
    assert!(orchestrator.get_info("Van Quan").unwrap().is_zero());
    for name in ["", "van quan", "VAN QUAN", "Van Quan "] {
        assert_eq!(
            orchestrator.get_info(name),
            Err(QueryError::NotFound(name.to_string()))
        );
        assert!(orchestrator.get_frame(name).is_err());
    }
    orchestrator.shutdown(Duration::from_secs(5));
}

#[test]
fn shutdown_twice_is_harmless() {
    let orchestrator = Orchestrator::new(vec![
        stub_stream("a", 5, full_frame()),
        stub_stream("b", 5, full_frame()),
    ])
    .unwrap();
    orchestrator.start().unwrap();

    let first = orchestrator.shutdown(Duration::from_secs(5));
    let mut graceful = first.graceful.clone();
    graceful.sort();
    assert_eq!(graceful, vec!["a".to_string(), "b".to_string()]);
    assert!(first.forced.is_empty());

    let second = orchestrator.shutdown(Duration::from_secs(5));
    assert!(second.is_empty());
    assert!(orchestrator
        .worker_states()
        .iter()
        .all(|(_, state)| *state == WorkerState::Exited));
    assert!(orchestrator.get_info("a").is_ok());
}

/// Detector that parks inside `infer` until `release` is raised.
fn blocking_detectors(release: &Arc<AtomicBool>, entered: &Arc<AtomicBool>) -> DetectorFactory {
    let release = Arc::clone(release);
    let entered = Arc::clone(entered);
    Arc::new(move |_config: &StreamConfig| {
        let release = Arc::clone(&release);
        let entered = Arc::clone(&entered);
        let script: Script = Box::new(move |_| {
            entered.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            vec![object(1, VehicleClass::Car, 300.0, 200.0, 40)]
        });
        scripted(script)
    })
}

#[test]
fn stuck_worker_is_detached_and_cannot_publish() {
    let release = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    let orchestrator = Orchestrator::with_options(
        vec![stub_stream("stuck", 5, full_frame())],
        options(blocking_detectors(&release, &entered)),
    )
    .unwrap();
    orchestrator.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || entered.load(Ordering::SeqCst)));

    let report = orchestrator.shutdown(Duration::from_millis(100));
    assert_eq!(report.forced, vec!["stuck".to_string()]);
    assert!(report.graceful.is_empty());
    assert_eq!(
        orchestrator.worker_states(),
        vec![("stuck".to_string(), WorkerState::Terminated)]
    );

    // The detached worker finishes its frame but the store stays untouched.
    release.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(200));
    assert!(orchestrator.get_frame("stuck").unwrap().is_empty());
    assert!(orchestrator.get_info("stuck").unwrap().is_zero());
    assert!(orchestrator.shutdown(Duration::from_millis(10)).is_empty());
}

#[test]
fn queries_answer_while_shutdown_waits_on_a_slow_worker() {
    let release = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    let orchestrator = Arc::new(
        Orchestrator::with_options(
            vec![stub_stream("slow", 5, full_frame())],
            options(blocking_detectors(&release, &entered)),
        )
        .unwrap(),
    );
    orchestrator.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || entered.load(Ordering::SeqCst)));

    let stopper = {
        let orchestrator = Arc::clone(&orchestrator);
        std::thread::spawn(move || orchestrator.shutdown(Duration::from_secs(10)))
    };
    std::thread::sleep(Duration::from_millis(100));

    let asked = Instant::now();
    let states = orchestrator.worker_states();
    assert!(asked.elapsed() < Duration::from_secs(1));
    assert_eq!(states, vec![("slow".to_string(), WorkerState::Running)]);
    assert!(orchestrator.get_info("slow").unwrap().is_zero());
    // A second caller does not wait on workers the first one already claimed.
    assert!(orchestrator.shutdown(Duration::from_millis(10)).is_empty());

    release.store(true, Ordering::SeqCst);
    let report = stopper.join().unwrap();
    assert_eq!(report.graceful, vec!["slow".to_string()]);
    assert!(report.forced.is_empty());
    assert_eq!(
        orchestrator.worker_states(),
        vec![("slow".to_string(), WorkerState::Exited)]
    );
}
