use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ride_dispatch::api::rest::router;
use ride_dispatch::config::Config;
use ride_dispatch::engine::dispatch::{run_dispatch_engine, DispatchJob};
use ride_dispatch::fare::RateCard;
use ride_dispatch::state::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        dispatch_queue_size: 1024,
        driver_channel_size: 64,
        offer_radius_km: 5.0,
        request_radius_km: 2.0,
        nearest_drivers_limit: 5,
        booking_expiry_secs: 180,
        driver_busy_secs: 180,
        expiry_sweep_interval_secs: 15,
        otp_length: 4,
        default_rate: RateCard {
            minimum_fare: 50.0,
            per_km_rate: 15.0,
            waiting_charge_per_minute: 0.0,
        },
    }
}

fn setup() -> (axum::Router, mpsc::Receiver<DispatchJob>) {
    let (state, rx) = AppState::new(test_config());
    (router(Arc::new(state)), rx)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn register_driver(app: &axum::Router, name: &str, lat: f64, lng: f64) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({
                "name": name,
                "location": { "lat": lat, "lng": lng },
                "vehicle_type": "sedan"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    driver["id"].as_str().unwrap().to_string()
}

async fn create_booking(app: &axum::Router, extra: Value) -> Value {
    let mut payload = json!({
        "rider_id": "11111111-1111-1111-1111-111111111111",
        "pickup": { "lat": 10.0, "lng": 76.0 },
        "dropoff": { "lat": 10.1, "lng": 76.1 },
        "pickup_location": "MG Road",
        "dropoff_location": "Airport",
        "distance_m": 5000.0,
        "duration_secs": 600
    });
    if let (Some(base), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }

    let res = app
        .clone()
        .oneshot(json_request("POST", "/bookings", payload))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn driver_action(app: &axum::Router, booking_id: &str, action: &str, driver_id: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/{action}"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["bookings"], 0);
    assert_eq!(body["drivers"], 0);
    assert_eq!(body["connected_drivers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("dispatch_queue_depth"));
}

#[tokio::test]
async fn create_booking_prices_the_trip() {
    let (app, _rx) = setup();
    let booking = create_booking(&app, json!({})).await;

    assert_eq!(booking["status"], "Pending");
    assert_eq!(booking["fare"], 75.0);
    assert_eq!(booking["final_price"], 75.0);
    assert!(booking["driver_id"].is_null());
    assert!(!booking["expires_at"].is_null());

    let otp = booking["ride_otp"].as_str().unwrap();
    assert_eq!(otp.len(), 4);
    assert!(otp.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn rider_supplied_price_is_authoritative() {
    let (app, _rx) = setup();
    let booking = create_booking(&app, json!({ "offered_price": 250.0 })).await;

    assert_eq!(booking["fare"], 75.0);
    assert_eq!(booking["final_price"], 250.0);
}

#[tokio::test]
async fn create_booking_rejects_bad_geometry() {
    let (app, _rx) = setup();
    let res = app
        .oneshot(json_request(
            "POST",
            "/bookings",
            json!({
                "rider_id": "11111111-1111-1111-1111-111111111111",
                "pickup": { "lat": 120.0, "lng": 76.0 },
                "dropoff": { "lat": 10.1, "lng": 76.1 },
                "pickup_location": "nowhere",
                "dropoff_location": "Airport",
                "distance_m": 5000.0
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn nearby_drivers_filters_and_sorts_by_distance() {
    let (app, _rx) = setup();

    // About 1 km, 6 km, and 4 km north of the pickup.
    let near = register_driver(&app, "near", 10.0 + 1.0 / 111.2, 76.0).await;
    let _far = register_driver(&app, "far", 10.0 + 6.0 / 111.2, 76.0).await;
    let mid = register_driver(&app, "mid", 10.0 + 4.0 / 111.2, 76.0).await;

    let res = app
        .clone()
        .oneshot(get_request("/drivers/nearby?lat=10.0&lng=76.0&radius_km=5.0"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    let matched = body.as_array().unwrap();
    assert_eq!(matched.len(), 2);
    assert_eq!(matched[0]["driver"]["id"], near.as_str());
    assert_eq!(matched[1]["driver"]["id"], mid.as_str());
}

#[tokio::test]
async fn nearest_drivers_intersects_vehicle_type() {
    let (app, _rx) = setup();
    let _sedan = register_driver(&app, "sedan driver", 10.0 + 1.0 / 111.2, 76.0).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({
                "name": "auto driver",
                "location": { "lat": 10.001, "lng": 76.0 },
                "vehicle_type": "auto"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(get_request("/drivers/nearest?lat=10.0&lng=76.0&vehicle_type=auto"))
        .await
        .unwrap();
    let body = body_json(res).await;
    let matched = body.as_array().unwrap();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0]["driver"]["vehicle_type"], "auto");
}

#[tokio::test]
async fn fare_estimate_uses_default_rate_card() {
    let (app, _rx) = setup();
    let res = app
        .oneshot(get_request("/fare/estimate?distance_m=5000"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["fare"], 75.0);
    assert_eq!(body["distance_km"], 5.0);
}

#[tokio::test]
async fn get_nonexistent_booking_returns_404() {
    let (app, _rx) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/bookings/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_ride_lifecycle() {
    let (state, rx) = AppState::new(test_config());
    let shared = Arc::new(state);
    tokio::spawn(run_dispatch_engine(shared.clone(), rx));
    let app = router(shared.clone());

    let driver_id = register_driver(&app, "Anil", 10.0 + 1.0 / 111.2, 76.0).await;

    let booking = create_booking(&app, json!({ "offered_price": 250.0 })).await;
    let booking_id = booking["id"].as_str().unwrap().to_string();
    let otp = booking["ride_otp"].as_str().unwrap().to_string();
    assert_eq!(booking["final_price"], 250.0);

    // Accept: Pending -> Accepted.
    let res = driver_action(&app, &booking_id, "accept", &driver_id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "Accepted");
    assert_eq!(view["driver_id"], driver_id.as_str());

    // A second accept is a conflict, not a silent success.
    let other = register_driver(&app, "Binu", 10.0, 76.0).await;
    let res = driver_action(&app, &booking_id, "accept", &other).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Arrival; drop-off still hidden from the driver.
    let res = driver_action(&app, &booking_id, "arrived", &driver_id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "DriverArrived");
    assert!(view["dropoff"].is_null());
    assert!(view["dropoff_location"].is_null());

    // Wrong OTP is rejected and changes nothing.
    let wrong = if otp == "0000" { "1111" } else { "0000" };
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/start"),
            json!({ "driver_id": driver_id, "otp": wrong }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(get_request(&format!(
            "/bookings/{booking_id}?driver_id={driver_id}"
        )))
        .await
        .unwrap();
    let view = body_json(res).await;
    assert_eq!(view["status"], "DriverArrived");

    // Correct OTP starts the ride and reveals the drop-off.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/start"),
            json!({ "driver_id": driver_id, "otp": otp }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "InProgress");
    assert_eq!(view["otp_verified"], true);
    assert_eq!(view["dropoff_location"], "Airport");
    assert!(!view["started_at"].is_null());

    // Complete.
    let res = driver_action(&app, &booking_id, "complete", &driver_id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "Completed");
    assert_eq!(view["payment_completed"], true);
    assert!(!view["ended_at"].is_null());

    // Rate.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/rate"),
            json!({
                "rider_id": "11111111-1111-1111-1111-111111111111",
                "score": 5,
                "feedback": "smooth ride"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "Completed");
    assert_eq!(view["rating"]["score"], 5);
}

#[tokio::test]
async fn arrival_before_acceptance_is_rejected() {
    let (app, _rx) = setup();
    let driver_id = register_driver(&app, "Anil", 10.0, 76.0).await;
    let booking = create_booking(&app, json!({})).await;
    let booking_id = booking["id"].as_str().unwrap();

    let res = driver_action(&app, booking_id, "arrived", &driver_id).await;
    // Not the assigned driver (there is none yet).
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rejection_feeds_polling_and_busy_window() {
    let (app, _rx) = setup();
    let driver_id = register_driver(&app, "Anil", 10.0, 76.0).await;
    let booking = create_booking(&app, json!({})).await;
    let booking_id = booking["id"].as_str().unwrap();

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}/bookings/pending")))
        .await
        .unwrap();
    let pending = body_json(res).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let res = driver_action(&app, booking_id, "reject", &driver_id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "Pending");

    // No longer offered to the rejecting driver, and its busy window is set.
    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}/bookings/pending")))
        .await
        .unwrap();
    let pending = body_json(res).await;
    assert!(pending.as_array().unwrap().is_empty());

    let res = app.clone().oneshot(get_request("/drivers")).await.unwrap();
    let drivers = body_json(res).await;
    assert!(!drivers[0]["busy_until"].is_null());
}

#[tokio::test]
async fn rider_cancellation_is_terminal() {
    let (app, _rx) = setup();
    let booking = create_booking(&app, json!({})).await;
    let booking_id = booking["id"].as_str().unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/cancel"),
            json!({
                "cancelled_by": "User",
                "actor_id": "11111111-1111-1111-1111-111111111111",
                "reason": "plans changed"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view = body_json(res).await;
    assert_eq!(view["status"], "Cancelled");

    let driver_id = register_driver(&app, "Anil", 10.0, 76.0).await;
    let res = driver_action(&app, booking_id, "accept", &driver_id).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn connection_status_reports_disconnected_driver() {
    let (app, _rx) = setup();
    let driver_id = register_driver(&app, "Anil", 10.0, 76.0).await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/connections/{driver_id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["connected"], false);

    let res = app.clone().oneshot(get_request("/connections")).await.unwrap();
    let body = body_json(res).await;
    assert!(body.as_array().unwrap().is_empty());
}
