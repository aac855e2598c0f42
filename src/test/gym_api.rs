#[cfg(test)]
mod tests {
    use crate::api::gyms::GymHoursResponse;
    use crate::api::health::HealthResponse;
    use crate::api::waivers::WaiverStatusResponse;
    use crate::db::{find_gym, record_check_in};
    use crate::models::{GymAnalytics, WaiverStatus};
    use crate::test::test_client::{login_test_user, setup_test_client};
    use crate::test::test_db::{STANDARD_PASSWORD, create_standard_test_db};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};

    async fn send_json<'c>(
        client: &'c Client,
        method: &str,
        uri: &'c str,
        body: Value,
    ) -> LocalResponse<'c> {
        let request = match method {
            "PUT" => client.put(uri),
            _ => client.post(uri),
        };
        request
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    async fn json_body(response: LocalResponse<'_>) -> Value {
        let body = response.into_string().await.expect("Response body missing");
        serde_json::from_str(&body).expect("Response was not JSON")
    }

    fn gym_request(name: &str) -> Value {
        json!({
            "gymName": name,
            "gymEmail": "front-desk@lakeside.test",
            "gymPhoneNumber": "(555) 010-9999",
            "address": "42 Harbor Road",
            "city": "Lakeside",
            "state": "MI",
            "postal_code": "49001",
            "country": "US",
            "schedule": [
                { "day": 1, "open_time": "06:00", "close_time": "21:00" },
                { "day": 0, "is_closed": true },
                { "day": 6, "open_time": "09:00:00", "close_time": "13:00" }
            ]
        })
    }

    #[rocket::async_test]
    async fn test_create_gym_with_hours() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = send_json(&client, "POST", "/api/gyms", gym_request("Lakeside Aikido")).await;
        assert_eq!(response.status(), Status::Created);
        let created = json_body(response).await;
        assert_eq!(created["message"], "Gym added successfully");
        assert_eq!(created["gym"]["name"], "Lakeside Aikido");
        let gym_id = created["gym"]["id"].as_i64().expect("gym id missing");

        let response = client
            .get(format!("/api/gym-hours/{}", gym_id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("Response body missing");
        let hours: GymHoursResponse = serde_json::from_str(&body).expect("Invalid hours response");

        assert_eq!(hours.gym_name, "Lakeside Aikido");
        let days: Vec<i64> = hours.hours.iter().map(|h| h.day).collect();
        assert_eq!(days, vec![0, 1, 6]);
        assert!(hours.hours[0].is_closed);
        assert_eq!(hours.hours[1].open.as_deref(), Some("06:00"));
        assert_eq!(hours.hours[2].open.as_deref(), Some("09:00"));
        assert_eq!(hours.hours[2].close.as_deref(), Some("13:00"));
    }

    #[rocket::async_test]
    async fn test_create_gym_validation() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = send_json(
            &client,
            "POST",
            "/api/gyms",
            json!({ "gymName": "Half Filled", "gymEmail": "a@b.test" }),
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body = json_body(response).await;
        assert_eq!(body["errors"]["gymPhoneNumber"][0], "Missing required fields");

        let mut bad_day = gym_request("Bad Day Gym");
        bad_day["schedule"] = json!([{ "day": 9, "open_time": "06:00", "close_time": "07:00" }]);
        let response = send_json(&client, "POST", "/api/gyms", bad_day).await;
        assert_eq!(response.status(), Status::BadRequest);

        let mut bad_time = gym_request("Bad Time Gym");
        bad_time["schedule"] = json!([{ "day": 2, "open_time": "six", "close_time": "07:00" }]);
        let response = send_json(&client, "POST", "/api/gyms", bad_time).await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_logged_in_creator_becomes_owner() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "bob@example.com", STANDARD_PASSWORD).await;

        let response = send_json(&client, "POST", "/api/gyms", gym_request("Bob's Barn")).await;
        assert_eq!(response.status(), Status::Created);

        let response = client.get("/auth/me").dispatch().await;
        let me = json_body(response).await;
        assert_eq!(me["role"], "owner");
    }

    #[rocket::async_test]
    async fn test_gym_hours_defaults() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client.get("/api/gym-hours").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let anonymous = json_body(response).await;
        assert_eq!(anonymous["gym_name"], "Northside BJJ");

        login_test_user(&client, "bob@example.com", STANDARD_PASSWORD).await;
        let response = client.get("/api/gym-hours").dispatch().await;
        let member = json_body(response).await;
        assert_eq!(member["gym_name"], "Southside Judo");

        let response = client.get("/api/gym-hours/999").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_gym_analytics() {
        let test_db = create_standard_test_db().await;
        let evening = test_db.class_id("evening").expect("Class not found");
        record_check_in(&test_db.pool, "alice@example.com", evening, None)
            .await
            .expect("Check-in failed");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "alice@example.com", STANDARD_PASSWORD).await;
        let response = client.get("/api/gyms/1/analytics").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);

        client.post("/auth/logout").dispatch().await;
        login_test_user(&client, "owner@example.com", STANDARD_PASSWORD).await;

        let response = client.get("/api/gyms/1/analytics").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("Response body missing");
        let analytics: GymAnalytics = serde_json::from_str(&body).expect("Invalid analytics");

        assert_eq!(analytics.active_members, 3);
        assert_eq!(analytics.check_ins_last_30_days, 1);
        assert_eq!(analytics.classes_last_30_days, 2);
        assert_eq!(analytics.canceled_last_30_days, 1);
        assert_eq!(analytics.top_classes.len(), 1);
        assert_eq!(analytics.top_classes[0].name, "Fundamentals");

        let response = client.get("/api/gyms/2/analytics").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client.get("/api/gyms/999/analytics").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_waiver_lifecycle() {
        let test_db = create_standard_test_db().await;
        let (client, test_db) = setup_test_client(test_db).await;

        let response = client.get("/api/gyms/1/waiver").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);

        let waiver = json!({ "title": "Liability Waiver", "content": "Train at your own risk." });

        login_test_user(&client, "coach@example.com", STANDARD_PASSWORD).await;
        let response = send_json(&client, "PUT", "/api/gyms/1/waiver", waiver.clone()).await;
        assert_eq!(response.status(), Status::Forbidden);

        client.post("/auth/logout").dispatch().await;
        login_test_user(&client, "owner@example.com", STANDARD_PASSWORD).await;
        let response = send_json(&client, "PUT", "/api/gyms/1/waiver", waiver).await;
        assert_eq!(response.status(), Status::Ok);

        let gym = find_gym(&test_db.pool, 1)
            .await
            .expect("Lookup failed")
            .expect("Gym missing");
        assert!(gym.has_waiver);

        let response = client.get("/api/gyms/1/waiver").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["title"], "Liability Waiver");

        client.post("/auth/logout").dispatch().await;
        login_test_user(&client, "alice@example.com", STANDARD_PASSWORD).await;

        let response = client.get("/api/gyms/1/waiver/status").dispatch().await;
        let body = response.into_string().await.expect("Response body missing");
        let status: WaiverStatusResponse = serde_json::from_str(&body).expect("Invalid status");
        assert_eq!(status.status, WaiverStatus::Pending);
        assert!(status.signed_at.is_none());

        let response = client.post("/api/gyms/1/waiver/sign").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/gyms/1/waiver/status").dispatch().await;
        let body = response.into_string().await.expect("Response body missing");
        let status: WaiverStatusResponse = serde_json::from_str(&body).expect("Invalid status");
        assert_eq!(status.status, WaiverStatus::Signed);
        assert!(status.signed_at.is_some());

        let response = send_json(
            &client,
            "POST",
            "/api/gyms/1/waiver/sign",
            json!({ "status": "rejected" }),
        )
        .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["signed_at"], Value::Null);

        client.post("/auth/logout").dispatch().await;
        login_test_user(&client, "bob@example.com", STANDARD_PASSWORD).await;
        let response = client.post("/api/gyms/1/waiver/sign").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_generate_qr_png() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client.get("/api/generate-qr/1").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::PNG));

        let bytes = response.into_bytes().await.expect("Response body missing");
        let image = image::load_from_memory(&bytes).expect("Body should be a PNG");
        assert_eq!(image.width(), image.height());
        assert!(image.width() > 200);

        let response = client.get("/api/generate-qr/999").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_health_reports_database_state() {
        let test_db = create_standard_test_db().await;
        let (client, test_db) = setup_test_client(test_db).await;

        let response = client.get("/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("Response body missing");
        let health: HealthResponse = serde_json::from_str(&body).expect("Invalid health body");
        assert_eq!(health.status, "ok");
        assert_eq!(health.database, "ok");

        test_db.pool.close().await;

        let response = client.get("/health").dispatch().await;
        assert_eq!(response.status(), Status::ServiceUnavailable);
        let body = response.into_string().await.expect("Response body missing");
        let health: HealthResponse = serde_json::from_str(&body).expect("Invalid health body");
        assert_eq!(health.status, "degraded");
    }
}
