use karma_api::api_routes;
use karma_api::routes::vouchers::file_routes;
use karma_api::test_support::{
    RecordingMailer, StaticRenderer, TestDatabase, TestDatabaseError, TestFixtures,
    TestRocketBuilder, bearer_header, test_auth_state,
};
use karma_api::vouchers::{DispatchPolicy, NotificationDispatcher, PgVoucherStore, VoucherServices};
use rocket::http::{ContentType, Status};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn voucher_lifecycle_through_the_dashboard_routes() {
    let test_db = match TestDatabase::new().await {
        Ok(db) => db,
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping voucher CRUD integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let admin_id = fixtures
        .insert_user("admin@x", "admin@example.com", "Ada", Some("Admin"))
        .await
        .expect("insert admin");
    fixtures
        .insert_user("a@x", "asha@example.com", "Asha", Some("Nair"))
        .await
        .expect("insert user");
    fixtures
        .insert_user("c@x", "chen@example.com", "Chen", None)
        .await
        .expect("insert user");
    fixtures
        .insert_task("#t1", "Write a blog post")
        .await
        .expect("insert task");
    fixtures
        .insert_task("#t2", "Give a talk")
        .await
        .expect("insert task");

    let auth = test_auth_state();
    let mailer = Arc::new(RecordingMailer::default());
    let services = VoucherServices::new(
        Arc::new(PgVoucherStore::new(pool.clone())),
        NotificationDispatcher::new(
            Arc::new(StaticRenderer::new(vec![1])),
            mailer.clone(),
            "noreply@karma.test",
            DispatchPolicy::FailFast,
        ),
    );
    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .manage_auth(auth.clone())
        .manage_voucher_services(services)
        .mount_api_routes(api_routes())
        .mount_api_routes(file_routes())
        .async_client()
        .await;
    let bearer = || bearer_header(&auth, admin_id, "admin@x", &["Admins"]);

    // Create
    for (muid, hashtag, karma) in [("a@x", "#t1", 10), ("c@x", "#t2", 25)] {
        let response = client
            .post("/api/v1/dashboard/karma-voucher")
            .header(ContentType::JSON)
            .header(bearer())
            .body(
                json!({
                    "muid": muid,
                    "hashtag": hashtag,
                    "karma": karma,
                    "month": "March",
                    "week": "1"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["message"]["general"][0], "Voucher created successfully");
    }
    assert!(mailer.sent().is_empty());

    let response = client
        .post("/api/v1/dashboard/karma-voucher")
        .header(ContentType::JSON)
        .header(bearer())
        .body(
            json!({"muid": "ghost@x", "hashtag": "#t1", "karma": 5, "month": "March", "week": "1"})
                .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["message"]["general"][0], "Invalid muid: ghost@x");

    // List, sorted by karma descending
    let response = client
        .get("/api/v1/dashboard/karma-voucher?sortBy=-karma&perPage=1")
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    let page = &body["response"];
    assert_eq!(page["data"][0]["user"], "Chen");
    assert_eq!(page["data"][0]["karma"], 25);
    assert_eq!(page["pagination"]["count"], 2);
    assert_eq!(page["pagination"]["totalPages"], 2);
    assert_eq!(page["pagination"]["isNext"], true);

    // Search by task title
    let response = client
        .get("/api/v1/dashboard/karma-voucher?search=blog")
        .header(bearer())
        .dispatch()
        .await;
    let body: Value = response.into_json().await.expect("json body");
    let data = body["response"]["data"].as_array().expect("data list");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["user"], "Asha Nair");
    assert_eq!(data[0]["code"], "MU000001");
    let voucher_id: Uuid = data[0]["id"]
        .as_str()
        .and_then(|id| id.parse().ok())
        .expect("voucher id");

    // Update
    let response = client
        .patch(format!("/api/v1/dashboard/karma-voucher/{voucher_id}"))
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"claimed": true, "karma": 12, "hashtag": "#t2"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["message"]["general"][0], "Voucher updated successfully");

    let (claimed, karma, hashtag): (bool, i32, String) = sqlx::query_as(
        "SELECT v.claimed, v.karma, t.hashtag FROM voucher_log v JOIN task_list t ON t.id = v.task_id WHERE v.id = $1",
    )
    .bind(voucher_id)
    .fetch_one(&pool)
    .await
    .expect("updated voucher");
    assert!(claimed);
    assert_eq!(karma, 12);
    assert_eq!(hashtag, "#t2");

    // Export
    let response = client
        .get("/api/v1/dashboard/karma-voucher/export")
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(
        response.headers().get_one("Content-Disposition"),
        Some("attachment; filename=\"Voucher Log.csv\"")
    );
    let csv = response.into_string().await.expect("csv body");
    assert!(csv.starts_with("id,code,user,"));
    assert!(csv.contains("MU000001"));
    assert!(csv.contains("MU000002"));

    // Delete
    let response = client
        .delete(format!("/api/v1/dashboard/karma-voucher/{voucher_id}"))
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["message"]["general"][0], "Voucher successfully deleted");

    let response = client
        .delete(format!("/api/v1/dashboard/karma-voucher/{voucher_id}"))
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["message"]["general"][0], "Invalid Voucher");

    drop(client);
    test_db.close().await.expect("failed to drop test database");
}
