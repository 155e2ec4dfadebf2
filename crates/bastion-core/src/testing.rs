use std::net::SocketAddr;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::controllers::AppState;
use crate::engine::{Clock, PlanFeatures};
use crate::extractors::identity::{COMPANY_ID_HEADER, ROLE_ID_HEADER, USER_ID_HEADER};
use crate::models::role;
use crate::models::RoleType;
use crate::roles::NewRole;
use crate::seed::{self, SeedDocument, SeedReport};

/// A test application for integration testing.
///
/// Spins up a bastion server on an ephemeral port with an in-memory SQLite
/// database. `state` shares the server's services, so tests can arrange data
/// directly and observe it over HTTP.
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_list_roles() {
///     let app = TestApp::new().await;
///     let root = app.root_role().await;
///     let res = app.client.as_role(root.id).get(&app.url("/api/rbac/roles")).await;
///     assert_eq!(res.status, 200);
/// }
/// ```
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: TestClient,
    pub db: DatabaseConnection,
    pub config: Config,
    pub state: AppState,
}

/// Optional collaborators for [`TestApp::with_options`].
#[derive(Default)]
pub struct TestOptions {
    pub config: Option<Config>,
    pub plan_features: Option<Arc<dyn PlanFeatures>>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl TestApp {
    /// Create a new test app with an in-memory SQLite database.
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    /// Create a new test app with a custom config.
    pub async fn with_config(config: Config) -> Self {
        Self::with_options(TestOptions {
            config: Some(config),
            ..Default::default()
        })
        .await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let config = options.config.unwrap_or_else(Config::for_tests);
        let mut app = crate::App::with_config(config)
            .await
            .expect("Failed to create test app");
        if let Some(plans) = options.plan_features {
            app = app.plan_features(plans);
        }
        if let Some(clock) = options.clock {
            app = app.clock(clock);
        }

        let state = app.state().expect("Failed to build app state");
        let router = app.router_for(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        TestApp {
            addr,
            client: TestClient::new(addr),
            db: app.db,
            config: app.config,
            state,
        }
    }

    /// Get the full URL for a path on the test server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Apply a JSON seed document.
    pub async fn seed(&self, json: &str) -> SeedReport {
        let doc = SeedDocument::from_json(json).expect("Invalid seed document");
        seed::apply(&self.state, doc).await.expect("Seeding failed")
    }

    /// The level-1 system role, created on first use.
    pub async fn root_role(&self) -> role::Model {
        self.state
            .roles
            .upsert(NewRole {
                name: "super-admin".to_string(),
                display_name: "Super Admin".to_string(),
                description: None,
                role_type: RoleType::System,
                level: 1,
                is_default: false,
            })
            .await
            .expect("Failed to create root role")
    }
}

/// A simple HTTP test client. Requests carry whatever identity headers were
/// attached with [`as_role`](Self::as_role) and friends.
#[derive(Clone)]
pub struct TestClient {
    inner: reqwest::Client,
    base_addr: SocketAddr,
    headers: Vec<(&'static str, String)>,
}

impl TestClient {
    /// Create a new test client pointing at the given address.
    pub fn new(addr: SocketAddr) -> Self {
        TestClient {
            inner: reqwest::Client::new(),
            base_addr: addr,
            headers: Vec::new(),
        }
    }

    /// A client whose requests carry the role id header.
    pub fn as_role(&self, role_id: i32) -> Self {
        self.with_header(ROLE_ID_HEADER, role_id.to_string())
    }

    pub fn as_user(&self, user_id: &str) -> Self {
        self.with_header(USER_ID_HEADER, user_id.to_string())
    }

    pub fn in_company(&self, company_id: &str) -> Self {
        self.with_header(COMPANY_ID_HEADER, company_id.to_string())
    }

    pub fn with_header(&self, name: &'static str, value: String) -> Self {
        let mut client = self.clone();
        client.headers.retain(|(n, _)| *n != name);
        client.headers.push((name, value));
        client
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.inner.request(method, url);
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> TestResponse {
        let res = builder.send().await.expect("request failed");
        TestResponse::from_response(res).await
    }

    async fn send_body(&self, method: reqwest::Method, url: &str, body: &str) -> TestResponse {
        let builder = self
            .request(method, url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        self.send(builder).await
    }

    /// Send a GET request.
    pub async fn get(&self, url: &str) -> TestResponse {
        self.send(self.request(reqwest::Method::GET, url)).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post(&self, url: &str, body: &str) -> TestResponse {
        self.send_body(reqwest::Method::POST, url, body).await
    }

    /// Send a PUT request with a JSON body.
    pub async fn put(&self, url: &str, body: &str) -> TestResponse {
        self.send_body(reqwest::Method::PUT, url, body).await
    }

    /// Send a PATCH request with a JSON body.
    pub async fn patch(&self, url: &str, body: &str) -> TestResponse {
        self.send_body(reqwest::Method::PATCH, url, body).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, url: &str) -> TestResponse {
        self.send(self.request(reqwest::Method::DELETE, url)).await
    }

    /// Get the base URL.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.base_addr)
    }
}

/// A simplified HTTP response for test assertions.
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub body: String,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        TestResponse { status, body }
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("Failed to parse response as JSON")
    }

    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        self.json()["success"].as_bool().unwrap_or(false)
    }

    /// Get the data field from the response.
    pub fn data(&self) -> serde_json::Value {
        self.json()["data"].clone()
    }

    /// Get the error field from the response.
    pub fn error(&self) -> serde_json::Value {
        self.json()["error"].clone()
    }

    /// Get the error code from the response.
    pub fn error_code(&self) -> String {
        self.error()["code"].as_str().unwrap_or_default().to_string()
    }
}
