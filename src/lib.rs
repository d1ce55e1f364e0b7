#[macro_use]
extern crate rocket;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod vouchers;

use crate::auth::{AuthConfig, AuthState};
use crate::config::{ImportConfig, MailConfig, RenderConfig};
use crate::db::KarmaDb;
use crate::request_logger::RequestLogger;
use crate::vouchers::mail::SmtpMailer;
use crate::vouchers::render::HttpVoucherRenderer;
use crate::vouchers::{NotificationDispatcher, PgVoucherStore, VoucherServices};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// JSON routes listed in the OpenAPI document.
pub fn api_routes() -> Vec<rocket::Route> {
    openapi_get_routes![
        routes::health::health_check,
        routes::vouchers::list_vouchers,
        routes::vouchers::create_voucher,
        routes::vouchers::update_voucher,
        routes::vouchers::delete_voucher,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = match CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete, Method::Patch]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
    {
        Ok(cors) => Some(cors),
        Err(err) => {
            log::error!("invalid CORS configuration, CORS disabled: {}", err);
            None
        }
    };

    let mut rocket = rocket::build()
        .attach(RequestLogger)
        .attach(KarmaDb::init());
    if let Some(cors) = cors {
        rocket = rocket.attach(cors);
    }

    rocket
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match KarmaDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match db::run_migrations(&pool).await {
                        Ok(_) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Auth Configuration", |rocket| async move {
            match AuthConfig::from_env().and_then(AuthState::from_config) {
                Ok(state) => Ok(rocket.manage(state)),
                Err(err) => {
                    log::error!("failed to configure authentication: {}", err);
                    Err(rocket)
                }
            }
        }))
        // Manage the pool for route handlers and wire the voucher pipeline to it
        .attach(AdHoc::try_on_ignite(
            "Manage DB Pool and Voucher Services",
            |rocket| async move {
                let Some(db) = KarmaDb::fetch(&rocket) else {
                    return Err(rocket);
                };
                let pool = (**db).clone();

                let mail_config = MailConfig::from_env();
                let mailer = match SmtpMailer::from_config(&mail_config) {
                    Ok(mailer) => mailer,
                    Err(err) => {
                        log::error!("failed to configure SMTP transport: {}", err);
                        return Err(rocket);
                    }
                };
                let renderer = HttpVoucherRenderer::from_config(&RenderConfig::from_env());
                let import_config = ImportConfig::from_env();
                log::info!(
                    "voucher notifications: smtp {}:{}, dispatch policy {}",
                    mail_config.smtp_host,
                    mail_config.smtp_port,
                    import_config.dispatch_policy
                );

                let dispatcher = NotificationDispatcher::new(
                    Arc::new(renderer),
                    Arc::new(mailer),
                    mail_config.from_mail,
                    import_config.dispatch_policy,
                );
                let services =
                    VoucherServices::new(Arc::new(PgVoucherStore::new(pool.clone())), dispatcher);

                Ok(rocket.manage(pool).manage(services))
            },
        ))
        .register("/", routes::catchers::catchers())
        .mount("/api/v1", api_routes())
        .mount("/api/v1", routes::vouchers::file_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Karma API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::auth::{AuthConfig, AuthState, JwtService};
    use crate::routes::catchers::catchers;
    use crate::vouchers::VoucherServices;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};
    use uuid::Uuid;

    pub use database::{TestDatabase, TestDatabaseError};
    pub use fakes::{MemoryVoucherStore, RecordingMailer, StaticRenderer};

    /// Convenience helpers for seeding users and tasks in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a user row, returning the new user id.
        pub async fn insert_user(
            &self,
            muid: &str,
            email: &str,
            first_name: &str,
            last_name: Option<&str>,
        ) -> Result<Uuid, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO users (id, muid, email, first_name, last_name) VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(muid)
            .bind(email)
            .bind(first_name)
            .bind(last_name)
            .fetch_one(self.pool)
            .await
        }

        /// Insert a task row, returning the new task id.
        pub async fn insert_task(&self, hashtag: &str, title: &str) -> Result<Uuid, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO task_list (id, hashtag, title, karma) VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(hashtag)
            .bind(title)
            .bind(Some(0_i32))
            .fetch_one(self.pool)
            .await
        }
    }

    pub const TEST_JWT_SECRET: &str = "karma-test-secret";

    /// Auth state with a fixed signing secret.
    pub fn test_auth_state() -> AuthState {
        let config = AuthConfig {
            issuer: "https://karma.test".into(),
            audience: "karma-api".into(),
            access_token_ttl_secs: 900,
            jwt_secret: TEST_JWT_SECRET.into(),
            jwt_kid: None,
        };
        let jwt = JwtService::from_config(&config).expect("jwt service");
        AuthState::new(config, jwt)
    }

    /// `Authorization` header carrying a token for `user_id` with `roles`.
    pub fn bearer_header(
        auth: &AuthState,
        user_id: Uuid,
        muid: &str,
        roles: &[&str],
    ) -> Header<'static> {
        let roles: Vec<String> = roles.iter().map(|role| role.to_string()).collect();
        let token = auth
            .jwt_service
            .issue_access_token(user_id, muid, &roles)
            .expect("issue test token");
        Header::new("Authorization", format!("Bearer {}", token.token))
    }

    pub mod fakes {
        use crate::vouchers::batch::NewVoucher;
        use crate::vouchers::directory::{TaskLookup, UserLookup};
        use crate::vouchers::notify::{
            Mailer, NotifyError, OutgoingMail, VoucherCard, VoucherRenderer,
        };
        use crate::vouchers::store::{PersistError, PersistedVoucher, VoucherStore};
        use rocket_db_pools::sqlx;
        use std::collections::HashSet;
        use std::sync::Mutex;
        use uuid::Uuid;

        #[derive(Default)]
        struct MemoryState {
            users: Vec<UserLookup>,
            tasks: Vec<TaskLookup>,
            seeded_codes: Vec<String>,
            vouchers: Vec<NewVoucher>,
            short_read_back: bool,
            rolled_back: usize,
            lookup_calls: usize,
            existing_code_reads: usize,
            insert_calls: usize,
        }

        /// In-memory [`VoucherStore`] that counts calls.
        #[derive(Default)]
        pub struct MemoryVoucherStore {
            state: Mutex<MemoryState>,
        }

        impl MemoryVoucherStore {
            fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
                self.state.lock().expect("memory store lock poisoned")
            }

            pub fn add_user(
                &self,
                muid: &str,
                email: &str,
                first_name: &str,
                last_name: Option<&str>,
            ) -> Uuid {
                let id = Uuid::new_v4();
                self.state().users.push(UserLookup {
                    id,
                    muid: muid.to_string(),
                    email: email.to_string(),
                    first_name: first_name.to_string(),
                    last_name: last_name.map(str::to_string),
                });
                id
            }

            pub fn add_task(&self, hashtag: &str) -> Uuid {
                let id = Uuid::new_v4();
                self.state().tasks.push(TaskLookup {
                    id,
                    hashtag: hashtag.to_string(),
                });
                id
            }

            /// Mark `code` as already taken by an earlier import.
            pub fn add_code(&self, code: impl Into<String>) {
                self.state().seeded_codes.push(code.into());
            }

            /// Make the next insert read back one row fewer than it wrote.
            pub fn simulate_short_read_back(&self) {
                self.state().short_read_back = true;
            }

            /// Vouchers that were written and then undone by a failed read-back.
            pub fn rolled_back(&self) -> usize {
                self.state().rolled_back
            }

            /// Codes of vouchers committed through this store, in insert order.
            pub fn codes(&self) -> Vec<String> {
                self.state()
                    .vouchers
                    .iter()
                    .map(|voucher| voucher.code.clone())
                    .collect()
            }

            pub fn lookup_calls(&self) -> usize {
                self.state().lookup_calls
            }

            pub fn existing_code_reads(&self) -> usize {
                self.state().existing_code_reads
            }

            pub fn insert_calls(&self) -> usize {
                self.state().insert_calls
            }
        }

        #[rocket::async_trait]
        impl VoucherStore for MemoryVoucherStore {
            async fn users_by_muid(&self, muids: &[String]) -> Result<Vec<UserLookup>, sqlx::Error> {
                let mut state = self.state();
                state.lookup_calls += 1;
                Ok(state
                    .users
                    .iter()
                    .filter(|user| muids.contains(&user.muid))
                    .cloned()
                    .collect())
            }

            async fn tasks_by_hashtag(
                &self,
                hashtags: &[String],
            ) -> Result<Vec<TaskLookup>, sqlx::Error> {
                let mut state = self.state();
                state.lookup_calls += 1;
                Ok(state
                    .tasks
                    .iter()
                    .filter(|task| hashtags.contains(&task.hashtag))
                    .cloned()
                    .collect())
            }

            async fn existing_codes(&self) -> Result<HashSet<String>, sqlx::Error> {
                let mut state = self.state();
                state.existing_code_reads += 1;
                Ok(state
                    .seeded_codes
                    .iter()
                    .cloned()
                    .chain(state.vouchers.iter().map(|voucher| voucher.code.clone()))
                    .collect())
            }

            async fn insert_verified(
                &self,
                batch: &[NewVoucher],
            ) -> Result<Vec<PersistedVoucher>, PersistError> {
                let mut state = self.state();
                state.insert_calls += 1;

                for voucher in batch {
                    let taken = state.seeded_codes.contains(&voucher.code)
                        || state.vouchers.iter().any(|v| v.code == voucher.code);
                    if taken {
                        return Err(PersistError::CodeConflict(voucher.code.clone()));
                    }
                }

                // Write first, then read back and verify, undoing the write on mismatch.
                let committed = state.vouchers.len();
                state.vouchers.extend(batch.iter().cloned());

                let mut persisted: Vec<PersistedVoucher> = state.vouchers[committed..]
                    .iter()
                    .map(|voucher| PersistedVoucher {
                        code: voucher.code.clone(),
                        muid: voucher.muid.clone(),
                        month: voucher.month.clone(),
                        week: voucher.week.clone(),
                        karma: voucher.karma,
                        hashtag: state
                            .tasks
                            .iter()
                            .find(|task| task.id == voucher.task_id)
                            .map(|task| task.hashtag.clone())
                            .unwrap_or_default(),
                    })
                    .collect();
                if state.short_read_back {
                    state.short_read_back = false;
                    persisted.pop();
                }

                if persisted.len() != batch.len() {
                    state.vouchers.truncate(committed);
                    state.rolled_back += batch.len();
                    return Err(PersistError::CountMismatch {
                        expected: batch.len(),
                        found: persisted.len(),
                    });
                }

                // Read-back order is unspecified; reverse it so callers cannot rely on it.
                persisted.reverse();
                Ok(persisted)
            }
        }

        /// Renderer returning fixed bytes and remembering every card.
        pub struct StaticRenderer {
            bytes: Vec<u8>,
            cards: Mutex<Vec<VoucherCard>>,
        }

        impl StaticRenderer {
            pub fn new(bytes: Vec<u8>) -> Self {
                Self {
                    bytes,
                    cards: Mutex::new(Vec::new()),
                }
            }

            pub fn cards(&self) -> Vec<VoucherCard> {
                self.cards.lock().expect("renderer lock poisoned").clone()
            }
        }

        #[rocket::async_trait]
        impl VoucherRenderer for StaticRenderer {
            async fn render(&self, card: &VoucherCard) -> Result<Vec<u8>, NotifyError> {
                self.cards
                    .lock()
                    .expect("renderer lock poisoned")
                    .push(card.clone());
                Ok(self.bytes.clone())
            }
        }

        /// Mailer that records sent mail and refuses one address.
        #[derive(Default)]
        pub struct RecordingMailer {
            reject: Option<String>,
            sent: Mutex<Vec<OutgoingMail>>,
        }

        impl RecordingMailer {
            pub fn rejecting(address: &str) -> Self {
                Self {
                    reject: Some(address.to_string()),
                    sent: Mutex::new(Vec::new()),
                }
            }

            pub fn sent(&self) -> Vec<OutgoingMail> {
                self.sent.lock().expect("mailer lock poisoned").clone()
            }
        }

        #[rocket::async_trait]
        impl Mailer for RecordingMailer {
            async fn send(&self, mail: OutgoingMail) -> Result<(), NotifyError> {
                if self.reject.as_deref() == Some(mail.to.as_str()) {
                    return Err(NotifyError::Transport(format!(
                        "recipient {} rejected",
                        mail.to
                    )));
                }
                self.sent.lock().expect("mailer lock poisoned").push(mail);
                Ok(())
            }
        }
    }

    pub mod database {
        use crate::db::MIGRATOR;
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("container runtime unavailable: {0}")]
            Container(#[from] TestcontainersError),
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
        }

        /// Ephemeral database backed by a disposable Postgres container.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Launch a container, create a fresh database and migrate it.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine").with_wait_for(
                    WaitFor::message_on_stderr("database system is ready to accept connections"),
                );

                let container = image
                    .with_env_var("POSTGRES_DB", "karma")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres")
                    .start()
                    .await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let admin_options: PgConnectOptions = admin_url.parse()?;
                let admin_options = admin_options.log_statements(LevelFilter::Off);
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("karma_{}", Uuid::new_v4().simple());
                sqlx::query(&format!(
                    "CREATE DATABASE \"{}\" TEMPLATE template0",
                    database_name
                ))
                .execute(&admin_pool)
                .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(admin_options.clone().database(&database_name))
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                    container: Some(container),
                })
            }

            /// Connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        auth: Option<AuthState>,
        services: Option<VoucherServices>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        pub fn manage_auth(mut self, auth: AuthState) -> Self {
            self.auth = Some(auth);
            self
        }

        pub fn manage_voucher_services(mut self, services: VoucherServices) -> Self {
            self.services = Some(services);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment).register("/", catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }
            if let Some(auth) = self.auth {
                rocket = rocket.manage(auth);
            }
            if let Some(services) = self.services {
                rocket = rocket.manage(services);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
