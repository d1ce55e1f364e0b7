use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use karma_api::auth::{AuthConfig, JwtService, Role};

#[derive(Parser, Debug)]
#[command(
    name = "issue_token",
    about = "Mint a dashboard access token for an existing user"
)]
struct Args {
    /// muid of the user the token is issued for.
    #[arg(long)]
    muid: String,

    /// Role to embed in the token (`Admins`, `Fellow` or `Associate`). Repeatable.
    #[arg(long = "role", default_value = "Admins")]
    roles: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let muid = args.muid.trim();

    let known: Vec<&str> = Role::VOUCHER_MANAGERS.iter().map(Role::as_str).collect();
    if let Some(unknown) = args.roles.iter().find(|role| !known.contains(&role.as_str())) {
        writeln!(
            io::stderr(),
            "error: unsupported role '{unknown}'. Use one of: {}.",
            known.join(", ")
        )?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let user_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE muid = $1")
        .bind(muid)
        .fetch_optional(&pool)
        .await?;
    pool.close().await;

    let Some(user_id) = user_id else {
        writeln!(io::stderr(), "error: no user with muid '{muid}'.")?;
        std::process::exit(1);
    };

    let config = AuthConfig::from_env()?;
    let jwt = JwtService::from_config(&config)?;
    let token = jwt.issue_access_token(user_id, muid, &args.roles)?;

    log::info!("issued token for {} expiring at {}", muid, token.expires_at);
    writeln!(io::stdout(), "{}", token.token)?;
    Ok(())
}
