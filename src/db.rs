//! MongoDB bootstrap for the task, user, and audit collections.

use log::info;
use mongodb::{options::ClientOptions, Client, Database};

/// Parses the connection string and hands back the application database.
/// Errors bubble up so startup can refuse to run without a store instead of
/// panicking mid-init.
pub async fn connect(uri: &str, db_name: &str) -> mongodb::error::Result<Database> {
    let options = ClientOptions::parse(uri).await?;
    let client = Client::with_options(options)?;
    info!("MongoDB client ready for database {}", db_name);
    Ok(client.database(db_name))
}
