//! Decrypted credential overrides for the exchange registry
//!
//! The newest active row per exchange wins. A row that fails to decrypt is
//! skipped with a warning; the registry then falls back to the file-held
//! credentials for that exchange.

use std::collections::HashMap;

use anyhow::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::warn;

use crate::exchange::crypto::decrypt_credential;
use crate::exchange::registry::CredentialOverride;
use crate::store::entity::exchange_credentials;

pub async fn load_credential_overrides(
    db: &DatabaseConnection,
    passphrase: &str,
) -> Result<HashMap<String, CredentialOverride>> {
    let rows = exchange_credentials::Entity::find()
        .filter(exchange_credentials::Column::Active.eq(true))
        .order_by_asc(exchange_credentials::Column::CreatedAt)
        .all(db)
        .await?;

    let mut overrides = HashMap::new();
    for row in rows {
        let decrypted = decrypt_row(&row, passphrase);
        match decrypted {
            Ok(creds) => {
                // later (newer) rows replace earlier ones
                overrides.insert(row.exchange.clone(), creds);
            }
            Err(err) => {
                warn!(exchange = %row.exchange, id = row.id, error = %err,
                    "skipping credential row that failed to decrypt");
            }
        }
    }
    Ok(overrides)
}

fn decrypt_row(
    row: &exchange_credentials::Model,
    passphrase: &str,
) -> Result<CredentialOverride> {
    Ok(CredentialOverride {
        api_key: decrypt_credential(&row.api_key_enc, passphrase)?,
        api_secret: decrypt_credential(&row.api_secret_enc, passphrase)?,
        passphrase: row
            .passphrase_enc
            .as_deref()
            .map(|enc| decrypt_credential(enc, passphrase))
            .transpose()?,
    })
}
