use super::BotError;
use crate::store::{Store, UserRecord};

/// A user whose record is known to exist in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub username: String,
    pub record: UserRecord,
}

/// Get-or-create the record for `username`.
///
/// - unknown user: a fresh record is persisted, and the username joins the
///   broadcast registry when the numeric id is known;
/// - known user without a numeric id: the observed id is backfilled and the
///   username registered;
/// - otherwise the stored record is returned untouched.
///
/// The read-then-write is not atomic: two concurrent first messages from the
/// same user may both create the record (last write wins). The registry is a
/// set, so double registration is harmless.
pub async fn resolve(
    store: &dyn Store,
    username: Option<&str>,
    observed_user_id: Option<i64>,
) -> Result<ResolvedUser, BotError> {
    let username = username
        .filter(|u| !u.is_empty())
        .ok_or(BotError::UserIdentityMissing)?;

    let record = match store.get_user(username).await? {
        None => {
            let record = UserRecord::new(observed_user_id);
            store.put_user(username, &record).await?;
            if observed_user_id.is_some() {
                store.add_to_registry(username).await?;
            }
            tracing::info!(username, "Registered new user");
            record
        }
        Some(mut record) if record.user_id.is_none() && observed_user_id.is_some() => {
            record.user_id = observed_user_id;
            store.put_user(username, &record).await?;
            store.add_to_registry(username).await?;
            tracing::debug!(username, "Backfilled user id");
            record
        }
        Some(record) => record,
    };

    Ok(ResolvedUser {
        username: username.to_string(),
        record,
    })
}
