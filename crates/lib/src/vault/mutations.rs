//! Encrypt, send, then persist.
//!
//! A mutation only touches the store after the server confirmed it, and then
//! stores exactly the record the server returned.

use std::slice;

use tracing::{Instrument, debug, info_span};

use super::{SessionError, VaultCoordinator};
use crate::{
    Result,
    crypto::{CryptoError, SessionHandle},
    types::{EncryptedRecord, RecordId, UserId},
    views::{CredentialView, SendView, VaultView},
};

impl VaultCoordinator {
    /// Create a credential. Returns the id the server confirmed.
    pub async fn create_credential(&self, view: CredentialView) -> Result<RecordId> {
        let (_, record) = self.write(view, None).await?;
        Ok(record.id)
    }

    /// Replace credential `id`. Returns the id the server confirmed.
    pub async fn update_credential(&self, id: &RecordId, view: CredentialView) -> Result<RecordId> {
        let (_, record) = self.write(view, Some(id)).await?;
        Ok(record.id)
    }

    /// Create a send and return it as stored.
    ///
    /// The stored record is decrypted again for the return value. If that
    /// fails the call fails, but the record stays stored.
    pub async fn create_send(&self, view: SendView) -> Result<SendView> {
        let (session, record) = self.write(view, None).await?;
        self.decrypt_send(&session, &record).await
    }

    /// Replace send `id` and return it as stored.
    pub async fn update_send(&self, id: &RecordId, view: SendView) -> Result<SendView> {
        let (session, record) = self.write(view, Some(id)).await?;
        self.decrypt_send(&session, &record).await
    }

    fn active_session(&self) -> Result<(UserId, SessionHandle)> {
        let active = self
            .inner
            .ctx
            .active_user()
            .ok_or(SessionError::NoActiveUser)?;
        let session = self
            .inner
            .ctx
            .sessions
            .handle(&active.user_id)
            .ok_or_else(|| SessionError::VaultLocked {
                user_id: active.user_id.clone(),
            })?;
        Ok((active.user_id, session))
    }

    async fn write<V: VaultView>(
        &self,
        mut view: V,
        id: Option<&RecordId>,
    ) -> Result<(SessionHandle, EncryptedRecord)> {
        let (user_id, session) = self.active_session()?;
        let ctx = &self.inner.ctx;
        let kind = V::KIND;
        let span = info_span!("mutation", kind = %kind, user_id = %user_id);

        async move {
            if let Some(id) = id {
                view.set_id(id.clone());
            }
            let encrypted = ctx
                .crypto
                .encrypt(&session, V::KIND, &view.into_plaintext())
                .await?;

            let confirmed = match id {
                None => {
                    self.inner
                        .remote
                        .create_record(&user_id, V::KIND, &encrypted)
                        .await?
                }
                Some(id) => {
                    self.inner
                        .remote
                        .update_record(&user_id, V::KIND, id, &encrypted)
                        .await?
                }
            };

            ctx.store
                .upsert(&user_id, V::KIND, confirmed.clone())
                .await?;
            debug!(record_id = %confirmed.id, "Stored server-confirmed record");
            Ok::<_, crate::Error>((session, confirmed))
        }
        .instrument(span)
        .await
    }

    async fn decrypt_send(&self, session: &SessionHandle, record: &EncryptedRecord) -> Result<SendView> {
        let views = self
            .inner
            .ctx
            .crypto
            .decrypt(session, SendView::KIND, slice::from_ref(record))
            .await?;
        views
            .into_iter()
            .next()
            .and_then(SendView::from_plaintext)
            .ok_or_else(|| {
                CryptoError::DecryptionFailed {
                    reason: format!("No send view decrypted from record '{}'", record.id),
                }
                .into()
            })
    }
}
